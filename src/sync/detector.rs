use std::collections::BTreeMap;

use crate::models::{BpmSegment, DifficultyInfo, SongSummary};

/// Whether the stored snapshot of a song is out of date with the catalog index.
///
/// Stored songs come from the detail endpoint, whose difficulty entries carry
/// extra fields the index never lists, so difficulties are compared on the
/// fields both sides share. Untyped fields are compared only where the index
/// lists them, since the stored side also holds detail-only fields.
pub fn needs_update(existing: Option<&SongSummary>, fresh: &SongSummary) -> bool {
    let Some(existing) = existing else {
        return true;
    };

    if Comparable::from(existing) != Comparable::from(fresh) {
        return true;
    }

    if fresh
        .extra
        .iter()
        .any(|(key, value)| existing.extra.get(key) != Some(value))
    {
        return true;
    }

    existing.difficulty.len() != fresh.difficulty.len()
        || fresh.difficulty.iter().any(|(key, info)| {
            existing
                .difficulty
                .get(key)
                .map_or(true, |old| !same_difficulty(old, info))
        })
}

fn same_difficulty(a: &DifficultyInfo, b: &DifficultyInfo) -> bool {
    a.play_level == b.play_level && a.published_at == b.published_at
}

/// Every typed summary field except the difficulty map.
#[derive(PartialEq)]
struct Comparable<'a> {
    tag: &'a Option<String>,
    band_id: &'a Option<u32>,
    jacket_image: &'a Option<Vec<String>>,
    music_title: &'a Option<Vec<Option<String>>>,
    published_at: &'a Option<Vec<Option<String>>>,
    closed_at: &'a Option<Vec<Option<String>>>,
    length: &'a Option<f64>,
    notes: &'a Option<BTreeMap<String, u32>>,
    bpm: &'a Option<BTreeMap<String, Vec<BpmSegment>>>,
}

impl<'a> From<&'a SongSummary> for Comparable<'a> {
    fn from(s: &'a SongSummary) -> Self {
        let SongSummary {
            tag,
            band_id,
            jacket_image,
            music_title,
            published_at,
            closed_at,
            difficulty: _,
            length,
            notes,
            bpm,
            extra: _,
        } = s;
        Self {
            tag,
            band_id,
            jacket_image,
            music_title,
            published_at,
            closed_at,
            length,
            notes,
            bpm,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn summary(value: serde_json::Value) -> SongSummary {
        serde_json::from_value(value).unwrap()
    }

    fn base() -> serde_json::Value {
        json!({
            "tag": "normal",
            "bandId": 1,
            "jacketImage": ["yes_bang_dream"],
            "musicTitle": ["Yes! BanG_Dream!", "Yes! BanG_Dream!", null, null, null],
            "publishedAt": ["1462071600000", "1490335200000", null, null, null],
            "closedAt": [null, null, null, null, null],
            "difficulty": {
                "0": {"playLevel": 5},
                "1": {"playLevel": 10},
                "2": {"playLevel": 15},
                "3": {"playLevel": 21}
            },
            "length": 106.2,
            "notes": {"0": 112, "1": 190, "2": 296, "3": 437},
            "bpm": {"3": [{"bpm": 185, "start": 0, "end": 106.2}]}
        })
    }

    #[test]
    fn missing_record_is_stale() {
        assert!(needs_update(None, &summary(base())));
    }

    #[test]
    fn identical_snapshot_is_fresh() {
        let s = summary(base());
        assert!(!needs_update(Some(&s), &s.clone()));
    }

    #[test]
    fn detail_only_difficulty_fields_are_ignored() {
        let mut stored = base();
        stored["difficulty"]["3"]["notesQuantity"] = json!(1);
        stored["difficulty"]["3"]["rateQuantity"] = json!(1);
        assert!(!needs_update(Some(&summary(stored)), &summary(base())));
    }

    #[test]
    fn changed_fields_are_stale() {
        let cases: Vec<Box<dyn Fn(&mut serde_json::Value)>> = vec![
            Box::new(|v| v["musicTitle"][2] = json!("Yes! BanG_Dream!")),
            Box::new(|v| v["closedAt"][0] = json!("1700000000000")),
            Box::new(|v| v["length"] = json!(107.0)),
            Box::new(|v| v["difficulty"]["3"]["playLevel"] = json!(22)),
            Box::new(|v| v["difficulty"]["4"] = json!({"playLevel": 26})),
            Box::new(|v| v["difficulty"]["4"] = json!({"playLevel": 26, "publishedAt": ["1"]})),
            Box::new(|v| v["notes"]["3"] = json!(438)),
        ];
        let stored = summary(base());
        for mutate in cases {
            let mut fresh = base();
            mutate(&mut fresh);
            assert!(needs_update(Some(&stored), &summary(fresh)));
        }
    }

    #[test]
    fn new_index_field_is_stale_until_stored() {
        let mut fresh = base();
        fresh["lyricsVideo"] = json!({"jp": "abc"});
        assert!(needs_update(Some(&summary(base())), &summary(fresh.clone())));

        let mut stored = fresh.clone();
        stored["howToGet"] = json!(["Clear the event", null]);
        assert!(!needs_update(Some(&summary(stored.clone())), &summary(fresh.clone())));

        stored["lyricsVideo"] = json!({"jp": "xyz"});
        assert!(needs_update(Some(&summary(stored)), &summary(fresh)));
    }

    #[test]
    fn removed_difficulty_is_stale() {
        let mut fresh = base();
        fresh["difficulty"].as_object_mut().unwrap().remove("0");
        assert!(needs_update(Some(&summary(base())), &summary(fresh)));
    }

    #[test]
    fn absent_to_present_is_stale() {
        let mut stored = base();
        stored.as_object_mut().unwrap().remove("length");
        assert!(needs_update(Some(&summary(stored)), &summary(base())));
    }
}
