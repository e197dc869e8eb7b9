use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::chart::dominant_bpm;

/// Arrangement variant whose tempo map is used for the representative BPM.
const PREFERRED_BPM_VARIANT: &str = "3";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DifficultyLabel {
    Easy,
    Normal,
    Hard,
    Expert,
    Special,
}

impl DifficultyLabel {
    pub const ALL: [DifficultyLabel; 5] = [
        DifficultyLabel::Easy,
        DifficultyLabel::Normal,
        DifficultyLabel::Hard,
        DifficultyLabel::Expert,
        DifficultyLabel::Special,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DifficultyLabel::Easy => "easy",
            DifficultyLabel::Normal => "normal",
            DifficultyLabel::Hard => "hard",
            DifficultyLabel::Expert => "expert",
            DifficultyLabel::Special => "special",
        }
    }

    /// Index used as the key of the catalog's difficulty map.
    pub fn index(&self) -> u8 {
        match self {
            DifficultyLabel::Easy => 0,
            DifficultyLabel::Normal => 1,
            DifficultyLabel::Hard => 2,
            DifficultyLabel::Expert => 3,
            DifficultyLabel::Special => 4,
        }
    }

    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    /// Parse a difficulty map key such as `"3"`.
    pub fn from_key(key: &str) -> Option<Self> {
        key.parse::<u8>().ok().and_then(Self::from_index)
    }
}

impl fmt::Display for DifficultyLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DifficultyLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|label| label.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown difficulty: {}", s))
    }
}

/// Regional game server, ordered as the catalog orders its per-server arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Server {
    Jp,
    En,
    Tw,
    Cn,
    Kr,
}

impl Server {
    pub const ALL: [Server; 5] = [Server::Jp, Server::En, Server::Tw, Server::Cn, Server::Kr];

    pub fn as_str(&self) -> &'static str {
        match self {
            Server::Jp => "jp",
            Server::En => "en",
            Server::Tw => "tw",
            Server::Cn => "cn",
            Server::Kr => "kr",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BpmSegment {
    pub bpm: f64,
    pub start: f64,
    pub end: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DifficultyInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub play_level: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<Vec<Option<String>>>,
    /// Detail-only fields (note counts, score thresholds, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Lightweight per-song snapshot as listed by the catalog index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SongSummary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub band_id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jacket_image: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub music_title: Option<Vec<Option<String>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<Vec<Option<String>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<Vec<Option<String>>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub difficulty: BTreeMap<String, DifficultyInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<BTreeMap<String, u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bpm: Option<BTreeMap<String, Vec<BpmSegment>>>,
    /// Fields without a typed slot. For a song detail this also holds the
    /// detail-only fields, e.g. `howToGet`.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SongSummary {
    pub fn jackets(&self) -> &[String] {
        self.jacket_image.as_deref().unwrap_or_default()
    }

    /// Difficulties advertised by the difficulty map, or every label when the
    /// map is missing.
    pub fn difficulty_labels(&self) -> Vec<DifficultyLabel> {
        if self.difficulty.is_empty() {
            return DifficultyLabel::ALL.to_vec();
        }
        let mut labels: Vec<_> = self
            .difficulty
            .keys()
            .filter_map(|key| DifficultyLabel::from_key(key))
            .collect();
        labels.sort();
        labels.dedup();
        labels
    }

    /// First server on which the song was published, defaulting to JP.
    pub fn preferred_server(&self) -> Server {
        self.published_at
            .as_ref()
            .and_then(|dates| dates.iter().position(Option::is_some))
            .and_then(|index| Server::ALL.get(index).copied())
            .unwrap_or(Server::Jp)
    }

    /// Representative tempo: the BPM held longest in the preferred arrangement,
    /// falling back to the first non-empty one.
    pub fn main_bpm(&self) -> f64 {
        let Some(variants) = &self.bpm else {
            return 0.0;
        };
        let segments = variants
            .get(PREFERRED_BPM_VARIANT)
            .filter(|segs| !segs.is_empty())
            .or_else(|| variants.values().find(|segs| !segs.is_empty()));
        let Some(segments) = segments else {
            return 0.0;
        };
        dominant_bpm(
            segments
                .iter()
                .map(|seg| (seg.bpm, seg.end - seg.start)),
        )
        .unwrap_or(0.0)
    }
}

/// Full song document as served by the per-song endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SongDetail {
    #[serde(flatten)]
    pub summary: SongSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lyricist: Option<Vec<Option<String>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub composer: Option<Vec<Option<String>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arranger: Option<Vec<Option<String>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u32>,
}
