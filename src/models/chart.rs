use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::song::DifficultyLabel;

/// Composite chart identifier, rendered as `{songId}-{difficulty}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChartId {
    pub song_id: u32,
    pub difficulty: DifficultyLabel,
}

impl ChartId {
    pub fn new(song_id: u32, difficulty: DifficultyLabel) -> Self {
        Self {
            song_id,
            difficulty,
        }
    }
}

impl fmt::Display for ChartId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.song_id, self.difficulty)
    }
}

/// Raw chart payload: a list of timing and note objects.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Chart(pub Vec<Value>);

impl Chart {
    pub fn stats(&self) -> Option<ChartStats> {
        ChartStats::from_notes(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChartStats {
    /// Seconds from beat zero to the last note.
    pub time: f64,
    pub notes: u32,
    #[serde(rename = "mainBPM")]
    pub main_bpm: f64,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ChartEvent {
    #[serde(rename = "BPM")]
    Bpm { beat: f64, bpm: f64 },
    Single { beat: f64 },
    Directional { beat: f64 },
    Slide { connections: Vec<Connection> },
    Long { connections: Vec<Connection> },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct Connection {
    beat: f64,
    #[serde(default)]
    hidden: bool,
}

impl ChartStats {
    /// Returns `None` when the payload does not parse as a chart or carries no
    /// tempo information.
    pub fn from_notes(raw: &[Value]) -> Option<Self> {
        let events = raw
            .iter()
            .map(ChartEvent::deserialize)
            .collect::<Result<Vec<_>, _>>()
            .ok()?;

        let mut tempo: Vec<(f64, f64)> = Vec::new();
        let mut notes = 0u32;
        let mut last_beat = 0f64;
        for event in &events {
            match event {
                ChartEvent::Bpm { beat, bpm } => tempo.push((*beat, *bpm)),
                ChartEvent::Single { beat } | ChartEvent::Directional { beat } => {
                    notes += 1;
                    last_beat = last_beat.max(*beat);
                }
                ChartEvent::Slide { connections } | ChartEvent::Long { connections } => {
                    for conn in connections {
                        last_beat = last_beat.max(conn.beat);
                        if !conn.hidden {
                            notes += 1;
                        }
                    }
                }
                ChartEvent::Other => {}
            }
        }
        tempo.retain(|&(_, bpm)| bpm > 0.0);
        if tempo.is_empty() {
            return None;
        }
        tempo.sort_by(|a, b| a.0.total_cmp(&b.0));

        // (bpm, seconds) for every tempo span up to the last note
        let mut spans = Vec::with_capacity(tempo.len());
        let mut time = 0f64;
        for (i, &(beat, bpm)) in tempo.iter().enumerate() {
            let start = if i == 0 { 0.0 } else { beat };
            let end = tempo
                .get(i + 1)
                .map(|next| next.0)
                .unwrap_or(f64::INFINITY)
                .min(last_beat);
            if end <= start {
                continue;
            }
            let seconds = (end - start) * 60.0 / bpm;
            time += seconds;
            spans.push((bpm, seconds));
        }

        Some(Self {
            time,
            notes,
            main_bpm: dominant_bpm(spans).unwrap_or(tempo[0].1),
        })
    }
}

/// Tempo with the largest accumulated positive duration. Ties go to the tempo
/// seen first.
pub fn dominant_bpm(spans: impl IntoIterator<Item = (f64, f64)>) -> Option<f64> {
    let mut totals: Vec<(f64, f64)> = Vec::new();
    for (bpm, duration) in spans {
        if duration <= 0.0 {
            continue;
        }
        match totals.iter_mut().find(|(b, _)| *b == bpm) {
            Some((_, total)) => *total += duration,
            None => totals.push((bpm, duration)),
        }
    }
    let mut best: Option<(f64, f64)> = None;
    for (bpm, total) in totals {
        if best.map_or(true, |(_, max)| total > max) {
            best = Some((bpm, total));
        }
    }
    best.map(|(bpm, _)| bpm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn chart_id_format() {
        assert_eq!(
            ChartId::new(10, DifficultyLabel::Expert).to_string(),
            "10-expert"
        );
    }

    #[test]
    fn stats_for_simple_chart() {
        let chart: Chart = serde_json::from_value(json!([
            {"type": "BPM", "bpm": 120, "beat": 0},
            {"type": "Single", "lane": 3, "beat": 1},
            {"type": "Directional", "lane": 2, "beat": 2, "direction": "Left", "width": 1},
            {"type": "Slide", "connections": [
                {"lane": 1, "beat": 4},
                {"lane": 2, "beat": 5, "hidden": true},
                {"lane": 3, "beat": 6}
            ]},
            {"type": "BPM", "bpm": 240, "beat": 6},
            {"type": "Long", "connections": [
                {"lane": 5, "beat": 8},
                {"lane": 5, "beat": 14}
            ]},
            {"type": "System", "beat": 0}
        ]))
        .unwrap();

        let stats = chart.stats().unwrap();
        assert_eq!(stats.notes, 6);
        // 6 beats at 120 (3s) + 8 beats at 240 (2s)
        assert!((stats.time - 5.0).abs() < 1e-9);
        assert_eq!(stats.main_bpm, 120.0);
    }

    #[test]
    fn stats_require_tempo() {
        let chart: Chart =
            serde_json::from_value(json!([{"type": "Single", "lane": 3, "beat": 1}])).unwrap();
        assert!(chart.stats().is_none());

        let broken: Chart = serde_json::from_value(json!([{"type": "Single"}])).unwrap();
        assert!(broken.stats().is_none());
    }

    #[test]
    fn dominant_bpm_ties_go_to_first() {
        assert_eq!(dominant_bpm([(100.0, 5.0), (200.0, 5.0)]), Some(100.0));
        assert_eq!(
            dominant_bpm([(100.0, 5.0), (200.0, 3.0), (200.0, 3.0)]),
            Some(200.0)
        );
        assert_eq!(dominant_bpm([(100.0, 0.0)]), None);
    }
}
