use std::future::Future;

use tokio_util::sync::CancellationToken;

use super::{needs_update, Synchronizer};
use crate::assets::{bgm_asset_name, jacket_asset_name};
use crate::db::DocumentKind;
use crate::error::{AppError, Result};
use crate::models::{ChartId, SongDetail, SongSummary};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SongPassReport {
    pub checked: usize,
    pub updated: usize,
    pub failed: usize,
}

impl Synchronizer {
    /// Refresh every song whose stored snapshot differs from the catalog index.
    pub async fn sync_all_songs(&self, cancel: &CancellationToken) -> Result<SongPassReport> {
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }

        let catalog = self
            .retry
            .run(cancel, || self.catalog.fetch_catalog_summary())
            .await
            .map_err(|e| {
                if !e.is_cancelled() {
                    tracing::error!("failed to fetch song catalog: {}", e);
                }
                e
            })?;

        let mut entries: Vec<(u32, &SongSummary)> = catalog
            .iter()
            .filter_map(|(key, summary)| key.parse().ok().map(|id| (id, summary)))
            .collect();
        entries.sort_by_key(|(id, _)| *id);

        let mut report = SongPassReport::default();
        for (id, fresh) in entries {
            if cancel.is_cancelled() {
                return Err(AppError::Cancelled);
            }
            report.checked += 1;

            let existing = match self.store.get_song_by_id(id).await {
                Ok(existing) => existing,
                Err(e) => {
                    tracing::warn!("failed to load stored song {}: {}", id, e);
                    None
                }
            };
            if !needs_update(existing.as_ref().map(|song| &song.summary), fresh) {
                continue;
            }

            match self.sync_song(id, cancel).await {
                Ok(()) => report.updated += 1,
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    tracing::error!("failed to update song {}: {}", id, e);
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Fetch and store one song, then fill in whatever assets and charts are
    /// missing. Succeeds once the song itself is stored; asset and chart
    /// failures are only logged.
    pub async fn sync_song(&self, id: u32, cancel: &CancellationToken) -> Result<()> {
        tracing::info!("updating song {}", id);

        let detail = match self
            .retry
            .run(cancel, || self.catalog.fetch_song_detail(id))
            .await
        {
            Ok(detail) => detail,
            Err(e) => {
                self.quarantine_if_malformed(DocumentKind::Song, &id.to_string(), &e)
                    .await;
                return Err(e);
            }
        };

        self.store.upsert_song(id, &detail).await?;
        tracing::info!("updated song {}", id);

        self.sync_song_assets(id, &detail, cancel).await;
        self.sync_missing_charts(id, &detail, cancel).await;

        tracing::debug!("checked assets and charts for song {}", id);
        Ok(())
    }

    /// `Ok(false)` when upstream does not know the song.
    pub async fn sync_song_by_id(&self, id: u32, cancel: &CancellationToken) -> Result<bool> {
        match self.sync_song(id, cancel).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub(super) async fn sync_song_assets(&self, id: u32, detail: &SongDetail, cancel: &CancellationToken) {
        for image in detail.summary.jackets() {
            self.ensure_asset(&jacket_asset_name(image), cancel, || {
                self.catalog.fetch_jacket(id, detail, image)
            })
            .await;
        }

        self.ensure_asset(&bgm_asset_name(id), cancel, || {
            self.catalog.fetch_bgm(id, detail)
        })
        .await;
    }

    async fn sync_missing_charts(&self, id: u32, detail: &SongDetail, cancel: &CancellationToken) {
        for difficulty in detail.summary.difficulty_labels() {
            let chart_id = ChartId::new(id, difficulty);
            match self.store.get_chart_by_id(chart_id).await {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(e) => tracing::warn!("failed to load stored chart {}: {}", chart_id, e),
            }

            match self
                .retry
                .run(cancel, || self.catalog.fetch_chart(id, difficulty))
                .await
            {
                Ok(chart) => match self.store.upsert_chart(chart_id, &chart).await {
                    Ok(()) => tracing::info!("updated chart {}", chart_id),
                    Err(e) => tracing::error!("failed to store chart {}: {}", chart_id, e),
                },
                Err(e) if e.is_not_found() => {
                    tracing::debug!("chart {} does not exist", chart_id);
                }
                Err(e) if e.is_cancelled() => return,
                Err(e) => {
                    self.quarantine_if_malformed(DocumentKind::Chart, &chart_id.to_string(), &e)
                        .await;
                    tracing::error!("failed to fetch chart {}: {}", chart_id, e);
                }
            }
        }
    }

    /// Download `name` unless the asset cache already has it. Best effort.
    async fn ensure_asset<F, Fut>(&self, name: &str, cancel: &CancellationToken, fetch: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Vec<u8>>>,
    {
        match self.assets.contains(name).await {
            Ok(true) => return,
            Ok(false) => {}
            Err(e) => {
                tracing::warn!("failed to check asset {}: {}", name, e);
                return;
            }
        }

        tracing::info!("downloading missing asset {}", name);
        match self.retry.run(cancel, fetch).await {
            Ok(data) => match self.assets.put(name, &data).await {
                Ok(()) => tracing::info!("stored asset {}", name),
                Err(e) => tracing::error!("failed to store asset {}: {}", name, e),
            },
            Err(e) if e.is_cancelled() => {}
            Err(e) => tracing::error!("failed to download asset {}: {}", name, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{malformed, transient, Call, Harness};
    use super::*;
    use crate::db::RecordStore;
    use crate::models::DifficultyLabel;
    use serde_json::json;

    fn song(value: serde_json::Value) -> SongDetail {
        serde_json::from_value(value).unwrap()
    }

    fn song_ten() -> SongDetail {
        song(json!({
            "tag": "normal",
            "bandId": 1,
            "jacketImage": ["Tokimeki"],
            "musicTitle": ["ときめきエクスペリエンス！", "Tokimeki Experience!"],
            "publishedAt": ["1462071600000", null],
            "difficulty": {
                "0": {"playLevel": 7},
                "1": {"playLevel": 13},
                "2": {"playLevel": 18},
                "3": {"playLevel": 24}
            },
            "bpm": {"3": [{"bpm": 180, "start": 0, "end": 120}]}
        }))
    }

    #[tokio::test]
    async fn fetches_charts_only_for_listed_difficulties() {
        let h = Harness::new().await;
        h.catalog.add_song(10, song_ten());
        for difficulty in [
            DifficultyLabel::Easy,
            DifficultyLabel::Normal,
            DifficultyLabel::Hard,
            DifficultyLabel::Expert,
        ] {
            h.catalog.add_chart(10, difficulty);
        }

        h.sync.sync_song(10, &CancellationToken::new()).await.unwrap();

        assert_eq!(h.catalog.count(|c| matches!(c, Call::Chart(10, _))), 4);
        assert_eq!(
            h.catalog
                .count(|c| *c == Call::Chart(10, DifficultyLabel::Special)),
            0
        );
        for difficulty in [DifficultyLabel::Easy, DifficultyLabel::Expert] {
            assert!(h
                .store
                .get_chart_by_id(ChartId::new(10, difficulty))
                .await
                .unwrap()
                .is_some());
        }
        assert!(h.assets.contains("musicjacket/Tokimeki.png").await.unwrap());
        assert_eq!(h.assets.get("sound/bgm010.mp3").await.unwrap(), b"bgm:10");
    }

    #[tokio::test]
    async fn empty_difficulty_map_tries_every_label() {
        let h = Harness::new().await;
        h.catalog.add_song(3, song(json!({"musicTitle": ["x"]})));

        h.sync.sync_song(3, &CancellationToken::new()).await.unwrap();

        assert_eq!(h.catalog.count(|c| matches!(c, Call::Chart(3, _))), 5);
    }

    #[tokio::test]
    async fn existing_charts_and_assets_are_not_refetched() {
        let h = Harness::new().await;
        h.catalog.add_song(10, song_ten());
        h.catalog.add_chart(10, DifficultyLabel::Expert);
        let cancel = CancellationToken::new();

        h.sync.sync_song(10, &cancel).await.unwrap();
        let first = h.catalog.calls().len();
        h.sync.sync_song(10, &cancel).await.unwrap();
        let second: Vec<Call> = h.catalog.calls()[first..].to_vec();

        // Only the detail and the charts that do not exist upstream are asked again.
        assert!(second.contains(&Call::Song(10)));
        assert!(!second.contains(&Call::Chart(10, DifficultyLabel::Expert)));
        assert!(!second.iter().any(|c| matches!(c, Call::Jacket(_) | Call::Bgm(_))));
    }

    #[tokio::test]
    async fn not_exist_chart_is_not_retried() {
        let h = Harness::new().await;
        h.catalog.add_song(10, song_ten());

        h.sync.sync_song(10, &CancellationToken::new()).await.unwrap();

        assert_eq!(
            h.catalog
                .count(|c| *c == Call::Chart(10, DifficultyLabel::Hard)),
            1
        );
    }

    #[tokio::test]
    async fn detail_failure_leaves_store_untouched() {
        let h = Harness::new().await;
        h.catalog.add_song(10, song_ten());
        for _ in 0..3 {
            h.catalog
                .fail(Call::Song(10), transient("https://bestdori.com/api/songs/10.json"));
        }

        let err = h
            .sync
            .sync_song(10, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(h.catalog.count(|c| *c == Call::Song(10)), 3);
        assert_eq!(h.store.get_song_by_id(10).await.unwrap(), None);
    }

    #[tokio::test]
    async fn asset_failure_does_not_fail_the_song() {
        let h = Harness::new().await;
        h.catalog.add_song(10, song_ten());
        h.catalog.fail(
            Call::Bgm(10),
            AppError::PermanentRequest {
                status: 403,
                url: "https://bestdori.com/assets/jp/sound/bgm010_rip/bgm010.mp3".into(),
            },
        );

        h.sync.sync_song(10, &CancellationToken::new()).await.unwrap();
        assert!(!h.assets.contains("sound/bgm010.mp3").await.unwrap());
        assert!(h.store.get_song_by_id(10).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn malformed_detail_is_quarantined() {
        let h = Harness::new().await;
        h.catalog.add_song(11, song_ten());
        h.catalog
            .fail(Call::Song(11), malformed("song 11", "{\"musicTitle\": "));

        let err = h
            .sync
            .sync_song(11, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::MalformedDocument { .. }));

        let quarantined = h.store.quarantined().await.unwrap();
        assert_eq!(quarantined.len(), 1);
        assert_eq!(quarantined[0].kind, "song");
        assert_eq!(quarantined[0].record_id, "11");
        assert_eq!(quarantined[0].body, "{\"musicTitle\": ");
    }

    #[tokio::test]
    async fn sync_song_by_id_reports_unknown_song() {
        let h = Harness::new().await;
        let cancel = CancellationToken::new();
        assert!(!h.sync.sync_song_by_id(99, &cancel).await.unwrap());

        h.catalog.add_song(10, song_ten());
        assert!(h.sync.sync_song_by_id(10, &cancel).await.unwrap());
    }

    #[tokio::test]
    async fn pass_skips_fresh_songs() {
        let h = Harness::new().await;
        h.catalog.add_song(10, song_ten());
        h.catalog.add_song(2, song(json!({"musicTitle": ["two"]})));
        h.catalog
            .summary
            .lock()
            .unwrap()
            .insert("not-a-number".into(), SongSummary::default());
        let cancel = CancellationToken::new();

        let first = h.sync.sync_all_songs(&cancel).await.unwrap();
        assert_eq!(first.checked, 2);
        assert_eq!(first.updated, 2);

        let songs: Vec<Call> = h
            .catalog
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Song(_)))
            .collect();
        assert_eq!(songs, vec![Call::Song(2), Call::Song(10)]);

        let second = h.sync.sync_all_songs(&cancel).await.unwrap();
        assert_eq!(second, SongPassReport { checked: 2, updated: 0, failed: 0 });
        assert_eq!(h.catalog.count(|c| matches!(c, Call::Song(_))), 2);
    }

    #[tokio::test]
    async fn pass_counts_failures_and_continues() {
        let h = Harness::new().await;
        h.catalog.add_song(1, song(json!({"musicTitle": ["one"]})));
        h.catalog.add_song(2, song(json!({"musicTitle": ["two"]})));
        h.catalog.fail(
            Call::Song(1),
            AppError::PermanentRequest {
                status: 400,
                url: "https://bestdori.com/api/songs/1.json".into(),
            },
        );

        let report = h
            .sync
            .sync_all_songs(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report, SongPassReport { checked: 2, updated: 1, failed: 1 });
        assert!(h.store.get_song_by_id(2).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn cancellation_stops_the_pass() {
        let h = Harness::new().await;
        h.catalog.add_song(1, song(json!({"musicTitle": ["one"]})));
        h.catalog.add_song(2, song(json!({"musicTitle": ["two"]})));
        let cancel = CancellationToken::new();
        *h.catalog.cancel_on.lock().unwrap() = Some((Call::Song(1), cancel.clone()));

        let err = h.sync.sync_all_songs(&cancel).await.unwrap_err();
        assert!(err.is_cancelled());
        // Song 1 was already in flight and still got stored.
        assert!(h.store.get_song_by_id(1).await.unwrap().is_some());
        assert_eq!(h.catalog.count(|c| *c == Call::Song(2)), 0);
    }

    #[tokio::test]
    async fn failed_catalog_fetch_ends_the_pass() {
        let h = Harness::new().await;
        h.catalog.fail(
            Call::Summary,
            AppError::PermanentRequest {
                status: 403,
                url: "https://bestdori.com/api/songs/all.8.json".into(),
            },
        );
        assert!(h
            .sync
            .sync_all_songs(&CancellationToken::new())
            .await
            .is_err());
    }
}
