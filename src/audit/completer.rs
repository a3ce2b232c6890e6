use crate::catalog::{CatalogStore, IncompleteAlbum, QueueRequest};
use crate::media::MetadataProvider;
use anyhow::{anyhow, bail, Context, Result};
use std::sync::Arc;
use tracing::{error, info};

/// When a gap is big enough to ask for the whole album instead of single
/// tracks. Either condition is enough.
#[derive(Clone, Debug, PartialEq)]
pub struct AuditThresholds {
    pub max_missing_tracks: usize,
    pub max_missing_ratio: f64,
}

impl Default for AuditThresholds {
    fn default() -> Self {
        Self {
            max_missing_tracks: 3,
            max_missing_ratio: 0.6,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MissingTrack {
    pub disc: u32,
    pub track: u32,
    pub title: String,
    pub recording_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MissingReport {
    pub release_id: String,
    pub artist: String,
    pub album: String,
    pub total: u32,
    pub have: usize,
    /// Sorted by (disc, track).
    pub missing: Vec<MissingTrack>,
}

impl MissingReport {
    pub fn decision(&self, thresholds: &AuditThresholds) -> Option<QueueDecision> {
        if self.missing.is_empty() {
            return None;
        }
        let ratio = self.missing.len() as f64 / self.total.max(1) as f64;
        if self.missing.len() > thresholds.max_missing_tracks
            || ratio > thresholds.max_missing_ratio
        {
            Some(QueueDecision::WholeAlbum)
        } else {
            Some(QueueDecision::PerTrack)
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueDecision {
    WholeAlbum,
    PerTrack,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueOutcome {
    pub release_id: String,
    pub decision: Option<QueueDecision>,
    pub missing: usize,
    pub queued: usize,
    pub already_queued: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CompleteAllReport {
    pub albums: usize,
    pub complete: usize,
    pub queued: usize,
    pub already_queued: usize,
    /// `(release_id, message)` for albums that could not be processed.
    pub failures: Vec<(String, String)>,
}

pub struct AlbumAuditor {
    catalog: Arc<dyn CatalogStore>,
    metadata: Arc<dyn MetadataProvider>,
    thresholds: AuditThresholds,
}

impl AlbumAuditor {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        metadata: Arc<dyn MetadataProvider>,
        thresholds: AuditThresholds,
    ) -> Self {
        Self {
            catalog,
            metadata,
            thresholds,
        }
    }

    /// Incomplete albums according to the totals already recorded.
    pub fn audit_library(&self) -> Result<Vec<IncompleteAlbum>> {
        let albums = self.catalog.get_incomplete_albums()?;
        for album in &albums {
            info!(
                "Incomplete: {} - {} ({}/{}, {} missing)",
                album.artist, album.album, album.have, album.total, album.missing
            );
        }
        info!("{} incomplete album(s)", albums.len());
        Ok(albums)
    }

    /// Fetches the authoritative tracklist, records its total and computes
    /// what is not held locally. Queues nothing.
    pub async fn missing_for_release(&self, release_id: &str) -> Result<MissingReport> {
        let summary = self
            .catalog
            .get_release_summary(release_id)?
            .ok_or_else(|| anyhow!("No local artist/album info for release {}", release_id))?;

        let tracklist = self
            .metadata
            .release_tracklist(release_id)
            .await
            .with_context(|| format!("Failed to fetch tracklist for {}", release_id))?;
        if tracklist.tracks.is_empty() {
            bail!("Release {} has no tracks", release_id);
        }
        let total = tracklist.total_tracks();
        self.catalog
            .update_album_metadata(release_id, &tracklist.title, total)?;

        let local = self.catalog.get_local_positions(release_id)?;
        let missing: Vec<MissingTrack> = tracklist
            .tracks
            .iter()
            .filter(|(position, _)| !local.contains(*position))
            .map(|(&(disc, track), entry)| MissingTrack {
                disc,
                track,
                title: entry.title.clone(),
                recording_id: entry.recording_id.clone(),
            })
            .collect();

        Ok(MissingReport {
            release_id: release_id.to_string(),
            artist: summary.artist,
            album: summary.album,
            total,
            have: total as usize - missing.len(),
            missing,
        })
    }

    /// Queues the gap of one release: a single whole-album request when the
    /// gap is large, one request per missing track otherwise. Requests
    /// already in the queue are not added again.
    pub async fn queue_missing_for_release(&self, release_id: &str) -> Result<QueueOutcome> {
        let report = self.missing_for_release(release_id).await?;
        let decision = report.decision(&self.thresholds);
        let mut outcome = QueueOutcome {
            release_id: release_id.to_string(),
            decision,
            missing: report.missing.len(),
            queued: 0,
            already_queued: 0,
        };
        info!(
            "Checking: {} - {} ({} of {} missing)",
            report.artist,
            report.album,
            report.missing.len(),
            report.total
        );

        let requests = match decision {
            None => {
                info!("Album is already complete");
                return Ok(outcome);
            }
            Some(QueueDecision::WholeAlbum) => {
                vec![QueueRequest::album_bundle(&report.artist, &report.album)]
            }
            Some(QueueDecision::PerTrack) => report
                .missing
                .iter()
                .map(|m| QueueRequest::single_track(m.recording_id.clone(), &report.artist, &m.title))
                .collect(),
        };

        let origin = format!("COMPLETER_{}", release_id);
        for request in requests {
            if self
                .catalog
                .find_queue_item_by_query(request.kind(), request.query())?
                .is_some()
                || !self.catalog.enqueue_download(&request, Some(&origin))?
            {
                outcome.already_queued += 1;
            } else {
                outcome.queued += 1;
            }
        }
        info!(
            "Queued {} request(s) for {} ({} already queued)",
            outcome.queued, release_id, outcome.already_queued
        );
        Ok(outcome)
    }

    /// Runs [`Self::queue_missing_for_release`] for every incomplete album,
    /// one at a time. A failing album is recorded and skipped.
    pub async fn complete_all(&self) -> Result<CompleteAllReport> {
        let albums = self.catalog.get_incomplete_albums()?;
        let mut report = CompleteAllReport {
            albums: albums.len(),
            ..Default::default()
        };
        info!("Found {} incomplete albums", albums.len());

        for (i, album) in albums.iter().enumerate() {
            info!("[{}/{}] Processing {}", i + 1, albums.len(), album.album);
            match self.queue_missing_for_release(&album.release_id).await {
                Ok(outcome) => {
                    if outcome.decision.is_none() {
                        report.complete += 1;
                    }
                    report.queued += outcome.queued;
                    report.already_queued += outcome.already_queued;
                }
                Err(e) => {
                    error!("Failed to complete {}: {:#}", album.release_id, e);
                    report
                        .failures
                        .push((album.release_id.clone(), format!("{:#}", e)));
                }
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{QueueKind, QueueStatus, SqliteCatalogStore, Track};
    use crate::media::{MetadataError, ReleaseTracklist, TracklistEntry};
    use async_trait::async_trait;
    use std::collections::BTreeMap;

    struct TenTracks;

    #[async_trait]
    impl MetadataProvider for TenTracks {
        async fn release_tracklist(
            &self,
            release_id: &str,
        ) -> Result<ReleaseTracklist, MetadataError> {
            if release_id == "rel-broken" {
                return Err(MetadataError::NotFound(release_id.to_string()));
            }
            let tracks: BTreeMap<(u32, u32), TracklistEntry> = (1..=10)
                .map(|n| {
                    (
                        (1, n),
                        TracklistEntry {
                            title: format!("Track {}", n),
                            recording_id: Some(format!("{}-rec-{}", release_id, n)),
                        },
                    )
                })
                .collect();
            Ok(ReleaseTracklist {
                release_id: release_id.to_string(),
                title: "Album".into(),
                tracks,
            })
        }

        async fn recording_releases(&self, _recording_id: &str) -> Result<Vec<String>, MetadataError> {
            Ok(vec![])
        }

        async fn recordings_by_isrc(&self, _isrc: &str) -> Result<Vec<String>, MetadataError> {
            Ok(vec![])
        }
    }

    fn catalog_holding(release_id: &str, held: u32) -> Arc<SqliteCatalogStore> {
        let catalog = Arc::new(SqliteCatalogStore::in_memory().unwrap());
        add_release(&catalog, release_id, held);
        catalog
    }

    fn add_release(catalog: &SqliteCatalogStore, release_id: &str, held: u32) {
        for n in 1..=held {
            catalog
                .upsert_track(
                    &Track::new(format!("{}-rec-{}", release_id, n), format!("Track {}", n), "Artist", "Album")
                        .with_local_path(format!("/lib/{}/{}.flac", release_id, n))
                        .with_release(release_id, 1, n),
                )
                .unwrap();
        }
        catalog.update_album_metadata(release_id, "Album", 10).unwrap();
    }

    fn auditor(catalog: Arc<SqliteCatalogStore>) -> AlbumAuditor {
        AlbumAuditor::new(catalog, Arc::new(TenTracks), AuditThresholds::default())
    }

    #[tokio::test]
    async fn large_gap_queues_one_album_request() {
        let catalog = catalog_holding("rel-1", 6);
        let outcome = auditor(catalog.clone())
            .queue_missing_for_release("rel-1")
            .await
            .unwrap();
        assert_eq!(outcome.decision, Some(QueueDecision::WholeAlbum));
        assert_eq!(outcome.queued, 1);

        let queued = catalog.list_downloads_by_status(QueueStatus::Pending).unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].request.kind(), QueueKind::AlbumBundle);
        assert_eq!(queued[0].request.query(), "Artist - Album");
    }

    #[tokio::test]
    async fn small_gap_queues_each_missing_track() {
        let catalog = catalog_holding("rel-1", 8);
        let outcome = auditor(catalog.clone())
            .queue_missing_for_release("rel-1")
            .await
            .unwrap();
        assert_eq!(outcome.decision, Some(QueueDecision::PerTrack));
        assert_eq!(outcome.queued, 2);

        let queries: Vec<String> = catalog
            .list_downloads_by_status(QueueStatus::Pending)
            .unwrap()
            .iter()
            .map(|item| item.request.query().to_string())
            .collect();
        assert_eq!(queries, vec!["Artist - Track 9", "Artist - Track 10"]);
    }

    #[tokio::test]
    async fn repeated_audit_queues_nothing_new() {
        let catalog = catalog_holding("rel-1", 8);
        let auditor = auditor(catalog.clone());
        auditor.queue_missing_for_release("rel-1").await.unwrap();
        let second = auditor.queue_missing_for_release("rel-1").await.unwrap();
        assert_eq!(second.queued, 0);
        assert_eq!(second.already_queued, 2);
        assert_eq!(
            catalog.list_downloads_by_status(QueueStatus::Pending).unwrap().len(),
            2
        );
    }

    #[tokio::test]
    async fn missing_report_lists_gaps_in_order() {
        let catalog = catalog_holding("rel-1", 7);
        let report = auditor(catalog).missing_for_release("rel-1").await.unwrap();
        assert_eq!(report.have, 7);
        let positions: Vec<u32> = report.missing.iter().map(|m| m.track).collect();
        assert_eq!(positions, vec![8, 9, 10]);
        assert_eq!(report.decision(&AuditThresholds::default()), Some(QueueDecision::PerTrack));
    }

    #[tokio::test]
    async fn complete_all_records_failures_and_continues() {
        let catalog = catalog_holding("rel-broken", 2);
        add_release(&catalog, "rel-ok", 9);
        let report = auditor(catalog).complete_all().await.unwrap();
        assert_eq!(report.albums, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, "rel-broken");
        assert_eq!(report.queued, 1);
    }

    #[test]
    fn ratio_alone_can_trigger_whole_album() {
        let report = MissingReport {
            release_id: "r".into(),
            artist: "a".into(),
            album: "b".into(),
            total: 4,
            have: 1,
            missing: (2..=4)
                .map(|n| MissingTrack {
                    disc: 1,
                    track: n,
                    title: String::new(),
                    recording_id: None,
                })
                .collect(),
        };
        assert_eq!(report.decision(&AuditThresholds::default()), Some(QueueDecision::WholeAlbum));
    }
}
