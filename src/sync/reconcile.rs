//! Device-match reconciliation: adopt files already on the device.

use super::engine::SyncEngine;
use super::SyncError;
use crate::media::paths::{find_audio_files, normalize_path};
use tracing::{debug, info, warn};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub scanned: usize,
    /// Files whose identity is in the catalog (whether or not already marked).
    pub matched: usize,
    /// Of `matched`, how many changed sync state.
    pub newly_marked: usize,
    pub unknown: usize,
    pub unreadable: usize,
}

impl SyncEngine {
    /// Marks every catalogued track found on the device as synced at the
    /// path it was found. Nothing is converted or copied.
    pub fn reconcile_device(&self) -> Result<ReconcileReport, SyncError> {
        let music_root = self.layout.music_root();
        let mut report = ReconcileReport::default();
        if !music_root.is_dir() {
            warn!("Device music directory {:?} not found", music_root);
            return Ok(report);
        }

        info!("Reconciling device files under {:?}", music_root);
        for file in find_audio_files(&music_root, self.settings.min_device_file_size) {
            report.scanned += 1;
            let identity = match self.tags.read_identity(&file) {
                Ok(Some(identity)) => identity,
                Ok(None) => {
                    report.unreadable += 1;
                    continue;
                }
                Err(e) => {
                    debug!("Skipping {:?}: {}", file, e);
                    report.unreadable += 1;
                    continue;
                }
            };
            match self.catalog.get_track_by_identity(identity.trim())? {
                Some(track) => {
                    report.matched += 1;
                    if self.catalog.mark_synced(&track.identity, &normalize_path(&file))? {
                        report.newly_marked += 1;
                        info!("Matched and marked synced: {:?}", file);
                    }
                }
                None => report.unknown += 1,
            }
        }

        info!(
            "Reconciliation complete. {} matched ({} newly marked), {} unknown, {} unreadable",
            report.matched, report.newly_marked, report.unknown, report.unreadable
        );
        Ok(report)
    }
}
