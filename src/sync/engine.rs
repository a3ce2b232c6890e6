use super::device::DeviceLayout;
use super::forward::ForwardReport;
use super::playlists::PlaylistReport;
use super::pull::PullReport;
use super::reconcile::ReconcileReport;
use super::{SyncError, SyncSettings};
use crate::catalog::{CatalogStore, SyncSelection};
use crate::confirm::ConfirmationPrompt;
use crate::downloads::{DownloadRunner, DownloadSummary};
use crate::media::{Converter, TagIo};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// What one sync invocation should do.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncOptions {
    pub selection: SyncSelection,
    /// Match files already on the device before the forward pass.
    pub reconcile_device: bool,
    /// Work through the download queue before the forward pass.
    pub run_downloads: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            selection: SyncSelection::Playlists,
            reconcile_device: false,
            run_downloads: true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncStage {
    Reconcile,
    Downloads,
    Forward,
    Pull,
    Playlists,
    Backup,
}

impl fmt::Display for SyncStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncStage::Reconcile => "reconcile",
            SyncStage::Downloads => "downloads",
            SyncStage::Forward => "forward sync",
            SyncStage::Pull => "pull",
            SyncStage::Playlists => "playlists",
            SyncStage::Backup => "backup",
        };
        f.write_str(name)
    }
}

/// Outcome of every stage that ran. A stage that failed as a whole has no
/// report and an entry in `stage_errors` instead.
#[derive(Debug, Default)]
pub struct SyncSummary {
    pub reconcile: Option<ReconcileReport>,
    pub downloads: Option<DownloadSummary>,
    pub forward: Option<ForwardReport>,
    pub pull: Option<PullReport>,
    pub playlists: Option<PlaylistReport>,
    pub backup: Option<PathBuf>,
    pub stage_errors: Vec<(SyncStage, String)>,
}

impl SyncSummary {
    pub fn is_clean(&self) -> bool {
        self.stage_errors.is_empty()
            && self
                .forward
                .as_ref()
                .map(|f| f.failed.is_empty())
                .unwrap_or(true)
    }

    fn record<T>(&mut self, stage: SyncStage, result: Result<T, SyncError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                error!("Sync stage '{}' failed: {}", stage, e);
                self.stage_errors.push((stage, e.to_string()));
                None
            }
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SyncStats {
    pub total: usize,
    pub synced: usize,
    pub pending: usize,
    pub percentage: f64,
    pub playlists: usize,
}

pub struct SyncEngine {
    pub(super) catalog: Arc<dyn CatalogStore>,
    pub(super) tags: Arc<dyn TagIo>,
    pub(super) converter: Arc<dyn Converter>,
    pub(super) prompt: Arc<dyn ConfirmationPrompt>,
    pub(super) downloads: Option<Arc<DownloadRunner>>,
    pub(super) layout: DeviceLayout,
    pub(super) settings: SyncSettings,
}

impl SyncEngine {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        tags: Arc<dyn TagIo>,
        converter: Arc<dyn Converter>,
        prompt: Arc<dyn ConfirmationPrompt>,
        layout: DeviceLayout,
        settings: SyncSettings,
    ) -> Self {
        Self {
            catalog,
            tags,
            converter,
            prompt,
            downloads: None,
            layout,
            settings,
        }
    }

    pub fn with_download_runner(mut self, runner: Arc<DownloadRunner>) -> Self {
        self.downloads = Some(runner);
        self
    }

    pub fn layout(&self) -> &DeviceLayout {
        &self.layout
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Runs every requested stage in order. Only a device that cannot be
    /// prepared fails the call; stage failures land in the summary.
    pub async fn run(&self, options: &SyncOptions) -> Result<SyncSummary, SyncError> {
        info!("Starting device sync at {:?}", self.layout.root());
        self.layout.prepare()?;
        let mut summary = SyncSummary::default();

        if options.reconcile_device {
            let result = self.reconcile_device();
            summary.reconcile = summary.record(SyncStage::Reconcile, result);
        }

        if options.run_downloads {
            if let Some(runner) = &self.downloads {
                let result = runner.run_queue().await.map_err(SyncError::from);
                summary.downloads = summary.record(SyncStage::Downloads, result);
            }
        }

        let result = self.forward_sync(&options.selection).await;
        summary.forward = summary.record(SyncStage::Forward, result);

        let result = self.pull_from_device();
        summary.pull = summary.record(SyncStage::Pull, result);

        let result = self.write_playlists();
        summary.playlists = summary.record(SyncStage::Playlists, result);

        let result = self.backup_catalog();
        summary.backup = summary.record(SyncStage::Backup, result).flatten();

        info!(
            "Device sync finished with {} failed stage(s)",
            summary.stage_errors.len()
        );
        Ok(summary)
    }

    pub fn sync_stats(&self) -> Result<SyncStats, SyncError> {
        let stats = self.catalog.library_stats()?;
        Ok(SyncStats {
            total: stats.local_tracks,
            synced: stats.synced_tracks,
            pending: stats.local_tracks.saturating_sub(stats.synced_tracks),
            percentage: stats.sync_percentage(),
            playlists: stats.playlists,
        })
    }
}
