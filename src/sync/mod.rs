//! Keeps the playback device in agreement with the catalog.
//!
//! One invocation runs, in order: device-match reconciliation (optional),
//! the download queue (optional), the forward pass, the reverse pull,
//! playlist materialization and the catalog backup. Stages are independent;
//! a failed stage is recorded and the next one still runs.

mod backup;
mod device;
mod engine;
mod forward;
mod playlists;
mod pull;
mod reconcile;

pub use device::DeviceLayout;
pub use engine::{SyncEngine, SyncOptions, SyncStage, SyncStats, SyncSummary};
pub use forward::{ForwardReport, ItemFailure};
pub use playlists::PlaylistReport;
pub use pull::PullReport;
pub use reconcile::ReconcileReport;

use crate::media::ConversionSpec;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Device root {0:?} is not an accessible directory")]
    DeviceMissing(PathBuf),

    /// A collaborator executable is not available; the batch cannot go on.
    #[error("Collaborator unavailable: {0}")]
    CollaboratorMissing(String),

    #[error("Failed to prepare {path:?}: {source}")]
    Setup {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Store error: {0}")]
    Store(#[from] anyhow::Error),
}

/// Knobs for the sync engine.
#[derive(Clone, Debug)]
pub struct SyncSettings {
    pub conversion: ConversionSpec,
    /// Forward passes with more candidates than this ask for confirmation first.
    pub confirm_threshold: usize,
    /// Device files smaller than this are ignored by reconciliation and pull.
    pub min_device_file_size: u64,
    /// Where device-only files (and displaced device files) are copied to.
    pub recovery_dir: PathBuf,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            conversion: ConversionSpec::default(),
            confirm_threshold: 50,
            min_device_file_size: 1024,
            recovery_dir: PathBuf::from("Restored_From_Device"),
        }
    }
}
