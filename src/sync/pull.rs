//! Reverse pass: copy device-only files back into the recovery area.

use super::engine::SyncEngine;
use super::SyncError;
use crate::media::paths::find_audio_files;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PullReport {
    pub scanned: usize,
    /// Known identity whose local file still exists.
    pub present_locally: usize,
    pub copied: Vec<PathBuf>,
    /// A copy already sits in the recovery area from an earlier pass.
    pub already_recovered: usize,
    pub errors: Vec<String>,
}

impl SyncEngine {
    /// Copies every device file that has no live local counterpart into the
    /// recovery area, mirroring its path under the device music root. Device
    /// files are only ever read.
    pub fn pull_from_device(&self) -> Result<PullReport, SyncError> {
        let music_root = self.layout.music_root();
        let mut report = PullReport::default();
        if !music_root.is_dir() {
            warn!("Device music directory {:?} not found, skipping pull", music_root);
            return Ok(report);
        }

        let local_paths: HashMap<String, String> = self
            .catalog
            .get_identity_to_local_path_map()?
            .into_iter()
            .map(|(identity, path)| (identity.trim().to_ascii_lowercase(), path))
            .collect();
        let recovery_root = &self.settings.recovery_dir;

        for file in find_audio_files(&music_root, self.settings.min_device_file_size) {
            report.scanned += 1;
            let identity = self.tags.read_identity(&file).ok().flatten();
            let has_local = identity
                .and_then(|id| local_paths.get(&id.trim().to_ascii_lowercase()))
                .map(|local| Path::new(local).exists())
                .unwrap_or(false);
            if has_local {
                report.present_locally += 1;
                continue;
            }

            let relative = match self.layout.music_relative(&file) {
                Some(relative) => relative,
                None => continue,
            };
            let target = recovery_root.join(&relative);
            if target.exists() {
                report.already_recovered += 1;
                continue;
            }
            match copy_into(&file, &target) {
                Ok(()) => {
                    info!("Imported {:?} -> {:?}", file, target);
                    report.copied.push(target);
                }
                Err(e) => {
                    error!("Failed to import {:?}: {}", file, e);
                    report.errors.push(format!("{}: {}", file.display(), e));
                }
            }
        }

        if !report.copied.is_empty() {
            info!(
                "Restored {} track(s) from the device into {:?}; scan the library to add them",
                report.copied.len(),
                recovery_root
            );
        }
        Ok(report)
    }
}

fn copy_into(source: &Path, target: &Path) -> std::io::Result<()> {
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::copy(source, target)?;
    Ok(())
}
