//! Writes catalog playlists onto the device as M3U files.

use super::engine::SyncEngine;
use super::SyncError;
use crate::media::paths::sanitize_component;
use tracing::{debug, error, info};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PlaylistReport {
    pub written: usize,
    pub entries: usize,
    pub errors: Vec<String>,
}

impl SyncEngine {
    /// One `Playlists/<name>.m3u` per playlist, listing only tracks that are
    /// on the device, as paths relative to the device root.
    pub fn write_playlists(&self) -> Result<PlaylistReport, SyncError> {
        let mut report = PlaylistReport::default();
        let playlists = self.catalog.get_all_playlists()?;
        if playlists.is_empty() {
            info!("No playlists in catalog");
            return Ok(report);
        }

        let dir = self.layout.playlists_root();
        std::fs::create_dir_all(&dir).map_err(|source| SyncError::Setup {
            path: dir.clone(),
            source,
        })?;

        for playlist in playlists {
            let tracks = self.catalog.get_playlist_tracks(&playlist.playlist_id)?;
            if tracks.is_empty() {
                continue;
            }

            let mut content = String::from("#EXTM3U\n");
            let mut entries = 0;
            for track in tracks.iter().filter(|t| t.synced) {
                let Some(device_path) = track.device_path.as_deref() else {
                    continue;
                };
                match self.layout.device_relative(device_path) {
                    Some(relative) => {
                        content.push_str(&relative);
                        content.push('\n');
                        entries += 1;
                    }
                    None => debug!("{} is not below the device root", device_path),
                }
            }

            let name = sanitize_component(&playlist.name, &playlist.playlist_id);
            let path = dir.join(format!("{}.m3u", name));
            match std::fs::write(&path, content) {
                Ok(()) => {
                    info!("Generated {:?} ({} entries)", path, entries);
                    report.written += 1;
                    report.entries += entries;
                }
                Err(e) => {
                    error!("Failed to write {:?}: {}", path, e);
                    report.errors.push(format!("{}: {}", path.display(), e));
                }
            }
        }
        Ok(report)
    }
}
