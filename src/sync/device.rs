use super::SyncError;
use crate::catalog::Track;
use crate::media::paths::{layout_relative_path, normalize_path, normalize_path_str};
use std::path::{Path, PathBuf};

/// Directory layout on the mounted device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceLayout {
    root: PathBuf,
    music_dir: String,
    playlists_dir: String,
}

impl DeviceLayout {
    pub fn new(
        root: impl Into<PathBuf>,
        music_dir: impl Into<String>,
        playlists_dir: impl Into<String>,
    ) -> Self {
        Self {
            root: root.into(),
            music_dir: music_dir.into(),
            playlists_dir: playlists_dir.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn music_root(&self) -> PathBuf {
        self.root.join(&self.music_dir)
    }

    pub fn playlists_root(&self) -> PathBuf {
        self.root.join(&self.playlists_dir)
    }

    /// Requires the device root to be mounted and creates the music and
    /// playlist directories below it.
    pub fn prepare(&self) -> Result<(), SyncError> {
        if !self.root.is_dir() {
            return Err(SyncError::DeviceMissing(self.root.clone()));
        }
        for dir in [self.music_root(), self.playlists_root()] {
            std::fs::create_dir_all(&dir).map_err(|source| SyncError::Setup {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(())
    }

    /// `music-root/SafeArtist/SafeAlbum/SafeTitle.ext` for a track.
    pub fn track_destination(&self, track: &Track, extension: &str) -> PathBuf {
        self.music_root().join(layout_relative_path(
            &track.artist,
            &track.album,
            &track.title,
            extension,
        ))
    }

    /// `path` relative to the device root, with forward slashes, or `None`
    /// when it lies elsewhere.
    pub fn device_relative(&self, path: &str) -> Option<String> {
        let root = normalize_path(&self.root);
        let path = normalize_path_str(path);
        let rest = path.strip_prefix(&root)?;
        let rest = if root.ends_with('/') {
            rest
        } else {
            rest.strip_prefix('/')?
        };
        if rest.is_empty() {
            None
        } else {
            Some(rest.to_string())
        }
    }

    /// `path` relative to the music root, used to mirror device files
    /// into the recovery area.
    pub fn music_relative(&self, path: &Path) -> Option<PathBuf> {
        path.strip_prefix(self.music_root())
            .ok()
            .map(Path::to_path_buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_root_is_a_setup_failure() {
        let layout = DeviceLayout::new("/definitely/not/mounted", "Music", "Playlists");
        assert!(matches!(layout.prepare(), Err(SyncError::DeviceMissing(_))));
    }

    #[test]
    fn prepare_creates_music_and_playlist_dirs() {
        let dir = TempDir::new().unwrap();
        let layout = DeviceLayout::new(dir.path(), "Music", "Playlists");
        layout.prepare().unwrap();
        assert!(dir.path().join("Music").is_dir());
        assert!(dir.path().join("Playlists").is_dir());
    }

    #[test]
    fn destination_uses_sanitized_components() {
        let layout = DeviceLayout::new("/mnt/dap", "Music", "Playlists");
        let track = Track::new("rec-1", "What?", "AC/DC", "");
        assert_eq!(
            layout.track_destination(&track, "flac"),
            PathBuf::from("/mnt/dap/Music/AC_DC/Unknown Album/What_.flac")
        );
    }

    #[test]
    fn device_relative_paths_use_forward_slashes() {
        let layout = DeviceLayout::new("/mnt/dap", "Music", "Playlists");
        assert_eq!(
            layout.device_relative("/mnt/dap/Music/A/B/C.flac").as_deref(),
            Some("Music/A/B/C.flac")
        );
        assert_eq!(layout.device_relative("/mnt/dapper/Music/C.flac"), None);
        assert_eq!(layout.device_relative("/elsewhere/C.flac"), None);
    }
}
