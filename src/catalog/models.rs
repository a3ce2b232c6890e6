//! Entities persisted by the catalog.

use std::fmt;

/// A recording held (or wanted) by the local collection.
///
/// `identity` is the external recording identifier and never changes once a
/// row exists. `synced` is only ever true together with a `device_path`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Track {
    pub identity: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    /// Secondary external code, e.g. an ISRC.
    pub secondary_code: Option<String>,
    pub local_path: Option<String>,
    pub device_path: Option<String>,
    pub synced: bool,
    pub release_id: Option<String>,
    pub disc_number: Option<u32>,
    pub track_number: Option<u32>,
}

impl Track {
    pub fn new(
        identity: impl Into<String>,
        title: impl Into<String>,
        artist: impl Into<String>,
        album: impl Into<String>,
    ) -> Self {
        Track {
            identity: identity.into(),
            title: title.into(),
            artist: artist.into(),
            album: album.into(),
            secondary_code: None,
            local_path: None,
            device_path: None,
            synced: false,
            release_id: None,
            disc_number: None,
            track_number: None,
        }
    }

    pub fn with_local_path(mut self, path: impl Into<String>) -> Self {
        self.local_path = Some(path.into());
        self
    }

    pub fn with_release(mut self, release_id: impl Into<String>, disc: u32, track: u32) -> Self {
        self.release_id = Some(release_id.into());
        self.disc_number = Some(disc);
        self.track_number = Some(track);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Album {
    pub release_id: String,
    pub title: String,
    pub total_tracks: u32,
}

/// One row of the completeness report.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IncompleteAlbum {
    pub artist: String,
    pub album: String,
    pub release_id: String,
    pub have: u32,
    pub total: u32,
    pub missing: u32,
}

/// Display names recorded for a release, taken from its tracks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReleaseSummary {
    pub release_id: String,
    pub artist: String,
    pub album: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Playlist {
    pub playlist_id: String,
    pub name: String,
    pub source_url: Option<String>,
}

/// All candidate paths recorded for one identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DuplicateGroup {
    pub identity: String,
    pub paths: Vec<String>,
}

/// Which unsynced tracks a forward pass should consider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncSelection {
    /// Tracks referenced by any playlist.
    Playlists,
    /// The whole library.
    Library,
    /// Tracks whose artist contains the given text (case-insensitive).
    Artist(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueKind {
    SingleTrack,
    AlbumBundle,
}

impl QueueKind {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            QueueKind::SingleTrack => "single_track",
            QueueKind::AlbumBundle => "album_bundle",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "single_track" => Some(QueueKind::SingleTrack),
            "album_bundle" => Some(QueueKind::AlbumBundle),
            _ => None,
        }
    }
}

/// What a queue item asks the download collaborator for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueueRequest {
    SingleTrack {
        identity: Option<String>,
        query: String,
    },
    AlbumBundle {
        artist: String,
        album: String,
        query: String,
    },
}

impl QueueRequest {
    pub fn single_track(identity: Option<String>, artist: &str, title: &str) -> Self {
        QueueRequest::SingleTrack {
            identity,
            query: format!("{} - {}", artist, title),
        }
    }

    pub fn album_bundle(artist: &str, album: &str) -> Self {
        QueueRequest::AlbumBundle {
            artist: artist.to_string(),
            album: album.to_string(),
            query: format!("{} - {}", artist, album),
        }
    }

    pub fn kind(&self) -> QueueKind {
        match self {
            QueueRequest::SingleTrack { .. } => QueueKind::SingleTrack,
            QueueRequest::AlbumBundle { .. } => QueueKind::AlbumBundle,
        }
    }

    pub fn query(&self) -> &str {
        match self {
            QueueRequest::SingleTrack { query, .. } => query,
            QueueRequest::AlbumBundle { query, .. } => query,
        }
    }

    pub fn identity_guess(&self) -> Option<&str> {
        match self {
            QueueRequest::SingleTrack { identity, .. } => identity.as_deref(),
            QueueRequest::AlbumBundle { .. } => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueStatus {
    Pending,
    Failed,
    Success,
}

impl QueueStatus {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Failed => "failed",
            QueueStatus::Success => "success",
        }
    }

    pub fn from_db_str(s: &str) -> Self {
        match s {
            "failed" => QueueStatus::Failed,
            "success" => QueueStatus::Success,
            _ => QueueStatus::Pending,
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_db_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueItem {
    pub id: i64,
    pub request: QueueRequest,
    pub playlist_id: Option<String>,
    pub status: QueueStatus,
    pub last_attempt_at: Option<i64>,
    pub created_at: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LibraryStats {
    pub tracks: usize,
    pub local_tracks: usize,
    pub synced_tracks: usize,
    pub artists: usize,
    pub albums: usize,
    pub incomplete_albums: usize,
    pub playlists: usize,
    pub pending_downloads: usize,
    pub failed_downloads: usize,
    pub duplicate_groups: usize,
}

impl LibraryStats {
    /// Share of locally-held tracks that are on the device, in percent.
    pub fn sync_percentage(&self) -> f64 {
        if self.local_tracks == 0 {
            return 0.0;
        }
        self.synced_tracks as f64 * 100.0 / self.local_tracks as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_request_builds_queries() {
        let single = QueueRequest::single_track(Some("rec-1".into()), "Artist", "Song");
        assert_eq!(single.query(), "Artist - Song");
        assert_eq!(single.kind(), QueueKind::SingleTrack);
        assert_eq!(single.identity_guess(), Some("rec-1"));

        let album = QueueRequest::album_bundle("Artist", "Record");
        assert_eq!(album.query(), "Artist - Record");
        assert_eq!(album.kind(), QueueKind::AlbumBundle);
        assert_eq!(album.identity_guess(), None);
    }

    #[test]
    fn status_round_trips_through_db_strings() {
        for status in [QueueStatus::Pending, QueueStatus::Failed, QueueStatus::Success] {
            assert_eq!(QueueStatus::from_db_str(status.as_db_str()), status);
        }
        assert_eq!(QueueStatus::from_db_str("garbage"), QueueStatus::Pending);
    }

    #[test]
    fn sync_percentage_handles_empty_library() {
        assert_eq!(LibraryStats::default().sync_percentage(), 0.0);
        let stats = LibraryStats {
            local_tracks: 4,
            synced_tracks: 1,
            ..Default::default()
        };
        assert_eq!(stats.sync_percentage(), 25.0);
    }
}
