//! CatalogStore trait definition.

use super::models::*;
use anyhow::Result;
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

/// Accessor contract over the catalog.
///
/// Every call is atomic and commits before returning. Nothing is promised
/// across calls: a failure aborts only the operation in progress. Lookups that
/// miss return `None`/empty rather than an error.
pub trait CatalogStore: Send + Sync {
    // =========================================================================
    // Tracks
    // =========================================================================

    /// Insert or update the track keyed by its identity. Paths are normalized
    /// before they are stored; a track without a device path is never stored
    /// as synced.
    fn upsert_track(&self, track: &Track) -> Result<()>;

    fn get_track_by_identity(&self, identity: &str) -> Result<Option<Track>>;

    fn get_track_by_local_path(&self, path: &str) -> Result<Option<Track>>;

    /// All tracks, or only those with a local file.
    fn get_all_tracks(&self, local_only: bool) -> Result<Vec<Track>>;

    /// Unsynced tracks with a local file, in the order a forward pass should
    /// visit them.
    fn list_sync_candidates(&self, selection: &SyncSelection) -> Result<Vec<Track>>;

    fn update_track_local_path(&self, identity: &str, path: &str) -> Result<()>;

    fn get_identity_to_local_path_map(&self) -> Result<HashMap<String, String>>;

    /// Records that the track lives on the device at `device_path`.
    /// Returns false when nothing changed (already synced there, or unknown
    /// identity).
    fn mark_synced(&self, identity: &str, device_path: &str) -> Result<bool>;

    // =========================================================================
    // Albums
    // =========================================================================

    /// `total_tracks` only ever grows; the title takes the latest value.
    fn update_album_metadata(&self, release_id: &str, title: &str, total_tracks: u32)
        -> Result<()>;

    fn get_album(&self, release_id: &str) -> Result<Option<Album>>;

    /// Releases holding fewer distinct `(disc, track)` positions than their
    /// total, ordered by artist then album.
    fn get_incomplete_albums(&self) -> Result<Vec<IncompleteAlbum>>;

    fn get_release_summary(&self, release_id: &str) -> Result<Option<ReleaseSummary>>;

    /// Distinct `(disc, track)` positions of the release held locally.
    fn get_local_positions(&self, release_id: &str) -> Result<BTreeSet<(u32, u32)>>;

    /// Moves every track of `source` onto `target` and drops the `source`
    /// album. Returns the number of moved tracks.
    fn merge_albums(&self, source_release: &str, target_release: &str) -> Result<usize>;

    // =========================================================================
    // Duplicates
    // =========================================================================

    /// Idempotent: logging the same pair twice is a no-op.
    fn log_duplicate(&self, identity: &str, path: &str) -> Result<()>;

    fn get_all_duplicates(&self) -> Result<Vec<DuplicateGroup>>;

    fn clear_duplicate(&self, identity: &str) -> Result<()>;

    // =========================================================================
    // Playlists
    // =========================================================================

    fn upsert_playlist(&self, playlist: &Playlist) -> Result<()>;

    /// Replaces the playlist's links with `identities` in order, dense from 0.
    fn set_playlist_tracks(&self, playlist_id: &str, identities: &[String]) -> Result<()>;

    fn get_all_playlists(&self) -> Result<Vec<Playlist>>;

    /// Catalogued tracks of the playlist in playlist order.
    fn get_playlist_tracks(&self, playlist_id: &str) -> Result<Vec<Track>>;

    // =========================================================================
    // Download queue
    // =========================================================================

    /// Adds a pending item. Returns false if an equivalent item already exists.
    fn enqueue_download(&self, request: &QueueRequest, playlist_id: Option<&str>)
        -> Result<bool>;

    fn find_queue_item_by_query(&self, kind: QueueKind, query: &str) -> Result<Option<QueueItem>>;

    fn list_downloads_by_status(&self, status: QueueStatus) -> Result<Vec<QueueItem>>;

    /// Also stamps the item's last attempt time.
    fn update_download_status(&self, id: i64, status: QueueStatus) -> Result<()>;

    fn remove_download(&self, id: i64) -> Result<()>;

    // =========================================================================
    // Maintenance
    // =========================================================================

    fn library_stats(&self) -> Result<LibraryStats>;

    /// Location of the backing file, if there is one.
    fn database_path(&self) -> Option<PathBuf>;

    /// Flushes pending writes into the backing file so it can be copied.
    fn checkpoint(&self) -> Result<()>;
}
