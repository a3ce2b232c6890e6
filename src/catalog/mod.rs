//! The catalog: durable record of tracks, albums, playlists, the download
//! queue and duplicate reports. Single source of truth for sync state.

mod models;
mod schema;
mod store;
mod trait_def;

pub use models::{
    Album, DuplicateGroup, IncompleteAlbum, LibraryStats, Playlist, QueueItem, QueueKind,
    QueueRequest, QueueStatus, ReleaseSummary, SyncSelection, Track,
};
pub use store::SqliteCatalogStore;
pub use trait_def::CatalogStore;
