//! DAP Manager library
//!
//! Keeps a local music collection, its catalog and a portable player in
//! agreement: library scan, duplicate resolution, device sync, album
//! completion, playlist import and the download queue.

pub mod audit;
pub mod catalog;
pub mod config;
pub mod confirm;
pub mod downloads;
pub mod duplicates;
pub mod library;
pub mod manager;
pub mod media;
pub mod pass;
pub mod playlists;
pub mod sqlite_persistence;
pub mod sync;

// Re-export commonly used types for convenience
pub use catalog::{CatalogStore, SqliteCatalogStore, SyncSelection};
pub use config::{AppConfig, CliConfig};
pub use manager::{Collaborators, LibraryManager, PassOutcome, PassRequest};
pub use pass::{PassError, PassGate};
