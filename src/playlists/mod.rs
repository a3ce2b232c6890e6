//! Imports remote playlists into the catalog and queues what is not held
//! locally.

mod importer;

pub use importer::{ImportReport, PlaylistImporter};
