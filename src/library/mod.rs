//! Identification ingest: turns tagged audio files into catalog rows.

mod scanner;

pub use scanner::{IngestOutcome, LibraryScanner, ScanReport};
