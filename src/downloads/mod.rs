//! Works through the download queue and claims what the download tool
//! leaves in staging.

mod runner;

pub use runner::{DownloadRunner, DownloadSummary};
