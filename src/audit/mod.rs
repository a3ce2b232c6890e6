//! Album completeness: compare held tracks against authoritative tracklists
//! and queue what is missing.

mod completer;

pub use completer::{
    AlbumAuditor, AuditThresholds, CompleteAllReport, MissingReport, MissingTrack,
    QueueDecision, QueueOutcome,
};
