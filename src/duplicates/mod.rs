//! Duplicate resolution: pick one canonical file when several files claim
//! the same identity.

mod resolver;
mod scoring;

pub use resolver::{
    DeletionReport, DuplicateReport, DuplicateResolver, Resolution, ResolvedGroup,
    UnresolvedGroup, UnresolvedReason,
};
pub use scoring::{classify_name, CandidateScore, NamePattern, ScoringWeights};
