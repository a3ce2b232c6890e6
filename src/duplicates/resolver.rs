//! Turns logged duplicate groups into a single canonical file per identity.

use super::scoring::{CandidateScore, ScoringWeights};
use crate::catalog::{CatalogStore, DuplicateGroup};
use crate::confirm::ConfirmationPrompt;
use crate::media::paths::same_identity;
use crate::media::TagIo;
use anyhow::{Context, Result};
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnresolvedReason {
    /// Fewer than two candidate paths were logged.
    InsufficientCandidates,
    /// The two best candidates score the same.
    Tie { score: i32 },
    /// The winning file carries a different (or no) identity.
    SanityMismatch { found: Option<String> },
    /// The winning file's tags could not be read.
    UnreadableWinner { message: String },
    /// No track row exists for the identity.
    UnknownTrack,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UnresolvedGroup {
    pub identity: String,
    pub reason: UnresolvedReason,
    pub candidates: Vec<CandidateScore>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ResolvedGroup {
    pub identity: String,
    pub winner: CandidateScore,
    pub losers: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    Resolved(ResolvedGroup),
    Unresolved(UnresolvedGroup),
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DuplicateReport {
    pub resolved: Vec<ResolvedGroup>,
    pub unresolved: Vec<UnresolvedGroup>,
    /// Per-group storage failures; the group is left as it was.
    pub errors: Vec<String>,
}

impl DuplicateReport {
    /// Losing paths of every resolved group, in resolution order.
    pub fn deletion_candidates(&self) -> Vec<String> {
        self.resolved
            .iter()
            .flat_map(|g| g.losers.iter().cloned())
            .collect()
    }

    pub fn sanity_failures(&self) -> usize {
        self.unresolved
            .iter()
            .filter(|g| matches!(g.reason, UnresolvedReason::SanityMismatch { .. }))
            .count()
    }

    /// Writes `files_to_delete.txt` (one path per line) and
    /// `unresolved_duplicates.json` into `dir`. Returns the written paths.
    pub fn write_review_files(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create report directory {:?}", dir))?;
        let mut written = Vec::new();

        let candidates = self.deletion_candidates();
        if !candidates.is_empty() {
            let path = dir.join("files_to_delete.txt");
            let mut content = candidates.join("\n");
            content.push('\n');
            std::fs::write(&path, content)
                .with_context(|| format!("Failed to write {:?}", path))?;
            written.push(path);
        }

        if !self.unresolved.is_empty() {
            let path = dir.join("unresolved_duplicates.json");
            std::fs::write(&path, serde_json::to_string_pretty(&self.unresolved)?)
                .with_context(|| format!("Failed to write {:?}", path))?;
            written.push(path);
        }
        Ok(written)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeletionReport {
    pub cancelled: bool,
    pub deleted: Vec<String>,
    pub already_missing: Vec<String>,
    pub errors: Vec<String>,
}

pub struct DuplicateResolver {
    catalog: Arc<dyn CatalogStore>,
    tags: Arc<dyn TagIo>,
    weights: ScoringWeights,
}

impl DuplicateResolver {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        tags: Arc<dyn TagIo>,
        weights: ScoringWeights,
    ) -> Self {
        DuplicateResolver {
            catalog,
            tags,
            weights,
        }
    }

    pub fn weights(&self) -> &ScoringWeights {
        &self.weights
    }

    fn unresolved(
        group: &DuplicateGroup,
        reason: UnresolvedReason,
        candidates: Vec<CandidateScore>,
    ) -> Resolution {
        warn!(
            "Duplicate group {} left unresolved: {:?}",
            group.identity, reason
        );
        Resolution::Unresolved(UnresolvedGroup {
            identity: group.identity.clone(),
            reason,
            candidates,
        })
    }

    /// Scores one group and, when there is a clear and verified winner,
    /// commits it onto the track and clears the group.
    pub fn resolve_group(&self, group: &DuplicateGroup) -> Result<Resolution> {
        let ranked = self.weights.rank(&group.paths);
        if ranked.len() < 2 {
            return Ok(Self::unresolved(
                group,
                UnresolvedReason::InsufficientCandidates,
                ranked,
            ));
        }
        if ranked[0].score == ranked[1].score {
            let score = ranked[0].score;
            return Ok(Self::unresolved(group, UnresolvedReason::Tie { score }, ranked));
        }

        let winner = &ranked[0];
        match self.tags.read_identity(Path::new(&winner.path)) {
            Ok(Some(found)) if same_identity(&found, &group.identity) => {}
            Ok(found) => {
                error!(
                    "Sanity check failed for {}: filed under {}, file carries {:?}",
                    winner.path, group.identity, found
                );
                return Ok(Self::unresolved(
                    group,
                    UnresolvedReason::SanityMismatch { found },
                    ranked,
                ));
            }
            Err(e) => {
                return Ok(Self::unresolved(
                    group,
                    UnresolvedReason::UnreadableWinner {
                        message: e.to_string(),
                    },
                    ranked,
                ));
            }
        }

        if self.catalog.get_track_by_identity(&group.identity)?.is_none() {
            return Ok(Self::unresolved(group, UnresolvedReason::UnknownTrack, ranked));
        }

        self.catalog
            .update_track_local_path(&group.identity, &winner.path)?;
        self.catalog.clear_duplicate(&group.identity)?;

        let winner = ranked[0].clone();
        let losers: Vec<String> = ranked.into_iter().skip(1).map(|c| c.path).collect();
        info!(
            "Resolved {} -> {} (score {}), {} deletion candidate(s)",
            group.identity,
            winner.path,
            winner.score,
            losers.len()
        );
        Ok(Resolution::Resolved(ResolvedGroup {
            identity: group.identity.clone(),
            winner,
            losers,
        }))
    }

    /// Resolves every logged group. A storage failure on one group is
    /// recorded and the pass moves on.
    pub fn resolve_all(&self) -> Result<DuplicateReport> {
        let groups = self.catalog.get_all_duplicates()?;
        info!("Analyzing {} duplicate group(s)", groups.len());

        let mut report = DuplicateReport::default();
        for group in &groups {
            match self.resolve_group(group) {
                Ok(Resolution::Resolved(resolved)) => report.resolved.push(resolved),
                Ok(Resolution::Unresolved(unresolved)) => report.unresolved.push(unresolved),
                Err(e) => {
                    error!("Failed to resolve {}: {:#}", group.identity, e);
                    report.errors.push(format!("{}: {:#}", group.identity, e));
                }
            }
        }
        info!(
            "Duplicates: {} resolved, {} unresolved ({} sanity failures), {} errors",
            report.resolved.len(),
            report.unresolved.len(),
            report.sanity_failures(),
            report.errors.len()
        );
        Ok(report)
    }

    /// Deletes the given files after a single confirmation. Files that are
    /// already gone count as done; other failures are collected per file.
    pub fn delete_candidates(
        &self,
        paths: &[String],
        prompt: &dyn ConfirmationPrompt,
    ) -> DeletionReport {
        let mut report = DeletionReport::default();
        if paths.is_empty() {
            return report;
        }
        if !prompt.confirm(&format!("Delete {} duplicate file(s)?", paths.len())) {
            info!("Deletion of {} file(s) cancelled", paths.len());
            report.cancelled = true;
            return report;
        }

        for path in paths {
            match std::fs::remove_file(path) {
                Ok(()) => report.deleted.push(path.clone()),
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    report.already_missing.push(path.clone())
                }
                Err(e) => {
                    warn!("Failed to delete {}: {}", path, e);
                    report.errors.push(format!("{}: {}", path, e));
                }
            }
        }
        info!(
            "Deleted {} file(s), {} already missing, {} error(s)",
            report.deleted.len(),
            report.already_missing.len(),
            report.errors.len()
        );
        report
    }
}
