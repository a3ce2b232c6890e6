//! Deterministic scoring of duplicate candidate files.

use crate::media::paths::file_name_of;
use lazy_static::lazy_static;
use regex::{Regex, RegexBuilder};
use serde::Serialize;

lazy_static! {
    static ref NUMBERED_COPY: Regex = RegexBuilder::new(r".+\s\(\d+\)\.[^.]+$")
        .case_insensitive(true)
        .build()
        .unwrap();
    static ref TRACK_NUMBER_PREFIX: Regex = Regex::new(r"^\s*\d+\s*[-–—]\s*.+").unwrap();
    static ref FEATURING: Regex = RegexBuilder::new(r".+\s\(feat\..+\)\.[^.]+$")
        .case_insensitive(true)
        .build()
        .unwrap();
}

/// Score components. Only the relative ordering of the penalties and bonuses
/// matters; the defaults rank a clean lossy name above a penalized lossless one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScoringWeights {
    pub base: i32,
    pub numbered_copy_penalty: i32,
    pub track_number_penalty: i32,
    pub featuring_penalty: i32,
    pub lossless_bonus: i32,
    pub lossless_container_bonus: i32,
    pub lossy_bonus: i32,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        ScoringWeights {
            base: 100,
            numbered_copy_penalty: 20,
            track_number_penalty: 10,
            featuring_penalty: 5,
            lossless_bonus: 10,
            lossless_container_bonus: 5,
            lossy_bonus: 1,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NamePattern {
    /// `"Song (1).flac"`
    NumberedCopy,
    /// `"01 - Song.flac"`
    TrackNumberPrefix,
    /// `"Song (feat. Someone).flac"`
    Featuring,
}

/// The highest-priority pattern the file name matches, if any.
pub fn classify_name(file_name: &str) -> Option<NamePattern> {
    if NUMBERED_COPY.is_match(file_name) {
        Some(NamePattern::NumberedCopy)
    } else if TRACK_NUMBER_PREFIX.is_match(file_name) {
        Some(NamePattern::TrackNumberPrefix)
    } else if FEATURING.is_match(file_name) {
        Some(NamePattern::Featuring)
    } else {
        None
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CandidateScore {
    pub path: String,
    pub score: i32,
    pub pattern: Option<NamePattern>,
}

impl ScoringWeights {
    fn penalty(&self, pattern: Option<NamePattern>) -> i32 {
        match pattern {
            Some(NamePattern::NumberedCopy) => self.numbered_copy_penalty,
            Some(NamePattern::TrackNumberPrefix) => self.track_number_penalty,
            Some(NamePattern::Featuring) => self.featuring_penalty,
            None => 0,
        }
    }

    fn format_bonus(&self, file_name: &str) -> i32 {
        let extension = file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match extension.as_str() {
            "flac" => self.lossless_bonus,
            "m4a" => self.lossless_container_bonus,
            "mp3" => self.lossy_bonus,
            _ => 0,
        }
    }

    pub fn score(&self, path: &str) -> CandidateScore {
        let clean_path = path.trim().trim_matches('"').to_string();
        let file_name = file_name_of(&clean_path);
        let pattern = classify_name(&file_name);
        CandidateScore {
            score: self.base - self.penalty(pattern) + self.format_bonus(&file_name),
            path: clean_path,
            pattern,
        }
    }

    /// Candidates sorted by descending score. Equal scores keep input order.
    pub fn rank<S: AsRef<str>>(&self, paths: &[S]) -> Vec<CandidateScore> {
        let mut scored: Vec<CandidateScore> =
            paths.iter().map(|p| self.score(p.as_ref())).collect();
        scored.sort_by(|a, b| b.score.cmp(&a.score));
        scored
    }
}
