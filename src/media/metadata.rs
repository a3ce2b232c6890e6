//! Release metadata lookups against MusicBrainz.
//!
//! Every request goes through a shared pacing gate so that calls are
//! serialized and spaced by at least the configured interval.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

pub const MUSICBRAINZ_API_BASE: &str = "https://musicbrainz.org/ws/2";

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("service unavailable or rate limited (status {0})")]
    Unavailable(u16),

    #[error("unexpected status {status} for {url}")]
    Status { status: u16, url: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TracklistEntry {
    pub title: String,
    pub recording_id: Option<String>,
}

/// Authoritative track listing of one release, keyed by `(disc, track)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReleaseTracklist {
    pub release_id: String,
    pub title: String,
    pub tracks: BTreeMap<(u32, u32), TracklistEntry>,
}

impl ReleaseTracklist {
    pub fn total_tracks(&self) -> u32 {
        self.tracks.len() as u32
    }
}

/// Metadata lookup capability.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    async fn release_tracklist(&self, release_id: &str) -> Result<ReleaseTracklist, MetadataError>;

    /// Candidate releases containing the recording, most relevant first.
    async fn recording_releases(&self, recording_id: &str) -> Result<Vec<String>, MetadataError>;

    /// Recording ids registered for an ISRC, lowercased, in service order.
    /// An unknown ISRC yields an empty list.
    async fn recordings_by_isrc(&self, isrc: &str) -> Result<Vec<String>, MetadataError>;
}

#[derive(Deserialize)]
struct MbRelease {
    #[serde(default)]
    title: String,
    #[serde(default)]
    media: Vec<MbMedium>,
}

#[derive(Deserialize)]
struct MbMedium {
    position: Option<u32>,
    #[serde(default)]
    tracks: Vec<MbTrack>,
}

#[derive(Deserialize)]
struct MbTrack {
    number: Option<String>,
    position: Option<u32>,
    title: Option<String>,
    recording: Option<MbRecording>,
}

#[derive(Deserialize)]
struct MbRecording {
    id: Option<String>,
    title: Option<String>,
}

#[derive(Deserialize)]
struct MbRecordingLookup {
    #[serde(default)]
    releases: Vec<MbReleaseRef>,
}

#[derive(Deserialize)]
struct MbReleaseRef {
    id: String,
}

#[derive(Deserialize)]
struct MbIsrcLookup {
    #[serde(default)]
    recordings: Vec<MbRecordingRef>,
}

#[derive(Deserialize)]
struct MbRecordingRef {
    id: String,
}

fn recording_ids(lookup: MbIsrcLookup) -> Vec<String> {
    lookup
        .recordings
        .into_iter()
        .map(|r| r.id.trim().to_lowercase())
        .filter(|id| !id.is_empty())
        .collect()
}

fn tracklist_from_release(release_id: &str, release: MbRelease) -> ReleaseTracklist {
    let mut tracks = BTreeMap::new();
    for medium in release.media {
        let disc = medium.position.unwrap_or(1);
        for (index, track) in medium.tracks.into_iter().enumerate() {
            // Vinyl-style numbers ("A1") fall back to the positional index.
            let number = track
                .number
                .as_deref()
                .and_then(|n| n.trim().parse::<u32>().ok())
                .or(track.position)
                .unwrap_or(index as u32 + 1);
            let recording_title = track.recording.as_ref().and_then(|r| r.title.clone());
            let Some(title) = recording_title.or(track.title) else {
                warn!(
                    "Release {} disc {} track {} has no title, leaving it out",
                    release_id, disc, number
                );
                continue;
            };
            match tracks.entry((disc, number)) {
                Entry::Vacant(slot) => {
                    slot.insert(TracklistEntry {
                        title,
                        recording_id: track.recording.and_then(|r| r.id),
                    });
                }
                Entry::Occupied(existing) => warn!(
                    "Release {} lists disc {} track {} twice, keeping \"{}\" over \"{}\"",
                    release_id,
                    disc,
                    number,
                    existing.get().title,
                    title
                ),
            }
        }
    }
    ReleaseTracklist {
        release_id: release_id.to_string(),
        title: release.title,
        tracks,
    }
}

pub struct MusicBrainzClient {
    client: Client,
    base_url: String,
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl MusicBrainzClient {
    pub fn new(
        user_agent: &str,
        base_url: impl Into<String>,
        min_interval: Duration,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(MusicBrainzClient {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            min_interval,
            last_request: Mutex::new(None),
        })
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T, MetadataError> {
        // Held across the request so concurrent callers queue up behind it.
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());

        debug!("GET {}", url);
        let response = self.client.get(url).send().await?;
        match response.status() {
            status if status.is_success() => Ok(response.json::<T>().await?),
            StatusCode::NOT_FOUND => Err(MetadataError::NotFound(url.to_string())),
            StatusCode::SERVICE_UNAVAILABLE | StatusCode::TOO_MANY_REQUESTS => {
                Err(MetadataError::Unavailable(response.status().as_u16()))
            }
            status => Err(MetadataError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            }),
        }
    }
}

#[async_trait]
impl MetadataProvider for MusicBrainzClient {
    async fn release_tracklist(&self, release_id: &str) -> Result<ReleaseTracklist, MetadataError> {
        let url = format!(
            "{}/release/{}?inc=recordings+media&fmt=json",
            self.base_url,
            urlencoding::encode(release_id)
        );
        let release: MbRelease = self.get_json(&url).await?;
        Ok(tracklist_from_release(release_id, release))
    }

    async fn recording_releases(&self, recording_id: &str) -> Result<Vec<String>, MetadataError> {
        let url = format!(
            "{}/recording/{}?inc=releases&fmt=json",
            self.base_url,
            urlencoding::encode(recording_id)
        );
        let lookup: MbRecordingLookup = self.get_json(&url).await?;
        Ok(lookup.releases.into_iter().map(|r| r.id).collect())
    }

    async fn recordings_by_isrc(&self, isrc: &str) -> Result<Vec<String>, MetadataError> {
        let url = format!(
            "{}/isrc/{}?fmt=json",
            self.base_url,
            urlencoding::encode(isrc.trim())
        );
        match self.get_json::<MbIsrcLookup>(&url).await {
            Ok(lookup) => Ok(recording_ids(lookup)),
            Err(MetadataError::NotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }
}
