//! Remote playlists: where imported playlists and their track order come
//! from. The production source is the Spotify Web API with client
//! credentials.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

pub const SPOTIFY_API_BASE: &str = "https://api.spotify.com/v1";
pub const SPOTIFY_ACCOUNTS_BASE: &str = "https://accounts.spotify.com";

const PAGE_LIMIT: u32 = 100;

#[derive(Debug, Error)]
pub enum PlaylistSourceError {
    #[error("invalid playlist url: {0}")]
    InvalidUrl(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("playlist not found: {0}")]
    NotFound(String),

    #[error("unexpected status {status} for {url}")]
    Status { status: u16, url: String },
}

/// One entry of a remote playlist.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceTrack {
    pub title: String,
    pub artists: Vec<String>,
    pub album: Option<String>,
    pub isrc: Option<String>,
}

impl SourceTrack {
    /// Artist credit as stored in the catalog: names joined by ", ".
    pub fn artist_credit(&self) -> String {
        self.artists.join(", ")
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourcePlaylist {
    pub playlist_id: String,
    pub name: String,
    pub source_url: String,
    /// In playlist order. `None` marks an entry the source could not
    /// describe (removed or local-only items).
    pub tracks: Vec<Option<SourceTrack>>,
}

/// Playlist lookup capability.
#[async_trait]
pub trait PlaylistSource: Send + Sync {
    async fn fetch_playlist(&self, url: &str) -> Result<SourcePlaylist, PlaylistSourceError>;
}

/// The last path segment of a share link or URI, without its query string.
pub fn playlist_id_from_url(url: &str) -> Result<String, PlaylistSourceError> {
    let without_query = url.trim().split(['?', '#']).next().unwrap_or_default();
    let id = without_query
        .rsplit(['/', ':'])
        .next()
        .unwrap_or_default();
    if id.is_empty() || id.contains(char::is_whitespace) {
        return Err(PlaylistSourceError::InvalidUrl(url.to_string()));
    }
    Ok(id.to_string())
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expiry")]
    expires_in: u64,
}

fn default_expiry() -> u64 {
    3600
}

#[derive(Deserialize)]
struct PlaylistInfo {
    name: String,
}

#[derive(Deserialize)]
struct TracksPage {
    #[serde(default)]
    items: Vec<Option<PlaylistItem>>,
    next: Option<String>,
}

#[derive(Deserialize)]
struct PlaylistItem {
    track: Option<SpotifyTrack>,
}

#[derive(Deserialize)]
struct SpotifyTrack {
    name: Option<String>,
    #[serde(default)]
    artists: Vec<SpotifyArtist>,
    album: Option<SpotifyAlbum>,
    external_ids: Option<ExternalIds>,
}

#[derive(Deserialize)]
struct SpotifyArtist {
    name: String,
}

#[derive(Deserialize)]
struct SpotifyAlbum {
    name: Option<String>,
}

#[derive(Deserialize)]
struct ExternalIds {
    isrc: Option<String>,
}

fn source_track(item: Option<PlaylistItem>) -> Option<SourceTrack> {
    let track = item?.track?;
    let title = track.name.filter(|n| !n.trim().is_empty())?;
    Some(SourceTrack {
        title,
        artists: track.artists.into_iter().map(|a| a.name).collect(),
        album: track.album.and_then(|a| a.name),
        isrc: track
            .external_ids
            .and_then(|ids| ids.isrc)
            .map(|isrc| isrc.trim().to_uppercase())
            .filter(|isrc| !isrc.is_empty()),
    })
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

pub struct SpotifyPlaylistSource {
    client: Client,
    api_base: String,
    accounts_base: String,
    client_id: String,
    client_secret: String,
    token: Mutex<Option<CachedToken>>,
}

impl SpotifyPlaylistSource {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        api_base: impl Into<String>,
        accounts_base: impl Into<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(SpotifyPlaylistSource {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            accounts_base: accounts_base.into().trim_end_matches('/').to_string(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            token: Mutex::new(None),
        })
    }

    async fn access_token(&self) -> Result<String, PlaylistSourceError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() {
                return Ok(token.value.clone());
            }
        }

        let url = format!("{}/api/token", self.accounts_base);
        debug!("POST {}", url);
        let response = self
            .client
            .post(&url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(PlaylistSourceError::Auth(format!(
                "token request returned {}",
                response.status()
            )));
        }
        let token: TokenResponse = response.json().await?;
        // Treated as expired one minute before the service says so.
        let lifetime = Duration::from_secs(token.expires_in.saturating_sub(60));
        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(token.access_token)
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
    ) -> Result<T, PlaylistSourceError> {
        let token = self.access_token().await?;
        debug!("GET {}", url);
        let response = self.client.get(url).bearer_auth(token).send().await?;
        match response.status() {
            status if status.is_success() => Ok(response.json::<T>().await?),
            StatusCode::NOT_FOUND => Err(PlaylistSourceError::NotFound(url.to_string())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(PlaylistSourceError::Auth(
                format!("{} returned {}", url, response.status()),
            )),
            status => Err(PlaylistSourceError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            }),
        }
    }
}

#[async_trait]
impl PlaylistSource for SpotifyPlaylistSource {
    async fn fetch_playlist(&self, url: &str) -> Result<SourcePlaylist, PlaylistSourceError> {
        let playlist_id = playlist_id_from_url(url)?;
        let encoded = urlencoding::encode(&playlist_id);

        let info: PlaylistInfo = self
            .get_json(&format!("{}/playlists/{}?fields=name", self.api_base, encoded))
            .await?;

        let mut tracks = Vec::new();
        let mut next = Some(format!(
            "{}/playlists/{}/tracks?limit={}",
            self.api_base, encoded, PAGE_LIMIT
        ));
        let mut page = 1;
        while let Some(page_url) = next {
            debug!("Fetching tracks of {} (page {})", playlist_id, page);
            let body: TracksPage = self.get_json(&page_url).await?;
            tracks.extend(body.items.into_iter().map(source_track));
            next = body.next;
            page += 1;
        }

        Ok(SourcePlaylist {
            playlist_id,
            name: info.name,
            source_url: url.trim().to_string(),
            tracks,
        })
    }
}
