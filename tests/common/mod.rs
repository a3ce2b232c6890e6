//! Common test infrastructure
//!
//! Builds a [`LibraryManager`] over a temporary directory tree with in-process
//! fakes for every external tool. "Audio" files are plain text: one
//! `key=value` line per tag, padded past the device scanner's size floor.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{TestEnv, TrackFile};
//!
//! #[tokio::test]
//! async fn test_scan() {
//!     let env = TestEnv::new();
//!     env.add_library_file("a.flac", &TrackFile::new("rec-1", "Artist", "Album", "Song"));
//!     let report = env.manager.scan_library().await.unwrap();
//!     assert_eq!(report.added, 1);
//! }
//! ```

#![allow(dead_code)]

use async_trait::async_trait;
use dap_manager::catalog::{QueueRequest, SqliteCatalogStore};
use dap_manager::config::{AppConfig, CliConfig, FileConfig};
use dap_manager::confirm::{AutoConfirm, ConfirmationPrompt};
use dap_manager::media::{
    AudioTags, ConversionError, ConversionSpec, Converter, DownloadError, Downloader,
    MetadataError, MetadataProvider, PlaylistSource, PlaylistSourceError, ReleaseTracklist,
    SourcePlaylist, SourceTrack, TagError, TagIo, TracklistEntry,
};
use dap_manager::{Collaborators, LibraryManager};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

const PADDING: usize = 2048;

/// Tags of one fake audio file.
#[derive(Clone, Debug, Default)]
pub struct TrackFile {
    pub identity: Option<String>,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub release_id: Option<String>,
    pub disc: Option<u32>,
    pub track: Option<u32>,
    pub total: Option<u32>,
}

impl TrackFile {
    pub fn new(identity: &str, artist: &str, album: &str, title: &str) -> Self {
        TrackFile {
            identity: Some(identity.to_string()),
            title: Some(title.to_string()),
            artist: Some(artist.to_string()),
            album: Some(album.to_string()),
            ..Default::default()
        }
    }

    pub fn untagged() -> Self {
        TrackFile::default()
    }

    pub fn on_release(mut self, release_id: &str, disc: u32, track: u32, total: u32) -> Self {
        self.release_id = Some(release_id.to_string());
        self.disc = Some(disc);
        self.track = Some(track);
        self.total = Some(total);
        self
    }

    fn render(&self) -> String {
        let mut out = String::new();
        let mut line = |key: &str, value: Option<String>| {
            if let Some(value) = value {
                out.push_str(&format!("{}={}\n", key, value));
            }
        };
        line("identity", self.identity.clone());
        line("title", self.title.clone());
        line("artist", self.artist.clone());
        line("album", self.album.clone());
        line("release_id", self.release_id.clone());
        line("disc", self.disc.map(|v| v.to_string()));
        line("track", self.track.map(|v| v.to_string()));
        line("total", self.total.map(|v| v.to_string()));
        out.push('#');
        out.push_str(&" ".repeat(PADDING));
        out.push('\n');
        out
    }

    pub fn write_to(&self, path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, self.render()).unwrap();
    }
}

/// [`TagIo`] over the `key=value` text format of [`TrackFile`].
pub struct TextTags;

impl TextTags {
    fn read_err(path: &Path, message: impl ToString) -> TagError {
        TagError::Read {
            path: path.to_path_buf(),
            message: message.to_string(),
        }
    }
}

impl TagIo for TextTags {
    fn read_tags(&self, path: &Path) -> Result<AudioTags, TagError> {
        let content = std::fs::read_to_string(path).map_err(|e| Self::read_err(path, e))?;
        if !content.ends_with('\n') {
            return Err(Self::read_err(path, "not a tagged file"));
        }
        let mut tags = AudioTags::default();
        for line in content.lines().filter(|l| !l.starts_with('#')) {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.to_string();
            match key {
                "identity" => tags.identity = Some(value),
                "title" => tags.title = Some(value),
                "artist" => tags.artist = Some(value),
                "album" => tags.album = Some(value),
                "release_id" => tags.release_id = Some(value),
                "disc" => tags.disc_number = value.parse().ok(),
                "track" => tags.track_number = value.parse().ok(),
                "total" => tags.total_tracks = value.parse().ok(),
                _ => {}
            }
        }
        Ok(tags)
    }

    fn write_identity(&self, path: &Path, identity: &str) -> Result<(), TagError> {
        let write_err = |message: String| TagError::Write {
            path: path.to_path_buf(),
            message,
        };
        let content = std::fs::read_to_string(path).map_err(|e| write_err(e.to_string()))?;
        let mut lines: Vec<String> = content
            .lines()
            .filter(|l| !l.starts_with("identity="))
            .map(String::from)
            .collect();
        lines.insert(0, format!("identity={}", identity));
        std::fs::write(path, lines.join("\n") + "\n").map_err(|e| write_err(e.to_string()))
    }
}

/// Copies source to target, counting calls.
#[derive(Default)]
pub struct CopyConverter {
    calls: AtomicUsize,
    /// File names (without directory) whose conversion fails.
    failing: Mutex<HashSet<String>>,
    tool_missing: Mutex<bool>,
}

impl CopyConverter {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn fail_on(&self, file_name: &str) {
        self.failing.lock().unwrap().insert(file_name.to_string());
    }

    pub fn set_tool_missing(&self, missing: bool) {
        *self.tool_missing.lock().unwrap() = missing;
    }
}

#[async_trait]
impl Converter for CopyConverter {
    async fn convert(
        &self,
        source: &Path,
        target: &Path,
        _spec: &ConversionSpec,
    ) -> Result<(), ConversionError> {
        if *self.tool_missing.lock().unwrap() {
            return Err(ConversionError::ToolMissing("ffmpeg".to_string()));
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if self.failing.lock().unwrap().contains(&name) {
            return Err(ConversionError::Failed {
                source_path: source.to_path_buf(),
                message: "simulated failure".to_string(),
            });
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(source, target)?;
        Ok(())
    }
}

/// Drops canned files into the staging directory, keyed by query.
#[derive(Default)]
pub struct StagingDownloader {
    results: Mutex<HashMap<String, Vec<(String, TrackFile)>>>,
    failing: Mutex<HashSet<String>>,
    pub queries: Mutex<Vec<String>>,
}

impl StagingDownloader {
    pub fn provide(&self, query: &str, file_name: &str, file: TrackFile) {
        self.results
            .lock()
            .unwrap()
            .entry(query.to_string())
            .or_default()
            .push((file_name.to_string(), file));
    }

    pub fn fail_on(&self, query: &str) {
        self.failing.lock().unwrap().insert(query.to_string());
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl Downloader for StagingDownloader {
    async fn download(
        &self,
        request: &QueueRequest,
        staging_dir: &Path,
    ) -> Result<(), DownloadError> {
        let query = request.query().to_string();
        self.queries.lock().unwrap().push(query.clone());
        if self.failing.lock().unwrap().contains(&query) {
            return Err(DownloadError::Failed {
                query,
                message: "no results".to_string(),
            });
        }
        let files = self
            .results
            .lock()
            .unwrap()
            .get(&query)
            .cloned()
            .unwrap_or_default();
        for (name, file) in files {
            file.write_to(&staging_dir.join(name));
        }
        Ok(())
    }
}

/// Answers from an in-memory table of release tracklists.
#[derive(Default)]
pub struct CannedMetadata {
    releases: Mutex<HashMap<String, ReleaseTracklist>>,
    isrcs: Mutex<HashMap<String, String>>,
    pub lookups: AtomicUsize,
}

impl CannedMetadata {
    /// Registers a single-disc release with tracks titled "Track N".
    pub fn add_release(&self, release_id: &str, title: &str, total: u32) {
        let tracks: BTreeMap<(u32, u32), TracklistEntry> = (1..=total)
            .map(|n| {
                (
                    (1, n),
                    TracklistEntry {
                        title: format!("Track {}", n),
                        recording_id: Some(format!("{}-rec-{}", release_id, n)),
                    },
                )
            })
            .collect();
        self.releases.lock().unwrap().insert(
            release_id.to_string(),
            ReleaseTracklist {
                release_id: release_id.to_string(),
                title: title.to_string(),
                tracks,
            },
        );
    }
}

impl CannedMetadata {
    pub fn add_isrc(&self, isrc: &str, recording_id: &str) {
        self.isrcs
            .lock()
            .unwrap()
            .insert(isrc.to_string(), recording_id.to_string());
    }
}

#[async_trait]
impl MetadataProvider for CannedMetadata {
    async fn release_tracklist(&self, release_id: &str) -> Result<ReleaseTracklist, MetadataError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.releases
            .lock()
            .unwrap()
            .get(release_id)
            .cloned()
            .ok_or_else(|| MetadataError::NotFound(release_id.to_string()))
    }

    async fn recording_releases(&self, _recording_id: &str) -> Result<Vec<String>, MetadataError> {
        Ok(Vec::new())
    }

    async fn recordings_by_isrc(&self, isrc: &str) -> Result<Vec<String>, MetadataError> {
        Ok(self.isrcs.lock().unwrap().get(isrc).cloned().into_iter().collect())
    }
}

/// A remote playlist entry by "Artist" carrying an ISRC.
pub fn remote_track(title: &str, isrc: &str) -> Option<SourceTrack> {
    Some(SourceTrack {
        title: title.to_string(),
        artists: vec!["Artist".to_string()],
        album: Some("Mixtape".to_string()),
        isrc: Some(isrc.to_string()),
    })
}

/// Serves playlists from memory, keyed by share link.
#[derive(Default)]
pub struct CannedPlaylists {
    playlists: Mutex<HashMap<String, SourcePlaylist>>,
}

impl CannedPlaylists {
    /// Registers (or replaces) the playlist behind `url`.
    pub fn set(&self, url: &str, playlist_id: &str, name: &str, tracks: Vec<Option<SourceTrack>>) {
        self.playlists.lock().unwrap().insert(
            url.to_string(),
            SourcePlaylist {
                playlist_id: playlist_id.to_string(),
                name: name.to_string(),
                source_url: url.to_string(),
                tracks,
            },
        );
    }
}

#[async_trait]
impl PlaylistSource for CannedPlaylists {
    async fn fetch_playlist(&self, url: &str) -> Result<SourcePlaylist, PlaylistSourceError> {
        self.playlists
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| PlaylistSourceError::NotFound(url.to_string()))
    }
}

/// A library, a device mount, a staging area and a catalog in one temp dir.
pub struct TestEnv {
    pub dir: TempDir,
    pub manager: Arc<LibraryManager>,
    pub tags: Arc<TextTags>,
    pub converter: Arc<CopyConverter>,
    pub downloader: Arc<StagingDownloader>,
    pub metadata: Arc<CannedMetadata>,
    pub playlists: Arc<CannedPlaylists>,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_prompt(Arc::new(AutoConfirm(true)))
    }

    pub fn with_prompt(prompt: Arc<dyn ConfirmationPrompt>) -> Self {
        let dir = TempDir::new().unwrap();
        for sub in ["library", "device", "staging"] {
            std::fs::create_dir_all(dir.path().join(sub)).unwrap();
        }
        let cli = CliConfig {
            db_path: Some(dir.path().join("catalog.db")),
            library_root: Some(dir.path().join("library")),
            device_root: Some(dir.path().join("device")),
            staging_dir: Some(dir.path().join("staging")),
            ..Default::default()
        };
        let config = AppConfig::resolve(&cli, Some(FileConfig::default())).unwrap();
        let catalog = Arc::new(SqliteCatalogStore::new(&config.db_path).unwrap());

        let tags = Arc::new(TextTags);
        let converter = Arc::new(CopyConverter::default());
        let downloader = Arc::new(StagingDownloader::default());
        let metadata = Arc::new(CannedMetadata::default());
        let playlists = Arc::new(CannedPlaylists::default());
        let collaborators = Collaborators {
            tags: tags.clone(),
            converter: converter.clone(),
            downloader: downloader.clone(),
            metadata: Some(metadata.clone() as Arc<dyn MetadataProvider>),
            playlists: Some(playlists.clone() as Arc<dyn PlaylistSource>),
            prompt,
        };
        let manager = Arc::new(LibraryManager::new(config, catalog, collaborators));
        TestEnv {
            dir,
            manager,
            tags,
            converter,
            downloader,
            metadata,
            playlists,
        }
    }

    pub fn library(&self) -> PathBuf {
        self.dir.path().join("library")
    }

    pub fn device(&self) -> PathBuf {
        self.dir.path().join("device")
    }

    pub fn add_library_file(&self, relative: &str, file: &TrackFile) -> PathBuf {
        let path = self.library().join(relative);
        file.write_to(&path);
        path
    }

    pub fn add_device_file(&self, relative: &str, file: &TrackFile) -> PathBuf {
        let path = self.device().join(relative);
        file.write_to(&path);
        path
    }

    /// Every regular file under `root`, relative and sorted.
    pub fn files_under(root: &Path) -> Vec<String> {
        let mut files: Vec<String> = walkdir::WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| {
                e.path()
                    .strip_prefix(root)
                    .unwrap()
                    .to_string_lossy()
                    .replace('\\', "/")
            })
            .collect();
        files.sort();
        files
    }
}
