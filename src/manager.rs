//! Wires the engines from an [`AppConfig`] and runs each top-level pass
//! behind the [`PassGate`].

use crate::audit::{AlbumAuditor, CompleteAllReport, QueueOutcome};
use crate::catalog::{CatalogStore, IncompleteAlbum, LibraryStats, SqliteCatalogStore};
use crate::config::AppConfig;
use crate::confirm::ConfirmationPrompt;
use crate::downloads::{DownloadRunner, DownloadSummary};
use crate::duplicates::{DeletionReport, DuplicateReport, DuplicateResolver};
use crate::library::{LibraryScanner, ScanReport};
use crate::media::{
    Converter, Downloader, FfmpegConverter, LoftyTagIo, MetadataProvider, MusicBrainzClient,
    PlaylistSource, SlskDownloader, SpotifyPlaylistSource, TagIo,
};
use crate::pass::{PassError, PassGate};
use crate::playlists::{ImportReport, PlaylistImporter};
use crate::sync::{
    DeviceLayout, PlaylistReport, PullReport, ReconcileReport, SyncEngine, SyncOptions,
    SyncSettings, SyncStats, SyncSummary,
};
use anyhow::{anyhow, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// The external capabilities the engines are built on.
pub struct Collaborators {
    pub tags: Arc<dyn TagIo>,
    pub converter: Arc<dyn Converter>,
    pub downloader: Arc<dyn Downloader>,
    pub metadata: Option<Arc<dyn MetadataProvider>>,
    /// Absent without playlist service credentials.
    pub playlists: Option<Arc<dyn PlaylistSource>>,
    pub prompt: Arc<dyn ConfirmationPrompt>,
}

impl Collaborators {
    /// lofty, ffmpeg, the download tool, MusicBrainz and Spotify, as
    /// configured.
    pub fn production(config: &AppConfig, prompt: Arc<dyn ConfirmationPrompt>) -> Result<Self> {
        let metadata: Option<Arc<dyn MetadataProvider>> = if config.metadata.enabled {
            Some(Arc::new(MusicBrainzClient::new(
                &config.metadata.user_agent,
                config.metadata.base_url.clone(),
                config.metadata.min_interval,
                config.metadata.timeout,
            )?))
        } else {
            None
        };
        let playlists: Option<Arc<dyn PlaylistSource>> = match config.playlists.credentials() {
            Some((client_id, client_secret)) => Some(Arc::new(SpotifyPlaylistSource::new(
                client_id,
                client_secret,
                config.playlists.api_base.clone(),
                config.playlists.accounts_base.clone(),
                config.playlists.timeout,
            )?)),
            None => None,
        };
        Ok(Self {
            tags: Arc::new(LoftyTagIo),
            converter: Arc::new(FfmpegConverter::new(
                &config.tools.ffmpeg_path,
                config.tools.ffmpeg_timeout,
            )),
            downloader: Arc::new(SlskDownloader::new(
                config.tools.download_command.clone(),
                config.tools.slsk_username.clone(),
                config.tools.slsk_password.clone(),
                config.library_root.clone().unwrap_or_default(),
                config.tools.search_flags.clone(),
                config.tools.download_timeout,
            )),
            metadata,
            playlists,
            prompt,
        })
    }
}

/// A pass that can be launched in the background.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PassRequest {
    Scan,
    Sync(SyncOptions),
    ResolveDuplicates,
    CompleteAll,
    Downloads,
    /// Share link of the playlist to import.
    ImportPlaylist(String),
}

#[derive(Debug)]
pub enum PassOutcome {
    Scan(ScanReport),
    Sync(SyncSummary),
    Duplicates(DuplicateReport),
    CompleteAll(CompleteAllReport),
    Downloads(DownloadSummary),
    ImportPlaylist(ImportReport),
}

pub struct LibraryManager {
    config: AppConfig,
    catalog: Arc<dyn CatalogStore>,
    collaborators: Collaborators,
    gate: PassGate,
}

impl LibraryManager {
    pub fn new(config: AppConfig, catalog: Arc<dyn CatalogStore>, collaborators: Collaborators) -> Self {
        Self {
            config,
            catalog,
            collaborators,
            gate: PassGate::new(),
        }
    }

    /// Opens the catalog at the configured path with production collaborators.
    pub fn open(config: AppConfig, prompt: Arc<dyn ConfirmationPrompt>) -> Result<Self> {
        info!("Opening SQLite catalog database at {:?}...", config.db_path);
        let catalog = Arc::new(SqliteCatalogStore::new(&config.db_path)?);
        let collaborators = Collaborators::production(&config, prompt)?;
        Ok(Self::new(config, catalog, collaborators))
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<dyn CatalogStore> {
        &self.catalog
    }

    pub fn gate(&self) -> &PassGate {
        &self.gate
    }

    fn library_root(&self) -> Result<PathBuf> {
        self.config
            .library_root
            .clone()
            .ok_or_else(|| anyhow!("No library root configured (--library or library_root)"))
    }

    fn scanner(&self) -> Arc<LibraryScanner> {
        Arc::new(LibraryScanner::new(
            self.catalog.clone(),
            self.collaborators.tags.clone(),
            self.collaborators.metadata.clone(),
        ))
    }

    fn download_runner(&self) -> Result<DownloadRunner> {
        Ok(DownloadRunner::new(
            self.catalog.clone(),
            self.collaborators.tags.clone(),
            self.collaborators.downloader.clone(),
            self.scanner(),
            self.config.staging_dir.clone(),
            self.library_root()?,
        ))
    }

    fn sync_engine(&self) -> Result<SyncEngine> {
        let root = self
            .config
            .device
            .root
            .clone()
            .ok_or_else(|| anyhow!("No device root configured (--device or [device].root)"))?;
        let layout = DeviceLayout::new(
            root,
            self.config.device.music_dir.clone(),
            self.config.device.playlists_dir.clone(),
        );
        let settings = SyncSettings {
            conversion: self.config.conversion.clone(),
            confirm_threshold: self.config.confirm_threshold,
            min_device_file_size: self.config.device.min_file_size,
            recovery_dir: self.config.recovery_dir.clone(),
        };
        let engine = SyncEngine::new(
            self.catalog.clone(),
            self.collaborators.tags.clone(),
            self.collaborators.converter.clone(),
            self.collaborators.prompt.clone(),
            layout,
            settings,
        );
        Ok(match self.download_runner() {
            Ok(runner) => engine.with_download_runner(Arc::new(runner)),
            Err(_) => engine,
        })
    }

    /// A prepared engine for the single-stage device passes.
    fn device_engine(&self) -> Result<SyncEngine> {
        let engine = self.sync_engine()?;
        engine.layout().prepare()?;
        Ok(engine)
    }

    fn auditor(&self) -> Result<AlbumAuditor> {
        let metadata = self
            .collaborators
            .metadata
            .clone()
            .ok_or_else(|| anyhow!("Metadata lookups are disabled"))?;
        Ok(AlbumAuditor::new(
            self.catalog.clone(),
            metadata,
            self.config.audit.clone(),
        ))
    }

    fn importer(&self) -> Result<PlaylistImporter> {
        let source = self.collaborators.playlists.clone().ok_or_else(|| {
            anyhow!("No playlist service credentials (SPOTIPY_CLIENT_ID / SPOTIPY_CLIENT_SECRET)")
        })?;
        let metadata = self
            .collaborators
            .metadata
            .clone()
            .ok_or_else(|| anyhow!("Metadata lookups are disabled"))?;
        Ok(PlaylistImporter::new(self.catalog.clone(), source, metadata))
    }

    fn resolver(&self) -> DuplicateResolver {
        DuplicateResolver::new(
            self.catalog.clone(),
            self.collaborators.tags.clone(),
            self.config.scoring.clone(),
        )
    }

    // =========================================================================
    // Gated passes
    // =========================================================================

    pub async fn scan_library(&self) -> Result<ScanReport> {
        let _pass = self.gate.try_acquire()?;
        self.scan_unguarded().await
    }

    pub async fn sync(&self, options: &SyncOptions) -> Result<SyncSummary> {
        let _pass = self.gate.try_acquire()?;
        self.sync_unguarded(options).await
    }

    pub fn reconcile_device(&self) -> Result<ReconcileReport> {
        let _pass = self.gate.try_acquire()?;
        Ok(self.device_engine()?.reconcile_device()?)
    }

    pub fn pull_from_device(&self) -> Result<PullReport> {
        let _pass = self.gate.try_acquire()?;
        Ok(self.device_engine()?.pull_from_device()?)
    }

    pub fn write_playlists(&self) -> Result<PlaylistReport> {
        let _pass = self.gate.try_acquire()?;
        Ok(self.device_engine()?.write_playlists()?)
    }

    /// Resolves every duplicate group and writes the review files into the
    /// report directory.
    pub fn resolve_duplicates(&self) -> Result<DuplicateReport> {
        let _pass = self.gate.try_acquire()?;
        self.resolve_unguarded()
    }

    pub fn delete_duplicates(&self, paths: &[String]) -> Result<DeletionReport> {
        let _pass = self.gate.try_acquire()?;
        Ok(self
            .resolver()
            .delete_candidates(paths, self.collaborators.prompt.as_ref()))
    }

    pub fn audit_library(&self) -> Result<Vec<IncompleteAlbum>> {
        let _pass = self.gate.try_acquire()?;
        self.catalog.get_incomplete_albums()
    }

    pub async fn complete_album(&self, release_id: &str) -> Result<QueueOutcome> {
        let _pass = self.gate.try_acquire()?;
        self.auditor()?.queue_missing_for_release(release_id).await
    }

    pub async fn complete_all(&self) -> Result<CompleteAllReport> {
        let _pass = self.gate.try_acquire()?;
        self.auditor()?.complete_all().await
    }

    pub async fn import_playlist(&self, url: &str) -> Result<ImportReport> {
        let _pass = self.gate.try_acquire()?;
        self.importer()?.import(url).await
    }

    pub async fn run_downloads(&self) -> Result<DownloadSummary> {
        let _pass = self.gate.try_acquire()?;
        self.download_runner()?.run_queue().await
    }

    /// Read-only; does not take the gate.
    pub fn stats(&self) -> Result<LibraryStats> {
        self.catalog.library_stats()
    }

    pub fn sync_stats(&self) -> Result<SyncStats> {
        Ok(self.sync_engine()?.sync_stats()?)
    }

    /// Takes the gate, then runs the pass on a background task that owns it.
    /// Rejected immediately if another pass is running.
    pub fn spawn_pass(
        self: &Arc<Self>,
        request: PassRequest,
    ) -> Result<JoinHandle<Result<PassOutcome>>, PassError> {
        let guard = self.gate.try_acquire()?;
        let manager = Arc::clone(self);
        Ok(tokio::spawn(async move {
            let _pass = guard;
            manager.run_unguarded(request).await
        }))
    }

    async fn run_unguarded(&self, request: PassRequest) -> Result<PassOutcome> {
        Ok(match request {
            PassRequest::Scan => PassOutcome::Scan(self.scan_unguarded().await?),
            PassRequest::Sync(options) => PassOutcome::Sync(self.sync_unguarded(&options).await?),
            PassRequest::ResolveDuplicates => PassOutcome::Duplicates(self.resolve_unguarded()?),
            PassRequest::CompleteAll => {
                PassOutcome::CompleteAll(self.auditor()?.complete_all().await?)
            }
            PassRequest::Downloads => {
                PassOutcome::Downloads(self.download_runner()?.run_queue().await?)
            }
            PassRequest::ImportPlaylist(url) => {
                PassOutcome::ImportPlaylist(self.importer()?.import(&url).await?)
            }
        })
    }

    async fn scan_unguarded(&self) -> Result<ScanReport> {
        let root = self.library_root()?;
        self.scanner().scan_library(&root).await
    }

    async fn sync_unguarded(&self, options: &SyncOptions) -> Result<SyncSummary> {
        Ok(self.sync_engine()?.run(options).await?)
    }

    fn resolve_unguarded(&self) -> Result<DuplicateReport> {
        let report = self.resolver().resolve_all()?;
        for path in report.write_review_files(&self.config.report_dir)? {
            info!("Wrote {:?}", path);
        }
        Ok(report)
    }
}
