//! Forward pass: convert and copy unsynced tracks onto the device.

use super::engine::SyncEngine;
use super::SyncError;
use crate::catalog::{SyncSelection, Track};
use crate::media::paths::{non_colliding_path, normalize_path, numbered_sibling, same_identity};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// A candidate that could not be synced. It stays unsynced and is picked up
/// again by the next pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ItemFailure {
    pub identity: String,
    pub source: String,
    pub destination: PathBuf,
    pub message: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ForwardReport {
    pub candidates: usize,
    pub converted: usize,
    /// Destination already carried the right identity; no conversion ran.
    pub already_present: usize,
    /// Device files copied aside before being overwritten.
    pub preserved: Vec<PathBuf>,
    pub failed: Vec<ItemFailure>,
    pub cancelled: bool,
}

enum ItemOutcome {
    Converted,
    AlreadyPresent,
}

impl SyncEngine {
    pub async fn forward_sync(&self, selection: &SyncSelection) -> Result<ForwardReport, SyncError> {
        let candidates = self.catalog.list_sync_candidates(selection)?;
        let mut report = ForwardReport {
            candidates: candidates.len(),
            ..Default::default()
        };
        if candidates.is_empty() {
            info!("No tracks to sync");
            return Ok(report);
        }
        info!("Found {} track(s) to sync ({:?})", candidates.len(), selection);

        if candidates.len() > self.settings.confirm_threshold {
            let question = format!(
                "About to sync {} tracks. This may take a while. Continue?",
                candidates.len()
            );
            if !self.prompt.confirm(&question) {
                info!("Sync cancelled");
                report.cancelled = true;
                return Ok(report);
            }
        }

        let extension = self.settings.conversion.format.extension();
        let total = candidates.len();
        // Destinations written during this pass, and whose identity they hold.
        let mut claimed: HashMap<PathBuf, String> = HashMap::new();
        for (i, track) in candidates.iter().enumerate() {
            info!("[{}/{}] {} - {}", i + 1, total, track.artist, track.title);
            let preferred = self.layout.track_destination(track, extension);
            let destination = self.choose_destination(track, &preferred, &claimed)?;
            if destination != preferred {
                info!(
                    "{:?} belongs to another track, using {:?} for {}",
                    preferred, destination, track.identity
                );
            }
            match self.sync_one(track, &destination, &mut report).await {
                Ok(outcome) => {
                    claimed.insert(destination, track.identity.clone());
                    match outcome {
                        ItemOutcome::Converted => report.converted += 1,
                        ItemOutcome::AlreadyPresent => report.already_present += 1,
                    }
                }
                Err(ItemError::Fatal(e)) => return Err(e),
                Err(ItemError::Item(message)) => {
                    error!(
                        "Failed to sync {} ({:?} -> {:?}): {}",
                        track.identity, track.local_path, destination, message
                    );
                    report.failed.push(ItemFailure {
                        identity: track.identity.clone(),
                        source: track.local_path.clone().unwrap_or_default(),
                        destination,
                        message,
                    });
                }
            }
        }

        info!(
            "Forward sync complete. Converted: {}, already present: {}, failed: {}",
            report.converted,
            report.already_present,
            report.failed.len()
        );
        Ok(report)
    }

    /// The preferred destination, or its first `" (n)"` sibling not held by
    /// a different track. A path is held when this pass already wrote another
    /// identity there, or when its file carries the identity of a catalog
    /// track that is synced at exactly that path.
    fn choose_destination(
        &self,
        track: &Track,
        preferred: &Path,
        claimed: &HashMap<PathBuf, String>,
    ) -> Result<PathBuf, SyncError> {
        let mut n = 0;
        loop {
            let candidate = numbered_sibling(preferred, n);
            if !self.held_by_other(track, &candidate, claimed)? {
                return Ok(candidate);
            }
            n += 1;
        }
    }

    fn held_by_other(
        &self,
        track: &Track,
        candidate: &Path,
        claimed: &HashMap<PathBuf, String>,
    ) -> Result<bool, SyncError> {
        if let Some(owner) = claimed.get(candidate) {
            return Ok(!same_identity(owner, &track.identity));
        }
        if !candidate.exists() {
            return Ok(false);
        }
        let found = match self.tags.read_identity(candidate) {
            Ok(Some(found)) => found,
            _ => return Ok(false),
        };
        if same_identity(&found, &track.identity) {
            return Ok(false);
        }
        let device_path = normalize_path(candidate);
        Ok(self
            .catalog
            .get_track_by_identity(found.trim())?
            .map(|owner| owner.synced && owner.device_path.as_deref() == Some(device_path.as_str()))
            .unwrap_or(false))
    }

    async fn sync_one(
        &self,
        track: &Track,
        destination: &Path,
        report: &mut ForwardReport,
    ) -> Result<ItemOutcome, ItemError> {
        let source = match &track.local_path {
            Some(path) if Path::new(path).is_file() => PathBuf::from(path),
            other => return Err(ItemError::Item(format!("local file not found: {:?}", other))),
        };

        if destination.exists() {
            match self.tags.read_identity(destination) {
                Ok(Some(found)) if same_identity(&found, &track.identity) => {
                    debug!("Skipping (identity match): {:?}", destination);
                    self.catalog
                        .mark_synced(&track.identity, &normalize_path(destination))
                        .map_err(|e| ItemError::Fatal(e.into()))?;
                    return Ok(ItemOutcome::AlreadyPresent);
                }
                Ok(found) => debug!("Overwriting {:?} (found identity {:?})", destination, found),
                Err(e) => debug!("Overwriting {:?} (unreadable: {})", destination, e),
            }
            let preserved = self.preserve_device_file(destination)?;
            report.preserved.push(preserved);
        }

        if let Err(e) = self
            .converter
            .convert(&source, destination, &self.settings.conversion)
            .await
        {
            if e.is_fatal() {
                return Err(ItemError::Fatal(SyncError::CollaboratorMissing(e.to_string())));
            }
            return Err(ItemError::Item(e.to_string()));
        }

        self.verify_identity(track, destination)?;
        self.catalog
            .mark_synced(&track.identity, &normalize_path(destination))
            .map_err(|e| ItemError::Fatal(e.into()))?;
        Ok(ItemOutcome::Converted)
    }

    /// Copies a device file about to be overwritten into the recovery area.
    fn preserve_device_file(&self, device_file: &Path) -> Result<PathBuf, ItemError> {
        let relative = self
            .layout
            .music_relative(device_file)
            .unwrap_or_else(|| PathBuf::from(device_file.file_name().unwrap_or_default()));
        let target = non_colliding_path(&self.settings.recovery_dir.join(relative));
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ItemError::Item(format!("cannot create recovery dir {:?}: {}", parent, e))
            })?;
        }
        std::fs::copy(device_file, &target).map_err(|e| {
            ItemError::Item(format!("cannot preserve {:?} before overwrite: {}", device_file, e))
        })?;
        warn!("Preserved displaced device file {:?} -> {:?}", device_file, target);
        Ok(target)
    }

    /// Makes sure the converted file carries the track's identity, writing
    /// it when the converter dropped it.
    fn verify_identity(&self, track: &Track, destination: &Path) -> Result<(), ItemError> {
        match self.tags.read_identity(destination) {
            Ok(Some(found)) if same_identity(&found, &track.identity) => return Ok(()),
            Ok(found) => debug!("Converted file carries {:?}, rewriting identity", found),
            Err(e) => debug!("Converted file tags unreadable ({}), rewriting identity", e),
        }
        self.tags
            .write_identity(destination, &track.identity)
            .map_err(|e| ItemError::Item(e.to_string()))?;
        match self.tags.read_identity(destination) {
            Ok(Some(found)) if same_identity(&found, &track.identity) => Ok(()),
            other => Err(ItemError::Item(format!(
                "identity verification failed after write: {:?}",
                other.map_err(|e| e.to_string())
            ))),
        }
    }
}

enum ItemError {
    /// Ends the whole pass.
    Fatal(SyncError),
    /// Recorded; the pass moves on.
    Item(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogStore, SqliteCatalogStore};
    use crate::confirm::AutoConfirm;
    use crate::media::{AudioTags, ConversionError, ConversionSpec, Converter, TagError, TagIo};
    use crate::sync::{DeviceLayout, SyncSettings};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    /// Identity is the whole file content.
    struct ContentTags;

    impl TagIo for ContentTags {
        fn read_tags(&self, path: &Path) -> Result<AudioTags, TagError> {
            let content = std::fs::read_to_string(path).map_err(|e| TagError::Read {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
            let identity = Some(content.trim().to_string()).filter(|s| !s.is_empty());
            Ok(AudioTags {
                identity,
                ..Default::default()
            })
        }

        fn write_identity(&self, path: &Path, identity: &str) -> Result<(), TagError> {
            std::fs::write(path, identity).map_err(|e| TagError::Write {
                path: path.to_path_buf(),
                message: e.to_string(),
            })
        }
    }

    enum Mode {
        Copy,
        DropTags,
        Missing,
    }

    struct MockConverter {
        mode: Mode,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Converter for MockConverter {
        async fn convert(
            &self,
            source: &Path,
            target: &Path,
            _spec: &ConversionSpec,
        ) -> Result<(), ConversionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::fs::create_dir_all(target.parent().unwrap())?;
            match self.mode {
                Mode::Copy => {
                    std::fs::copy(source, target)?;
                }
                Mode::DropTags => std::fs::write(target, "")?,
                Mode::Missing => return Err(ConversionError::ToolMissing("ffmpeg".into())),
            }
            Ok(())
        }
    }

    struct Fixture {
        _dir: TempDir,
        library: PathBuf,
        device: PathBuf,
        recovery: PathBuf,
        catalog: Arc<SqliteCatalogStore>,
        converter: Arc<MockConverter>,
        engine: SyncEngine,
    }

    fn fixture(mode: Mode, confirm: bool, threshold: usize) -> Fixture {
        let dir = TempDir::new().unwrap();
        let library = dir.path().join("library");
        let device = dir.path().join("device");
        let recovery = dir.path().join("recovery");
        std::fs::create_dir_all(&library).unwrap();
        std::fs::create_dir_all(&device).unwrap();

        let catalog = Arc::new(SqliteCatalogStore::in_memory().unwrap());
        let converter = Arc::new(MockConverter {
            mode,
            calls: AtomicUsize::new(0),
        });
        let layout = DeviceLayout::new(&device, "Music", "Playlists");
        layout.prepare().unwrap();
        let settings = SyncSettings {
            confirm_threshold: threshold,
            recovery_dir: recovery.clone(),
            ..Default::default()
        };
        let engine = SyncEngine::new(
            catalog.clone(),
            Arc::new(ContentTags),
            converter.clone(),
            Arc::new(AutoConfirm(confirm)),
            layout,
            settings,
        );
        Fixture {
            _dir: dir,
            library,
            device,
            recovery,
            catalog,
            converter,
            engine,
        }
    }

    fn add_track(f: &Fixture, identity: &str, title: &str) -> PathBuf {
        let path = f.library.join(format!("{}.flac", title));
        std::fs::write(&path, identity).unwrap();
        f.catalog
            .upsert_track(
                &Track::new(identity, title, "Artist", "Album")
                    .with_local_path(path.to_string_lossy()),
            )
            .unwrap();
        path
    }

    #[tokio::test]
    async fn converts_and_marks_synced_then_short_circuits() {
        let f = fixture(Mode::Copy, true, 50);
        add_track(&f, "rec-1", "One");

        let report = f.engine.forward_sync(&SyncSelection::Library).await.unwrap();
        assert_eq!(report.converted, 1);
        let track = f.catalog.get_track_by_identity("rec-1").unwrap().unwrap();
        assert!(track.synced);
        let expected = f.device.join("Music/Artist/Album/One.flac");
        assert_eq!(track.device_path, Some(normalize_path(&expected)));

        // Forget the sync state; the identity on the device short-circuits.
        f.catalog
            .upsert_track(&Track {
                synced: false,
                device_path: None,
                ..track
            })
            .unwrap();
        let report = f.engine.forward_sync(&SyncSelection::Library).await.unwrap();
        assert_eq!(report.already_present, 1);
        assert_eq!(f.converter.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn mismatched_device_file_is_preserved_before_overwrite() {
        let f = fixture(Mode::Copy, true, 50);
        add_track(&f, "rec-1", "One");
        let existing = f.device.join("Music/Artist/Album/One.flac");
        std::fs::create_dir_all(existing.parent().unwrap()).unwrap();
        std::fs::write(&existing, "rec-OTHER").unwrap();

        let report = f.engine.forward_sync(&SyncSelection::Library).await.unwrap();
        assert_eq!(report.converted, 1);
        assert_eq!(report.preserved.len(), 1);
        let kept = f.recovery.join("Artist/Album/One.flac");
        assert_eq!(std::fs::read_to_string(kept).unwrap(), "rec-OTHER");
        assert_eq!(std::fs::read_to_string(existing).unwrap(), "rec-1");
    }

    #[tokio::test]
    async fn dropped_identity_is_written_back() {
        let f = fixture(Mode::DropTags, true, 50);
        add_track(&f, "rec-1", "One");
        let report = f.engine.forward_sync(&SyncSelection::Library).await.unwrap();
        assert_eq!(report.converted, 1);
        let on_device = f.device.join("Music/Artist/Album/One.flac");
        assert_eq!(std::fs::read_to_string(on_device).unwrap(), "rec-1");
    }

    #[tokio::test]
    async fn missing_source_is_a_per_item_failure() {
        let f = fixture(Mode::Copy, true, 50);
        let gone = add_track(&f, "rec-1", "One");
        add_track(&f, "rec-2", "Two");
        std::fs::remove_file(gone).unwrap();

        let report = f.engine.forward_sync(&SyncSelection::Library).await.unwrap();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].identity, "rec-1");
        assert_eq!(report.converted, 1);
        assert!(!f.catalog.get_track_by_identity("rec-1").unwrap().unwrap().synced);
    }

    #[tokio::test]
    async fn missing_converter_aborts_the_pass() {
        let f = fixture(Mode::Missing, true, 50);
        add_track(&f, "rec-1", "One");
        add_track(&f, "rec-2", "Two");
        let result = f.engine.forward_sync(&SyncSelection::Library).await;
        assert!(matches!(result, Err(SyncError::CollaboratorMissing(_))));
        assert_eq!(f.converter.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn declined_confirmation_cancels_large_batches() {
        let f = fixture(Mode::Copy, false, 1);
        add_track(&f, "rec-1", "One");
        add_track(&f, "rec-2", "Two");
        let report = f.engine.forward_sync(&SyncSelection::Library).await.unwrap();
        assert!(report.cancelled);
        assert_eq!(f.converter.calls.load(Ordering::SeqCst), 0);
    }
}
