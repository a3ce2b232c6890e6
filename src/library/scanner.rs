use crate::catalog::{CatalogStore, Track};
use crate::media::paths::{
    find_audio_files, normalize_path, UNKNOWN_ALBUM, UNKNOWN_ARTIST, UNKNOWN_TITLE,
};
use crate::media::{AudioTags, MetadataProvider, TagIo};
use anyhow::{bail, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

/// What happened to a single file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IngestOutcome {
    Added { identity: String },
    /// The path is already catalogued.
    AlreadyKnown,
    /// Tags parsed but carry no identity.
    Untagged,
    Unreadable(String),
    /// The identity is held by another file; both paths were logged.
    Duplicate { identity: String },
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub files: usize,
    pub added: usize,
    pub skipped: usize,
    pub duplicates: usize,
    pub errors: Vec<String>,
}

pub struct LibraryScanner {
    catalog: Arc<dyn CatalogStore>,
    tags: Arc<dyn TagIo>,
    metadata: Option<Arc<dyn MetadataProvider>>,
    /// Release totals looked up during this scanner's lifetime.
    release_totals: Mutex<HashMap<String, Option<u32>>>,
}

impl LibraryScanner {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        tags: Arc<dyn TagIo>,
        metadata: Option<Arc<dyn MetadataProvider>>,
    ) -> Self {
        Self {
            catalog,
            tags,
            metadata,
            release_totals: Mutex::new(HashMap::new()),
        }
    }

    pub async fn scan_library(&self, root: &Path) -> Result<ScanReport> {
        if !root.is_dir() {
            bail!("Library path does not exist: {:?}", root);
        }
        info!("Starting library scan at {:?}", root);

        let mut report = ScanReport::default();
        for file in find_audio_files(root, 0) {
            report.files += 1;
            match self.ingest_file(&file).await {
                Ok(IngestOutcome::Added { .. }) => report.added += 1,
                Ok(IngestOutcome::Duplicate { .. }) => report.duplicates += 1,
                Ok(IngestOutcome::Unreadable(message)) => {
                    report.skipped += 1;
                    report.errors.push(format!("{}: {}", file.display(), message));
                }
                Ok(_) => report.skipped += 1,
                Err(e) => {
                    error!("Failed to process {:?}: {:#}", file, e);
                    report.errors.push(format!("{}: {:#}", file.display(), e));
                }
            }
        }

        info!(
            "Scan complete. Found {} files. Added: {}, skipped: {}, duplicates: {}, errors: {}",
            report.files,
            report.added,
            report.skipped,
            report.duplicates,
            report.errors.len()
        );
        Ok(report)
    }

    /// Records one file. Storage failures propagate; anything wrong with the
    /// file itself is reported through the outcome.
    pub async fn ingest_file(&self, path: &Path) -> Result<IngestOutcome> {
        let local_path = normalize_path(path);
        if self.catalog.get_track_by_local_path(&local_path)?.is_some() {
            debug!("Skipping (already catalogued): {:?}", path);
            return Ok(IngestOutcome::AlreadyKnown);
        }

        let tags = match self.tags.read_tags(path) {
            Ok(tags) => tags,
            Err(e) => {
                warn!("Could not read tags: {}", e);
                return Ok(IngestOutcome::Unreadable(e.to_string()));
            }
        };
        let Some(identity) = tags.identity.clone() else {
            warn!("No identity found for {:?}", path);
            return Ok(IngestOutcome::Untagged);
        };

        let existing = self.catalog.get_track_by_identity(&identity)?;
        if let Some(existing_path) = existing.as_ref().and_then(|t| t.local_path.clone()) {
            warn!(
                "Duplicate identity {} found. Logging conflict:\n  Existing: {}\n  New:      {}",
                identity, existing_path, local_path
            );
            self.catalog.log_duplicate(&identity, &existing_path)?;
            self.catalog.log_duplicate(&identity, &local_path)?;
            return Ok(IngestOutcome::Duplicate { identity });
        }

        let release_id = match tags.release_id.clone() {
            Some(release_id) => Some(release_id),
            None => self.lookup_release(&identity).await,
        };
        if let Some(release_id) = &release_id {
            self.record_album(release_id, &tags).await?;
        }

        let mut track = Track::new(
            identity.clone(),
            tags.title.clone().unwrap_or_else(|| UNKNOWN_TITLE.to_string()),
            tags.artist.clone().unwrap_or_else(|| UNKNOWN_ARTIST.to_string()),
            tags.album.clone().unwrap_or_else(|| UNKNOWN_ALBUM.to_string()),
        )
        .with_local_path(local_path);
        track.secondary_code = tags.secondary_code.clone();
        track.release_id = release_id;
        track.disc_number = tags.disc_number.or(tags.track_number.map(|_| 1));
        track.track_number = tags.track_number;
        if let Some(existing) = existing {
            track.device_path = existing.device_path;
            track.synced = existing.synced;
        }

        self.catalog.upsert_track(&track)?;
        debug!("Added: {} - {} [{}]", track.artist, track.title, identity);
        Ok(IngestOutcome::Added { identity })
    }

    async fn lookup_release(&self, identity: &str) -> Option<String> {
        let provider = self.metadata.as_ref()?;
        match provider.recording_releases(identity).await {
            Ok(releases) => releases.into_iter().next(),
            Err(e) => {
                warn!("Release lookup for {} failed: {}", identity, e);
                None
            }
        }
    }

    async fn record_album(&self, release_id: &str, tags: &AudioTags) -> Result<()> {
        let total = match tags.total_tracks {
            Some(total) => Some(total),
            None => self.release_total(release_id).await,
        };
        if let Some(total) = total {
            let title = tags.album.as_deref().unwrap_or_default();
            self.catalog.update_album_metadata(release_id, title, total)?;
        }
        Ok(())
    }

    async fn release_total(&self, release_id: &str) -> Option<u32> {
        let cached = self.release_totals.lock().unwrap().get(release_id).copied();
        if let Some(total) = cached {
            return total;
        }
        let provider = self.metadata.as_ref()?;
        let total = match provider.release_tracklist(release_id).await {
            Ok(tracklist) => Some(tracklist.total_tracks()),
            Err(e) => {
                warn!("Tracklist lookup for {} failed: {}", release_id, e);
                None
            }
        };
        self.release_totals
            .lock()
            .unwrap()
            .insert(release_id.to_string(), total);
        total
    }
}
