use crate::catalog::{CatalogStore, QueueItem, QueueRequest, QueueStatus};
use crate::library::{IngestOutcome, LibraryScanner};
use crate::media::paths::{
    find_audio_files, layout_relative_path, lowercase_extension, non_colliding_path,
    UNKNOWN_ALBUM, UNKNOWN_ARTIST, UNKNOWN_TITLE,
};
use crate::media::{Downloader, TagIo};
use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DownloadSummary {
    pub attempted: usize,
    /// Items whose files were all claimed; they left the queue.
    pub completed: usize,
    /// The tool produced nothing new (it skips files it already has).
    pub nothing_new: usize,
    pub failed: Vec<String>,
    pub claimed_files: Vec<PathBuf>,
}

pub struct DownloadRunner {
    catalog: Arc<dyn CatalogStore>,
    tags: Arc<dyn TagIo>,
    downloader: Arc<dyn Downloader>,
    scanner: Arc<LibraryScanner>,
    staging_root: PathBuf,
    library_root: PathBuf,
}

impl DownloadRunner {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        tags: Arc<dyn TagIo>,
        downloader: Arc<dyn Downloader>,
        scanner: Arc<LibraryScanner>,
        staging_root: PathBuf,
        library_root: PathBuf,
    ) -> Self {
        Self {
            catalog,
            tags,
            downloader,
            scanner,
            staging_root,
            library_root,
        }
    }

    /// Attempts every pending item, then every failed one. A missing
    /// download tool stops the run with an error; anything else only
    /// affects its own item.
    pub async fn run_queue(&self) -> Result<DownloadSummary> {
        let pending = self.catalog.list_downloads_by_status(QueueStatus::Pending)?;
        let failed = self.catalog.list_downloads_by_status(QueueStatus::Failed)?;
        let mut summary = DownloadSummary::default();
        if pending.is_empty() && failed.is_empty() {
            info!("Download queue is empty");
            return Ok(summary);
        }
        info!(
            "Processing {} items ({} pending, {} failed)",
            pending.len() + failed.len(),
            pending.len(),
            failed.len()
        );

        for dir in [&self.staging_root, &self.library_root] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory {:?}", dir))?;
        }

        for item in pending.iter().chain(failed.iter()) {
            summary.attempted += 1;
            info!("Processing: {}", item.request.query());
            let staging = self.staging_root.join(format!("item-{}", item.id));
            std::fs::create_dir_all(&staging)
                .with_context(|| format!("Failed to create staging directory {:?}", staging))?;

            if let Err(e) = self.downloader.download(&item.request, &staging).await {
                if e.is_fatal() {
                    error!("Download tool unavailable, stopping the queue run: {}", e);
                    return Err(e.into());
                }
                error!("Download failed for '{}': {}", item.request.query(), e);
                self.catalog
                    .update_download_status(item.id, QueueStatus::Failed)?;
                summary.failed.push(item.request.query().to_string());
                continue;
            }

            self.settle_item(item, &staging, &mut summary).await?;
        }

        info!(
            "Download queue finished. Completed: {}, nothing new: {}, failed: {}",
            summary.completed,
            summary.nothing_new,
            summary.failed.len()
        );
        Ok(summary)
    }

    async fn settle_item(
        &self,
        item: &QueueItem,
        staging: &Path,
        summary: &mut DownloadSummary,
    ) -> Result<()> {
        let staged = find_audio_files(staging, 0);
        if staged.is_empty() {
            info!("Nothing new for '{}', removing from queue", item.request.query());
            self.catalog.remove_download(item.id)?;
            prune_empty_dirs(staging);
            summary.nothing_new += 1;
            return Ok(());
        }

        let mut all_claimed = true;
        for file in &staged {
            match self.claim_file(&item.request, file).await {
                Ok(path) => summary.claimed_files.push(path),
                Err(e) => {
                    warn!("Left {:?} in staging: {:#}", file, e);
                    all_claimed = false;
                }
            }
        }

        if all_claimed {
            self.catalog.remove_download(item.id)?;
            prune_empty_dirs(staging);
            summary.completed += 1;
            info!("Successfully processed '{}' and removed from queue", item.request.query());
        } else {
            self.catalog
                .update_download_status(item.id, QueueStatus::Failed)?;
            summary.failed.push(item.request.query().to_string());
        }
        Ok(())
    }

    /// Tag, move into the library and record one staged file as a unit. If
    /// recording fails after the move, the file goes back to staging.
    async fn claim_file(&self, request: &QueueRequest, staged: &Path) -> Result<PathBuf> {
        if let QueueRequest::SingleTrack {
            identity: Some(identity),
            ..
        } = request
        {
            if let Err(e) = self.tags.write_identity(staged, identity) {
                warn!("Could not write identity guess to {:?}: {}", staged, e);
            }
        }

        let tags = self.tags.read_tags(staged)?;
        if tags.identity.is_none() {
            return Err(anyhow!("no identity in {:?}", staged));
        }

        let extension = lowercase_extension(staged).unwrap_or_else(|| "flac".to_string());
        let relative = layout_relative_path(
            tags.artist.as_deref().unwrap_or(UNKNOWN_ARTIST),
            tags.album.as_deref().unwrap_or(UNKNOWN_ALBUM),
            tags.title.as_deref().unwrap_or(UNKNOWN_TITLE),
            &extension,
        );
        let destination = non_colliding_path(&self.library_root.join(relative));
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }
        move_file(staged, &destination)
            .with_context(|| format!("Failed to move {:?} to {:?}", staged, destination))?;
        debug!("Moved {:?} -> {:?}", staged, destination);

        let recorded = match self.scanner.ingest_file(&destination).await {
            Ok(IngestOutcome::Added { .. })
            | Ok(IngestOutcome::Duplicate { .. })
            | Ok(IngestOutcome::AlreadyKnown) => Ok(()),
            Ok(other) => Err(anyhow!("not recorded: {:?}", other)),
            Err(e) => Err(e),
        };
        if let Err(e) = recorded {
            move_file(&destination, staged).with_context(|| {
                format!(
                    "Recording {:?} failed ({:#}) and it could not be moved back",
                    destination, e
                )
            })?;
            return Err(e.context(format!("Recording {:?} failed, returned to staging", staged)));
        }
        Ok(destination)
    }
}

/// Rename, falling back to copy-and-remove across filesystems.
fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    if std::fs::rename(from, to).is_ok() {
        return Ok(());
    }
    std::fs::copy(from, to)?;
    std::fs::remove_file(from)
}

/// Removes empty directories below (and including) `dir`.
fn prune_empty_dirs(dir: &Path) {
    for entry in WalkDir::new(dir)
        .contents_first(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
    {
        // Fails on non-empty directories, which is what we want.
        let _ = std::fs::remove_dir(entry.path());
    }
}
