use super::engine::SyncEngine;
use super::SyncError;
use anyhow::Context;
use std::path::PathBuf;
use tracing::info;

impl SyncEngine {
    /// Copies the catalog file to the device root. An in-memory catalog has
    /// nothing to copy.
    pub fn backup_catalog(&self) -> Result<Option<PathBuf>, SyncError> {
        let Some(source) = self.catalog.database_path() else {
            return Ok(None);
        };
        self.catalog.checkpoint()?;
        let file_name = source
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "catalog.db".into());
        let target = self.layout.root().join(file_name);
        std::fs::copy(&source, &target)
            .with_context(|| format!("Failed to back up {:?} to {:?}", source, target))?;
        info!("Catalog backed up to {:?}", target);
        Ok(Some(target))
    }
}
