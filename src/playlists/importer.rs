use crate::catalog::{CatalogStore, Playlist, QueueRequest, Track};
use crate::media::paths::UNKNOWN_ALBUM;
use crate::media::{MetadataProvider, PlaylistSource, SourceTrack};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub playlist_id: String,
    pub name: String,
    /// Entries in the remote playlist, holes included.
    pub entries: usize,
    /// Distinct tracks now linked, in playlist order.
    pub linked: usize,
    pub already_local: usize,
    pub queued: usize,
    pub already_queued: usize,
    /// `(position, reason)` for entries that could not be matched.
    pub skipped: Vec<(usize, String)>,
}

pub struct PlaylistImporter {
    catalog: Arc<dyn CatalogStore>,
    source: Arc<dyn PlaylistSource>,
    metadata: Arc<dyn MetadataProvider>,
}

impl PlaylistImporter {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        source: Arc<dyn PlaylistSource>,
        metadata: Arc<dyn MetadataProvider>,
    ) -> Self {
        Self {
            catalog,
            source,
            metadata,
        }
    }

    /// Fetches the playlist, records it and its track order, and queues a
    /// download for every matched track without a local file. Entries are
    /// matched through their ISRC; unmatched ones are skipped. Re-importing
    /// replaces the previous order.
    pub async fn import(&self, url: &str) -> Result<ImportReport> {
        let remote = self
            .source
            .fetch_playlist(url)
            .await
            .with_context(|| format!("Failed to fetch playlist {}", url))?;
        info!(
            "Importing playlist '{}' ({}, {} entries)",
            remote.name,
            remote.playlist_id,
            remote.tracks.len()
        );

        self.catalog.upsert_playlist(&Playlist {
            playlist_id: remote.playlist_id.clone(),
            name: remote.name.clone(),
            source_url: Some(remote.source_url.clone()),
        })?;

        let mut report = ImportReport {
            playlist_id: remote.playlist_id.clone(),
            name: remote.name.clone(),
            entries: remote.tracks.len(),
            ..Default::default()
        };
        let mut ordered: Vec<String> = Vec::new();

        for (position, entry) in remote.tracks.iter().enumerate() {
            let Some(entry) = entry else {
                warn!("Skipping empty entry at position {}", position);
                report.skipped.push((position, "empty entry".to_string()));
                continue;
            };
            let identity = match self.match_identity(entry).await {
                Ok(identity) => identity,
                Err(reason) => {
                    warn!("Skipping {} - {}: {}", entry.artist_credit(), entry.title, reason);
                    report.skipped.push((position, reason));
                    continue;
                }
            };
            debug!("Matched {} - {} -> {}", entry.artist_credit(), entry.title, identity);

            let track = self.record_track(&identity, entry)?;
            if ordered.contains(&identity) {
                continue;
            }
            ordered.push(identity.clone());

            if track.local_path.is_some() {
                report.already_local += 1;
                continue;
            }
            let request =
                QueueRequest::single_track(Some(identity), &track.artist, &track.title);
            if self
                .catalog
                .find_queue_item_by_query(request.kind(), request.query())?
                .is_some()
                || !self
                    .catalog
                    .enqueue_download(&request, Some(&remote.playlist_id))?
            {
                report.already_queued += 1;
            } else {
                report.queued += 1;
            }
        }

        self.catalog
            .set_playlist_tracks(&remote.playlist_id, &ordered)?;
        report.linked = ordered.len();
        info!(
            "Playlist '{}': {} linked, {} local, {} queued, {} already queued, {} skipped",
            report.name,
            report.linked,
            report.already_local,
            report.queued,
            report.already_queued,
            report.skipped.len()
        );
        Ok(report)
    }

    /// The first recording registered for the entry's ISRC.
    async fn match_identity(&self, entry: &SourceTrack) -> Result<String, String> {
        let Some(isrc) = entry.isrc.as_deref() else {
            return Err("no ISRC".to_string());
        };
        match self.metadata.recordings_by_isrc(isrc).await {
            Ok(ids) => ids
                .into_iter()
                .next()
                .ok_or_else(|| format!("no recording for ISRC {}", isrc)),
            Err(e) => Err(format!("lookup of ISRC {} failed: {}", isrc, e)),
        }
    }

    /// Refreshes title, artist, album and ISRC from the remote entry. The
    /// local file, device copy and release position of a known track stay.
    fn record_track(&self, identity: &str, entry: &SourceTrack) -> Result<Track> {
        let mut track = match self.catalog.get_track_by_identity(identity)? {
            Some(existing) => existing,
            None => Track::new(identity, "", "", UNKNOWN_ALBUM),
        };
        track.title = entry.title.clone();
        track.artist = entry.artist_credit();
        if let Some(album) = entry.album.as_ref().filter(|a| !a.trim().is_empty()) {
            track.album = album.clone();
        }
        track.secondary_code = entry.isrc.clone();
        self.catalog.upsert_track(&track)?;
        Ok(track)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{QueueStatus, SqliteCatalogStore};
    use crate::media::{
        MetadataError, PlaylistSourceError, ReleaseTracklist, SourcePlaylist,
    };
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct OnePlaylist(SourcePlaylist);

    #[async_trait]
    impl PlaylistSource for OnePlaylist {
        async fn fetch_playlist(&self, _url: &str) -> Result<SourcePlaylist, PlaylistSourceError> {
            Ok(self.0.clone())
        }
    }

    struct IsrcTable(HashMap<&'static str, &'static str>);

    #[async_trait]
    impl MetadataProvider for IsrcTable {
        async fn release_tracklist(
            &self,
            release_id: &str,
        ) -> Result<ReleaseTracklist, MetadataError> {
            Err(MetadataError::NotFound(release_id.to_string()))
        }

        async fn recording_releases(&self, _recording_id: &str) -> Result<Vec<String>, MetadataError> {
            Ok(vec![])
        }

        async fn recordings_by_isrc(&self, isrc: &str) -> Result<Vec<String>, MetadataError> {
            if isrc == "BROKEN" {
                return Err(MetadataError::Unavailable(503));
            }
            Ok(self.0.get(isrc).map(|id| vec![id.to_string()]).unwrap_or_default())
        }
    }

    fn entry(title: &str, isrc: Option<&str>) -> Option<SourceTrack> {
        Some(SourceTrack {
            title: title.to_string(),
            artists: vec!["Artist".to_string(), "Guest".to_string()],
            album: Some("Album".to_string()),
            isrc: isrc.map(String::from),
        })
    }

    fn importer(catalog: Arc<SqliteCatalogStore>, tracks: Vec<Option<SourceTrack>>) -> PlaylistImporter {
        let playlist = SourcePlaylist {
            playlist_id: "pl-1".to_string(),
            name: "Mix".to_string(),
            source_url: "https://open.spotify.com/playlist/pl-1".to_string(),
            tracks,
        };
        let isrcs = IsrcTable(HashMap::from([("ISRC-A", "rec-a"), ("ISRC-B", "rec-b")]));
        PlaylistImporter::new(catalog, Arc::new(OnePlaylist(playlist)), Arc::new(isrcs))
    }

    #[tokio::test]
    async fn unmatched_entries_are_skipped_with_their_position() {
        let catalog = Arc::new(SqliteCatalogStore::in_memory().unwrap());
        let importer = importer(
            catalog.clone(),
            vec![
                entry("No Code", None),
                entry("Unknown", Some("ISRC-Z")),
                None,
                entry("A", Some("ISRC-A")),
                entry("Down", Some("BROKEN")),
            ],
        );

        let report = importer.import("ignored").await.unwrap();
        assert_eq!(report.entries, 5);
        assert_eq!(report.linked, 1);
        let positions: Vec<usize> = report.skipped.iter().map(|(p, _)| *p).collect();
        assert_eq!(positions, vec![0, 1, 2, 4]);

        let track = catalog.get_track_by_identity("rec-a").unwrap().unwrap();
        assert_eq!(track.artist, "Artist, Guest");
        assert_eq!(track.secondary_code.as_deref(), Some("ISRC-A"));
        let queued = catalog.list_downloads_by_status(QueueStatus::Pending).unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].request.query(), "Artist, Guest - A");
        assert_eq!(queued[0].playlist_id.as_deref(), Some("pl-1"));
    }

    #[tokio::test]
    async fn repeated_entry_is_linked_and_queued_once() {
        let catalog = Arc::new(SqliteCatalogStore::in_memory().unwrap());
        let importer = importer(
            catalog.clone(),
            vec![
                entry("A", Some("ISRC-A")),
                entry("B", Some("ISRC-B")),
                entry("A", Some("ISRC-A")),
            ],
        );

        let report = importer.import("ignored").await.unwrap();
        assert_eq!(report.linked, 2);
        assert_eq!(report.queued, 2);
        let order: Vec<String> = catalog
            .get_playlist_tracks("pl-1")
            .unwrap()
            .into_iter()
            .map(|t| t.identity)
            .collect();
        assert_eq!(order, vec!["rec-a", "rec-b"]);
    }

    #[tokio::test]
    async fn known_track_keeps_its_local_file() {
        let catalog = Arc::new(SqliteCatalogStore::in_memory().unwrap());
        catalog
            .upsert_track(
                &Track::new("rec-a", "Old Title", "Artist", "Album")
                    .with_local_path("/lib/Artist/Album/A.flac")
                    .with_release("rel-1", 1, 3),
            )
            .unwrap();
        let importer = importer(catalog.clone(), vec![entry("A", Some("ISRC-A"))]);

        let report = importer.import("ignored").await.unwrap();
        assert_eq!(report.already_local, 1);
        assert_eq!(report.queued, 0);

        let track = catalog.get_track_by_identity("rec-a").unwrap().unwrap();
        assert_eq!(track.title, "A");
        assert_eq!(track.local_path.as_deref(), Some("/lib/Artist/Album/A.flac"));
        assert_eq!(track.release_id.as_deref(), Some("rel-1"));
        assert!(catalog
            .list_downloads_by_status(QueueStatus::Pending)
            .unwrap()
            .is_empty());
    }
}
