//! SQLite-backed catalog store.

use super::models::*;
use super::schema::CATALOG_VERSIONED_SCHEMAS;
use super::trait_def::CatalogStore;
use crate::media::paths::normalize_path_str;
use crate::sqlite_persistence::open_versioned;
use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

const TRACK_COLUMNS: &[&str] = &[
    "identity",
    "title",
    "artist",
    "album",
    "secondary_code",
    "local_path",
    "device_path",
    "synced",
    "release_id",
    "disc_number",
    "track_number",
];

const TRACK_ORDER: &str = "artist, album, disc_number, track_number, title";

fn track_columns(alias: &str) -> String {
    TRACK_COLUMNS
        .iter()
        .map(|c| format!("{}.{}", alias, c))
        .collect::<Vec<_>>()
        .join(", ")
}

pub struct SqliteCatalogStore {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl SqliteCatalogStore {
    /// Opens an existing catalog or creates a new one with the current schema.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = open_versioned(db_path.as_ref(), CATALOG_VERSIONED_SCHEMAS, "catalog")?;
        conn.execute("PRAGMA foreign_keys = ON;", [])?;
        Ok(SqliteCatalogStore {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(db_path.as_ref().to_path_buf()),
        })
    }

    /// A throwaway catalog that lives only as long as the store.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        CATALOG_VERSIONED_SCHEMAS
            .last()
            .context("No schemas defined")?
            .create(&conn)?;
        Ok(SqliteCatalogStore {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    fn row_to_track(row: &Row) -> rusqlite::Result<Track> {
        Ok(Track {
            identity: row.get("identity")?,
            title: row.get("title")?,
            artist: row.get("artist")?,
            album: row.get("album")?,
            secondary_code: row.get("secondary_code")?,
            local_path: row.get("local_path")?,
            device_path: row.get("device_path")?,
            synced: row.get("synced")?,
            release_id: row.get("release_id")?,
            disc_number: row.get("disc_number")?,
            track_number: row.get("track_number")?,
        })
    }

    fn row_to_queue_item(row: &Row) -> rusqlite::Result<QueueItem> {
        let query: String = row.get("search_query")?;
        let kind = QueueKind::from_db_str(&row.get::<_, String>("kind")?)
            .unwrap_or(QueueKind::SingleTrack);
        let request = match kind {
            QueueKind::SingleTrack => QueueRequest::SingleTrack {
                identity: row.get("identity_guess")?,
                query,
            },
            QueueKind::AlbumBundle => QueueRequest::AlbumBundle {
                artist: row.get::<_, Option<String>>("artist")?.unwrap_or_default(),
                album: row.get::<_, Option<String>>("album")?.unwrap_or_default(),
                query,
            },
        };
        let playlist_id: String = row.get("playlist_id")?;
        Ok(QueueItem {
            id: row.get("id")?,
            request,
            playlist_id: Some(playlist_id).filter(|p| !p.is_empty()),
            status: QueueStatus::from_db_str(&row.get::<_, String>("status")?),
            last_attempt_at: row.get("last_attempt_at")?,
            created_at: row.get("created_at")?,
        })
    }

    fn query_tracks(
        conn: &Connection,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<Track>> {
        let mut stmt = conn.prepare(sql)?;
        let tracks = stmt
            .query_map(params, Self::row_to_track)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tracks)
    }

    fn incomplete_albums(conn: &Connection) -> Result<Vec<IncompleteAlbum>> {
        let mut stmt = conn.prepare(
            r#"SELECT * FROM (
                   SELECT a.release_id AS release_id,
                          CASE WHEN a.title != '' THEN a.title ELSE MIN(t.album) END AS album_title,
                          a.total_tracks AS total,
                          MIN(t.artist) AS artist,
                          COUNT(DISTINCT CASE
                              WHEN t.local_path IS NOT NULL AND t.track_number IS NOT NULL
                              THEN COALESCE(t.disc_number, 1) || ':' || t.track_number
                          END) AS have
                   FROM albums a
                   JOIN tracks t ON t.release_id = a.release_id
                   GROUP BY a.release_id, a.title, a.total_tracks
               )
               WHERE have < total
               ORDER BY artist COLLATE NOCASE, album_title COLLATE NOCASE"#,
        )?;
        let albums = stmt
            .query_map([], |row| {
                let have: u32 = row.get("have")?;
                let total: u32 = row.get("total")?;
                Ok(IncompleteAlbum {
                    artist: row.get("artist")?,
                    album: row.get("album_title")?,
                    release_id: row.get("release_id")?,
                    have,
                    total,
                    missing: total - have,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(albums)
    }

    fn count(conn: &Connection, sql: &str) -> Result<usize> {
        let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
        Ok(n as usize)
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }
}

impl CatalogStore for SqliteCatalogStore {
    fn upsert_track(&self, track: &Track) -> Result<()> {
        let local_path = track.local_path.as_deref().map(normalize_path_str);
        let device_path = track.device_path.as_deref().map(normalize_path_str);
        let synced = track.synced && device_path.is_some();

        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"INSERT INTO tracks (
                   identity, title, artist, album, secondary_code, local_path,
                   device_path, synced, release_id, disc_number, track_number
               ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
               ON CONFLICT(identity) DO UPDATE SET
                   title = excluded.title,
                   artist = excluded.artist,
                   album = excluded.album,
                   secondary_code = excluded.secondary_code,
                   local_path = excluded.local_path,
                   device_path = excluded.device_path,
                   synced = excluded.synced,
                   release_id = excluded.release_id,
                   disc_number = excluded.disc_number,
                   track_number = excluded.track_number"#,
            params![
                track.identity,
                track.title,
                track.artist,
                track.album,
                track.secondary_code,
                local_path,
                device_path,
                synced,
                track.release_id,
                track.disc_number,
                track.track_number,
            ],
        )
        .with_context(|| format!("Failed to upsert track {}", track.identity))?;
        Ok(())
    }

    fn get_track_by_identity(&self, identity: &str) -> Result<Option<Track>> {
        let conn = self.conn.lock().unwrap();
        let track = conn
            .query_row(
                &format!("SELECT {} FROM tracks t WHERE identity = ?1", track_columns("t")),
                [identity],
                Self::row_to_track,
            )
            .optional()?;
        Ok(track)
    }

    fn get_track_by_local_path(&self, path: &str) -> Result<Option<Track>> {
        let conn = self.conn.lock().unwrap();
        let track = conn
            .query_row(
                &format!("SELECT {} FROM tracks t WHERE local_path = ?1", track_columns("t")),
                [normalize_path_str(path)],
                Self::row_to_track,
            )
            .optional()?;
        Ok(track)
    }

    fn get_all_tracks(&self, local_only: bool) -> Result<Vec<Track>> {
        let conn = self.conn.lock().unwrap();
        let filter = if local_only {
            "WHERE local_path IS NOT NULL"
        } else {
            ""
        };
        Self::query_tracks(
            &conn,
            &format!(
                "SELECT {} FROM tracks t {} ORDER BY {}",
                track_columns("t"),
                filter,
                TRACK_ORDER
            ),
            [],
        )
    }

    fn list_sync_candidates(&self, selection: &SyncSelection) -> Result<Vec<Track>> {
        let conn = self.conn.lock().unwrap();
        match selection {
            SyncSelection::Playlists => {
                let linked = Self::query_tracks(
                    &conn,
                    &format!(
                        r#"SELECT {} FROM playlist_tracks pt
                           JOIN playlists p ON p.playlist_id = pt.playlist_id
                           JOIN tracks t ON t.identity = pt.track_identity
                           WHERE t.local_path IS NOT NULL AND t.synced = 0
                           ORDER BY p.name, p.playlist_id, pt.track_order"#,
                        track_columns("t")
                    ),
                    [],
                )?;
                let mut seen = HashSet::new();
                Ok(linked
                    .into_iter()
                    .filter(|t| seen.insert(t.identity.clone()))
                    .collect())
            }
            SyncSelection::Library | SyncSelection::Artist(_) => {
                let unsynced = Self::query_tracks(
                    &conn,
                    &format!(
                        "SELECT {} FROM tracks t WHERE local_path IS NOT NULL AND synced = 0 ORDER BY {}",
                        track_columns("t"),
                        TRACK_ORDER
                    ),
                    [],
                )?;
                match selection {
                    SyncSelection::Artist(needle) => {
                        let needle = needle.trim().to_lowercase();
                        Ok(unsynced
                            .into_iter()
                            .filter(|t| t.artist.to_lowercase().contains(&needle))
                            .collect())
                    }
                    _ => Ok(unsynced),
                }
            }
        }
    }

    fn update_track_local_path(&self, identity: &str, path: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE tracks SET local_path = ?2 WHERE identity = ?1",
            params![identity, normalize_path_str(path)],
        )
        .with_context(|| format!("Failed to update local path of {}", identity))?;
        Ok(())
    }

    fn get_identity_to_local_path_map(&self) -> Result<HashMap<String, String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT identity, local_path FROM tracks WHERE local_path IS NOT NULL")?;
        let map = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<HashMap<String, String>>>()?;
        Ok(map)
    }

    fn mark_synced(&self, identity: &str, device_path: &str) -> Result<bool> {
        let device_path = normalize_path_str(device_path);
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            r#"UPDATE tracks SET synced = 1, device_path = ?2
               WHERE identity = ?1 AND NOT (synced = 1 AND device_path IS ?2)"#,
            params![identity, device_path],
        )?;
        if changed > 0 {
            debug!("Marked {} synced at {}", identity, device_path);
        }
        Ok(changed > 0)
    }

    fn update_album_metadata(
        &self,
        release_id: &str,
        title: &str,
        total_tracks: u32,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"INSERT INTO albums (release_id, title, total_tracks) VALUES (?1, ?2, ?3)
               ON CONFLICT(release_id) DO UPDATE SET
                   title = CASE WHEN excluded.title != '' THEN excluded.title ELSE albums.title END,
                   total_tracks = MAX(albums.total_tracks, excluded.total_tracks)"#,
            params![release_id, title.trim(), total_tracks],
        )?;
        Ok(())
    }

    fn get_album(&self, release_id: &str) -> Result<Option<Album>> {
        let conn = self.conn.lock().unwrap();
        let album = conn
            .query_row(
                "SELECT release_id, title, total_tracks FROM albums WHERE release_id = ?1",
                [release_id],
                |row| {
                    Ok(Album {
                        release_id: row.get(0)?,
                        title: row.get(1)?,
                        total_tracks: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(album)
    }

    fn get_incomplete_albums(&self) -> Result<Vec<IncompleteAlbum>> {
        let conn = self.conn.lock().unwrap();
        Self::incomplete_albums(&conn)
    }

    fn get_release_summary(&self, release_id: &str) -> Result<Option<ReleaseSummary>> {
        let conn = self.conn.lock().unwrap();
        let summary = conn
            .query_row(
                r#"SELECT t.artist, COALESCE(NULLIF(a.title, ''), t.album)
                   FROM tracks t
                   LEFT JOIN albums a ON a.release_id = t.release_id
                   WHERE t.release_id = ?1
                   ORDER BY t.local_path IS NULL, t.disc_number, t.track_number
                   LIMIT 1"#,
                [release_id],
                |row| {
                    Ok(ReleaseSummary {
                        release_id: release_id.to_string(),
                        artist: row.get(0)?,
                        album: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(summary)
    }

    fn get_local_positions(&self, release_id: &str) -> Result<BTreeSet<(u32, u32)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"SELECT DISTINCT COALESCE(disc_number, 1), track_number FROM tracks
               WHERE release_id = ?1 AND local_path IS NOT NULL AND track_number IS NOT NULL"#,
        )?;
        let positions = stmt
            .query_map([release_id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<BTreeSet<(u32, u32)>>>()?;
        Ok(positions)
    }

    fn merge_albums(&self, source_release: &str, target_release: &str) -> Result<usize> {
        if source_release == target_release {
            return Ok(0);
        }
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let source: Option<(String, u32)> = tx
            .query_row(
                "SELECT title, total_tracks FROM albums WHERE release_id = ?1",
                [source_release],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let moved = tx.execute(
            r#"UPDATE tracks SET
                   release_id = ?2,
                   album = COALESCE(
                       (SELECT title FROM albums WHERE release_id = ?2 AND title != ''),
                       album)
               WHERE release_id = ?1"#,
            params![source_release, target_release],
        )?;

        if let Some((title, total)) = source {
            tx.execute(
                r#"INSERT INTO albums (release_id, title, total_tracks) VALUES (?1, ?2, ?3)
                   ON CONFLICT(release_id) DO UPDATE SET
                       total_tracks = MAX(albums.total_tracks, excluded.total_tracks)"#,
                params![target_release, title, total],
            )?;
            tx.execute("DELETE FROM albums WHERE release_id = ?1", [source_release])?;
        }
        tx.commit()?;

        info!(
            "Merged release {} into {} ({} tracks moved)",
            source_release, target_release, moved
        );
        Ok(moved)
    }

    fn log_duplicate(&self, identity: &str, path: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO duplicates (identity, file_path) VALUES (?1, ?2)",
            params![identity, normalize_path_str(path)],
        )?;
        Ok(())
    }

    fn get_all_duplicates(&self) -> Result<Vec<DuplicateGroup>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT identity, file_path FROM duplicates ORDER BY identity, id")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut groups: Vec<DuplicateGroup> = Vec::new();
        for (identity, path) in rows {
            match groups.last_mut() {
                Some(group) if group.identity == identity => group.paths.push(path),
                _ => groups.push(DuplicateGroup {
                    identity,
                    paths: vec![path],
                }),
            }
        }
        Ok(groups)
    }

    fn clear_duplicate(&self, identity: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM duplicates WHERE identity = ?1", [identity])?;
        Ok(())
    }

    fn upsert_playlist(&self, playlist: &Playlist) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"INSERT INTO playlists (playlist_id, name, source_url) VALUES (?1, ?2, ?3)
               ON CONFLICT(playlist_id) DO UPDATE SET
                   name = excluded.name,
                   source_url = excluded.source_url"#,
            params![playlist.playlist_id, playlist.name, playlist.source_url],
        )?;
        Ok(())
    }

    fn set_playlist_tracks(&self, playlist_id: &str, identities: &[String]) -> Result<()> {
        let mut seen = HashSet::new();
        let ordered: Vec<&String> = identities
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .collect();

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM playlist_tracks WHERE playlist_id = ?1",
            [playlist_id],
        )?;
        {
            let mut insert = tx.prepare(
                "INSERT INTO playlist_tracks (playlist_id, track_identity, track_order) VALUES (?1, ?2, ?3)",
            )?;
            for (order, identity) in ordered.iter().enumerate() {
                insert.execute(params![playlist_id, identity, order as i64])?;
            }
        }
        tx.commit()
            .with_context(|| format!("Failed to store tracks of playlist {}", playlist_id))?;
        Ok(())
    }

    fn get_all_playlists(&self) -> Result<Vec<Playlist>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT playlist_id, name, source_url FROM playlists ORDER BY name")?;
        let playlists = stmt
            .query_map([], |row| {
                Ok(Playlist {
                    playlist_id: row.get(0)?,
                    name: row.get(1)?,
                    source_url: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(playlists)
    }

    fn get_playlist_tracks(&self, playlist_id: &str) -> Result<Vec<Track>> {
        let conn = self.conn.lock().unwrap();
        Self::query_tracks(
            &conn,
            &format!(
                r#"SELECT {} FROM playlist_tracks pt
                   JOIN tracks t ON t.identity = pt.track_identity
                   WHERE pt.playlist_id = ?1
                   ORDER BY pt.track_order"#,
                track_columns("t")
            ),
            [playlist_id],
        )
    }

    fn enqueue_download(&self, request: &QueueRequest, playlist_id: Option<&str>) -> Result<bool> {
        let (artist, album) = match request {
            QueueRequest::AlbumBundle { artist, album, .. } => {
                (Some(artist.as_str()), Some(album.as_str()))
            }
            QueueRequest::SingleTrack { .. } => (None, None),
        };
        let kind = request.kind().as_db_str();

        let conn = self.conn.lock().unwrap();
        if request.identity_guess().is_none() {
            let exists = conn
                .query_row(
                    "SELECT 1 FROM download_queue WHERE kind = ?1 AND search_query = ?2",
                    params![kind, request.query()],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            if exists {
                debug!("Already queued: {}", request.query());
                return Ok(false);
            }
        }

        let inserted = conn.execute(
            r#"INSERT OR IGNORE INTO download_queue (
                   kind, search_query, identity_guess, artist, album, playlist_id,
                   status, created_at
               ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7)"#,
            params![
                kind,
                request.query(),
                request.identity_guess(),
                artist,
                album,
                playlist_id.unwrap_or(""),
                Self::now(),
            ],
        )?;
        if inserted > 0 {
            info!("Queued {} download: {}", kind, request.query());
        }
        Ok(inserted > 0)
    }

    fn find_queue_item_by_query(&self, kind: QueueKind, query: &str) -> Result<Option<QueueItem>> {
        let conn = self.conn.lock().unwrap();
        let item = conn
            .query_row(
                "SELECT * FROM download_queue WHERE kind = ?1 AND search_query = ?2 ORDER BY id LIMIT 1",
                params![kind.as_db_str(), query],
                Self::row_to_queue_item,
            )
            .optional()?;
        Ok(item)
    }

    fn list_downloads_by_status(&self, status: QueueStatus) -> Result<Vec<QueueItem>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM download_queue WHERE status = ?1 ORDER BY id")?;
        let items = stmt
            .query_map([status.as_db_str()], Self::row_to_queue_item)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(items)
    }

    fn update_download_status(&self, id: i64, status: QueueStatus) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE download_queue SET status = ?2, last_attempt_at = ?3 WHERE id = ?1",
            params![id, status.as_db_str(), Self::now()],
        )?;
        Ok(())
    }

    fn remove_download(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM download_queue WHERE id = ?1", [id])?;
        Ok(())
    }

    fn library_stats(&self) -> Result<LibraryStats> {
        let conn = self.conn.lock().unwrap();
        Ok(LibraryStats {
            tracks: Self::count(&conn, "SELECT COUNT(*) FROM tracks")?,
            local_tracks: Self::count(
                &conn,
                "SELECT COUNT(*) FROM tracks WHERE local_path IS NOT NULL",
            )?,
            synced_tracks: Self::count(&conn, "SELECT COUNT(*) FROM tracks WHERE synced = 1")?,
            artists: Self::count(&conn, "SELECT COUNT(DISTINCT artist) FROM tracks")?,
            albums: Self::count(&conn, "SELECT COUNT(*) FROM albums")?,
            incomplete_albums: Self::incomplete_albums(&conn)?.len(),
            playlists: Self::count(&conn, "SELECT COUNT(*) FROM playlists")?,
            pending_downloads: Self::count(
                &conn,
                "SELECT COUNT(*) FROM download_queue WHERE status = 'pending'",
            )?,
            failed_downloads: Self::count(
                &conn,
                "SELECT COUNT(*) FROM download_queue WHERE status = 'failed'",
            )?,
            duplicate_groups: Self::count(&conn, "SELECT COUNT(DISTINCT identity) FROM duplicates")?,
        })
    }

    fn database_path(&self) -> Option<PathBuf> {
        self.path.clone()
    }

    fn checkpoint(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        // Harmless outside WAL mode: sqlite reports busy=0, log=-1.
        conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))
            .context("Failed to checkpoint catalog")?;
        Ok(())
    }
}
