//! Database schema for the catalog file.

use crate::sqlite_column;
use crate::sqlite_persistence::{
    Column, ForeignKey, ForeignKeyOnChange, SqlType, Table, VersionedSchema, DEFAULT_TIMESTAMP,
};
use anyhow::Result;
use rusqlite::Connection;

const TRACKS_TABLE: Table = Table {
    name: "tracks",
    columns: &[
        sqlite_column!("identity", &SqlType::Text, is_primary_key = true),
        sqlite_column!("title", &SqlType::Text, non_null = true),
        sqlite_column!("artist", &SqlType::Text, non_null = true),
        sqlite_column!("album", &SqlType::Text, non_null = true),
        sqlite_column!("secondary_code", &SqlType::Text),
        sqlite_column!("local_path", &SqlType::Text, is_unique = true),
        sqlite_column!("device_path", &SqlType::Text),
        sqlite_column!(
            "synced",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("release_id", &SqlType::Text),
        sqlite_column!("disc_number", &SqlType::Integer),
        sqlite_column!("track_number", &SqlType::Integer),
    ],
    indices: &[
        ("idx_tracks_release", "release_id"),
        ("idx_tracks_artist", "artist"),
    ],
    unique_constraints: &[],
};

const ALBUMS_TABLE: Table = Table {
    name: "albums",
    columns: &[
        sqlite_column!("release_id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("title", &SqlType::Text, non_null = true),
        sqlite_column!(
            "total_tracks",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
    ],
    indices: &[],
    unique_constraints: &[],
};

const PLAYLISTS_TABLE: Table = Table {
    name: "playlists",
    columns: &[
        sqlite_column!("playlist_id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("name", &SqlType::Text, non_null = true),
        sqlite_column!("source_url", &SqlType::Text),
    ],
    indices: &[],
    unique_constraints: &[],
};

const PLAYLIST_TRACKS_TABLE: Table = Table {
    name: "playlist_tracks",
    columns: &[
        sqlite_column!(
            "playlist_id",
            &SqlType::Text,
            non_null = true,
            foreign_key = Some(&ForeignKey {
                foreign_table: "playlists",
                foreign_column: "playlist_id",
                on_delete: ForeignKeyOnChange::Cascade,
            })
        ),
        sqlite_column!("track_identity", &SqlType::Text, non_null = true),
        sqlite_column!("track_order", &SqlType::Integer, non_null = true),
    ],
    indices: &[("idx_playlist_tracks_track", "track_identity")],
    unique_constraints: &[&["playlist_id", "track_identity"]],
};

const DUPLICATES_TABLE: Table = Table {
    name: "duplicates",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("identity", &SqlType::Text, non_null = true),
        sqlite_column!("file_path", &SqlType::Text, non_null = true),
        sqlite_column!(
            "detected_at",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
    ],
    indices: &[],
    unique_constraints: &[&["identity", "file_path"]],
};

/// First queue layout: album requests were flagged by a prefix inside
/// `search_query` and a placeholder `identity_guess`.
const DOWNLOAD_QUEUE_TABLE_V0: Table = Table {
    name: "download_queue",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("search_query", &SqlType::Text, non_null = true),
        sqlite_column!(
            "playlist_id",
            &SqlType::Text,
            non_null = true,
            default_value = Some("''")
        ),
        sqlite_column!(
            "status",
            &SqlType::Text,
            non_null = true,
            default_value = Some("'pending'")
        ),
        sqlite_column!("last_attempt_at", &SqlType::Integer),
        sqlite_column!("identity_guess", &SqlType::Text, non_null = true),
    ],
    indices: &[("idx_download_queue_status", "status")],
    unique_constraints: &[&["identity_guess", "playlist_id"]],
};

const DOWNLOAD_QUEUE_TABLE_V1: Table = Table {
    name: "download_queue",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("kind", &SqlType::Text, non_null = true),
        sqlite_column!("search_query", &SqlType::Text, non_null = true),
        sqlite_column!("identity_guess", &SqlType::Text),
        sqlite_column!("artist", &SqlType::Text),
        sqlite_column!("album", &SqlType::Text),
        sqlite_column!(
            "playlist_id",
            &SqlType::Text,
            non_null = true,
            default_value = Some("''")
        ),
        sqlite_column!(
            "status",
            &SqlType::Text,
            non_null = true,
            default_value = Some("'pending'")
        ),
        sqlite_column!("last_attempt_at", &SqlType::Integer),
        sqlite_column!(
            "created_at",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
    ],
    indices: &[
        ("idx_download_queue_status", "status"),
        ("idx_download_queue_query", "kind, search_query"),
    ],
    unique_constraints: &[&["identity_guess", "playlist_id"]],
};

/// Prefix that marked album requests in the V0 queue.
const LEGACY_ALBUM_PREFIX: &str = "::ALBUM::";
const LEGACY_ALBUM_IDENTITY: &str = "ALBUM_MODE";

/// Rewrites the queue into the tagged layout. Album requests lose their
/// prefix and placeholder identity; `artist`/`album` are recovered from the
/// "Artist - Album" query text when possible.
fn migrate_queue_to_tagged_requests(conn: &Connection) -> Result<()> {
    conn.execute_batch(&format!(
        "CREATE TEMP TABLE legacy_queue AS SELECT * FROM download_queue;
         DROP TABLE download_queue;
         {create}
         CREATE INDEX idx_download_queue_status ON download_queue(status);
         CREATE INDEX idx_download_queue_query ON download_queue(kind, search_query);",
        create = DOWNLOAD_QUEUE_TABLE_V1.create_sql()
    ))?;

    conn.execute(
        "INSERT INTO download_queue
            (id, kind, search_query, identity_guess, playlist_id, status, last_attempt_at)
         SELECT id, 'single_track', search_query, NULLIF(identity_guess, ''),
                playlist_id, status, last_attempt_at
         FROM temp.legacy_queue
         WHERE identity_guess != ?1 AND search_query NOT LIKE ?2 || '%'",
        rusqlite::params![LEGACY_ALBUM_IDENTITY, LEGACY_ALBUM_PREFIX],
    )?;

    conn.execute(
        "INSERT INTO download_queue
            (id, kind, search_query, artist, album, playlist_id, status, last_attempt_at)
         SELECT id, 'album_bundle', q,
                CASE WHEN instr(q, ' - ') > 0 THEN substr(q, 1, instr(q, ' - ') - 1) END,
                CASE WHEN instr(q, ' - ') > 0 THEN substr(q, instr(q, ' - ') + 3) END,
                playlist_id, status, last_attempt_at
         FROM (SELECT *, trim(replace(search_query, ?2, '')) AS q FROM temp.legacy_queue)
         WHERE identity_guess = ?1 OR search_query LIKE ?2 || '%'",
        rusqlite::params![LEGACY_ALBUM_IDENTITY, LEGACY_ALBUM_PREFIX],
    )?;

    conn.execute("DROP TABLE temp.legacy_queue", [])?;
    Ok(())
}

pub const CATALOG_VERSIONED_SCHEMAS: &[VersionedSchema] = &[
    VersionedSchema {
        version: 0,
        tables: &[
            TRACKS_TABLE,
            ALBUMS_TABLE,
            PLAYLISTS_TABLE,
            PLAYLIST_TRACKS_TABLE,
            DOWNLOAD_QUEUE_TABLE_V0,
            DUPLICATES_TABLE,
        ],
        migration: None,
    },
    VersionedSchema {
        version: 1,
        tables: &[
            TRACKS_TABLE,
            ALBUMS_TABLE,
            PLAYLISTS_TABLE,
            PLAYLIST_TRACKS_TABLE,
            DOWNLOAD_QUEUE_TABLE_V1,
            DUPLICATES_TABLE,
        ],
        migration: Some(migrate_queue_to_tagged_requests),
    },
];
