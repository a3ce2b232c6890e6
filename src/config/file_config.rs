use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct FileConfig {
    // Core paths (can override CLI)
    pub db_path: Option<String>,
    pub library_root: Option<String>,
    pub staging_dir: Option<String>,
    pub recovery_dir: Option<String>,
    pub report_dir: Option<String>,

    // Sections
    pub device: Option<DeviceConfig>,
    pub conversion: Option<ConversionConfig>,
    pub tools: Option<ToolsConfig>,
    pub sync: Option<SyncConfig>,
    pub duplicates: Option<DuplicatesConfig>,
    pub audit: Option<AuditConfig>,
    pub metadata: Option<MetadataConfig>,
    pub playlists: Option<PlaylistsConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct DeviceConfig {
    pub root: Option<String>,
    pub music_dir: Option<String>,
    pub playlists_dir: Option<String>,
    /// Bytes; smaller device files are ignored.
    pub min_file_size: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ConversionConfig {
    pub sample_rate: Option<u32>,
    pub bit_depth: Option<u32>,
    /// flac, mp3, opus or aac
    pub format: Option<String>,
    pub bitrate_kbps: Option<u32>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg_path: Option<String>,
    pub ffmpeg_timeout_sec: Option<u64>,
    /// Download executable plus any fixed leading arguments.
    pub download_command: Option<Vec<String>>,
    pub download_timeout_sec: Option<u64>,
    pub slsk_username: Option<String>,
    pub slsk_password: Option<String>,
    pub fast_search: Option<bool>,
    pub remove_ft: Option<bool>,
    pub desperate: Option<bool>,
    pub strict_quality: Option<bool>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct SyncConfig {
    pub confirm_threshold: Option<usize>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct DuplicatesConfig {
    pub base_score: Option<i32>,
    pub numbered_copy_penalty: Option<i32>,
    pub track_number_penalty: Option<i32>,
    pub featuring_penalty: Option<i32>,
    pub lossless_bonus: Option<i32>,
    pub lossless_container_bonus: Option<i32>,
    pub lossy_bonus: Option<i32>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct AuditConfig {
    pub max_missing_tracks: Option<usize>,
    pub max_missing_ratio: Option<f64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct MetadataConfig {
    pub enabled: Option<bool>,
    pub user_agent: Option<String>,
    pub base_url: Option<String>,
    pub min_interval_ms: Option<u64>,
    pub timeout_sec: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct PlaylistsConfig {
    /// Falls back to SPOTIPY_CLIENT_ID.
    pub client_id: Option<String>,
    /// Falls back to SPOTIPY_CLIENT_SECRET.
    pub client_secret: Option<String>,
    pub api_base: Option<String>,
    pub accounts_base: Option<String>,
    pub timeout_sec: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
