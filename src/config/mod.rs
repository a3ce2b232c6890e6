mod file_config;

pub use file_config::{
    AuditConfig, ConversionConfig, DeviceConfig, DuplicatesConfig, FileConfig, MetadataConfig,
    PlaylistsConfig, SyncConfig, ToolsConfig,
};

use crate::audit::AuditThresholds;
use crate::duplicates::ScoringWeights;
use crate::media::metadata::MUSICBRAINZ_API_BASE;
use crate::media::playlist_source::{SPOTIFY_ACCOUNTS_BASE, SPOTIFY_API_BASE};
use crate::media::{ConversionSpec, OutputFormat, SearchFlags};
use anyhow::{anyhow, bail, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_DB_FILE: &str = "dap_library.db";

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliConfig {
    pub config_file: Option<PathBuf>,
    pub db_path: Option<PathBuf>,
    pub library_root: Option<PathBuf>,
    pub device_root: Option<PathBuf>,
    pub staging_dir: Option<PathBuf>,
    pub ffmpeg_path: Option<String>,
    pub format: Option<OutputFormat>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSettings {
    /// Mount point. Not validated here: the device may be unplugged.
    pub root: Option<PathBuf>,
    pub music_dir: String,
    pub playlists_dir: String,
    pub min_file_size: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolSettings {
    pub ffmpeg_path: String,
    pub ffmpeg_timeout: Duration,
    pub download_command: Vec<String>,
    pub download_timeout: Duration,
    pub slsk_username: Option<String>,
    pub slsk_password: Option<String>,
    pub search_flags: SearchFlags,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetadataSettings {
    pub enabled: bool,
    pub user_agent: String,
    pub base_url: String,
    /// Minimum spacing between two requests.
    pub min_interval: Duration,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistSettings {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub api_base: String,
    pub accounts_base: String,
    pub timeout: Duration,
}

impl PlaylistSettings {
    /// Both halves of the client credentials, when configured.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.client_id.as_deref(), self.client_secret.as_deref()) {
            (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty() => Some((id, secret)),
            _ => None,
        }
    }
}

/// Fully resolved, immutable configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub library_root: Option<PathBuf>,
    pub staging_dir: PathBuf,
    pub recovery_dir: PathBuf,
    pub report_dir: PathBuf,

    pub device: DeviceSettings,
    pub conversion: ConversionSpec,
    pub tools: ToolSettings,
    pub confirm_threshold: usize,
    pub scoring: ScoringWeights,
    pub audit: AuditThresholds,
    pub metadata: MetadataSettings,
    pub playlists: PlaylistSettings,

    /// What this value was resolved from, kept for [`AppConfig::reload`].
    cli: CliConfig,
}

impl AppConfig {
    /// Resolves from CLI arguments and the TOML file named by
    /// `cli.config_file`, if any.
    pub fn load(cli: &CliConfig) -> Result<Self> {
        let file = match &cli.config_file {
            Some(path) => Some(FileConfig::load(path)?),
            None => None,
        };
        Self::resolve(cli, file)
    }

    /// Re-reads the config file this value came from and resolves again.
    /// The current value is left untouched.
    pub fn reload(&self) -> Result<Self> {
        Self::load(&self.cli)
    }

    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_path = file
            .db_path
            .map(PathBuf::from)
            .or_else(|| cli.db_path.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_FILE));
        let db_dir = db_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        if !db_dir.is_dir() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }

        let library_root = file
            .library_root
            .map(PathBuf::from)
            .or_else(|| cli.library_root.clone());
        if let Some(root) = &library_root {
            if root.exists() && !root.is_dir() {
                bail!("library_root is not a directory: {:?}", root);
            }
        }

        let staging_dir = file
            .staging_dir
            .map(PathBuf::from)
            .or_else(|| cli.staging_dir.clone())
            .unwrap_or_else(|| db_dir.join("downloads"));
        let recovery_dir = file
            .recovery_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| db_dir.join("Restored_From_Device"));
        let report_dir = file
            .report_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| db_dir.clone());

        let device_file = file.device.unwrap_or_default();
        let device = DeviceSettings {
            root: device_file
                .root
                .map(PathBuf::from)
                .or_else(|| cli.device_root.clone()),
            music_dir: device_file.music_dir.unwrap_or_else(|| "Music".to_string()),
            playlists_dir: device_file
                .playlists_dir
                .unwrap_or_else(|| "Playlists".to_string()),
            min_file_size: device_file.min_file_size.unwrap_or(1024),
        };

        let conversion_file = file.conversion.unwrap_or_default();
        let format = match conversion_file.format {
            Some(s) => s.parse::<OutputFormat>().map_err(|e| anyhow!(e))?,
            None => cli.format.unwrap_or(OutputFormat::Flac),
        };
        let defaults = ConversionSpec::default();
        let conversion = ConversionSpec {
            sample_rate: conversion_file.sample_rate.unwrap_or(defaults.sample_rate),
            bit_depth: conversion_file.bit_depth.unwrap_or(defaults.bit_depth),
            format,
            bitrate_kbps: conversion_file.bitrate_kbps,
        };
        if ![16, 24, 32].contains(&conversion.bit_depth) {
            bail!("Unsupported bit depth: {}", conversion.bit_depth);
        }

        let tools_file = file.tools.unwrap_or_default();
        let tools = ToolSettings {
            ffmpeg_path: tools_file
                .ffmpeg_path
                .or_else(|| cli.ffmpeg_path.clone())
                .unwrap_or_else(|| "ffmpeg".to_string()),
            ffmpeg_timeout: Duration::from_secs(tools_file.ffmpeg_timeout_sec.unwrap_or(600)),
            download_command: tools_file
                .download_command
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| vec!["sldl".to_string()]),
            download_timeout: Duration::from_secs(tools_file.download_timeout_sec.unwrap_or(300)),
            slsk_username: tools_file.slsk_username,
            slsk_password: tools_file.slsk_password,
            search_flags: SearchFlags {
                fast_search: tools_file.fast_search.unwrap_or(false),
                remove_ft: tools_file.remove_ft.unwrap_or(false),
                desperate: tools_file.desperate.unwrap_or(false),
                strict_quality: tools_file.strict_quality.unwrap_or(false),
            },
        };

        let confirm_threshold = file
            .sync
            .unwrap_or_default()
            .confirm_threshold
            .unwrap_or(50);

        let dup = file.duplicates.unwrap_or_default();
        let weights = ScoringWeights::default();
        let scoring = ScoringWeights {
            base: dup.base_score.unwrap_or(weights.base),
            numbered_copy_penalty: dup
                .numbered_copy_penalty
                .unwrap_or(weights.numbered_copy_penalty),
            track_number_penalty: dup
                .track_number_penalty
                .unwrap_or(weights.track_number_penalty),
            featuring_penalty: dup.featuring_penalty.unwrap_or(weights.featuring_penalty),
            lossless_bonus: dup.lossless_bonus.unwrap_or(weights.lossless_bonus),
            lossless_container_bonus: dup
                .lossless_container_bonus
                .unwrap_or(weights.lossless_container_bonus),
            lossy_bonus: dup.lossy_bonus.unwrap_or(weights.lossy_bonus),
        };

        let audit_file = file.audit.unwrap_or_default();
        let thresholds = AuditThresholds::default();
        let audit = AuditThresholds {
            max_missing_tracks: audit_file
                .max_missing_tracks
                .unwrap_or(thresholds.max_missing_tracks),
            max_missing_ratio: audit_file
                .max_missing_ratio
                .unwrap_or(thresholds.max_missing_ratio),
        };
        if !(0.0..=1.0).contains(&audit.max_missing_ratio) {
            bail!(
                "audit.max_missing_ratio must be between 0 and 1, got {}",
                audit.max_missing_ratio
            );
        }

        let metadata_file = file.metadata.unwrap_or_default();
        let metadata = MetadataSettings {
            enabled: metadata_file.enabled.unwrap_or(true),
            user_agent: metadata_file.user_agent.unwrap_or_else(|| {
                format!("DAPManager/{} ( contact@example.com )", env!("CARGO_PKG_VERSION"))
            }),
            base_url: metadata_file
                .base_url
                .unwrap_or_else(|| MUSICBRAINZ_API_BASE.to_string()),
            min_interval: Duration::from_millis(metadata_file.min_interval_ms.unwrap_or(1100)),
            timeout: Duration::from_secs(metadata_file.timeout_sec.unwrap_or(30)),
        };

        let playlists_file = file.playlists.unwrap_or_default();
        let playlists = PlaylistSettings {
            client_id: playlists_file
                .client_id
                .or_else(|| std::env::var("SPOTIPY_CLIENT_ID").ok()),
            client_secret: playlists_file
                .client_secret
                .or_else(|| std::env::var("SPOTIPY_CLIENT_SECRET").ok()),
            api_base: playlists_file
                .api_base
                .unwrap_or_else(|| SPOTIFY_API_BASE.to_string()),
            accounts_base: playlists_file
                .accounts_base
                .unwrap_or_else(|| SPOTIFY_ACCOUNTS_BASE.to_string()),
            timeout: Duration::from_secs(playlists_file.timeout_sec.unwrap_or(30)),
        };

        Ok(Self {
            db_path,
            library_root,
            staging_dir,
            recovery_dir,
            report_dir,
            device,
            conversion,
            tools,
            confirm_threshold,
            scoring,
            audit,
            metadata,
            playlists,
            cli: cli.clone(),
        })
    }

    pub fn config_file(&self) -> Option<&Path> {
        self.cli.config_file.as_deref()
    }
}
