//! Audio conversion for the device, using ffmpeg.

use async_trait::async_trait;
use serde::Deserialize;
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Errors that can occur during audio conversion.
#[derive(Debug, Error)]
pub enum ConversionError {
    /// The conversion executable could not be launched at all.
    #[error("conversion tool not found: {0}")]
    ToolMissing(String),

    #[error("conversion of {source_path:?} failed: {message}")]
    Failed {
        source_path: PathBuf,
        message: String,
    },

    #[error("conversion of {source_path:?} timed out after {secs}s")]
    Timeout { source_path: PathBuf, secs: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConversionError {
    /// Whether the whole batch must stop rather than just this item.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ConversionError::ToolMissing(_))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Flac,
    Mp3,
    Opus,
    Aac,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Flac => "flac",
            OutputFormat::Mp3 => "mp3",
            OutputFormat::Opus => "opus",
            OutputFormat::Aac => "m4a",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "flac" => Ok(OutputFormat::Flac),
            "mp3" => Ok(OutputFormat::Mp3),
            "opus" => Ok(OutputFormat::Opus),
            "aac" | "m4a" => Ok(OutputFormat::Aac),
            other => Err(format!("unsupported output format: {}", other)),
        }
    }
}

/// Target encoding for files written to the device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConversionSpec {
    pub sample_rate: u32,
    pub bit_depth: u32,
    pub format: OutputFormat,
    /// Only meaningful for lossy formats.
    pub bitrate_kbps: Option<u32>,
}

impl Default for ConversionSpec {
    fn default() -> Self {
        ConversionSpec {
            sample_rate: 44100,
            bit_depth: 16,
            format: OutputFormat::Flac,
            bitrate_kbps: None,
        }
    }
}

/// Conversion capability. Implementations must carry embedded metadata over
/// from `source` to `target` and create `target`'s parent directories.
#[async_trait]
pub trait Converter: Send + Sync {
    async fn convert(
        &self,
        source: &Path,
        target: &Path,
        spec: &ConversionSpec,
    ) -> Result<(), ConversionError>;
}

pub struct FfmpegConverter {
    ffmpeg_path: PathBuf,
    timeout: Duration,
}

impl FfmpegConverter {
    pub fn new(ffmpeg_path: impl Into<PathBuf>, timeout: Duration) -> Self {
        FfmpegConverter {
            ffmpeg_path: ffmpeg_path.into(),
            timeout,
        }
    }

    /// Codec arguments for `spec`, without input and output.
    fn codec_args(spec: &ConversionSpec) -> Vec<String> {
        let mut args: Vec<String> = Vec::new();
        let lossy_bitrate = |args: &mut Vec<String>, fallback: [&str; 2]| match spec.bitrate_kbps {
            Some(kbps) => args.extend(["-b:a".to_string(), format!("{}k", kbps)]),
            None => args.extend(fallback.map(str::to_string)),
        };
        match spec.format {
            OutputFormat::Flac => {
                // ffmpeg's flac encoder stores 24-bit audio in s32 samples.
                let sample_fmt = if spec.bit_depth > 16 { "s32" } else { "s16" };
                args.extend(["-c:a", "flac", "-sample_fmt", sample_fmt].map(str::to_string));
            }
            OutputFormat::Mp3 => {
                args.extend(["-c:a".to_string(), "libmp3lame".to_string()]);
                lossy_bitrate(&mut args, ["-q:a", "0"]);
            }
            OutputFormat::Opus => {
                args.extend(["-c:a".to_string(), "libopus".to_string()]);
                lossy_bitrate(&mut args, ["-b:a", "128k"]);
            }
            OutputFormat::Aac => {
                args.extend(["-c:a".to_string(), "aac".to_string()]);
                lossy_bitrate(&mut args, ["-q:a", "2"]);
            }
        }
        args.extend(["-ar".to_string(), spec.sample_rate.to_string()]);
        if spec.format == OutputFormat::Flac {
            args.extend(["-compression_level".to_string(), "5".to_string()]);
        }
        args
    }

    pub fn command_args(source: &Path, target: &Path, spec: &ConversionSpec) -> Vec<OsString> {
        let mut args = vec![OsString::from("-i"), source.as_os_str().to_os_string()];
        args.extend(Self::codec_args(spec).into_iter().map(OsString::from));
        for arg in ["-map_metadata", "0", "-y"] {
            args.push(OsString::from(arg));
        }
        args.push(target.as_os_str().to_os_string());
        args
    }

    /// Checks that the configured executable can be launched.
    pub async fn check_available(&self) -> Result<(), ConversionError> {
        match Command::new(&self.ffmpeg_path)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
        {
            Ok(status) if status.success() => Ok(()),
            Ok(_) => Err(ConversionError::ToolMissing(format!(
                "{:?} -version failed",
                self.ffmpeg_path
            ))),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(ConversionError::ToolMissing(
                format!("{:?}", self.ffmpeg_path),
            )),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl Converter for FfmpegConverter {
    async fn convert(
        &self,
        source: &Path,
        target: &Path,
        spec: &ConversionSpec,
    ) -> Result<(), ConversionError> {
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let args = Self::command_args(source, target, spec);
        debug!("Running {:?} {:?}", self.ffmpeg_path, args);

        let child = Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let child = match child {
            Ok(child) => child,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ConversionError::ToolMissing(format!("{:?}", self.ffmpeg_path)))
            }
            Err(e) => return Err(e.into()),
        };

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                return Err(ConversionError::Timeout {
                    source_path: source.to_path_buf(),
                    secs: self.timeout.as_secs(),
                })
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr
                .lines()
                .rev()
                .take(5)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect::<Vec<_>>()
                .join("\n");
            return Err(ConversionError::Failed {
                source_path: source.to_path_buf(),
                message: tail,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args_as_strings(spec: &ConversionSpec) -> Vec<String> {
        FfmpegConverter::command_args(Path::new("in.flac"), Path::new("out.x"), spec)
            .into_iter()
            .map(|s| s.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn flac_args_resample_and_keep_metadata() {
        let args = args_as_strings(&ConversionSpec::default());
        assert_eq!(
            args,
            vec![
                "-i", "in.flac", "-c:a", "flac", "-sample_fmt", "s16", "-ar", "44100",
                "-compression_level", "5", "-map_metadata", "0", "-y", "out.x"
            ]
        );
    }

    #[test]
    fn high_bit_depth_flac_uses_s32() {
        let spec = ConversionSpec {
            bit_depth: 24,
            sample_rate: 48000,
            ..Default::default()
        };
        let args = args_as_strings(&spec);
        assert!(args.windows(2).any(|w| w == ["-sample_fmt", "s32"]));
        assert!(args.windows(2).any(|w| w == ["-ar", "48000"]));
    }

    #[test]
    fn lossy_formats_pick_bitrate_or_quality() {
        let mp3 = ConversionSpec {
            format: OutputFormat::Mp3,
            ..Default::default()
        };
        assert!(args_as_strings(&mp3).windows(2).any(|w| w == ["-q:a", "0"]));

        let mp3_cbr = ConversionSpec {
            format: OutputFormat::Mp3,
            bitrate_kbps: Some(320),
            ..Default::default()
        };
        assert!(args_as_strings(&mp3_cbr)
            .windows(2)
            .any(|w| w == ["-b:a", "320k"]));

        let opus = ConversionSpec {
            format: OutputFormat::Opus,
            ..Default::default()
        };
        assert!(args_as_strings(&opus).windows(2).any(|w| w == ["-b:a", "128k"]));
        assert!(!args_as_strings(&opus).contains(&"-compression_level".to_string()));
    }

    #[test]
    fn parses_format_names() {
        assert_eq!("FLAC".parse::<OutputFormat>(), Ok(OutputFormat::Flac));
        assert_eq!("m4a".parse::<OutputFormat>(), Ok(OutputFormat::Aac));
        assert!("wma".parse::<OutputFormat>().is_err());
        assert_eq!(OutputFormat::Aac.extension(), "m4a");
    }

    #[tokio::test]
    async fn missing_executable_is_fatal() {
        let dir = tempfile::TempDir::new().unwrap();
        let converter = FfmpegConverter::new(
            dir.path().join("no-such-ffmpeg"),
            Duration::from_secs(5),
        );
        let err = converter
            .convert(
                &dir.path().join("in.flac"),
                &dir.path().join("out/out.flac"),
                &ConversionSpec::default(),
            )
            .await
            .unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(
            converter.check_available().await,
            Err(ConversionError::ToolMissing(_))
        ));
    }
}
