//! The external download tool (an `sldl`/slsk-batchdl style command line).

use crate::catalog::QueueRequest;
use async_trait::async_trait;
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Error)]
pub enum DownloadError {
    /// The download executable could not be launched at all.
    #[error("download tool not found: {0}")]
    ToolMissing(String),

    #[error("download of '{query}' failed: {message}")]
    Failed { query: String, message: String },

    #[error("download of '{query}' timed out after {secs}s")]
    Timeout { query: String, secs: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DownloadError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, DownloadError::ToolMissing(_))
    }
}

/// Download capability. On success the tool has written zero or more audio
/// files somewhere below `staging_dir`; callers discover them by scanning.
#[async_trait]
pub trait Downloader: Send + Sync {
    async fn download(&self, request: &QueueRequest, staging_dir: &Path)
        -> Result<(), DownloadError>;
}

/// Search tuning flags passed through to the tool.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SearchFlags {
    pub fast_search: bool,
    pub remove_ft: bool,
    pub desperate: bool,
    pub strict_quality: bool,
}

pub struct SlskDownloader {
    /// Executable followed by any fixed leading arguments.
    command: Vec<String>,
    username: Option<String>,
    password: Option<String>,
    library_root: PathBuf,
    flags: SearchFlags,
    timeout: Duration,
}

impl SlskDownloader {
    pub fn new(
        command: Vec<String>,
        username: Option<String>,
        password: Option<String>,
        library_root: PathBuf,
        flags: SearchFlags,
        timeout: Duration,
    ) -> Self {
        SlskDownloader {
            command,
            username,
            password,
            library_root,
            flags,
            timeout,
        }
    }

    pub fn command_args(&self, request: &QueueRequest, staging_dir: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = self
            .command
            .iter()
            .skip(1)
            .map(OsString::from)
            .collect();
        if let Some(user) = &self.username {
            args.push("--user".into());
            args.push(user.into());
        }
        if let Some(pass) = &self.password {
            args.push("--pass".into());
            args.push(pass.into());
        }
        args.push("--input".into());
        args.push(request.query().into());
        args.push("-p".into());
        args.push(staging_dir.as_os_str().to_os_string());

        match request {
            QueueRequest::AlbumBundle { .. } => {
                args.push("--album".into());
                args.push("--skip-music-dir".into());
                args.push(self.library_root.as_os_str().to_os_string());
            }
            QueueRequest::SingleTrack { .. } => {
                args.push("--format".into());
                args.push("flac".into());
            }
        }

        if self.flags.fast_search {
            args.push("--fast-search".into());
        }
        if self.flags.remove_ft {
            args.push("--remove-ft".into());
        }
        if self.flags.desperate {
            args.push("--desperate".into());
        }
        if self.flags.strict_quality {
            args.push("--strict-conditions".into());
            args.push("--pref-format".into());
            args.push("flac,wav".into());
        }
        args
    }
}

#[async_trait]
impl Downloader for SlskDownloader {
    async fn download(
        &self,
        request: &QueueRequest,
        staging_dir: &Path,
    ) -> Result<(), DownloadError> {
        let Some(program) = self.command.first() else {
            return Err(DownloadError::ToolMissing("no download command configured".into()));
        };
        tokio::fs::create_dir_all(staging_dir).await?;

        let child = Command::new(program)
            .args(self.command_args(request, staging_dir))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let child = match child {
            Ok(child) => child,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(DownloadError::ToolMissing(program.clone()))
            }
            Err(e) => return Err(e.into()),
        };

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                return Err(DownloadError::Timeout {
                    query: request.query().to_string(),
                    secs: self.timeout.as_secs(),
                })
            }
        };

        for line in String::from_utf8_lossy(&output.stdout).lines() {
            debug!("[downloader] {}", line);
        }

        if !output.status.success() {
            return Err(DownloadError::Failed {
                query: request.query().to_string(),
                message: format!(
                    "exit status {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(())
    }
}
