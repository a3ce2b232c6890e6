use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use dap_manager::config::{AppConfig, CliConfig};
use dap_manager::confirm::{AutoConfirm, ConfirmationPrompt, StdinPrompt};
use dap_manager::media::OutputFormat;
use dap_manager::sync::{SyncOptions, SyncSummary};
use dap_manager::{LibraryManager, SyncSelection};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
#[command(name = "dap-manager")]
#[command(about = "Keep a music library, its catalog and a portable player in sync")]
#[command(version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_HASH"), ")"))]
struct CliArgs {
    /// TOML config file. Its values override the flags below.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Path to the SQLite catalog database file.
    #[clap(long, value_parser = parse_path)]
    pub db: Option<PathBuf>,

    /// Root of the local music library.
    #[clap(long, value_parser = parse_path)]
    pub library: Option<PathBuf>,

    /// Mount point of the device.
    #[clap(long, value_parser = parse_path)]
    pub device: Option<PathBuf>,

    /// Scratch directory for the download tool.
    #[clap(long, value_parser = parse_path)]
    pub staging: Option<PathBuf>,

    /// ffmpeg executable.
    #[clap(long)]
    pub ffmpeg: Option<String>,

    /// Output format for files written to the device.
    #[clap(long)]
    pub format: Option<OutputFormat>,

    /// Answer yes to every confirmation.
    #[clap(short = 'y', long, default_value_t = false)]
    pub yes: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scans the library and records every tagged file.
    Scan,

    /// Runs a full device sync.
    Sync {
        #[arg(long, value_enum, default_value_t = SyncMode::Playlists)]
        mode: SyncMode,

        /// Artist substring, for `--mode artist`.
        #[arg(long)]
        artist: Option<String>,

        /// Match files already on the device first.
        #[arg(long, default_value_t = false)]
        reconcile: bool,

        /// Do not run the download queue first.
        #[arg(long, default_value_t = false)]
        skip_downloads: bool,
    },

    /// Marks catalogued tracks found on the device as synced.
    Reconcile,

    /// Copies device-only files into the recovery directory.
    Pull,

    /// Writes playlists onto the device.
    Playlists,

    /// Resolves duplicate groups.
    Dupes {
        /// Delete the losing files after confirmation.
        #[arg(long, default_value_t = false)]
        delete: bool,
    },

    /// Lists incomplete albums.
    Audit,

    /// Queues the missing tracks of one release.
    CompleteAlbum { release_id: String },

    /// Queues the missing tracks of every incomplete album.
    CompleteAll,

    /// Imports a remote playlist and queues its missing tracks.
    ImportPlaylist {
        /// Share link of the playlist.
        url: String,
    },

    /// Runs the download queue.
    Download,

    /// Prints library statistics.
    Stats,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum SyncMode {
    Playlists,
    Library,
    Artist,
}

fn selection(mode: SyncMode, artist: Option<String>) -> Result<SyncSelection> {
    Ok(match (mode, artist) {
        (SyncMode::Playlists, _) => SyncSelection::Playlists,
        (SyncMode::Library, _) => SyncSelection::Library,
        (SyncMode::Artist, Some(artist)) if !artist.trim().is_empty() => {
            SyncSelection::Artist(artist)
        }
        (SyncMode::Artist, _) => bail!("--mode artist requires --artist"),
    })
}

fn print_sync_summary(summary: &SyncSummary) {
    if let Some(r) = &summary.reconcile {
        println!("Reconciled: {} matched, {} newly marked", r.matched, r.newly_marked);
    }
    if let Some(d) = &summary.downloads {
        println!(
            "Downloads: {} completed, {} nothing new, {} failed",
            d.completed,
            d.nothing_new,
            d.failed.len()
        );
    }
    if let Some(f) = &summary.forward {
        if f.cancelled {
            println!("Sync cancelled.");
        } else {
            println!(
                "Synced: {} converted, {} already present, {} failed",
                f.converted,
                f.already_present,
                f.failed.len()
            );
            for failure in &f.failed {
                println!("  FAILED {} ({}): {}", failure.identity, failure.source, failure.message);
            }
        }
    }
    if let Some(p) = &summary.pull {
        println!("Restored from device: {}", p.copied.len());
    }
    if let Some(p) = &summary.playlists {
        println!("Playlists written: {}", p.written);
    }
    if let Some(path) = &summary.backup {
        println!("Catalog backed up to {}", path.display());
    }
    for (stage, message) in &summary.stage_errors {
        println!("Stage '{}' failed: {}", stage, message);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()?;

    let cli_config = CliConfig {
        config_file: cli_args.config.clone(),
        db_path: cli_args.db.clone(),
        library_root: cli_args.library.clone(),
        device_root: cli_args.device.clone(),
        staging_dir: cli_args.staging.clone(),
        ffmpeg_path: cli_args.ffmpeg.clone(),
        format: cli_args.format,
    };
    let config = AppConfig::load(&cli_config)?;
    info!("dap-manager {} ({})", env!("CARGO_PKG_VERSION"), env!("GIT_HASH"));

    let prompt: Arc<dyn ConfirmationPrompt> = if cli_args.yes {
        Arc::new(AutoConfirm(true))
    } else {
        Arc::new(StdinPrompt)
    };
    let manager = LibraryManager::open(config, prompt)?;

    match cli_args.command {
        Command::Scan => {
            let report = manager.scan_library().await?;
            println!(
                "Scanned {} files: {} added, {} skipped, {} duplicates, {} errors",
                report.files,
                report.added,
                report.skipped,
                report.duplicates,
                report.errors.len()
            );
        }
        Command::Sync {
            mode,
            artist,
            reconcile,
            skip_downloads,
        } => {
            let options = SyncOptions {
                selection: selection(mode, artist)?,
                reconcile_device: reconcile,
                run_downloads: !skip_downloads,
            };
            let summary = manager.sync(&options).await?;
            print_sync_summary(&summary);
        }
        Command::Reconcile => {
            let report = manager.reconcile_device()?;
            println!(
                "Reconciled {} device files: {} matched ({} newly marked), {} unknown, {} unreadable",
                report.scanned, report.matched, report.newly_marked, report.unknown, report.unreadable
            );
        }
        Command::Pull => {
            let report = manager.pull_from_device()?;
            println!(
                "Restored {} file(s) into {}",
                report.copied.len(),
                manager.config().recovery_dir.display()
            );
            for error in &report.errors {
                println!("  {}", error);
            }
        }
        Command::Playlists => {
            let report = manager.write_playlists()?;
            println!("Wrote {} playlist(s), {} entries", report.written, report.entries);
        }
        Command::Dupes { delete } => {
            let report = manager.resolve_duplicates()?;
            println!(
                "Resolved {} group(s), {} unresolved ({} sanity failures)",
                report.resolved.len(),
                report.unresolved.len(),
                report.sanity_failures()
            );
            for group in &report.resolved {
                println!("  {} -> {} (score {})", group.identity, group.winner.path, group.winner.score);
            }
            for group in &report.unresolved {
                println!("  UNRESOLVED {}: {:?}", group.identity, group.reason);
            }
            let candidates = report.deletion_candidates();
            if delete && !candidates.is_empty() {
                let deletion = manager.delete_duplicates(&candidates)?;
                if deletion.cancelled {
                    println!("Deletion cancelled.");
                } else {
                    println!(
                        "Deleted {} file(s), {} already missing, {} error(s)",
                        deletion.deleted.len(),
                        deletion.already_missing.len(),
                        deletion.errors.len()
                    );
                    for error in &deletion.errors {
                        println!("  {}", error);
                    }
                }
            } else if !candidates.is_empty() {
                println!(
                    "{} deletion candidate(s) listed in {}",
                    candidates.len(),
                    manager.config().report_dir.join("files_to_delete.txt").display()
                );
            }
        }
        Command::Audit => {
            let albums = manager.audit_library()?;
            if albums.is_empty() {
                println!("No incomplete albums found!");
            }
            for album in albums {
                println!(
                    "{} - {} [{}]: {}/{} ({} missing)",
                    album.artist, album.album, album.release_id, album.have, album.total, album.missing
                );
            }
        }
        Command::CompleteAlbum { release_id } => {
            let outcome = manager.complete_album(&release_id).await?;
            match outcome.decision {
                None => println!("Album is already complete."),
                Some(decision) => println!(
                    "{} missing, {:?}: queued {}, already queued {}",
                    outcome.missing, decision, outcome.queued, outcome.already_queued
                ),
            }
        }
        Command::CompleteAll => {
            let report = manager.complete_all().await?;
            println!(
                "{} incomplete album(s): {} request(s) queued, {} already queued, {} failed",
                report.albums,
                report.queued,
                report.already_queued,
                report.failures.len()
            );
            for (release_id, message) in &report.failures {
                println!("  {}: {}", release_id, message);
            }
        }
        Command::ImportPlaylist { url } => {
            let report = manager.import_playlist(&url).await?;
            println!(
                "Playlist '{}' ({}): {} of {} entries linked, {} local, {} queued, {} already queued",
                report.name,
                report.playlist_id,
                report.linked,
                report.entries,
                report.already_local,
                report.queued,
                report.already_queued
            );
            for (position, reason) in &report.skipped {
                println!("  SKIPPED #{}: {}", position + 1, reason);
            }
        }
        Command::Download => {
            let summary = manager.run_downloads().await?;
            println!(
                "Processed {} item(s): {} completed, {} nothing new, {} failed",
                summary.attempted,
                summary.completed,
                summary.nothing_new,
                summary.failed.len()
            );
        }
        Command::Stats => {
            let stats = manager.stats()?;
            println!("Tracks:            {}", stats.tracks);
            println!("  with local file: {}", stats.local_tracks);
            println!(
                "  on device:       {} ({:.1}%)",
                stats.synced_tracks,
                stats.sync_percentage()
            );
            println!("Artists:           {}", stats.artists);
            println!("Albums:            {} ({} incomplete)", stats.albums, stats.incomplete_albums);
            println!("Playlists:         {}", stats.playlists);
            println!(
                "Download queue:    {} pending, {} failed",
                stats.pending_downloads, stats.failed_downloads
            );
            println!("Duplicate groups:  {}", stats.duplicate_groups);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artist_mode_needs_a_filter() {
        assert!(selection(SyncMode::Artist, None).is_err());
        assert_eq!(
            selection(SyncMode::Artist, Some("Björk".into())).unwrap(),
            SyncSelection::Artist("Björk".into())
        );
        assert_eq!(selection(SyncMode::Library, None).unwrap(), SyncSelection::Library);
    }

    #[test]
    fn parses_sync_subcommand() {
        let args = CliArgs::parse_from([
            "dap-manager",
            "--yes",
            "sync",
            "--mode",
            "artist",
            "--artist",
            "Portishead",
            "--skip-downloads",
        ]);
        assert!(args.yes);
        match args.command {
            Command::Sync {
                mode,
                artist,
                skip_downloads,
                reconcile,
            } => {
                assert_eq!(mode, SyncMode::Artist);
                assert_eq!(artist.as_deref(), Some("Portishead"));
                assert!(skip_downloads);
                assert!(!reconcile);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn parses_import_playlist_subcommand() {
        let args = CliArgs::parse_from([
            "dap-manager",
            "import-playlist",
            "https://open.spotify.com/playlist/37i9dQZF1DX?si=abc",
        ]);
        match args.command {
            Command::ImportPlaylist { url } => {
                assert_eq!(url, "https://open.spotify.com/playlist/37i9dQZF1DX?si=abc")
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
