//! End-to-end tests for the download queue: completer requests go out,
//! staged files come back into the library and the catalog.

mod common;

use common::{TestEnv, TrackFile};
use dap_manager::catalog::{QueueRequest, QueueStatus};
use dap_manager::{PassOutcome, PassRequest};

async fn seed_gap(env: &TestEnv) {
    env.metadata.add_release("rel-a", "First", 10);
    for n in 1..=8 {
        env.add_library_file(
            &format!("Artist/First/{:02}.flac", n),
            &TrackFile::new(
                &format!("rel-a-rec-{}", n),
                "Artist",
                "First",
                &format!("Track {}", n),
            )
            .on_release("rel-a", 1, n, 10),
        );
    }
    env.manager.scan_library().await.unwrap();
    env.manager.complete_album("rel-a").await.unwrap();
}

fn staged_track(n: u32) -> TrackFile {
    TrackFile {
        identity: None,
        ..TrackFile::new("", "Artist", "First", &format!("Track {}", n)).on_release("rel-a", 1, n, 10)
    }
}

#[tokio::test]
async fn test_downloaded_tracks_complete_the_album() {
    let env = TestEnv::new();
    seed_gap(&env).await;
    env.downloader
        .provide("Artist - Track 9", "09 - Track 9.flac", staged_track(9));
    env.downloader
        .provide("Artist - Track 10", "10 - Track 10.flac", staged_track(10));

    let summary = env.manager.run_downloads().await.unwrap();
    assert_eq!(summary.attempted, 2);
    assert_eq!(summary.completed, 2);
    assert!(summary.failed.is_empty());

    let claimed = env.library().join("Artist/First/Track 9.flac");
    assert!(claimed.exists());
    let track = env
        .manager
        .catalog()
        .get_track_by_identity("rel-a-rec-9")
        .unwrap()
        .unwrap();
    assert_eq!(track.release_id.as_deref(), Some("rel-a"));

    let catalog = env.manager.catalog();
    assert!(catalog
        .list_downloads_by_status(QueueStatus::Pending)
        .unwrap()
        .is_empty());
    assert!(env.manager.audit_library().unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_and_empty_downloads() {
    let env = TestEnv::new();
    seed_gap(&env).await;
    env.downloader.fail_on("Artist - Track 9");

    let summary = env.manager.run_downloads().await.unwrap();
    assert_eq!(summary.attempted, 2);
    assert_eq!(summary.failed, vec!["Artist - Track 9".to_string()]);
    assert_eq!(summary.nothing_new, 1);

    let failed = env
        .manager
        .catalog()
        .list_downloads_by_status(QueueStatus::Failed)
        .unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].request.query(), "Artist - Track 9");
    assert_eq!(failed[0].playlist_id.as_deref(), Some("COMPLETER_rel-a"));

    // Failed items are retried on the next run.
    env.downloader
        .provide("Artist - Track 9", "Track 9.flac", staged_track(9));
    let retry = env.manager.run_downloads().await.unwrap();
    assert_eq!(retry.completed, 1);
    assert_eq!(
        env.downloader
            .queries()
            .iter()
            .filter(|q| q.as_str() == "Artist - Track 9")
            .count(),
        2
    );
}

#[tokio::test]
async fn test_spawned_pass_holds_the_gate() {
    let env = TestEnv::new();
    env.manager
        .catalog()
        .enqueue_download(&QueueRequest::album_bundle("Artist", "First"), None)
        .unwrap();

    let handle = env.manager.spawn_pass(PassRequest::Downloads).unwrap();
    assert!(env.manager.gate().is_running());
    assert!(env.manager.spawn_pass(PassRequest::Scan).is_err());

    let outcome = handle.await.unwrap().unwrap();
    assert!(matches!(outcome, PassOutcome::Downloads(ref s) if s.attempted == 1));
    assert!(!env.manager.gate().is_running());
    assert!(env.manager.stats().is_ok());
}
