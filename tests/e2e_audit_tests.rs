//! End-to-end tests for the album completeness audit and the completer.

mod common;

use common::{TestEnv, TrackFile};
use dap_manager::audit::QueueDecision;
use dap_manager::catalog::{QueueKind, QueueRequest, QueueStatus};

/// Holds tracks `1..=have` of a ten-track release.
async fn seed_release(env: &TestEnv, release_id: &str, album: &str, have: u32) {
    env.metadata.add_release(release_id, album, 10);
    for n in 1..=have {
        env.add_library_file(
            &format!("Artist/{}/{:02} Track {}.flac", album, n, n),
            &TrackFile::new(
                &format!("{}-rec-{}", release_id, n),
                "Artist",
                album,
                &format!("Track {}", n),
            )
            .on_release(release_id, 1, n, 10),
        );
    }
    env.manager.scan_library().await.unwrap();
}

fn pending(env: &TestEnv) -> Vec<QueueRequest> {
    env.manager
        .catalog()
        .list_downloads_by_status(QueueStatus::Pending)
        .unwrap()
        .into_iter()
        .map(|item| item.request)
        .collect()
}

#[tokio::test]
async fn test_audit_lists_incomplete_albums() {
    let env = TestEnv::new();
    seed_release(&env, "rel-a", "First", 6).await;
    seed_release(&env, "rel-b", "Second", 10).await;

    let albums = env.manager.audit_library().unwrap();
    assert_eq!(albums.len(), 1);
    assert_eq!(albums[0].release_id, "rel-a");
    assert_eq!(albums[0].have, 6);
    assert_eq!(albums[0].total, 10);
    assert_eq!(albums[0].missing, 4);
}

#[tokio::test]
async fn test_large_gap_queues_whole_album() {
    let env = TestEnv::new();
    seed_release(&env, "rel-a", "First", 6).await;

    let outcome = env.manager.complete_album("rel-a").await.unwrap();
    assert_eq!(outcome.decision, Some(QueueDecision::WholeAlbum));
    assert_eq!(outcome.missing, 4);
    assert_eq!(outcome.queued, 1);

    let queue = pending(&env);
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].kind(), QueueKind::AlbumBundle);
    assert_eq!(queue[0].query(), "Artist - First");
}

#[tokio::test]
async fn test_small_gap_queues_each_missing_track() {
    let env = TestEnv::new();
    seed_release(&env, "rel-a", "First", 8).await;

    let outcome = env.manager.complete_album("rel-a").await.unwrap();
    assert_eq!(outcome.decision, Some(QueueDecision::PerTrack));
    assert_eq!(outcome.queued, 2);

    let mut queries: Vec<String> = pending(&env)
        .iter()
        .map(|r| r.query().to_string())
        .collect();
    queries.sort();
    assert_eq!(queries, vec!["Artist - Track 10", "Artist - Track 9"]);

    let again = env.manager.complete_album("rel-a").await.unwrap();
    assert_eq!(again.queued, 0);
    assert_eq!(again.already_queued, 2);
    assert_eq!(pending(&env).len(), 2);
}

#[tokio::test]
async fn test_complete_all_continues_past_failing_album() {
    let env = TestEnv::new();
    seed_release(&env, "rel-a", "First", 8).await;
    seed_release(&env, "rel-b", "Second", 6).await;
    // The provider no longer knows the first release.
    env.metadata.add_release("rel-a", "First", 0);

    let report = env.manager.complete_all().await.unwrap();
    assert_eq!(report.albums, 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].0, "rel-a");
    assert_eq!(report.queued, 1);
}
