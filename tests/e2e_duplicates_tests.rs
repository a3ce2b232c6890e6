//! End-to-end tests for duplicate detection, resolution and deletion.

mod common;

use common::{TestEnv, TrackFile};
use dap_manager::confirm::AutoConfirm;
use dap_manager::duplicates::UnresolvedReason;
use dap_manager::media::paths::normalize_path;
use std::sync::Arc;

fn song() -> TrackFile {
    TrackFile::new("rec-song", "Artist", "Album", "Song")
}

#[tokio::test]
async fn test_filename_penalty_outranks_format_bonus() {
    let env = TestEnv::new();
    let numbered = env.add_library_file("Artist/Album/01 - Song.flac", &song());
    let copy = env.add_library_file("Artist/Album/Song (1).flac", &song());
    let plain = env.add_library_file("Artist/Album/Song.mp3", &song());

    let scan = env.manager.scan_library().await.unwrap();
    assert_eq!(scan.added, 1);
    assert_eq!(scan.duplicates, 2);

    let report = env.manager.resolve_duplicates().unwrap();
    assert_eq!(report.resolved.len(), 1);
    assert!(report.unresolved.is_empty());
    let group = &report.resolved[0];
    assert_eq!(group.winner.path, normalize_path(&plain));
    assert_eq!(group.winner.score, 101);

    let track = env
        .manager
        .catalog()
        .get_track_by_identity("rec-song")
        .unwrap()
        .unwrap();
    assert_eq!(track.local_path, Some(normalize_path(&plain)));
    assert!(env.manager.catalog().get_all_duplicates().unwrap().is_empty());

    let review = std::fs::read_to_string(
        env.manager.config().report_dir.join("files_to_delete.txt"),
    )
    .unwrap();
    let mut listed: Vec<&str> = review.lines().collect();
    listed.sort();
    let mut expected = vec![normalize_path(&numbered), normalize_path(&copy)];
    expected.sort();
    assert_eq!(listed, expected);

    // Nothing is deleted until asked.
    assert!(numbered.exists() && copy.exists());

    let deletion = env
        .manager
        .delete_duplicates(&report.deletion_candidates())
        .unwrap();
    assert!(!deletion.cancelled);
    assert_eq!(deletion.deleted.len(), 2);
    assert!(!numbered.exists());
    assert!(!copy.exists());
    assert!(plain.exists());
}

#[tokio::test]
async fn test_tie_leaves_catalog_unchanged() {
    let env = TestEnv::new();
    let first = env.add_library_file("A/Song.flac", &song());
    env.add_library_file("B/Song.flac", &song());
    env.manager.scan_library().await.unwrap();

    let report = env.manager.resolve_duplicates().unwrap();
    assert!(report.resolved.is_empty());
    assert_eq!(report.unresolved.len(), 1);
    assert!(matches!(
        report.unresolved[0].reason,
        UnresolvedReason::Tie { .. }
    ));

    let track = env
        .manager
        .catalog()
        .get_track_by_identity("rec-song")
        .unwrap()
        .unwrap();
    assert_eq!(track.local_path, Some(normalize_path(&first)));
    assert_eq!(env.manager.catalog().get_all_duplicates().unwrap().len(), 1);
    assert!(env
        .manager
        .config()
        .report_dir
        .join("unresolved_duplicates.json")
        .exists());
}

#[tokio::test]
async fn test_retagged_winner_fails_sanity_check() {
    let env = TestEnv::new();
    env.add_library_file("Artist/Album/01 - Song.flac", &song());
    let plain = env.add_library_file("Artist/Album/Song.mp3", &song());
    env.manager.scan_library().await.unwrap();

    // The winning file now claims to be something else.
    TrackFile::new("rec-other", "Artist", "Album", "Song").write_to(&plain);

    let report = env.manager.resolve_duplicates().unwrap();
    assert!(report.resolved.is_empty());
    assert_eq!(report.sanity_failures(), 1);
    assert_eq!(env.manager.catalog().get_all_duplicates().unwrap().len(), 1);
}

#[tokio::test]
async fn test_deletion_tolerates_missing_files_and_honours_decline() {
    let env = TestEnv::new();
    let a = env.add_library_file("a.flac", &song());
    let gone = env.library().join("already-gone.flac");
    let paths = vec![normalize_path(&a), normalize_path(&gone)];

    let report = env.manager.delete_duplicates(&paths).unwrap();
    assert_eq!(report.deleted, vec![normalize_path(&a)]);
    assert_eq!(report.already_missing, vec![normalize_path(&gone)]);
    assert!(report.errors.is_empty());

    let declined = TestEnv::with_prompt(Arc::new(AutoConfirm(false)));
    let b = declined.add_library_file("b.flac", &song());
    let report = declined
        .manager
        .delete_duplicates(&[normalize_path(&b)])
        .unwrap();
    assert!(report.cancelled);
    assert!(b.exists());
}
