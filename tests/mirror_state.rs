// tests/mirror_state.rs

//! Durable cursor behavior of the run controller: a failed or
//! interrupted run must leave `status` untouched and keep the remaining
//! work in `todo` for the next run.

mod common;

use tokio_util::sync::CancellationToken;
use wheelhouse::storage::MirrorLock;
use wheelhouse::{Error, Mirror, CURRENT_GENERATION};

/// Seed an on-disk cursor mid-run: synced to serial 5, aiming for 9,
/// with one package of work left.
fn seed_interrupted_state(dir: &std::path::Path) {
    std::fs::write(dir.join("generation"), CURRENT_GENERATION.to_string()).unwrap();
    std::fs::write(dir.join("status"), "5").unwrap();
    std::fs::write(dir.join("todo"), "9\npeerme\t9\n").unwrap();
}

#[tokio::test]
async fn test_failed_run_does_not_advance_status() {
    let temp = tempfile::tempdir().unwrap();
    seed_interrupted_state(temp.path());

    // A pre-cancelled token makes the drain abort before any network
    // call, the same shape as an interrupt arriving mid-run.
    let cancel = CancellationToken::new();
    cancel.cancel();
    let mut mirror = Mirror::from_config(common::test_config(temp.path(), ""), cancel).unwrap();

    let err = mirror.synchronize(false).await.unwrap_err();
    assert!(matches!(err, Error::Cancelled));

    // Cursor monotonicity: status is exactly what it was before
    let status = std::fs::read_to_string(temp.path().join("status")).unwrap();
    assert_eq!(status.trim(), "5");
}

#[tokio::test]
async fn test_interrupted_run_preserves_todo_for_resume() {
    let temp = tempfile::tempdir().unwrap();
    seed_interrupted_state(temp.path());

    let cancel = CancellationToken::new();
    cancel.cancel();
    let mut mirror = Mirror::from_config(common::test_config(temp.path(), ""), cancel).unwrap();
    assert!(mirror.synchronize(false).await.is_err());

    // The todo file round-trips: target serial first, then the
    // remaining work, so the next run resumes exactly here.
    let todo = std::fs::read_to_string(temp.path().join("todo")).unwrap();
    let mut lines = todo.lines();
    assert_eq!(lines.next(), Some("9"));
    assert_eq!(lines.next(), Some("peerme\t9"));
    assert_eq!(lines.next(), None);

    // The mirror lock was released on the way out
    let relock = MirrorLock::acquire(temp.path());
    assert!(relock.is_ok());
}

#[tokio::test]
async fn test_empty_changelog_is_a_noop() {
    let temp = tempfile::tempdir().unwrap();
    std::fs::write(temp.path().join("generation"), CURRENT_GENERATION.to_string()).unwrap();
    std::fs::write(temp.path().join("status"), "5").unwrap();
    // A drained todo: target serial reached, nothing left to sync
    std::fs::write(temp.path().join("todo"), "5\n").unwrap();

    let cancel = CancellationToken::new();
    let mut mirror = Mirror::from_config(common::test_config(temp.path(), ""), cancel).unwrap();
    let summary = mirror.synchronize(false).await.unwrap();
    assert_eq!(summary.packages_synced, 0);
    assert_eq!(summary.downloaded_files, 0);

    // Serial unchanged and no index rewrites
    let status = std::fs::read_to_string(temp.path().join("status")).unwrap();
    assert_eq!(status.trim(), "5");
    assert!(!temp.path().join("web/simple/index.html").exists());
    // The spent todo is cleaned up
    assert!(!temp.path().join("todo").exists());
}

#[tokio::test]
async fn test_concurrent_run_is_refused() {
    let temp = tempfile::tempdir().unwrap();
    seed_interrupted_state(temp.path());

    let _held = MirrorLock::acquire(temp.path()).unwrap();

    let cancel = CancellationToken::new();
    let mut mirror = Mirror::from_config(common::test_config(temp.path(), ""), cancel).unwrap();
    let err = mirror.synchronize(false).await.unwrap_err();
    assert!(matches!(err, Error::LockContention(_)));
    assert_eq!(err.exit_code(), 3);

    // Nothing moved while the other run held the lock
    let status = std::fs::read_to_string(temp.path().join("status")).unwrap();
    assert_eq!(status.trim(), "5");
}
