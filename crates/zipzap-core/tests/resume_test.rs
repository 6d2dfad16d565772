//! Tests for resuming archives left in flight by an interrupted run

use std::collections::BTreeMap;
use std::fs;
use zipzap_core::{
    ArchiveFormat, ArchiveIdentity, ArchiveTask, Config, EntryStatus, FailureKind, ProgressStore,
    RunController, TaskState,
};
use zipzap_testing::assertions::{assert_file_contents, list_files};
use zipzap_testing::fixtures::write_numbered_zip;
use zipzap_testing::TestDir;

const ENTRIES: usize = 25;

/// Record `archive` as interrupted mid-extraction with the first `done` entries written
fn forge_interrupted(test_dir: &TestDir, config: &Config, done: usize, attempts: u32) -> String {
    let archive = test_dir.join("bulk.zip");
    let identity = ArchiveIdentity::compute(&archive, config.identity).unwrap();
    let mut task = ArchiveTask::new(identity, ArchiveFormat::Zip, config.archive_root);
    task.state = TaskState::Extracting;
    task.attempts = attempts;
    task.entries = (0..ENTRIES)
        .map(|i| {
            let status = if i < done {
                EntryStatus::Extracted
            } else {
                EntryStatus::Pending
            };
            (format!("file_{:03}.txt", i), status)
        })
        .collect::<BTreeMap<_, _>>();
    let key = task.key();

    let store = ProgressStore::open(config.state_path(test_dir.path())).unwrap();
    store.upsert(task).unwrap();
    key
}

#[test]
fn test_interrupted_archive_is_resumed() {
    let test_dir = TestDir::new().unwrap();
    write_numbered_zip(&test_dir.join("bulk.zip"), ENTRIES).unwrap();
    let config = Config::default();
    let key = forge_interrupted(&test_dir, &config, 10, 1);

    // Entries recorded as extracted are trusted, even if they differ on disk
    fs::write(test_dir.join("file_000.txt"), b"written before the crash").unwrap();

    let controller = RunController::new();
    let summary = controller.run_once(test_dir.path(), &config).unwrap();
    assert_eq!(summary.completed, 1);
    assert!(summary.failed.is_empty());

    let task = controller.status().unwrap().tasks[&key].clone();
    assert_eq!(task.state, TaskState::Completed);
    assert_eq!(task.attempts, 2);
    assert!(task.entries.is_empty());

    assert_file_contents(&test_dir.join("file_000.txt"), b"written before the crash").unwrap();
    assert!(!test_dir.join("file_000_1.txt").exists());
    // Entries 1..10 were "extracted" by the forged run but never written
    assert!(!test_dir.join("file_005.txt").exists());
    for i in 10..ENTRIES {
        assert_file_contents(
            &test_dir.join(&format!("file_{:03}.txt", i)),
            format!("contents of entry {}\n", i).as_bytes(),
        )
        .unwrap();
    }
}

#[test]
fn test_interrupted_on_last_attempt_fails() {
    let test_dir = TestDir::new().unwrap();
    write_numbered_zip(&test_dir.join("bulk.zip"), ENTRIES).unwrap();
    let config = Config::default();
    let key = forge_interrupted(&test_dir, &config, 3, config.max_attempts);

    let controller = RunController::new();
    let summary = controller.run_once(test_dir.path(), &config).unwrap();
    assert_eq!(summary.completed, 0);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].kind, FailureKind::Io);

    let task = controller.status().unwrap().tasks[&key].clone();
    assert_eq!(task.state, TaskState::Failed);
    assert_eq!(task.attempts, config.max_attempts);
    // Nothing was written
    assert_eq!(list_files(test_dir.path()).unwrap().len(), 2);
}

#[test]
fn test_large_archive_progress_is_not_left_in_flight() {
    let test_dir = TestDir::new().unwrap();
    write_numbered_zip(&test_dir.join("bulk.zip"), ENTRIES).unwrap();
    let config = Config {
        entry_tracking_threshold: 5,
        ..Config::default()
    };

    let controller = RunController::new();
    let summary = controller.run_once(test_dir.path(), &config).unwrap();
    assert_eq!(summary.completed, 1);

    let snapshot = controller.status().unwrap();
    let task = snapshot.tasks.values().next().unwrap();
    assert_eq!(task.state, TaskState::Completed);
    assert!(task.entries.is_empty());
    assert_eq!(list_files(test_dir.path()).unwrap().len(), ENTRIES + 2);
}
