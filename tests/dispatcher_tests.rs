//! Background dispatcher tests

mod common;

use bgremove_canvas::{
    BackgroundDispatcher, BatchConfig, CanvasConfig, CanvasError, DispatchEvent, DispatchState,
};
use common::{
    archive_entries, factory_of, failing_factory, gated_factory, write_jpeg, WhiteKeyRemover,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

/// A small canvas keeps the tests fast
fn config_in(archive_dir: &Path) -> BatchConfig {
    BatchConfig::builder()
        .archive_dir(archive_dir)
        .canvas(CanvasConfig {
            width: 64,
            height: 96,
            max_content_width: 40,
            max_content_height: 60,
            ..CanvasConfig::default()
        })
        .build()
        .unwrap()
}

fn jpegs(dir: &Path, count: usize) -> Vec<PathBuf> {
    (0..count)
        .map(|i| write_jpeg(dir, &format!("img{i}.jpg"), 32, 48))
        .collect()
}

/// Wait for the completed or failed event, collecting everything before it
async fn wait_terminal(dispatcher: &mut BackgroundDispatcher) -> Vec<DispatchEvent> {
    let mut events = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(30), dispatcher.next_event())
            .await
            .expect("Timed out waiting for the batch")
            .expect("No batch running");
        let terminal = event.is_terminal();
        events.push(event);
        if terminal {
            return events;
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_completed_batch_holds_archive_until_saved() {
    let inputs_dir = TempDir::new().unwrap();
    let archive_dir = TempDir::new().unwrap();
    let mut dispatcher = BackgroundDispatcher::from_current(factory_of(|| WhiteKeyRemover)).unwrap();

    let task_id = dispatcher
        .submit(jpegs(inputs_dir.path(), 2), config_in(archive_dir.path()))
        .unwrap();
    assert!(dispatcher.is_running());

    let events = wait_terminal(&mut dispatcher).await;
    assert!(events.iter().all(|event| event.task_id() == task_id));
    assert!(events
        .iter()
        .any(|event| matches!(event, DispatchEvent::Progress { .. })));

    let archive_path = match events.last() {
        Some(DispatchEvent::Completed { result, .. }) => {
            assert_eq!(result.succeeded(), 2);
            result.archive.path().to_path_buf()
        },
        other => panic!("expected completion, got {other:?}"),
    };
    assert!(matches!(dispatcher.state(), DispatchState::Completed(_)));
    assert!(!dispatcher.is_running());

    let destination = inputs_dir.path().join("out.zip");
    let bytes = dispatcher.save_archive(&destination).unwrap();
    assert!(bytes > 0);
    assert_eq!(
        archive_entries(&destination),
        vec!["img0_processed.png", "img1_processed.png"]
    );

    assert!(matches!(dispatcher.state(), DispatchState::Idle));
    assert!(!archive_path.exists());
    assert!(dispatcher.save_archive(&destination).is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_second_submit_while_running_is_busy() {
    let inputs_dir = TempDir::new().unwrap();
    let archive_dir = TempDir::new().unwrap();
    let (factory, gate) = gated_factory();
    let mut dispatcher = BackgroundDispatcher::from_current(factory).unwrap();

    dispatcher
        .submit(jpegs(inputs_dir.path(), 1), config_in(archive_dir.path()))
        .unwrap();
    let err = dispatcher
        .submit(jpegs(inputs_dir.path(), 1), config_in(archive_dir.path()))
        .unwrap_err();
    assert!(matches!(err, CanvasError::Busy));
    assert!(dispatcher.is_running());

    drop(gate);
    let events = wait_terminal(&mut dispatcher).await;
    assert!(matches!(events.last(), Some(DispatchEvent::Completed { .. })));
    dispatcher.reset().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_empty_submission_is_rejected() {
    let mut dispatcher = BackgroundDispatcher::from_current(factory_of(|| WhiteKeyRemover)).unwrap();

    let err = dispatcher.submit(Vec::new(), BatchConfig::default()).unwrap_err();
    assert!(matches!(err, CanvasError::EmptyBatch));
    assert!(matches!(dispatcher.state(), DispatchState::Idle));
    assert!(dispatcher.next_event().await.is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_invalid_config_is_rejected_before_dispatch() {
    let inputs_dir = TempDir::new().unwrap();
    let mut dispatcher = BackgroundDispatcher::from_current(factory_of(|| WhiteKeyRemover)).unwrap();
    let config = BatchConfig {
        output_suffix: String::new(),
        ..BatchConfig::default()
    };

    let err = dispatcher
        .submit(jpegs(inputs_dir.path(), 1), config)
        .unwrap_err();
    assert!(matches!(err, CanvasError::InvalidConfig(_)));
    assert!(!dispatcher.is_running());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_failed_batch_reports_error() {
    let inputs_dir = TempDir::new().unwrap();
    let archive_dir = TempDir::new().unwrap();
    let mut dispatcher = BackgroundDispatcher::from_current(failing_factory()).unwrap();

    dispatcher
        .submit(jpegs(inputs_dir.path(), 1), config_in(archive_dir.path()))
        .unwrap();
    let events = wait_terminal(&mut dispatcher).await;

    match events.last() {
        Some(DispatchEvent::Failed { error, .. }) => assert!(error.contains("Model file not found")),
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(matches!(dispatcher.state(), DispatchState::Failed(_)));
    assert!(dispatcher.take_result().is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cancel_detaches_and_discards_late_archive() {
    let inputs_dir = TempDir::new().unwrap();
    let detached_dir = TempDir::new().unwrap();
    let (factory, gate) = gated_factory();
    let mut dispatcher = BackgroundDispatcher::from_current(factory).unwrap();

    dispatcher
        .submit(jpegs(inputs_dir.path(), 1), config_in(detached_dir.path()))
        .unwrap();
    dispatcher.cancel();

    assert!(matches!(dispatcher.state(), DispatchState::Idle));
    assert!(dispatcher.poll().is_empty());
    assert!(dispatcher.next_event().await.is_none());

    // The detached worker finishes its only item and must not leave an archive
    drop(gate);
    tokio::time::sleep(Duration::from_millis(1500)).await;
    let leftovers: Vec<_> = std::fs::read_dir(detached_dir.path()).unwrap().collect();
    assert!(leftovers.is_empty());

    // A new batch can start right away
    let archive_dir = TempDir::new().unwrap();
    dispatcher
        .submit(jpegs(inputs_dir.path(), 1), config_in(archive_dir.path()))
        .unwrap();
    let events = wait_terminal(&mut dispatcher).await;
    assert!(matches!(events.last(), Some(DispatchEvent::Completed { .. })));
    dispatcher.reset().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_reset_and_resubmit_discard_held_archive() {
    let inputs_dir = TempDir::new().unwrap();
    let archive_dir = TempDir::new().unwrap();
    let mut dispatcher = BackgroundDispatcher::from_current(factory_of(|| WhiteKeyRemover)).unwrap();

    dispatcher
        .submit(jpegs(inputs_dir.path(), 1), config_in(archive_dir.path()))
        .unwrap();
    wait_terminal(&mut dispatcher).await;
    let first = match dispatcher.state() {
        DispatchState::Completed(result) => result.archive.path().to_path_buf(),
        other => panic!("expected completion, got {other:?}"),
    };

    dispatcher
        .submit(jpegs(inputs_dir.path(), 1), config_in(archive_dir.path()))
        .unwrap();
    assert!(!first.exists());
    wait_terminal(&mut dispatcher).await;
    let second = match dispatcher.state() {
        DispatchState::Completed(result) => result.archive.path().to_path_buf(),
        other => panic!("expected completion, got {other:?}"),
    };
    assert!(second.exists());

    dispatcher.reset().unwrap();
    assert!(!second.exists());
    assert!(matches!(dispatcher.state(), DispatchState::Idle));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_take_result_hands_over_the_archive() {
    let inputs_dir = TempDir::new().unwrap();
    let archive_dir = TempDir::new().unwrap();
    let mut dispatcher = BackgroundDispatcher::from_current(factory_of(|| WhiteKeyRemover)).unwrap();

    dispatcher
        .submit(jpegs(inputs_dir.path(), 1), config_in(archive_dir.path()))
        .unwrap();
    wait_terminal(&mut dispatcher).await;

    let result = dispatcher.take_result().unwrap();
    assert!(matches!(dispatcher.state(), DispatchState::Idle));
    dispatcher.reset().unwrap();
    assert!(result.archive.exists());

    result.archive.discard().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_poll_drains_events_without_blocking() {
    let inputs_dir = TempDir::new().unwrap();
    let archive_dir = TempDir::new().unwrap();
    let mut dispatcher = BackgroundDispatcher::from_current(factory_of(|| WhiteKeyRemover)).unwrap();

    dispatcher
        .submit(jpegs(inputs_dir.path(), 3), config_in(archive_dir.path()))
        .unwrap();

    let mut seen = Vec::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    while !seen.iter().any(DispatchEvent::is_terminal) {
        assert!(tokio::time::Instant::now() < deadline, "batch did not finish");
        seen.extend(dispatcher.poll());
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let completed_counts: Vec<_> = seen
        .iter()
        .filter_map(|event| match event {
            DispatchEvent::Progress { progress, .. } => Some(progress.completed),
            _ => None,
        })
        .collect();
    assert!(completed_counts.windows(2).all(|pair| pair[0] <= pair[1]));
    assert!(dispatcher.poll().is_empty());
    dispatcher.reset().unwrap();
}

/// Wait until no archive is left in `dir`, giving a detached worker time to clean up
async fn wait_until_empty(dir: &Path) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while tokio::time::Instant::now() < deadline {
        if std::fs::read_dir(dir).unwrap().next().is_none() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test(flavor = "multi_thread")]
async fn test_reset_discards_completed_batch_that_was_never_polled() {
    let inputs_dir = TempDir::new().unwrap();
    let archive_dir = TempDir::new().unwrap();
    let mut dispatcher = BackgroundDispatcher::from_current(factory_of(|| WhiteKeyRemover)).unwrap();

    dispatcher
        .submit(jpegs(inputs_dir.path(), 1), config_in(archive_dir.path()))
        .unwrap();
    // Let the worker finish and queue its outcome without polling for it
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(dispatcher.is_running());

    dispatcher.reset().unwrap();
    assert!(matches!(dispatcher.state(), DispatchState::Idle));
    assert!(wait_until_empty(archive_dir.path()).await);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_drop_discards_held_archive() {
    let inputs_dir = TempDir::new().unwrap();
    let archive_dir = TempDir::new().unwrap();
    let mut dispatcher = BackgroundDispatcher::from_current(factory_of(|| WhiteKeyRemover)).unwrap();

    dispatcher
        .submit(jpegs(inputs_dir.path(), 1), config_in(archive_dir.path()))
        .unwrap();
    wait_terminal(&mut dispatcher).await;
    let archive_path = match dispatcher.state() {
        DispatchState::Completed(result) => result.archive.path().to_path_buf(),
        other => panic!("expected completion, got {other:?}"),
    };
    assert!(archive_path.exists());

    drop(dispatcher);
    assert!(!archive_path.exists());
    assert!(std::fs::read_dir(archive_dir.path()).unwrap().next().is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_drop_discards_queued_outcome() {
    let inputs_dir = TempDir::new().unwrap();
    let archive_dir = TempDir::new().unwrap();
    let mut dispatcher = BackgroundDispatcher::from_current(factory_of(|| WhiteKeyRemover)).unwrap();

    dispatcher
        .submit(jpegs(inputs_dir.path(), 1), config_in(archive_dir.path()))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;

    drop(dispatcher);
    assert!(wait_until_empty(archive_dir.path()).await);
}
