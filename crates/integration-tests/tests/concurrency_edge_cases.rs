//! Concurrent control and execution against one SQLite database

mod common;

use common::*;
use futures::future::join_all;
use rollup_core::application::{ConflictRetry, RollupRunner, RunnerConfig};
use rollup_core::domain::{AfterKey, RollupStatus};
use rollup_core::port::id_provider::UuidProvider;
use rollup_core::port::{MetadataRepository, RollupRepository};
use rollup_core::AppError;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

async fn assert_enabled_invariant(engine: &Engine, id: &str) {
    let rollup = engine.repo.find_rollup(id).await.unwrap().unwrap().value;
    assert_eq!(
        rollup.enabled,
        rollup.enabled_time.is_some(),
        "enabled and enabled_time disagree: {:?}",
        rollup
    );
}

#[tokio::test]
async fn test_concurrent_stops_are_all_acknowledged() {
    let engine = Engine::in_memory().await;
    engine.index(five_rides()).await;
    engine.control.put(rides_rollup("daily")).await.unwrap();
    engine.control.start("daily").await.unwrap();
    engine.runner.execute("daily").await.unwrap();

    let stops = (0..5).map(|_| engine.control.stop("daily"));
    for result in join_all(stops).await {
        assert_ok!(result);
    }

    assert_enabled_invariant(&engine, "daily").await;
    assert!(!engine.control.get("daily").await.unwrap().enabled);
    assert_eq!(
        engine.control.get_metadata_for_rollup("daily").await.unwrap().status,
        RollupStatus::Stopped
    );
}

#[tokio::test]
async fn test_interleaved_start_stop_keeps_invariant() {
    let engine = Engine::in_memory().await;
    engine.control.put(rides_rollup("daily")).await.unwrap();

    for round in 0..10 {
        let control = &engine.control;
        let calls = (0..4).map(|i| async move {
            if (i + round) % 2 == 0 {
                control.start("daily").await
            } else {
                control.stop("daily").await
            }
        });
        for result in join_all(calls).await {
            assert_ok!(result);
        }
        assert_enabled_invariant(&engine, "daily").await;
    }
}

#[tokio::test]
async fn test_concurrent_duplicate_put_creates_once() {
    let engine = Engine::in_memory().await;
    let results = join_all((0..4).map(|_| engine.control.put(rides_rollup("daily")))).await;

    let created = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(created, 1);
    for result in results.into_iter().filter(|r| r.is_err()) {
        let err = assert_err!(result);
        assert!(matches!(err, AppError::Conflict(_)));
    }
}

/// A stopped rollup has either no metadata yet, or a STOPPED record whose
/// checkpoint sits on a committed window boundary.
async fn assert_stopped_cleanly(engine: &Engine, id: &str) {
    assert_enabled_invariant(engine, id).await;
    let rollup = engine.control.get(id).await.unwrap();
    assert!(!rollup.enabled);
    if let Some(metadata_id) = rollup.metadata_id {
        let metadata = engine.repo.find_metadata(&metadata_id).await.unwrap().unwrap().value;
        assert_eq!(metadata.status, RollupStatus::Stopped, "rollup {}", id);
        match metadata.after_key {
            None => assert_eq!(metadata.documents_processed, 0),
            Some(key) => {
                assert_eq!(key, AfterKey::new(1_000, "r2"));
                assert_eq!(metadata.documents_processed, 2);
            }
        }
    }
}

#[tokio::test]
async fn test_stop_racing_execution_never_leaves_record_running() {
    let engine = Engine::in_memory().await;
    engine.index(five_rides()).await;
    engine.control.put(rides_rollup("daily")).await.unwrap();
    engine.control.start("daily").await.unwrap();

    let (executed, stopped) = tokio::join!(
        engine.runner.execute("daily"),
        engine.control.stop("daily")
    );
    assert_ok!(executed);
    assert_ok!(stopped);

    assert_stopped_cleanly(&engine, "daily").await;
}

#[tokio::test]
async fn test_stop_racing_execution_across_connections() {
    let db = TempDb::new("stop_race");
    let engine = Engine::open(&db.url(), RunnerConfig::default()).await;
    let other = Engine::open(&db.url(), RunnerConfig::default()).await;
    engine.index(five_rides()).await;

    for round in 0..8 {
        let id = format!("job{}", round);
        engine.control.put(rides_rollup(&id)).await.unwrap();
        engine.control.start(&id).await.unwrap();

        let (executed, stopped) =
            tokio::join!(engine.runner.execute(&id), other.control.stop(&id));
        assert_ok!(executed);
        assert_ok!(stopped);

        assert_stopped_cleanly(&engine, &id).await;
    }
}

#[tokio::test]
async fn test_two_runners_across_connections_finish_each_rollup_once() {
    let db = TempDb::new("two_runners");
    let engine = Engine::open(&db.url(), RunnerConfig::default()).await;
    let other = Engine::open(&db.url(), RunnerConfig::default()).await;
    engine.index(five_rides()).await;

    let ids: Vec<String> = (0..4).map(|i| format!("job{}", i)).collect();
    for id in &ids {
        let mut request = rides_rollup(id);
        request.target_index = format!("{}_{}", TARGET, id);
        engine.control.put(request).await.unwrap();
        engine.control.start(id).await.unwrap();
    }

    for _ in 0..10 {
        let runs = ids.iter().flat_map(|id| {
            [
                engine.runner.execute(id.as_str()),
                other.runner.execute(id.as_str()),
            ]
        });
        for result in join_all(runs).await {
            assert_ok!(result);
        }

        let mut finished = 0;
        for id in &ids {
            let metadata = engine.control.get_metadata_for_rollup(id).await.unwrap();
            if metadata.status == RollupStatus::Finished {
                finished += 1;
            }
        }
        if finished == ids.len() {
            break;
        }
    }

    for id in &ids {
        let metadata = engine.control.get_metadata_for_rollup(id).await.unwrap();
        assert_eq!(metadata.status, RollupStatus::Finished, "rollup {}", id);
        assert_eq!(metadata.documents_processed, 5);

        let docs = engine
            .docs
            .target_documents(&format!("{}_{}", TARGET, id))
            .await
            .unwrap();
        let total: i64 = docs
            .iter()
            .map(|d| d.body["doc_count"].as_i64().unwrap())
            .sum();
        assert_eq!(total, 5, "rollup {}", id);
    }
}

#[tokio::test]
async fn test_two_runners_never_double_count_a_window() {
    let engine = Engine::in_memory().await;
    engine.index(five_rides()).await;
    engine.control.put(rides_rollup("daily")).await.unwrap();
    engine.control.start("daily").await.unwrap();

    let other = Arc::new(RollupRunner::new(
        engine.repo.clone(),
        engine.repo.clone(),
        engine.repo.clone(),
        engine.docs.clone(),
        engine.docs.clone(),
        Arc::new(UuidProvider),
        engine.clock.clone(),
        ConflictRetry::new(5, Duration::from_millis(1)),
        RunnerConfig::default(),
    ));

    for _ in 0..10 {
        let (a, b) = tokio::join!(engine.runner.execute("daily"), other.execute("daily"));
        a.unwrap();
        b.unwrap();
        let status = engine
            .control
            .get_metadata_for_rollup("daily")
            .await
            .unwrap()
            .status;
        if status == RollupStatus::Finished {
            break;
        }
    }

    let metadata = engine.control.get_metadata_for_rollup("daily").await.unwrap();
    assert_eq!(metadata.status, RollupStatus::Finished);
    assert_eq!(metadata.documents_processed, 5);
    assert_eq!(metadata.after_key, Some(AfterKey::new(62_000, "r5")));

    let docs = engine.docs.target_documents(TARGET).await.unwrap();
    let total: i64 = docs
        .iter()
        .map(|d| d.body["doc_count"].as_i64().unwrap())
        .sum();
    assert_eq!(total, 5);
}
