//! End-to-end lifecycle over SQLite: put, start, execute, stop, restart

mod common;

use common::*;
use rollup_core::application::{ExecutionOutcome, SkipReason};
use rollup_core::domain::{AfterKey, RollupStatus};
use rollup_core::AppError;
use serde_json::json;

#[tokio::test]
async fn test_one_shot_rollup_runs_to_finish() {
    let engine = Engine::in_memory().await;
    engine.index(five_rides()).await;

    let rollup = engine.control.put(rides_rollup("daily")).await.unwrap();
    assert!(!rollup.enabled);
    assert!(rollup.enabled_time.is_none());

    // Disabled: the engine does nothing
    assert_eq!(
        engine.runner.execute("daily").await.unwrap(),
        ExecutionOutcome::Disabled
    );

    engine.control.start("daily").await.unwrap();

    let mut outcomes = Vec::new();
    for _ in 0..3 {
        outcomes.push(engine.runner.execute("daily").await.unwrap());
    }
    assert_eq!(
        outcomes,
        vec![
            ExecutionOutcome::Processed {
                documents: 2,
                rollups: 1,
                finished: false
            },
            ExecutionOutcome::Processed {
                documents: 2,
                rollups: 2,
                finished: false
            },
            ExecutionOutcome::Processed {
                documents: 1,
                rollups: 1,
                finished: true
            },
        ]
    );

    let metadata = engine.control.get_metadata_for_rollup("daily").await.unwrap();
    assert_eq!(metadata.status, RollupStatus::Finished);
    assert_eq!(metadata.after_key, Some(AfterKey::new(62_000, "r5")));
    assert_eq!(metadata.documents_processed, 5);
    assert_eq!(metadata.rollups_indexed, 4);

    // Finished one-shot jobs never run again
    assert_eq!(
        engine.runner.execute("daily").await.unwrap(),
        ExecutionOutcome::Skipped(SkipReason::Finished)
    );

    let docs = engine.docs.target_documents(TARGET).await.unwrap();
    assert_eq!(docs.len(), 4);
    let total: i64 = docs
        .iter()
        .map(|d| d.body["doc_count"].as_i64().unwrap())
        .sum();
    assert_eq!(total, 5);

    let first_minute_a = docs
        .iter()
        .find(|d| d.body["dimensions"]["ts"] == json!(0) && d.body["dimensions"]["zone"] == json!("a"))
        .unwrap();
    assert_eq!(first_minute_a.body["metrics"]["fare"]["sum"], json!(30.0));
    assert_eq!(first_minute_a.body["metrics"]["fare"]["value_count"], json!(2));
}

#[tokio::test]
async fn test_stop_then_restart_continues_from_checkpoint() {
    let engine = Engine::in_memory().await;
    engine.index(five_rides()).await;
    engine.control.put(rides_rollup("daily")).await.unwrap();
    engine.control.start("daily").await.unwrap();

    engine.runner.execute("daily").await.unwrap();
    engine.control.stop("daily").await.unwrap();

    let rollup = engine.control.get("daily").await.unwrap();
    assert!(!rollup.enabled);
    assert!(rollup.enabled_time.is_none());
    let metadata = engine.control.get_metadata_for_rollup("daily").await.unwrap();
    assert_eq!(metadata.status, RollupStatus::Stopped);
    assert_eq!(metadata.after_key, Some(AfterKey::new(1_000, "r2")));

    assert_eq!(
        engine.runner.execute("daily").await.unwrap(),
        ExecutionOutcome::Disabled
    );

    engine.clock.advance(5_000);
    engine.control.start("daily").await.unwrap();
    let restarted = engine.control.get("daily").await.unwrap();
    assert_eq!(restarted.enabled_time, Some(NOW + 5_000));

    // Start alone leaves STOPPED; the engine moves it to STARTED
    assert_eq!(
        engine.control.get_metadata_for_rollup("daily").await.unwrap().status,
        RollupStatus::Stopped
    );

    while let ExecutionOutcome::Processed { finished: false, .. } =
        engine.runner.execute("daily").await.unwrap()
    {}

    let metadata = engine.control.get_metadata_for_rollup("daily").await.unwrap();
    assert_eq!(metadata.status, RollupStatus::Finished);
    assert_eq!(metadata.documents_processed, 5);
    assert_eq!(metadata.id, rollup.metadata_id.unwrap());
}

#[tokio::test]
async fn test_malformed_record_fails_and_start_resumes() {
    let engine = Engine::in_memory().await;
    engine
        .index(vec![
            ride("r1", 0, "a", 10.0),
            ride("r2", 1_000, "a", 20.0),
            rollup_core::domain::SourceRecord::new(
                "r3",
                2_000,
                json!({"ts": 2_000, "zone": "b", "fare": "free"}),
            ),
        ])
        .await;
    engine.control.put(rides_rollup("daily")).await.unwrap();
    engine.control.start("daily").await.unwrap();

    engine.runner.execute("daily").await.unwrap();
    let outcome = engine.runner.execute("daily").await.unwrap();
    assert!(matches!(outcome, ExecutionOutcome::Failed { .. }));

    let failed = engine.control.get_metadata_for_rollup("daily").await.unwrap();
    assert_eq!(failed.status, RollupStatus::Failed);
    assert!(failed.failure_reason.is_some());
    assert_eq!(failed.after_key, Some(AfterKey::new(1_000, "r2")));

    // FAILED never resumes on its own
    assert_eq!(
        engine.runner.execute("daily").await.unwrap(),
        ExecutionOutcome::Skipped(SkipReason::Failed)
    );

    // Stop leaves FAILED untouched
    engine.control.stop("daily").await.unwrap();
    assert_eq!(
        engine.control.get_metadata_for_rollup("daily").await.unwrap().status,
        RollupStatus::Failed
    );

    // Repair the record and restart
    engine.index(vec![ride("r3", 2_000, "b", 5.0)]).await;
    engine.control.start("daily").await.unwrap();
    let resumed = engine.control.get_metadata_for_rollup("daily").await.unwrap();
    assert_eq!(resumed.status, RollupStatus::InitResumed);
    assert!(resumed.failure_reason.is_none());
    assert_eq!(resumed.after_key, failed.after_key);

    assert_eq!(
        engine.runner.execute("daily").await.unwrap(),
        ExecutionOutcome::Processed {
            documents: 1,
            rollups: 1,
            finished: true
        }
    );
    assert_eq!(
        engine.control.get_metadata_for_rollup("daily").await.unwrap().documents_processed,
        3
    );
}

#[tokio::test]
async fn test_continuous_rollup_waits_for_delay_and_picks_up_new_data() {
    let engine = Engine::in_memory().await;
    engine
        .index(vec![ride("r1", NOW - 10_000, "a", 1.0), ride("r2", NOW - 500, "a", 2.0)])
        .await;

    let mut request = rides_rollup("live");
    request.continuous = true;
    request.delay_ms = Some(1_000);
    request.page_size = Some(10);
    engine.control.put(request).await.unwrap();
    engine.control.start("live").await.unwrap();

    // r2 is inside the delay and not yet visible
    assert_eq!(
        engine.runner.execute("live").await.unwrap(),
        ExecutionOutcome::Processed {
            documents: 1,
            rollups: 1,
            finished: true
        }
    );
    assert_eq!(
        engine.runner.execute("live").await.unwrap(),
        ExecutionOutcome::Skipped(SkipReason::NoNewData)
    );

    engine.clock.advance(1_000);
    assert_eq!(
        engine.runner.execute("live").await.unwrap(),
        ExecutionOutcome::Processed {
            documents: 1,
            rollups: 1,
            finished: true
        }
    );
    let metadata = engine.control.get_metadata_for_rollup("live").await.unwrap();
    assert_eq!(metadata.after_key, Some(AfterKey::new(NOW - 500, "r2")));
    assert_eq!(metadata.documents_processed, 2);
}

#[tokio::test]
async fn test_control_errors() {
    let engine = Engine::in_memory().await;
    engine.control.put(rides_rollup("daily")).await.unwrap();

    assert!(matches!(
        engine.control.put(rides_rollup("daily")).await,
        Err(AppError::Conflict(_))
    ));
    assert!(matches!(
        engine.control.start("ghost").await,
        Err(AppError::NotFound(_))
    ));
    assert!(matches!(
        engine.control.stop("  ").await,
        Err(AppError::BadRequest(_))
    ));
    assert!(matches!(
        engine.control.get_metadata("m-ghost").await,
        Err(AppError::NotFound(_))
    ));

    let mut invalid = rides_rollup("no-dimensions");
    invalid.dimensions.clear();
    assert!(matches!(
        engine.control.put(invalid).await,
        Err(AppError::BadRequest(_))
    ));
}
