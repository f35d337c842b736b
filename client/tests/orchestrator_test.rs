//! Integration tests for the sync orchestrator.
//!
//! The remote API is replaced by a scripted in-process fetcher; the local
//! store is a fresh in-memory database per test.

mod common;

use common::*;
use serde_json::json;
use stockpile_client::db::SyncStateRepository;
use stockpile_client::error::SyncError;
use stockpile_engine::activity::{CANCELLED_MESSAGE, MAX_ATTEMPTS_MESSAGE};
use stockpile_engine::{ActivityStatus, ConsolidatedRecord, RunState};

fn record<'a>(records: &'a [ConsolidatedRecord], key: &str) -> &'a ConsolidatedRecord {
    records.iter().find(|r| r.api_key == key).unwrap()
}

// =============================================================================
// Full runs
// =============================================================================

#[tokio::test]
async fn test_full_run_completes() {
    let fetcher = ScriptedFetcher::new();
    script_success(&fetcher);
    let (orchestrator, store) = orchestrator(fetcher.clone(), 0).await;

    let state = orchestrator
        .start_sync(
            Some(ORG_ID.to_string()),
            &all_keys(),
            Some(DEFAULT_ORG_ID.to_string()),
        )
        .await
        .unwrap();

    assert_eq!(state, RunState::Completed);
    assert_eq!(orchestrator.run_state(), RunState::Completed);
    assert!(orchestrator
        .activities()
        .iter()
        .all(|a| a.status == ActivityStatus::Success && a.progress_pct == 100));

    assert_eq!(count(&store, "orgs").await, 2);
    assert_eq!(count(&store, "items").await, 2);
    assert_eq!(count(&store, "profile").await, 1);
    assert_eq!(count(&store, "onhand").await, 3);

    let onhand = record(&orchestrator.consolidated(), "GET_ONHAND").clone();
    assert_eq!(onhand.records_total, 3);
    assert_eq!(onhand.records_inserted, 3);
    assert!(!onhand.can_expand);

    let entries = SyncStateRepository::new(store.clone()).all().await.unwrap();
    assert_eq!(entries.len(), 4);
}

#[tokio::test]
async fn test_partial_write_keeps_sync_token() {
    let fetcher = ScriptedFetcher::new();
    fetcher.script(
        ITEMS,
        vec![
            Reply::Json(json!([["ITEM_ID_PK", "ITEM_DESC"], ["100", "Widget"], [null, "Broken"]])),
            Reply::Json(json!([["ITEM_ID_PK", "ITEM_DESC"], ["100", "Widget"], ["101", "Fixed"]])),
        ],
    );
    let (orchestrator, store) = orchestrator(fetcher.clone(), 0).await;
    let sync_state = SyncStateRepository::new(store.clone());

    orchestrator
        .start_sync(None, &["GET_ITEMS"], None)
        .await
        .unwrap();
    let items = record(&orchestrator.consolidated(), "GET_ITEMS").clone();
    assert_eq!(items.status, ActivityStatus::Success);
    assert_eq!((items.records_total, items.records_inserted), (2, 1));
    assert!(sync_state.get("GET_ITEMS").await.unwrap().is_none());

    orchestrator
        .start_sync(None, &["GET_ITEMS"], None)
        .await
        .unwrap();
    assert_eq!(count(&store, "items").await, 2);
    let entry = sync_state.get("GET_ITEMS").await.unwrap().unwrap();
    assert_eq!(entry.last_records, 2);
}

#[tokio::test]
async fn test_phases_run_in_order() {
    let fetcher = ScriptedFetcher::new();
    script_success(&fetcher);
    let (orchestrator, _store) = orchestrator(fetcher.clone(), 0).await;

    orchestrator
        .start_sync(
            Some(ORG_ID.to_string()),
            &all_keys(),
            Some(DEFAULT_ORG_ID.to_string()),
        )
        .await
        .unwrap();

    let calls = fetcher.calls();
    let position = |path: &str| calls.iter().position(|c| c == path).unwrap();
    assert!(position(ORGS) < position(PROFILE));
    assert!(position(ITEMS) < position(PROFILE));
    assert!(position(PROFILE) < position(ONHAND));
}

#[tokio::test]
async fn test_refresh_is_idempotent_across_runs() {
    let fetcher = ScriptedFetcher::new();
    script_success(&fetcher);
    let (orchestrator, store) = orchestrator(fetcher.clone(), 0).await;

    for _ in 0..2 {
        orchestrator
            .start_sync(
                Some(ORG_ID.to_string()),
                &["GET_ORGS", "GET_ITEMS"],
                None,
            )
            .await
            .unwrap();
        assert_eq!(count(&store, "items").await, 2);
        assert_eq!(count(&store, "orgs").await, 2);
    }

    // Two runs, one consolidated record per endpoint
    assert_eq!(orchestrator.activities().len(), 4);
    let consolidated = orchestrator.consolidated();
    assert_eq!(consolidated.len(), 2);
    assert_eq!(record(&consolidated, "GET_ITEMS").attempts, 2);
}

#[tokio::test]
async fn test_unknown_key_is_skipped() {
    let fetcher = ScriptedFetcher::new();
    script_success(&fetcher);
    let (orchestrator, _store) = orchestrator(fetcher.clone(), 0).await;

    let state = orchestrator
        .start_sync(None, &["GET_ITEMS", "GET_NOT_A_THING"], None)
        .await
        .unwrap();

    assert_eq!(state, RunState::Completed);
    assert_eq!(orchestrator.activities().len(), 1);
}

#[tokio::test]
async fn test_no_content_is_zero_rows() {
    let fetcher = ScriptedFetcher::new();
    fetcher.script(ITEMS, vec![Reply::NoContent]);
    let (orchestrator, _store) = orchestrator(fetcher.clone(), 0).await;

    orchestrator
        .start_sync(None, &["GET_ITEMS"], None)
        .await
        .unwrap();

    let items = record(&orchestrator.consolidated(), "GET_ITEMS").clone();
    assert_eq!(items.status, ActivityStatus::Success);
    assert_eq!(items.records_total, 0);
}

// =============================================================================
// Phase gating
// =============================================================================

#[tokio::test]
async fn test_master_error_stops_later_phases() {
    let fetcher = ScriptedFetcher::new();
    script_success(&fetcher);
    fetcher.script(ITEMS, vec![Reply::Status(500)]);
    let (orchestrator, _store) = orchestrator(fetcher.clone(), 0).await;

    let state = orchestrator
        .start_sync(
            Some(ORG_ID.to_string()),
            &all_keys(),
            Some(DEFAULT_ORG_ID.to_string()),
        )
        .await
        .unwrap();

    assert_eq!(state, RunState::PartiallyCompleted);
    assert_eq!(fetcher.calls_to(PROFILE), 0);
    assert_eq!(fetcher.calls_to(ONHAND), 0);

    let consolidated = orchestrator.consolidated();
    assert_eq!(record(&consolidated, "GET_ORGS").status, ActivityStatus::Success);
    let items = record(&consolidated, "GET_ITEMS");
    assert_eq!(items.status, ActivityStatus::Error);
    assert!(items.can_expand);
    assert!(items.error.as_deref().unwrap().contains("500"));
    assert_eq!(record(&consolidated, "GET_PROFILE").status, ActivityStatus::Pending);
    assert_eq!(record(&consolidated, "GET_ONHAND").status, ActivityStatus::Pending);
}

#[tokio::test]
async fn test_invalid_shape_closes_gate() {
    let fetcher = ScriptedFetcher::new();
    script_success(&fetcher);
    fetcher.script(ORGS, vec![Reply::Json(json!({"Links": {}, "Count": 0}))]);
    let (orchestrator, _store) = orchestrator(fetcher.clone(), 0).await;

    let state = orchestrator
        .start_sync(
            Some(ORG_ID.to_string()),
            &all_keys(),
            Some(DEFAULT_ORG_ID.to_string()),
        )
        .await
        .unwrap();

    assert_eq!(state, RunState::PartiallyCompleted);
    let orgs = record(&orchestrator.consolidated(), "GET_ORGS").clone();
    assert_eq!(orgs.status, ActivityStatus::Error);
    assert_eq!(fetcher.calls_to(PROFILE), 0);
}

#[tokio::test]
async fn test_missing_org_blocks_endpoint_only() {
    let fetcher = ScriptedFetcher::new();
    script_success(&fetcher);
    let (orchestrator, _store) = orchestrator(fetcher.clone(), 0).await;

    let state = orchestrator
        .start_sync(None, &all_keys(), Some(DEFAULT_ORG_ID.to_string()))
        .await
        .unwrap();

    assert_eq!(state, RunState::PartiallyCompleted);
    let consolidated = orchestrator.consolidated();
    assert_eq!(record(&consolidated, "GET_PROFILE").status, ActivityStatus::Success);

    let onhand = record(&consolidated, "GET_ONHAND");
    assert_eq!(onhand.status, ActivityStatus::Blocked);
    assert!(onhand.error.as_deref().unwrap().contains("organization id"));
    assert!(fetcher.calls().iter().all(|c| !c.starts_with("/onhand")));
}

#[tokio::test]
async fn test_blocked_is_not_retried() {
    let fetcher = ScriptedFetcher::new();
    script_success(&fetcher);
    let (orchestrator, _store) = orchestrator(fetcher.clone(), 0).await;

    orchestrator
        .start_sync(None, &["GET_PROFILE"], None)
        .await
        .unwrap();

    let err = orchestrator.retry_failed(None).await.unwrap_err();
    assert!(matches!(err, SyncError::NoRetryableEndpoints));
    assert_eq!(
        orchestrator.activities()[0].status,
        ActivityStatus::Blocked
    );
}

#[tokio::test]
async fn test_store_failure_fails_whole_phase() {
    let fetcher = ScriptedFetcher::new();
    script_success(&fetcher);
    let (orchestrator, store) = orchestrator(fetcher.clone(), 0).await;
    store.close().await;

    let state = orchestrator
        .start_sync(
            Some(ORG_ID.to_string()),
            &all_keys(),
            Some(DEFAULT_ORG_ID.to_string()),
        )
        .await
        .unwrap();

    assert_eq!(state, RunState::PartiallyCompleted);
    let activities = orchestrator.activities();
    let master: Vec<_> = activities
        .iter()
        .filter(|a| a.api_key == "GET_ORGS" || a.api_key == "GET_ITEMS")
        .collect();
    assert!(master.iter().all(|a| a.status == ActivityStatus::Error));
    assert_eq!(master[0].error, master[1].error);
    assert_eq!(fetcher.calls_to(PROFILE), 0);
}

// =============================================================================
// Retry
// =============================================================================

#[tokio::test]
async fn test_retry_bookkeeping() {
    let fetcher = ScriptedFetcher::new();
    fetcher.script(ITEMS, vec![Reply::Status(503)]);
    let (orchestrator, _store) = orchestrator(fetcher.clone(), 0).await;

    orchestrator
        .start_sync(None, &["GET_ITEMS"], None)
        .await
        .unwrap();

    for attempt in 1..=3 {
        let plan = orchestrator.retry_failed(None).await.unwrap();
        assert_eq!(plan.retrying.len(), 1);

        let activity = orchestrator.activities()[0].clone();
        assert_eq!(activity.retry_count, attempt);
        assert_eq!(activity.status, ActivityStatus::Error);
        assert!(activity.last_retry_at.is_some());
    }
    assert_eq!(fetcher.calls_to(ITEMS), 4);

    // Out of attempts: terminal failure without touching the network
    let err = orchestrator.retry_failed(None).await.unwrap_err();
    assert!(matches!(err, SyncError::NoRetryableEndpoints));
    assert_eq!(fetcher.calls_to(ITEMS), 4);

    let activity = orchestrator.activities()[0].clone();
    assert_eq!(activity.status, ActivityStatus::Failure);
    assert_eq!(activity.error.as_deref(), Some(MAX_ATTEMPTS_MESSAGE));
    assert_eq!(activity.retry_count, 3);

    // Nothing left to retry
    assert!(orchestrator.retry_failed(None).await.is_err());
}

#[tokio::test]
async fn test_client_error_is_recorded_and_retried() {
    let fetcher = ScriptedFetcher::new();
    fetcher.script(ITEMS, vec![Reply::Status(404)]);
    let (orchestrator, _store) = orchestrator(fetcher.clone(), 0).await;

    let state = orchestrator
        .start_sync(None, &["GET_ITEMS"], None)
        .await
        .unwrap();
    assert_eq!(state, RunState::PartiallyCompleted);

    let activity = orchestrator.activities()[0].clone();
    assert_eq!(activity.status, ActivityStatus::Error);
    assert!(activity.can_expand);
    assert!(activity.error.as_deref().unwrap().starts_with("HTTP 404"));

    let plan = orchestrator.retry_failed(None).await.unwrap();
    assert_eq!(plan.retrying, vec![activity.id.clone()]);
    assert_eq!(fetcher.calls_to(ITEMS), 2);
    assert_eq!(orchestrator.activities()[0].status, ActivityStatus::Error);
}

#[tokio::test]
async fn test_retry_recovers_endpoint() {
    let fetcher = ScriptedFetcher::new();
    script_success(&fetcher);
    fetcher.script(
        ITEMS,
        vec![
            Reply::Status(502),
            Reply::Json(json!([["ITEM_ID_PK", "ITEM_DESC"], ["100", "Widget"]])),
        ],
    );
    let (orchestrator, store) = orchestrator(fetcher.clone(), 0).await;

    orchestrator
        .start_sync(None, &["GET_ITEMS"], None)
        .await
        .unwrap();
    let id = orchestrator.activities()[0].id.clone();

    let plan = orchestrator.retry_failed(Some(vec![id.clone()])).await.unwrap();
    assert_eq!(plan.retrying, vec![id]);

    let items = record(&orchestrator.consolidated(), "GET_ITEMS").clone();
    assert_eq!(items.status, ActivityStatus::Success);
    assert_eq!(items.retry_count, 1);
    assert_eq!(items.attempts, 1);
    assert!(!items.can_expand);
    assert_eq!(count(&store, "items").await, 1);
}

#[tokio::test]
async fn test_retry_skips_unknown_and_healthy_ids() {
    let fetcher = ScriptedFetcher::new();
    script_success(&fetcher);
    let (orchestrator, _store) = orchestrator(fetcher.clone(), 0).await;

    orchestrator
        .start_sync(None, &["GET_ITEMS"], None)
        .await
        .unwrap();
    let id = orchestrator.activities()[0].id.clone();

    let err = orchestrator
        .retry_failed(Some(vec![id, "no-such-activity".to_string()]))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::NoRetryableEndpoints));
}

#[tokio::test]
async fn test_counts_visible_while_retrying() {
    let fetcher = ScriptedFetcher::new();
    fetcher.script(
        ITEMS,
        vec![
            Reply::Json(json!([
                ["ITEM_ID_PK", "ITEM_DESC"],
                ["100", "Widget"],
                ["101", "Gadget"]
            ])),
            Reply::Status(500),
        ],
    );
    let (orchestrator, _store) = orchestrator(fetcher.clone(), 300).await;

    orchestrator
        .start_sync(None, &["GET_ITEMS"], None)
        .await
        .unwrap();
    orchestrator
        .start_sync(None, &["GET_ITEMS"], None)
        .await
        .unwrap();
    assert_eq!(
        record(&orchestrator.consolidated(), "GET_ITEMS").status,
        ActivityStatus::Error
    );

    let retry = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.retry_failed(None).await })
    };

    let o = orchestrator.clone();
    wait_until(move || {
        o.activities()
            .iter()
            .any(|a| a.status == ActivityStatus::Processing)
    })
    .await;

    let items = record(&orchestrator.consolidated(), "GET_ITEMS").clone();
    assert_eq!(items.status, ActivityStatus::Processing);
    assert_eq!(items.records_total, 2);
    assert_eq!(items.records_inserted, 2);

    retry.await.unwrap().unwrap();
    assert_eq!(
        record(&orchestrator.consolidated(), "GET_ITEMS").status,
        ActivityStatus::Error
    );
}

// =============================================================================
// Cancellation and concurrency
// =============================================================================

#[tokio::test]
async fn test_cancel_reverts_to_pending() {
    let fetcher = ScriptedFetcher::new();
    script_success(&fetcher);
    fetcher.script(ITEMS, vec![Reply::Hang]);
    let (orchestrator, _store) = orchestrator(fetcher.clone(), 0).await;

    let run = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            orchestrator
                .start_sync(
                    Some(ORG_ID.to_string()),
                    &all_keys(),
                    Some(DEFAULT_ORG_ID.to_string()),
                )
                .await
        })
    };

    let f = fetcher.clone();
    let o = orchestrator.clone();
    wait_until(move || {
        f.calls_to(ITEMS) == 1
            && o.activities()
                .iter()
                .any(|a| a.api_key == "GET_ORGS" && a.status == ActivityStatus::Success)
    })
    .await;

    // A second start is rejected while the first is running
    let err = orchestrator
        .start_sync(None, &["GET_ITEMS"], None)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::SyncInProgress));

    assert_eq!(orchestrator.cancel(), 1);
    let state = run.await.unwrap().unwrap();
    assert_eq!(state, RunState::Aborted);
    assert_eq!(orchestrator.run_state(), RunState::Aborted);

    let consolidated = orchestrator.consolidated();
    let items = record(&consolidated, "GET_ITEMS");
    assert_eq!(items.status, ActivityStatus::Pending);
    assert_eq!(items.error.as_deref(), Some(CANCELLED_MESSAGE));
    assert_eq!(record(&consolidated, "GET_ORGS").status, ActivityStatus::Success);
    assert_eq!(fetcher.calls_to(PROFILE), 0);

    // The next run starts normally
    fetcher.script(
        ITEMS,
        vec![Reply::Json(json!([["ITEM_ID_PK"], ["100"]]))],
    );
    let state = orchestrator
        .start_sync(None, &["GET_ITEMS"], None)
        .await
        .unwrap();
    assert_eq!(state, RunState::Completed);
}

#[tokio::test]
async fn test_clear_errors() {
    let fetcher = ScriptedFetcher::new();
    script_success(&fetcher);
    fetcher.script(ITEMS, vec![Reply::Status(500)]);
    let (orchestrator, _store) = orchestrator(fetcher.clone(), 0).await;

    orchestrator
        .start_sync(
            Some(ORG_ID.to_string()),
            &all_keys(),
            Some(DEFAULT_ORG_ID.to_string()),
        )
        .await
        .unwrap();

    assert_eq!(orchestrator.clear_errors().unwrap(), 1);
    let activities = orchestrator.activities();
    assert_eq!(activities.len(), 3);
    assert!(activities.iter().all(|a| !a.status.is_failed()));
}
