//! Shared fixtures for the client integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use stockpile_client::config::SyncSettings;
use stockpile_client::db::LocalStore;
use stockpile_client::error::SyncError;
use stockpile_client::fetch::Fetcher;
use stockpile_client::orchestrator::SyncOrchestrator;
use stockpile_engine::{ApiCatalog, ApiDescriptor, Phase, ResponseShape, RetryPolicy};
use tokio_util::sync::CancellationToken;

/// What the scripted server answers for a path.
#[derive(Debug, Clone)]
pub enum Reply {
    Json(Value),
    NoContent,
    Status(u16),
    /// Never answers; resolves only on cancellation
    Hang,
}

/// In-process [`Fetcher`] answering from a script keyed by exact path.
///
/// Each path holds a queue of replies. Replies are consumed in order and the
/// last one repeats. Unscripted paths answer 404.
#[derive(Default)]
pub struct ScriptedFetcher {
    replies: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, path: &str, replies: Vec<Reply>) {
        self.replies
            .lock()
            .unwrap()
            .insert(path.to_string(), replies.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, path: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == path).count()
    }

    fn next_reply(&self, path: &str) -> Reply {
        let mut replies = self.replies.lock().unwrap();
        match replies.get_mut(path) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) => queue.front().cloned().unwrap_or(Reply::Status(404)),
            None => Reply::Status(404),
        }
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(
        &self,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<Value>, SyncError> {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        self.calls.lock().unwrap().push(path.to_string());

        match self.next_reply(path) {
            Reply::Json(value) => Ok(Some(value)),
            Reply::NoContent => Ok(None),
            Reply::Status(status) => Err(SyncError::HttpStatus {
                status,
                message: format!("scripted {}", status),
            }),
            Reply::Hang => {
                cancel.cancelled().await;
                Err(SyncError::Cancelled)
            }
        }
    }
}

pub const ORG_ID: &str = "204";
pub const DEFAULT_ORG_ID: &str = "1";

pub const ORGS_META: &str = "/orgs/metadata";
pub const ORGS: &str = "/orgs";
pub const ITEMS: &str = "/items";
pub const PROFILE: &str = "/profile/1";
pub const ONHAND: &str = "/onhand/204";

/// A small catalog with one or two endpoints per phase.
pub fn test_catalog() -> Arc<ApiCatalog> {
    use Phase::*;
    use ResponseShape::*;

    let descriptors = vec![
        ApiDescriptor::new("GET_ORGS", "Organizations", Master, JsonWithMetadata, ORGS)
            .metadata(ORGS_META)
            .table("orgs")
            .snapshot(),
        ApiDescriptor::new("GET_ITEMS", "Items", Master, TableMatrix, ITEMS).table("items"),
        ApiDescriptor::new("GET_PROFILE", "Login profile", Config, JsonWithMetadata, "/profile")
            .metadata("/profile/metadata")
            .table("profile")
            .default_org()
            .snapshot(),
        ApiDescriptor::new("GET_ONHAND", "On-hand", Transactional, TableMatrix, "/onhand")
            .table("onhand")
            .org()
            .ddl(r#"CREATE INDEX IF NOT EXISTS "idx_onhand_item" ON "onhand" ("ITEM_ID")"#),
    ];
    Arc::new(ApiCatalog::new(descriptors).unwrap())
}

pub fn all_keys() -> Vec<String> {
    ["GET_ORGS", "GET_ITEMS", "GET_PROFILE", "GET_ONHAND"]
        .iter()
        .map(|k| k.to_string())
        .collect()
}

/// Script every endpoint of [`test_catalog`] with a successful answer.
pub fn script_success(fetcher: &ScriptedFetcher) {
    fetcher.script(
        ORGS_META,
        vec![Reply::Json(json!([
            {"name": "ORG_ID", "type": "number", "primaryKey": true},
            {"name": "ORG_CODE", "type": "string"}
        ]))],
    );
    fetcher.script(
        ORGS,
        vec![Reply::Json(json!({
            "Response": [
                {"ORG_ID": 204, "ORG_CODE": "V1"},
                {"ORG_ID": 207, "ORG_CODE": "M1"}
            ],
            "Links": {}
        }))],
    );
    fetcher.script(
        ITEMS,
        vec![Reply::Json(json!([
            ["ITEM_ID_PK", "ITEM_DESC"],
            ["100", "Widget"],
            ["101", "Gadget"]
        ]))],
    );
    fetcher.script(
        "/profile/metadata",
        vec![Reply::Json(json!([
            {"name": "USER_ID", "type": "number"},
            {"name": "USER_NAME", "type": "string"}
        ]))],
    );
    fetcher.script(
        PROFILE,
        vec![Reply::Json(json!([{"USER_ID": 1, "USER_NAME": "OPERATOR"}]))],
    );
    fetcher.script(
        ONHAND,
        vec![Reply::Json(json!([
            ["ITEM_ID", "SUBINV", "QTY"],
            ["100", "STORES", "12"],
            ["101", "FG", "3"],
            ["100", "FG", "1"]
        ]))],
    );
}

pub fn settings(delay_ms: u64) -> SyncSettings {
    SyncSettings {
        fetch_timeout: Duration::from_secs(5),
        retry: RetryPolicy {
            max_attempts: 3,
            delay_ms,
        },
    }
}

pub async fn orchestrator(
    fetcher: Arc<ScriptedFetcher>,
    delay_ms: u64,
) -> (Arc<SyncOrchestrator>, LocalStore) {
    let store = LocalStore::open_in_memory().await.unwrap();
    let orchestrator =
        SyncOrchestrator::new(test_catalog(), store.clone(), fetcher, settings(delay_ms));
    (Arc::new(orchestrator), store)
}

pub async fn count(store: &LocalStore, table: &str) -> i64 {
    let (n,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM \"{}\"", table))
        .fetch_one(store.pool())
        .await
        .unwrap();
    n
}

/// Poll until `check` holds, failing the test after a second.
pub async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}
