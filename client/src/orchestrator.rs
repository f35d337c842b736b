//! Phased sync orchestration.
//!
//! The orchestrator owns the [`ActivityBook`] and drives endpoints through
//! the fetch, adapt, materialize and write pipeline:
//!
//! ```text
//! start ──► MASTER ──gate──► CONFIG ──gate──► TRANSACTIONAL ──► COMPLETED
//!              │                │                   │
//!              └── ERROR/FAILURE closes the gate ───┴──► PARTIALLY_COMPLETED
//! ```
//!
//! Endpoints of a phase run concurrently and the next phase only starts
//! once all of them are terminal. The activity lock is never held across
//! an await point.

use crate::config::SyncSettings;
use crate::db::{BatchWriter, LocalStore, SchemaManager, SyncStateRepository};
use crate::error::SyncError;
use crate::fetch::Fetcher;
use chrono::Utc;
use futures::future::join_all;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};
use stockpile_engine::{
    adapter, consolidate, plan_retry, Activity, ActivityBook, ActivityId, ApiCatalog,
    ApiDescriptor, ApiKey, ConsolidatedRecord, Outcome, Phase, RetryPlan, RunState, SourceColumn,
    Timestamp,
};
use tokio_util::sync::CancellationToken;

/// Identifiers a run was started with. Retries reuse them.
#[derive(Debug, Clone, Default)]
struct RunContext {
    org_id: Option<String>,
    default_org_id: Option<String>,
}

#[derive(Debug, Default)]
struct Inner {
    book: ActivityBook,
    run_state: RunState,
    context: RunContext,
    cancel: CancellationToken,
}

/// A run whose activities exist but have not started yet.
#[derive(Debug)]
pub struct PreparedRun {
    run: u32,
    activities: Vec<(Phase, ActivityId, ApiKey)>,
    context: RunContext,
    cancel: CancellationToken,
}

impl PreparedRun {
    pub fn run(&self) -> u32 {
        self.run
    }

    pub fn activity_ids(&self) -> impl Iterator<Item = &ActivityId> {
        self.activities.iter().map(|(_, id, _)| id)
    }
}

/// A retry whose activities are already back in PROCESSING.
#[derive(Debug)]
pub struct PreparedRetry {
    plan: RetryPlan,
    activities: Vec<(ActivityId, ApiKey)>,
    context: RunContext,
    cancel: CancellationToken,
}

impl PreparedRetry {
    pub fn plan(&self) -> &RetryPlan {
        &self.plan
    }
}

/// Drives sync runs and exposes their state.
pub struct SyncOrchestrator {
    catalog: Arc<ApiCatalog>,
    schema: SchemaManager,
    writer: BatchWriter,
    sync_state: SyncStateRepository,
    fetcher: Arc<dyn Fetcher>,
    settings: SyncSettings,
    inner: Mutex<Inner>,
}

impl SyncOrchestrator {
    pub fn new(
        catalog: Arc<ApiCatalog>,
        store: LocalStore,
        fetcher: Arc<dyn Fetcher>,
        settings: SyncSettings,
    ) -> Self {
        let writer = BatchWriter::new(store.clone(), catalog.snapshot_tables());
        Self {
            schema: SchemaManager::new(store.clone()),
            sync_state: SyncStateRepository::new(store),
            writer,
            catalog,
            fetcher,
            settings,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn catalog(&self) -> &ApiCatalog {
        &self.catalog
    }

    /// Run a full sync: every enabled endpoint, phase by phase.
    ///
    /// Endpoint failures end up in activity state; the only error returned
    /// is [`SyncError::SyncInProgress`].
    pub async fn start_sync<S: AsRef<str>>(
        &self,
        org_id: Option<String>,
        enabled_keys: &[S],
        default_org_id: Option<String>,
    ) -> Result<RunState, SyncError> {
        let run = self.prepare_run(org_id, enabled_keys, default_org_id)?;
        Ok(self.execute_run(run).await)
    }

    /// Create the PENDING activities of a new run.
    pub fn prepare_run<S: AsRef<str>>(
        &self,
        org_id: Option<String>,
        enabled_keys: &[S],
        default_org_id: Option<String>,
    ) -> Result<PreparedRun, SyncError> {
        let mut inner = self.lock();
        if inner.run_state.is_running() || inner.book.any_processing() {
            return Err(SyncError::SyncInProgress);
        }

        for err in self.catalog.unknown_keys(enabled_keys) {
            tracing::warn!(error = %err, "Skipping enabled key");
        }

        let now = now_ms();
        let run = inner.book.next_run();
        let mut activities = Vec::new();
        for descriptor in self.catalog.resolve(enabled_keys) {
            let id = uuid::Uuid::new_v4().to_string();
            inner
                .book
                .create(id.clone(), descriptor.key.clone(), descriptor.phase, now);
            activities.push((descriptor.phase, id, descriptor.key.clone()));
        }

        let context = RunContext {
            org_id,
            default_org_id,
        };
        let cancel = CancellationToken::new();
        inner.context = context.clone();
        inner.cancel = cancel.clone();
        inner.run_state = RunState::Running(Phase::Master);

        tracing::info!(run, endpoints = activities.len(), "Sync run prepared");

        Ok(PreparedRun {
            run,
            activities,
            context,
            cancel,
        })
    }

    /// Execute a prepared run to its end state.
    pub async fn execute_run(&self, prepared: PreparedRun) -> RunState {
        let PreparedRun {
            run,
            activities,
            context,
            cancel,
        } = prepared;

        let mut outcome = RunState::Completed;
        for phase in Phase::ALL {
            if cancel.is_cancelled() {
                outcome = RunState::Aborted;
                break;
            }

            let ids: Vec<(ActivityId, ApiKey)> = activities
                .iter()
                .filter(|(p, _, _)| *p == phase)
                .map(|(_, id, key)| (id.clone(), key.clone()))
                .collect();
            if ids.is_empty() {
                continue;
            }

            let started: Vec<(ActivityId, ApiKey)> = {
                let mut inner = self.lock();
                if inner.run_state.is_running() {
                    inner.run_state = RunState::Running(phase);
                }
                let now = now_ms();
                ids.into_iter()
                    .filter(|(id, _)| {
                        inner
                            .book
                            .get_mut(id)
                            .map(|a| a.begin(now))
                            .unwrap_or(false)
                    })
                    .collect()
            };

            tracing::info!(run, phase = %phase, endpoints = started.len(), "Phase started");

            let phase_token = cancel.child_token();
            join_all(
                started
                    .iter()
                    .map(|(id, key)| self.run_activity(id, key, &context, &phase_token)),
            )
            .await;

            if cancel.is_cancelled() {
                outcome = RunState::Aborted;
                break;
            }

            let blocked = self.lock().book.phase_blocked(run, phase);
            tracing::info!(run, phase = %phase, blocked, "Phase finished");
            if blocked {
                outcome = RunState::PartiallyCompleted;
                break;
            }
        }

        let final_state = {
            let mut inner = self.lock();
            let failed = inner
                .book
                .all()
                .iter()
                .any(|a| a.run == run && a.status.is_failed());
            if outcome == RunState::Completed && failed {
                outcome = RunState::PartiallyCompleted;
            }
            if inner.run_state.is_running() {
                inner.run_state = outcome;
            }
            inner.run_state
        };

        tracing::info!(run, state = %final_state, "Sync run finished");
        final_state
    }

    /// Retry failed endpoints. With `ids`, only the named activities.
    pub async fn retry_failed(
        &self,
        ids: Option<Vec<ActivityId>>,
    ) -> Result<RetryPlan, SyncError> {
        let retry = self.prepare_retry(ids)?;
        Ok(self.execute_retry(retry).await)
    }

    /// Apply the retry rules. Activities out of attempts fail right away.
    pub fn prepare_retry(&self, ids: Option<Vec<ActivityId>>) -> Result<PreparedRetry, SyncError> {
        let mut inner = self.lock();
        if inner.run_state.is_running() {
            return Err(SyncError::SyncInProgress);
        }

        let plan = plan_retry(
            &mut inner.book,
            ids.as_deref(),
            &self.settings.retry,
            now_ms(),
        );
        for id in &plan.exhausted {
            tracing::warn!(activity = %id, "Retry limit reached");
        }
        if !plan.has_work() {
            return Err(SyncError::NoRetryableEndpoints);
        }

        let activities = plan
            .retrying
            .iter()
            .filter_map(|id| {
                inner
                    .book
                    .get(id)
                    .map(|a| (a.id.clone(), a.api_key.clone()))
            })
            .collect();

        if inner.cancel.is_cancelled() {
            inner.cancel = CancellationToken::new();
        }

        Ok(PreparedRetry {
            plan,
            activities,
            context: inner.context.clone(),
            cancel: inner.cancel.child_token(),
        })
    }

    /// Wait the retry delay, then re-run the retried activities concurrently.
    pub async fn execute_retry(&self, retry: PreparedRetry) -> RetryPlan {
        let PreparedRetry {
            plan,
            activities,
            context,
            cancel,
        } = retry;

        tracing::info!(
            retrying = plan.retrying.len(),
            exhausted = plan.exhausted.len(),
            delay_ms = self.settings.retry.delay_ms,
            "Retrying failed endpoints"
        );

        tokio::select! {
            _ = cancel.cancelled() => return plan,
            _ = tokio::time::sleep(self.settings.retry.delay()) => {}
        }

        join_all(
            activities
                .iter()
                .map(|(id, key)| self.run_activity(id, key, &context, &cancel)),
        )
        .await;

        plan
    }

    /// Cancel the run or retry in flight. Processing activities go back to
    /// PENDING. Returns how many were reverted.
    pub fn cancel(&self) -> usize {
        let mut inner = self.lock();
        inner.cancel.cancel();
        let reverted = inner.book.cancel_processing(now_ms());
        if inner.run_state.is_running() {
            inner.run_state = RunState::Aborted;
        }
        tracing::info!(reverted, "Sync cancelled");
        reverted
    }

    /// One record per endpoint across all runs.
    pub fn consolidated(&self) -> Vec<ConsolidatedRecord> {
        consolidate(self.lock().book.all())
    }

    pub fn activities(&self) -> Vec<Activity> {
        self.lock().book.all().to_vec()
    }

    pub fn activity(&self, id: &str) -> Option<Activity> {
        self.lock().book.get(id).cloned()
    }

    pub fn run_state(&self) -> RunState {
        self.lock().run_state
    }

    /// Drop failed activities from the book.
    pub fn clear_errors(&self) -> Result<usize, SyncError> {
        let mut inner = self.lock();
        if inner.run_state.is_running() {
            return Err(SyncError::SyncInProgress);
        }
        let cleared = inner.book.clear_failed();
        tracing::info!(cleared, "Cleared failed activities");
        Ok(cleared)
    }

    async fn run_activity(
        &self,
        id: &str,
        api_key: &str,
        context: &RunContext,
        token: &CancellationToken,
    ) {
        let started = Utc::now();
        let result = match self.catalog.get(api_key) {
            Some(descriptor) => self.sync_endpoint(id, descriptor, context, token).await,
            None => Err(stockpile_engine::Error::UnknownEndpoint(api_key.to_string()).into()),
        };

        let outcome = match result {
            Ok((total, inserted)) => {
                // A partial write keeps the old token so rejected rows are
                // fetched again by the next incremental sync.
                if inserted < total {
                    tracing::warn!(
                        api_key = %api_key,
                        total,
                        inserted,
                        "Partial write, sync token not advanced"
                    );
                } else if let Err(e) = self
                    .sync_state
                    .record_success(api_key, started, inserted)
                    .await
                {
                    tracing::warn!(api_key = %api_key, error = %e, "Failed to record sync state");
                }
                tracing::info!(api_key = %api_key, total, inserted, "Endpoint synced");
                Outcome::Success { total, inserted }
            }
            Err(e) if e.is_store_failure() => {
                tracing::error!(api_key = %api_key, error = %e, "Local store failure");
                let mut inner = self.lock();
                if let Some((run, phase)) = inner.book.get(id).map(|a| (a.run, a.phase)) {
                    let failed = inner.book.fail_phase(run, phase, &e.to_string(), now_ms());
                    tracing::error!(run, phase = %phase, failed, "Phase failed on store error");
                }
                token.cancel();
                return;
            }
            Err(SyncError::Cancelled) => {
                tracing::debug!(api_key = %api_key, "Endpoint cancelled");
                Outcome::Cancelled
            }
            Err(e) => {
                tracing::warn!(api_key = %api_key, error = %e, "Endpoint failed");
                e.outcome()
            }
        };

        if let Some(activity) = self.lock().book.get_mut(id) {
            activity.apply(outcome, now_ms());
        }
    }

    /// Fetch, adapt, materialize and write one endpoint. Returns the number
    /// of rows received and written.
    async fn sync_endpoint(
        &self,
        id: &str,
        descriptor: &ApiDescriptor,
        context: &RunContext,
        token: &CancellationToken,
    ) -> Result<(u64, u64), SyncError> {
        if token.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let url_context = self
            .sync_state
            .url_context(
                &descriptor.key,
                context.org_id.as_deref(),
                context.default_org_id.as_deref(),
            )
            .await?;
        let path = descriptor.request_path(&url_context)?;

        let metadata = match &descriptor.metadata_url {
            Some(url) => {
                let document = self.fetcher.fetch(url, token).await?;
                document.as_ref().map(parse_metadata).transpose()?
            }
            None => None,
        };
        self.set_progress(id, 25);

        let data = self.fetcher.fetch(&path, token).await?;
        self.set_progress(id, 50);

        let adapted = adapter::adapt(descriptor.response_shape, metadata.as_deref(), data.as_ref())?;
        self.set_progress(id, 75);

        if token.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let table = &descriptor.table_name;
        let total = adapted.len() as u64;
        if !adapted.columns.is_empty() {
            self.schema.ensure_table(table, adapted.columns).await?;
            self.schema
                .run_auxiliary(table, &descriptor.auxiliary_ddl)
                .await;
        }
        if !self.schema.table_exists(table).await? {
            return Ok((0, 0));
        }

        let inserted = self.writer.upsert(table, &adapted.rows).await?;
        Ok((total, inserted))
    }

    fn set_progress(&self, id: &str, pct: u8) {
        if let Some(activity) = self.lock().book.get_mut(id) {
            activity.set_progress(pct);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("Activity lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

/// Parse a metadata document: a bare array of `{name, type}` or an object
/// holding one.
fn parse_metadata(document: &Value) -> Result<Vec<SourceColumn>, SyncError> {
    let entries = adapter::find_row_set(document)?;
    serde_json::from_value(Value::Array(entries.clone())).map_err(|e| {
        SyncError::InvalidResponse(stockpile_engine::Error::InvalidMetadata(e.to_string()))
    })
}

fn now_ms() -> Timestamp {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default()
}
