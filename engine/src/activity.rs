//! Activity tracking.
//!
//! An [`Activity`] is the record of one run attempt of one endpoint. The
//! [`ActivityBook`] owns every activity created during the lifetime of an
//! orchestrator and applies state transitions to them.
//!
//! ```text
//! PENDING ──begin──► PROCESSING ──succeed──► SUCCESS
//!    ▲                  │   │
//!    └──── cancel ──────┘   └──fail──► ERROR | FAILURE | BLOCKED
//!                                        │
//!                 ERROR ──begin_retry──► PROCESSING
//!                 ERROR ──exhaust──────► FAILURE
//! ```
//!
//! Record counts survive every transition except a new outcome, so a retry
//! in flight keeps showing the previous numbers.

use crate::{ActivityId, ApiKey, Phase, Timestamp};
use serde::{Deserialize, Serialize};

/// Error message attached to activities reverted by cancellation.
pub const CANCELLED_MESSAGE: &str = "cancelled";

/// Error message attached to activities that ran out of retries.
pub const MAX_ATTEMPTS_MESSAGE: &str = "max attempts exceeded";

/// Status of an activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityStatus {
    Pending,
    Processing,
    Success,
    /// Failed, may be retried
    Error,
    /// Failed for good
    Failure,
    /// Cannot run until its configuration is fixed
    Blocked,
}

impl ActivityStatus {
    /// Whether the activity ended without success.
    pub fn is_failed(&self) -> bool {
        matches!(
            self,
            ActivityStatus::Error | ActivityStatus::Failure | ActivityStatus::Blocked
        )
    }

    /// Whether this status closes a phase's gate.
    pub fn blocks_next_phase(&self) -> bool {
        matches!(self, ActivityStatus::Error | ActivityStatus::Failure)
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ActivityStatus::Pending | ActivityStatus::Processing)
    }
}

impl std::fmt::Display for ActivityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ActivityStatus::Pending => "PENDING",
            ActivityStatus::Processing => "PROCESSING",
            ActivityStatus::Success => "SUCCESS",
            ActivityStatus::Error => "ERROR",
            ActivityStatus::Failure => "FAILURE",
            ActivityStatus::Blocked => "BLOCKED",
        };
        f.write_str(s)
    }
}

/// Result of one pipeline execution, applied to a processing activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success { total: u64, inserted: u64 },
    Failed { status: ActivityStatus, message: String },
    Cancelled,
}

impl Outcome {
    pub fn error(message: impl Into<String>) -> Self {
        Outcome::Failed {
            status: ActivityStatus::Error,
            message: message.into(),
        }
    }

    pub fn blocked(message: impl Into<String>) -> Self {
        Outcome::Failed {
            status: ActivityStatus::Blocked,
            message: message.into(),
        }
    }
}

/// One run attempt of one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub id: ActivityId,
    pub api_key: ApiKey,
    pub phase: Phase,
    /// Sync run that created this activity
    pub run: u32,
    pub status: ActivityStatus,
    pub progress_pct: u8,
    pub records_total: u64,
    pub records_inserted: u64,
    pub error: Option<String>,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub ended_at: Option<Timestamp>,
    pub retry_count: u32,
    pub last_retry_at: Option<Timestamp>,
    pub can_expand: bool,
}

impl Activity {
    /// Create a pending activity.
    pub fn new(
        id: impl Into<ActivityId>,
        api_key: impl Into<ApiKey>,
        phase: Phase,
        run: u32,
        now: Timestamp,
    ) -> Self {
        Self {
            id: id.into(),
            api_key: api_key.into(),
            phase,
            run,
            status: ActivityStatus::Pending,
            progress_pct: 0,
            records_total: 0,
            records_inserted: 0,
            error: None,
            created_at: now,
            started_at: None,
            ended_at: None,
            retry_count: 0,
            last_retry_at: None,
            can_expand: false,
        }
    }

    /// PENDING → PROCESSING. Returns false for any other starting status.
    pub fn begin(&mut self, now: Timestamp) -> bool {
        if self.status != ActivityStatus::Pending {
            return false;
        }
        self.status = ActivityStatus::Processing;
        self.progress_pct = 0;
        self.error = None;
        self.started_at = Some(now);
        self.ended_at = None;
        self.refresh_expand();
        true
    }

    /// Re-enter PROCESSING for a retry, keeping the previous record counts.
    pub fn begin_retry(&mut self, now: Timestamp) {
        self.retry_count += 1;
        self.last_retry_at = Some(now);
        self.status = ActivityStatus::Processing;
        self.error = None;
        self.started_at = Some(now);
        self.ended_at = None;
        self.refresh_expand();
    }

    /// Move to terminal FAILURE without another attempt.
    pub fn exhaust(&mut self, now: Timestamp) {
        self.status = ActivityStatus::Failure;
        self.error = Some(MAX_ATTEMPTS_MESSAGE.to_string());
        self.ended_at = Some(now);
        self.refresh_expand();
    }

    pub fn set_progress(&mut self, pct: u8) {
        if self.status == ActivityStatus::Processing {
            self.progress_pct = pct.min(100);
        }
    }

    /// Apply a pipeline outcome. Ignored unless the activity is processing,
    /// so an outcome never overwrites a state set by someone else meanwhile.
    pub fn apply(&mut self, outcome: Outcome, now: Timestamp) -> bool {
        if self.status != ActivityStatus::Processing {
            return false;
        }
        match outcome {
            Outcome::Success { total, inserted } => {
                self.status = ActivityStatus::Success;
                self.progress_pct = 100;
                self.records_total = total;
                self.records_inserted = inserted;
                self.error = None;
                self.ended_at = Some(now);
            }
            Outcome::Failed { status, message } => {
                self.status = status;
                self.error = Some(message);
                self.ended_at = Some(now);
            }
            Outcome::Cancelled => {
                self.status = ActivityStatus::Pending;
                self.progress_pct = 0;
                self.error = Some(CANCELLED_MESSAGE.to_string());
                self.ended_at = None;
            }
        }
        self.refresh_expand();
        true
    }

    /// Partial success: fewer rows inserted than received.
    pub fn is_partial(&self) -> bool {
        self.status == ActivityStatus::Success && self.records_inserted < self.records_total
    }

    fn refresh_expand(&mut self) {
        self.can_expand = self.status.is_failed() || self.is_partial();
    }
}

/// Owner of all activities, in creation order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityBook {
    activities: Vec<Activity>,
    current_run: u32,
}

impl ActivityBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new run and return its number.
    pub fn next_run(&mut self) -> u32 {
        self.current_run += 1;
        self.current_run
    }

    /// Number of the most recent run (0 before the first run).
    pub fn current_run(&self) -> u32 {
        self.current_run
    }

    /// Add a pending activity to the current run.
    pub fn create(
        &mut self,
        id: impl Into<ActivityId>,
        api_key: impl Into<ApiKey>,
        phase: Phase,
        now: Timestamp,
    ) -> &Activity {
        let activity = Activity::new(id, api_key, phase, self.current_run, now);
        self.activities.push(activity);
        &self.activities[self.activities.len() - 1]
    }

    pub fn get(&self, id: &str) -> Option<&Activity> {
        self.activities.iter().find(|a| a.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Activity> {
        self.activities.iter_mut().find(|a| a.id == id)
    }

    /// The most recent activity for an endpoint.
    pub fn latest(&self, api_key: &str) -> Option<&Activity> {
        self.activities.iter().rev().find(|a| a.api_key == api_key)
    }

    pub fn latest_mut(&mut self, api_key: &str) -> Option<&mut Activity> {
        self.activities
            .iter_mut()
            .rev()
            .find(|a| a.api_key == api_key)
    }

    /// All activities in creation order.
    pub fn all(&self) -> &[Activity] {
        &self.activities
    }

    /// Activities of one phase in one run.
    pub fn in_phase(&self, run: u32, phase: Phase) -> impl Iterator<Item = &Activity> {
        self.activities
            .iter()
            .filter(move |a| a.run == run && a.phase == phase)
    }

    /// Whether a finished phase closes the gate for the next one.
    pub fn phase_blocked(&self, run: u32, phase: Phase) -> bool {
        self.in_phase(run, phase)
            .any(|a| a.status.blocks_next_phase())
    }

    /// Whether any activity is still processing.
    pub fn any_processing(&self) -> bool {
        self.activities
            .iter()
            .any(|a| a.status == ActivityStatus::Processing)
    }

    /// Revert every processing activity to pending with a cancellation note.
    pub fn cancel_processing(&mut self, now: Timestamp) -> usize {
        self.activities
            .iter_mut()
            .filter(|a| a.status == ActivityStatus::Processing)
            .map(|a| a.apply(Outcome::Cancelled, now))
            .filter(|applied| *applied)
            .count()
    }

    /// Fail every processing activity of a phase with a shared cause.
    pub fn fail_phase(&mut self, run: u32, phase: Phase, cause: &str, now: Timestamp) -> usize {
        self.activities
            .iter_mut()
            .filter(|a| a.run == run && a.phase == phase)
            .map(|a| a.apply(Outcome::error(cause), now))
            .filter(|applied| *applied)
            .count()
    }

    /// Drop failed activities. Returns how many were removed.
    pub fn clear_failed(&mut self) -> usize {
        let before = self.activities.len();
        self.activities.retain(|a| !a.status.is_failed());
        before - self.activities.len()
    }
}
