//! Bounded retry of failed activities.

use crate::{ActivityBook, ActivityId, ActivityStatus, Timestamp};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Attempts allowed after the first run before an activity fails for good.
pub const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Delay before a retry batch executes.
pub const RETRY_DELAY_MS: u64 = 2000;

/// Retry limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_RETRY_ATTEMPTS,
            delay_ms: RETRY_DELAY_MS,
        }
    }
}

impl RetryPolicy {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// What a retry request resolved to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPlan {
    /// Activities moved back to PROCESSING, to be re-run
    pub retrying: Vec<ActivityId>,
    /// Activities moved to FAILURE because they used up their attempts
    pub exhausted: Vec<ActivityId>,
    /// Requested activities that are not in a retryable state
    pub skipped: Vec<ActivityId>,
}

impl RetryPlan {
    /// Whether anything will actually be re-run.
    pub fn has_work(&self) -> bool {
        !self.retrying.is_empty()
    }
}

/// Select and transition activities for a retry.
///
/// With `ids`, each id is re-identified as the latest activity of its
/// endpoint; without, every endpoint whose latest activity is in ERROR is
/// selected. Selected activities at the attempt limit become FAILURE; the
/// rest enter PROCESSING with their retry counter bumped.
pub fn plan_retry(
    book: &mut ActivityBook,
    ids: Option<&[ActivityId]>,
    policy: &RetryPolicy,
    now: Timestamp,
) -> RetryPlan {
    let mut plan = RetryPlan::default();

    let mut keys: Vec<String> = Vec::new();
    match ids {
        Some(ids) => {
            for id in ids {
                match book.get(id) {
                    Some(a) if !keys.contains(&a.api_key) => keys.push(a.api_key.clone()),
                    Some(_) => {}
                    None => plan.skipped.push(id.clone()),
                }
            }
        }
        None => {
            for activity in book.all() {
                if !keys.contains(&activity.api_key) {
                    keys.push(activity.api_key.clone());
                }
            }
        }
    }

    for key in keys {
        let Some(activity) = book.latest_mut(&key) else {
            continue;
        };
        if activity.status != ActivityStatus::Error {
            if ids.is_some() {
                plan.skipped.push(activity.id.clone());
            }
            continue;
        }

        if activity.retry_count >= policy.max_attempts {
            activity.exhaust(now);
            plan.exhausted.push(activity.id.clone());
        } else {
            activity.begin_retry(now);
            plan.retrying.push(activity.id.clone());
        }
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::{Outcome, MAX_ATTEMPTS_MESSAGE};
    use crate::Phase;

    fn failed(book: &mut ActivityBook, id: &str, key: &str, retries: u32) {
        book.create(id, key, Phase::Master, 0);
        let a = book.get_mut(id).unwrap();
        a.begin(0);
        a.apply(Outcome::error("HTTP 500"), 1);
        a.retry_count = retries;
    }

    #[test]
    fn retries_all_errors_by_default() {
        let mut book = ActivityBook::new();
        failed(&mut book, "a1", "GET_ITEMS", 0);
        failed(&mut book, "a2", "GET_UOM", 1);
        book.create("a3", "GET_LOCATORS", Phase::Master, 0);

        let plan = plan_retry(&mut book, None, &RetryPolicy::default(), 10);
        assert_eq!(plan.retrying, vec!["a1".to_string(), "a2".to_string()]);
        assert!(plan.skipped.is_empty());
        assert_eq!(book.get("a2").unwrap().retry_count, 2);
        assert_eq!(book.get("a3").unwrap().status, ActivityStatus::Pending);
    }

    #[test]
    fn exhausted_move_to_failure() {
        let mut book = ActivityBook::new();
        failed(&mut book, "a1", "GET_ITEMS", MAX_RETRY_ATTEMPTS);

        let plan = plan_retry(&mut book, None, &RetryPolicy::default(), 10);
        assert!(!plan.has_work());
        assert_eq!(plan.exhausted, vec!["a1".to_string()]);

        let a = book.get("a1").unwrap();
        assert_eq!(a.status, ActivityStatus::Failure);
        assert_eq!(a.error.as_deref(), Some(MAX_ATTEMPTS_MESSAGE));
        assert_eq!(a.retry_count, MAX_RETRY_ATTEMPTS);

        // Terminal: a second request finds nothing to do.
        let plan = plan_retry(&mut book, None, &RetryPolicy::default(), 11);
        assert_eq!(plan, RetryPlan::default());
    }

    #[test]
    fn named_ids_resolve_to_latest_instance() {
        let mut book = ActivityBook::new();
        failed(&mut book, "old", "GET_ITEMS", 0);
        failed(&mut book, "new", "GET_ITEMS", 1);

        let plan = plan_retry(
            &mut book,
            Some(&["old".to_string()]),
            &RetryPolicy::default(),
            10,
        );
        assert_eq!(plan.retrying, vec!["new".to_string()]);
        assert_eq!(book.get("old").unwrap().status, ActivityStatus::Error);
    }

    #[test]
    fn named_non_failed_are_skipped() {
        let mut book = ActivityBook::new();
        book.create("a1", "GET_ITEMS", Phase::Master, 0);

        let plan = plan_retry(
            &mut book,
            Some(&["a1".to_string(), "missing".to_string()]),
            &RetryPolicy::default(),
            10,
        );
        assert!(!plan.has_work());
        assert_eq!(plan.skipped, vec!["missing".to_string(), "a1".to_string()]);
    }
}
