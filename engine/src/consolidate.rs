//! Consolidation of activities into one reporting record per endpoint.

use crate::{Activity, ActivityStatus, ApiKey, Phase, Timestamp};
use serde::{Deserialize, Serialize};

/// Reporting-level view of every attempt of one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidatedRecord {
    pub api_key: ApiKey,
    pub phase: Phase,
    /// Status of the latest attempt
    pub status: ActivityStatus,
    pub records_total: u64,
    pub records_inserted: u64,
    /// Error of the latest attempt, if any
    pub error: Option<String>,
    pub retry_count: u32,
    /// Number of attempts seen
    pub attempts: usize,
    pub can_expand: bool,
    pub last_updated: Timestamp,
}

/// Group activities by endpoint, in order of first appearance.
///
/// Counts come from the most recent successful attempt, falling back to the
/// most recent attempt overall. Activities are expected in creation order;
/// later entries are considered more recent on equal timestamps.
pub fn consolidate(activities: &[Activity]) -> Vec<ConsolidatedRecord> {
    let mut keys: Vec<&str> = Vec::new();
    for activity in activities {
        if !keys.contains(&activity.api_key.as_str()) {
            keys.push(&activity.api_key);
        }
    }

    keys.into_iter()
        .filter_map(|key| {
            let group: Vec<(usize, &Activity)> = activities
                .iter()
                .enumerate()
                .filter(|(_, a)| a.api_key == key)
                .collect();
            consolidate_group(&group)
        })
        .collect()
}

fn recency(index: usize, activity: &Activity) -> (Timestamp, usize) {
    let touched = activity
        .ended_at
        .into_iter()
        .chain(activity.last_retry_at)
        .chain(activity.started_at)
        .max()
        .unwrap_or(activity.created_at)
        .max(activity.created_at);
    (touched, index)
}

fn consolidate_group(group: &[(usize, &Activity)]) -> Option<ConsolidatedRecord> {
    let &(_, latest) = group.iter().max_by_key(|(i, a)| recency(*i, a))?;
    let source = group
        .iter()
        .filter(|(_, a)| a.status == ActivityStatus::Success)
        .max_by_key(|(i, a)| recency(*i, a))
        .map(|&(_, a)| a)
        .unwrap_or(latest);

    let can_expand = group
        .iter()
        .any(|(_, a)| a.status.is_failed() || a.is_partial());

    Some(ConsolidatedRecord {
        api_key: latest.api_key.clone(),
        phase: latest.phase,
        status: latest.status,
        records_total: source.records_total,
        records_inserted: source.records_inserted,
        error: latest.error.clone(),
        retry_count: latest.retry_count,
        attempts: group.len(),
        can_expand,
        last_updated: recency(0, latest).0,
    })
}
