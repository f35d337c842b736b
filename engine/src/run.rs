//! Sync run state.

use crate::Phase;
use serde::{Deserialize, Serialize};

/// State of the current (or last) sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", content = "phase", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    #[default]
    Idle,
    Running(Phase),
    /// Every phase ran
    Completed,
    /// A phase gate stopped the run
    PartiallyCompleted,
    /// Cancelled by the user
    Aborted,
}

impl RunState {
    pub fn is_running(&self) -> bool {
        matches!(self, RunState::Running(_))
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::PartiallyCompleted | RunState::Aborted
        )
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Idle => write!(f, "IDLE"),
            RunState::Running(phase) => write!(f, "RUNNING({})", phase),
            RunState::Completed => write!(f, "COMPLETED"),
            RunState::PartiallyCompleted => write!(f, "PARTIALLY_COMPLETED"),
            RunState::Aborted => write!(f, "ABORTED"),
        }
    }
}
