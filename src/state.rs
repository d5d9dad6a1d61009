//! Check lifecycle states and the pure transition function between them.
//!
//! ```text
//! pending ──> ready ──> running ──> completed
//!    │          ^           └─────> failed
//!    ├──> blocked
//!    └──────────┴──> aborted   (a requirement failed or was aborted)
//! ```
//!
//! Nothing here holds state: the current state always comes from the
//! transition ledger and the guard from the sibling checks' states.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Lifecycle state of a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckState {
    /// Created, not yet evaluated.
    Pending,
    /// Every requirement completed; may start.
    Ready,
    /// Waiting on at least one requirement.
    Blocked,
    /// Analysis in progress.
    Running,
    /// Analysis raised; see the transition's failure record.
    Failed,
    /// Analysis produced a result.
    Completed,
    /// A requirement failed or was aborted, so this check can never run.
    Aborted,
}

impl CheckState {
    /// Every state, initial first.
    pub const ALL: [CheckState; 7] = [
        CheckState::Pending,
        CheckState::Ready,
        CheckState::Blocked,
        CheckState::Running,
        CheckState::Failed,
        CheckState::Completed,
        CheckState::Aborted,
    ];

    /// Lowercase name used in logs and exports.
    pub fn as_str(self) -> &'static str {
        match self {
            CheckState::Pending => "pending",
            CheckState::Ready => "ready",
            CheckState::Blocked => "blocked",
            CheckState::Running => "running",
            CheckState::Failed => "failed",
            CheckState::Completed => "completed",
            CheckState::Aborted => "aborted",
        }
    }

    /// No transition leaves a terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CheckState::Failed | CheckState::Completed | CheckState::Aborted
        )
    }

    /// True for states that doom every dependent check.
    pub fn is_dead_end(self) -> bool {
        matches!(self, CheckState::Failed | CheckState::Aborted)
    }

    /// States reachable in one step, ignoring guards.
    pub fn successors(self) -> &'static [CheckState] {
        match self {
            CheckState::Pending => &[CheckState::Ready, CheckState::Blocked, CheckState::Aborted],
            CheckState::Blocked => &[CheckState::Ready, CheckState::Aborted],
            CheckState::Ready => &[CheckState::Running],
            CheckState::Running => &[CheckState::Failed, CheckState::Completed],
            CheckState::Failed | CheckState::Completed | CheckState::Aborted => &[],
        }
    }
}

impl fmt::Display for CheckState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a check's requirement states, read when a guarded transition
/// is attempted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Guard {
    requirements: Vec<CheckState>,
}

impl Guard {
    /// Guard for a check without requirements.
    pub fn none() -> Self {
        Self::default()
    }

    /// Guard over the given requirement states.
    pub fn from_requirements<I>(states: I) -> Self
    where
        I: IntoIterator<Item = CheckState>,
    {
        Self {
            requirements: states.into_iter().collect(),
        }
    }

    /// True when every requirement completed (vacuously true without requirements).
    pub fn all_completed(&self) -> bool {
        self.requirements
            .iter()
            .all(|state| *state == CheckState::Completed)
    }

    /// True when some requirement failed or was aborted.
    pub fn any_dead_end(&self) -> bool {
        self.requirements.iter().any(|state| state.is_dead_end())
    }

    fn pending_count(&self) -> usize {
        self.requirements
            .iter()
            .filter(|state| **state != CheckState::Completed)
            .count()
    }
}

/// Rejected transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    /// The state graph has no such edge.
    #[error("no transition from {from} to {to}")]
    Invalid {
        /// Current state.
        from: CheckState,
        /// Requested state.
        to: CheckState,
    },
    /// The edge exists but its guard does not hold; retry later.
    #[error("guard failed for {from} -> {to}: {reason}")]
    GuardFailed {
        /// Current state.
        from: CheckState,
        /// Requested state.
        to: CheckState,
        /// Human-readable cause.
        reason: String,
    },
}

impl TransitionError {
    /// True for guard failures, which callers are expected to retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransitionError::GuardFailed { .. })
    }
}

/// Validates `current -> target` under `guard` and returns the new state.
pub fn next_state(
    current: CheckState,
    target: CheckState,
    guard: &Guard,
) -> Result<CheckState, TransitionError> {
    if !current.successors().contains(&target) {
        return Err(TransitionError::Invalid {
            from: current,
            to: target,
        });
    }

    match target {
        CheckState::Ready if !guard.all_completed() => Err(TransitionError::GuardFailed {
            from: current,
            to: target,
            reason: format!("{} requirement(s) not completed", guard.pending_count()),
        }),
        CheckState::Aborted if !guard.any_dead_end() => Err(TransitionError::GuardFailed {
            from: current,
            to: target,
            reason: "no requirement failed or aborted".to_string(),
        }),
        _ => Ok(target),
    }
}
