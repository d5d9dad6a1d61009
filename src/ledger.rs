//! Append-only log of check state changes.
//!
//! The ledger is the only persisted state of the check state machine: a
//! check's current state is the target of its most recent transition, or
//! `pending` when it has none.
//!
//! Guarantees:
//! - `sort_key` is strictly increasing per check, even across `pop_latest`.
//! - Exactly one transition per check carries `most_recent = true`; the flag
//!   moves in the same locked step that appends or removes a transition.
//! - `append` is compare-and-append: it fails when the check's current state
//!   is not the one the caller based its decision on.

use crate::checks::CheckId;
use crate::state::CheckState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::collections::HashMap;
use std::io::Write;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

/// Frames kept from a captured backtrace.
pub const MAX_BACKTRACE_FRAMES: usize = 12;
/// Bytes kept from a captured backtrace.
pub const MAX_BACKTRACE_BYTES: usize = 4096;

/// Errors surfaced by ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Another transition landed first.
    #[error("check {check_id} is {actual}, expected {expected}")]
    StaleState {
        /// Check being transitioned.
        check_id: CheckId,
        /// State the caller observed.
        expected: CheckState,
        /// State recorded in the ledger.
        actual: CheckState,
    },
    /// `pop_latest` on a check without transitions.
    #[error("check {0} has no transitions")]
    NoTransitions(CheckId),
    /// A writer panicked while holding the ledger lock.
    #[error("transition ledger lock poisoned")]
    Poisoned,
    /// Export target failed.
    #[error("ledger export failed: {0}")]
    Io(#[from] std::io::Error),
    /// Export serialization failed.
    #[error("ledger serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Cause of a `failed` transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Error kind (type or variant name).
    pub error_type: String,
    /// Display form of the error.
    pub message: String,
    /// Leading frames of the captured backtrace, if any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub backtrace: Vec<String>,
}

impl FailureRecord {
    /// Builds a record, truncating `backtrace` to the frame and byte limits.
    pub fn new(error_type: impl Into<String>, message: impl Into<String>, backtrace: &str) -> Self {
        Self {
            error_type: error_type.into(),
            message: message.into(),
            backtrace: truncate_backtrace(backtrace),
        }
    }

    /// Captures the current backtrace (when `RUST_BACKTRACE` enables it).
    pub fn capture(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        let backtrace = Backtrace::capture();
        let rendered = match backtrace.status() {
            BacktraceStatus::Captured => backtrace.to_string(),
            _ => String::new(),
        };
        Self::new(error_type, message, &rendered)
    }

    /// Record for a panic payload caught with `catch_unwind`.
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|message| message.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "panic with non-string payload".to_string());
        Self::capture("panic", message)
    }
}

fn truncate_backtrace(backtrace: &str) -> Vec<String> {
    let mut frames = Vec::new();
    let mut budget = MAX_BACKTRACE_BYTES;
    for line in backtrace.lines().map(str::trim).filter(|line| !line.is_empty()) {
        if frames.len() == MAX_BACKTRACE_FRAMES || line.len() > budget {
            break;
        }
        budget -= line.len();
        frames.push(line.to_string());
    }
    frames
}

/// Data attached to a transition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionMetadata {
    /// Set on `failed` transitions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureRecord>,
    /// Free-form cause, e.g. which requirement aborted a check.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl TransitionMetadata {
    /// Metadata carrying a failure.
    pub fn failure(record: FailureRecord) -> Self {
        Self {
            failure: Some(record),
            reason: None,
        }
    }

    /// Metadata carrying a reason.
    pub fn reason(reason: impl Into<String>) -> Self {
        Self {
            failure: None,
            reason: Some(reason.into()),
        }
    }
}

/// One recorded state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckTransition {
    /// Check that changed state.
    pub check_id: CheckId,
    /// State entered.
    pub to_state: CheckState,
    /// Per-check ordering key.
    pub sort_key: u64,
    /// True only on the check's latest transition.
    pub most_recent: bool,
    /// Attached data.
    pub metadata: TransitionMetadata,
    /// Wall-clock time of the append.
    pub created_at: DateTime<Utc>,
}

/// Storage for check transitions.
pub trait TransitionLedger: Send + Sync {
    /// Appends `to_state` for `check_id` if its current state is still `expected`.
    fn append(
        &self,
        check_id: CheckId,
        expected: CheckState,
        to_state: CheckState,
        metadata: TransitionMetadata,
    ) -> Result<CheckTransition, LedgerError>;

    /// Removes the latest transition and marks the previous one most recent.
    fn pop_latest(&self, check_id: CheckId) -> Result<CheckTransition, LedgerError>;

    /// Transitions of one check, oldest first.
    fn history(&self, check_id: CheckId) -> Vec<CheckTransition>;

    /// Latest transition of one check.
    fn latest(&self, check_id: CheckId) -> Option<CheckTransition>;

    /// Every transition in append order.
    fn all(&self) -> Vec<CheckTransition>;

    /// Current state; `pending` for a check without transitions.
    fn current_state(&self, check_id: CheckId) -> CheckState {
        self.latest(check_id)
            .map_or(CheckState::Pending, |transition| transition.to_state)
    }

    /// Writes every transition as one JSON object per line.
    fn export_jsonl(&self, writer: &mut dyn Write) -> Result<usize, LedgerError> {
        let transitions = self.all();
        for transition in &transitions {
            serde_json::to_writer(&mut *writer, transition)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(transitions.len())
    }
}

#[derive(Debug, Default)]
struct LedgerState {
    entries: Vec<CheckTransition>,
    next_key: HashMap<CheckId, u64>,
}

impl LedgerState {
    fn latest_index(&self, check_id: CheckId) -> Option<usize> {
        self.entries
            .iter()
            .rposition(|entry| entry.check_id == check_id && entry.most_recent)
    }
}

/// In-process ledger guarded by a single mutex.
#[derive(Debug, Default)]
pub struct MemoryTransitionLedger {
    state: Mutex<LedgerState>,
}

impl MemoryTransitionLedger {
    /// Constructs an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total transitions stored.
    pub fn len(&self) -> usize {
        self.lock().map(|state| state.entries.len()).unwrap_or(0)
    }

    /// True when nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, LedgerState>, LedgerError> {
        self.state.lock().map_err(|_| LedgerError::Poisoned)
    }
}

impl TransitionLedger for MemoryTransitionLedger {
    fn append(
        &self,
        check_id: CheckId,
        expected: CheckState,
        to_state: CheckState,
        metadata: TransitionMetadata,
    ) -> Result<CheckTransition, LedgerError> {
        let mut state = self.lock()?;
        let previous = state.latest_index(check_id);
        let actual = previous.map_or(CheckState::Pending, |index| state.entries[index].to_state);
        if actual != expected {
            return Err(LedgerError::StaleState {
                check_id,
                expected,
                actual,
            });
        }

        let key = state.next_key.entry(check_id).or_insert(0);
        *key += 1;
        let sort_key = *key;

        if let Some(index) = previous {
            state.entries[index].most_recent = false;
        }
        let transition = CheckTransition {
            check_id,
            to_state,
            sort_key,
            most_recent: true,
            metadata,
            created_at: Utc::now(),
        };
        state.entries.push(transition.clone());
        Ok(transition)
    }

    fn pop_latest(&self, check_id: CheckId) -> Result<CheckTransition, LedgerError> {
        let mut state = self.lock()?;
        let index = state
            .latest_index(check_id)
            .ok_or(LedgerError::NoTransitions(check_id))?;
        let mut removed = state.entries.remove(index);
        if let Some(previous) = state
            .entries
            .iter_mut()
            .rev()
            .find(|entry| entry.check_id == check_id)
        {
            previous.most_recent = true;
        }
        removed.most_recent = false;
        Ok(removed)
    }

    fn history(&self, check_id: CheckId) -> Vec<CheckTransition> {
        self.lock()
            .map(|state| {
                state
                    .entries
                    .iter()
                    .filter(|entry| entry.check_id == check_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn latest(&self, check_id: CheckId) -> Option<CheckTransition> {
        let state = self.lock().ok()?;
        state
            .latest_index(check_id)
            .map(|index| state.entries[index].clone())
    }

    fn all(&self) -> Vec<CheckTransition> {
        self.lock()
            .map(|state| state.entries.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn walk(ledger: &MemoryTransitionLedger, check: CheckId, states: &[CheckState]) {
        let mut current = CheckState::Pending;
        for state in states {
            ledger
                .append(check, current, *state, TransitionMetadata::default())
                .expect("append");
            current = *state;
        }
    }

    fn most_recent_count(ledger: &MemoryTransitionLedger, check: CheckId) -> usize {
        ledger
            .history(check)
            .iter()
            .filter(|transition| transition.most_recent)
            .count()
    }

    #[test]
    fn current_state_defaults_to_pending() {
        let ledger = MemoryTransitionLedger::new();
        assert_eq!(ledger.current_state(CheckId::new()), CheckState::Pending);
        assert!(ledger.is_empty());
    }

    #[test]
    fn append_keeps_one_most_recent_and_increasing_keys() {
        let ledger = MemoryTransitionLedger::new();
        let check = CheckId::new();
        let other = CheckId::new();
        walk(&ledger, check, &[CheckState::Ready, CheckState::Running, CheckState::Completed]);
        walk(&ledger, other, &[CheckState::Blocked]);

        let history = ledger.history(check);
        let keys: Vec<u64> = history.iter().map(|transition| transition.sort_key).collect();
        assert_eq!(keys, vec![1, 2, 3]);
        assert_eq!(most_recent_count(&ledger, check), 1);
        assert_eq!(most_recent_count(&ledger, other), 1);
        assert_eq!(ledger.current_state(check), CheckState::Completed);
        assert_eq!(ledger.current_state(other), CheckState::Blocked);
    }

    #[test]
    fn stale_append_is_rejected() {
        let ledger = MemoryTransitionLedger::new();
        let check = CheckId::new();
        walk(&ledger, check, &[CheckState::Ready]);
        let err = ledger
            .append(check, CheckState::Pending, CheckState::Blocked, TransitionMetadata::default())
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::StaleState {
                actual: CheckState::Ready,
                ..
            }
        ));
        assert_eq!(ledger.history(check).len(), 1);
    }

    #[test]
    fn pop_latest_restores_previous_flag_and_keeps_keys_increasing() {
        let ledger = MemoryTransitionLedger::new();
        let check = CheckId::new();
        walk(&ledger, check, &[CheckState::Ready, CheckState::Running]);

        let popped = ledger.pop_latest(check).expect("pop");
        assert_eq!(popped.to_state, CheckState::Running);
        assert_eq!(ledger.current_state(check), CheckState::Ready);
        assert_eq!(most_recent_count(&ledger, check), 1);

        let again = ledger
            .append(check, CheckState::Ready, CheckState::Running, TransitionMetadata::default())
            .expect("append");
        assert_eq!(again.sort_key, 3);

        ledger.pop_latest(check).expect("pop");
        ledger.pop_latest(check).expect("pop");
        assert_eq!(most_recent_count(&ledger, check), 0);
        assert!(matches!(
            ledger.pop_latest(check),
            Err(LedgerError::NoTransitions(_))
        ));
    }

    #[test]
    fn export_writes_one_line_per_transition() {
        let ledger = MemoryTransitionLedger::new();
        let check = CheckId::new();
        walk(&ledger, check, &[CheckState::Ready, CheckState::Running]);
        ledger
            .append(
                check,
                CheckState::Running,
                CheckState::Failed,
                TransitionMetadata::failure(FailureRecord::new("io", "boom", "")),
            )
            .expect("append");

        let mut buffer = Vec::new();
        assert_eq!(ledger.export_jsonl(&mut buffer).expect("export"), 3);
        let text = String::from_utf8(buffer).expect("utf8");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        let last: CheckTransition = serde_json::from_str(lines[2]).expect("json");
        assert_eq!(last.to_state, CheckState::Failed);
        assert_eq!(
            last.metadata.failure.map(|failure| failure.message),
            Some("boom".to_string())
        );
    }

    #[test]
    fn backtraces_are_truncated() {
        let long: String = (0..40).map(|frame| format!("{frame}: frame\n")).collect();
        assert_eq!(FailureRecord::new("e", "m", &long).backtrace.len(), MAX_BACKTRACE_FRAMES);

        let wide = format!("{}\n{}\n", "a".repeat(4000), "b".repeat(200));
        assert_eq!(FailureRecord::new("e", "m", &wide).backtrace.len(), 1);
    }

    #[test]
    fn panic_payloads_become_records() {
        let payload = std::panic::catch_unwind(|| panic!("exploded")).unwrap_err();
        let record = FailureRecord::from_panic(payload.as_ref());
        assert_eq!(record.error_type, "panic");
        assert_eq!(record.message, "exploded");
    }
}
