//! Audits, the ledger-backed check state machine, and the serial driver that
//! runs an audit's checks in priority order.

use crate::checks::{AnalysisContext, AnalysisError, Check, CheckData, CheckId, CheckKind};
use crate::controls::AuditControls;
use crate::fetcher::Fetcher;
use crate::ledger::{
    CheckTransition, FailureRecord, LedgerError, TransitionLedger, TransitionMetadata,
};
use crate::link::Link;
use crate::obs;
use crate::state::{next_state, CheckState, Guard, TransitionError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier of an audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuditId(Uuid);

impl AuditId {
    /// Fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AuditId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AuditId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Errors raised while building or driving an audit.
#[derive(Debug, Error)]
pub enum AuditError {
    /// The requested edge is invalid or its guard failed.
    #[error(transparent)]
    Transition(#[from] TransitionError),
    /// The ledger rejected the append.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    /// No check with this id belongs to the audit.
    #[error("check {0} does not belong to this audit")]
    UnknownCheck(CheckId),
    /// A kind requires another kind the audit does not run.
    #[error("{kind} requires {requirement}, which the audit does not include")]
    MissingRequirement {
        /// Dependent kind.
        kind: CheckKind,
        /// Absent requirement.
        requirement: CheckKind,
    },
    /// A kind was listed twice.
    #[error("{0} is listed more than once")]
    DuplicateKind(CheckKind),
    /// The audit does not run this kind.
    #[error("audit has no {0} check")]
    NoSuchKind(CheckKind),
    /// Only terminal checks can be superseded.
    #[error("{kind} is {state}; only terminal checks can be superseded")]
    NotTerminal {
        /// Kind asked for.
        kind: CheckKind,
        /// Its current state.
        state: CheckState,
    },
}

impl AuditError {
    /// True for guard failures, which the caller should retry later.
    pub fn is_guard_failure(&self) -> bool {
        matches!(self, AuditError::Transition(err) if err.is_retryable())
    }
}

/// A site under audit and the checks it owns, ordered by priority.
#[derive(Debug, Clone)]
pub struct Audit {
    id: AuditId,
    root: Link,
    checks: Vec<Check>,
    superseded: Vec<Check>,
}

impl Audit {
    /// Audit running the full battery.
    pub fn new(root: Link) -> Self {
        Self {
            id: AuditId::new(),
            root,
            checks: CheckKind::ALL.into_iter().map(Check::new).collect(),
            superseded: Vec::new(),
        }
    }

    /// Audit running only `kinds`; every requirement must be included.
    pub fn with_kinds<I>(root: Link, kinds: I) -> Result<Self, AuditError>
    where
        I: IntoIterator<Item = CheckKind>,
    {
        let mut kinds: Vec<CheckKind> = kinds.into_iter().collect();
        kinds.sort_by_key(|kind| kind.priority());
        for pair in kinds.windows(2) {
            if pair[0] == pair[1] {
                return Err(AuditError::DuplicateKind(pair[0]));
            }
        }
        for kind in &kinds {
            if let Some(requirement) = kind
                .requirements()
                .iter()
                .find(|requirement| !kinds.contains(requirement))
            {
                return Err(AuditError::MissingRequirement {
                    kind: *kind,
                    requirement: *requirement,
                });
            }
        }
        Ok(Self {
            id: AuditId::new(),
            root,
            checks: kinds.into_iter().map(Check::new).collect(),
            superseded: Vec::new(),
        })
    }

    /// Audit id.
    pub fn id(&self) -> AuditId {
        self.id
    }

    /// Homepage being audited.
    pub fn root(&self) -> &Link {
        &self.root
    }

    /// Active checks in priority order.
    pub fn checks(&self) -> &[Check] {
        &self.checks
    }

    /// Checks replaced through [`Audit::supersede`], oldest first.
    pub fn superseded(&self) -> &[Check] {
        &self.superseded
    }

    /// Active check of `kind`.
    pub fn check(&self, kind: CheckKind) -> Option<&Check> {
        self.checks.iter().find(|check| check.kind() == kind)
    }

    /// Active check with `id`.
    pub fn check_by_id(&self, id: CheckId) -> Option<&Check> {
        self.checks.iter().find(|check| check.id() == id)
    }

    fn check_mut(&mut self, id: CheckId) -> Option<&mut Check> {
        self.checks.iter_mut().find(|check| check.id() == id)
    }

    /// Ids of the active checks `check` requires.
    pub fn requirements_of(&self, check: &Check) -> Vec<CheckId> {
        check
            .kind()
            .requirements()
            .iter()
            .filter_map(|kind| self.check(*kind).map(Check::id))
            .collect()
    }

    /// Replaces the terminal check of `kind` with a fresh pending instance.
    ///
    /// The old instance keeps its ledger history and moves to
    /// [`Audit::superseded`]. Returns the new instance's id.
    pub fn supersede(
        &mut self,
        kind: CheckKind,
        ledger: &dyn TransitionLedger,
    ) -> Result<CheckId, AuditError> {
        let index = self
            .checks
            .iter()
            .position(|check| check.kind() == kind)
            .ok_or(AuditError::NoSuchKind(kind))?;
        let state = ledger.current_state(self.checks[index].id());
        if !state.is_terminal() {
            return Err(AuditError::NotTerminal { kind, state });
        }
        let fresh = Check::new(kind);
        let id = fresh.id();
        let old = std::mem::replace(&mut self.checks[index], fresh);
        self.superseded.push(old);
        Ok(id)
    }
}

/// Notification hook invoked by the state machine.
pub trait AuditObserver {
    /// Called synchronously inside the `completed` transition, after the
    /// transition is recorded.
    fn on_check_completed(&self, _audit: &Audit, _check: &Check) {}

    /// Called once the driver can make no further progress.
    fn on_audit_finished(&self, _audit: &Audit, _report: &AuditReport) {}
}

/// Observer that ignores every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl AuditObserver for NoopObserver {}

/// Applies guarded transitions to an audit's checks and records them in a ledger.
pub struct CheckStateMachine<'a> {
    ledger: &'a dyn TransitionLedger,
    observer: &'a dyn AuditObserver,
}

impl<'a> CheckStateMachine<'a> {
    /// Machine writing to `ledger` and notifying `observer`.
    pub fn new(ledger: &'a dyn TransitionLedger, observer: &'a dyn AuditObserver) -> Self {
        Self { ledger, observer }
    }

    /// Current state of `check`.
    pub fn state(&self, check: &Check) -> CheckState {
        self.ledger.current_state(check.id())
    }

    /// Snapshot of `check`'s requirement states.
    pub fn guard_for(&self, audit: &Audit, check: &Check) -> Guard {
        Guard::from_requirements(
            audit
                .requirements_of(check)
                .into_iter()
                .map(|id| self.ledger.current_state(id)),
        )
    }

    /// Moves `check_id` to `target` if the edge exists and its guard holds.
    pub fn transition_to(
        &self,
        audit: &Audit,
        check_id: CheckId,
        target: CheckState,
        metadata: TransitionMetadata,
    ) -> Result<CheckTransition, AuditError> {
        let check = audit
            .check_by_id(check_id)
            .ok_or(AuditError::UnknownCheck(check_id))?;
        let current = self.state(check);
        let guard = self.guard_for(audit, check);
        let target = match next_state(current, target, &guard) {
            Ok(target) => target,
            Err(err) => {
                if err.is_retryable() {
                    obs::emit_guard_failed(check_id, check.kind().as_str(), &err);
                }
                return Err(err.into());
            }
        };

        let transition = self.ledger.append(check_id, current, target, metadata)?;
        obs::emit_transition_appended(check_id, check.kind().as_str(), current, target, transition.sort_key);
        if target == CheckState::Completed {
            self.observer.on_check_completed(audit, check);
        }
        Ok(transition)
    }

    /// Runs a `ready` check: `running`, then `completed` with its result or
    /// `failed` with the captured error. Panics inside the analysis are
    /// caught and recorded like errors.
    pub fn execute(
        &self,
        audit: &mut Audit,
        check_id: CheckId,
        fetcher: &dyn Fetcher,
        controls: &AuditControls,
    ) -> Result<CheckState, AuditError> {
        self.transition_to(audit, check_id, CheckState::Running, TransitionMetadata::default())?;
        let kind = audit
            .check_by_id(check_id)
            .map(Check::kind)
            .ok_or(AuditError::UnknownCheck(check_id))?;

        let outcome = {
            let context = AnalysisContext::new(audit, fetcher, controls);
            panic::catch_unwind(AssertUnwindSafe(|| kind.analyze(&context)))
        };

        match outcome {
            Ok(Ok(data)) => {
                if let Some(check) = audit.check_mut(check_id) {
                    check.set_data(data);
                }
                self.transition_to(audit, check_id, CheckState::Completed, TransitionMetadata::default())?;
                Ok(CheckState::Completed)
            }
            Ok(Err(err)) => self.fail(audit, check_id, kind, failure_from(&err)),
            Err(payload) => self.fail(audit, check_id, kind, FailureRecord::from_panic(payload.as_ref())),
        }
    }

    fn fail(
        &self,
        audit: &Audit,
        check_id: CheckId,
        kind: CheckKind,
        record: FailureRecord,
    ) -> Result<CheckState, AuditError> {
        obs::emit_check_failed(check_id, kind.as_str(), &record.error_type, &record.message);
        self.transition_to(audit, check_id, CheckState::Failed, TransitionMetadata::failure(record))?;
        Ok(CheckState::Failed)
    }
}

fn failure_from(err: &AnalysisError) -> FailureRecord {
    FailureRecord::capture(err.error_type(), err.to_string())
}

/// Per-check line of an [`AuditReport`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckReport {
    /// Check instance.
    pub id: CheckId,
    /// Kind.
    pub kind: CheckKind,
    /// Final state.
    pub state: CheckState,
    /// Result, for completed checks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<CheckData>,
    /// Cause, for failed checks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureRecord>,
    /// Reason, for aborted checks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Transitions recorded for the check.
    pub transitions: usize,
}

/// Outcome of driving an audit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditReport {
    /// Audit id.
    pub audit_id: AuditId,
    /// Audited homepage.
    pub root_url: String,
    /// True when every check reached a terminal state.
    pub finished: bool,
    /// Checks in priority order.
    pub checks: Vec<CheckReport>,
    /// Wall time spent driving the audit.
    pub duration_ms: u64,
}

impl AuditReport {
    /// Line for `kind`.
    pub fn check(&self, kind: CheckKind) -> Option<&CheckReport> {
        self.checks.iter().find(|check| check.kind == kind)
    }

    /// Number of checks in `state`.
    pub fn count(&self, state: CheckState) -> usize {
        self.checks.iter().filter(|check| check.state == state).count()
    }
}

/// Drives an audit to completion, one check at a time.
///
/// At most one check is `running` at any moment. After every completed check
/// the scan restarts from the highest priority so blocked dependents are
/// retried. Checks whose requirement failed are aborted.
pub struct Auditor<'a> {
    fetcher: &'a dyn Fetcher,
    ledger: &'a dyn TransitionLedger,
    controls: AuditControls,
    observer: &'a dyn AuditObserver,
}

impl<'a> Auditor<'a> {
    /// Driver with default controls and no observer.
    pub fn new(fetcher: &'a dyn Fetcher, ledger: &'a dyn TransitionLedger) -> Self {
        Self {
            fetcher,
            ledger,
            controls: AuditControls::default(),
            observer: &NoopObserver,
        }
    }

    /// Replaces the controls.
    pub fn with_controls(mut self, controls: AuditControls) -> Self {
        self.controls = controls;
        self
    }

    /// Installs a notification hook.
    pub fn with_observer(mut self, observer: &'a dyn AuditObserver) -> Self {
        self.observer = observer;
        self
    }

    /// Runs every runnable check of `audit` and reports the outcome.
    pub fn run(&self, audit: &mut Audit) -> Result<AuditReport, AuditError> {
        let _span = obs::AuditSpan::enter(&audit.id().to_string(), audit.root().href());
        let started = Instant::now();
        let machine = CheckStateMachine::new(self.ledger, self.observer);

        while self.step(&machine, audit)? {}

        let report = self.report(audit, started);
        obs::emit_audit_finished(
            &audit.id().to_string(),
            report.duration_ms,
            report.count(CheckState::Completed),
            report.finished,
        );
        self.observer.on_audit_finished(audit, &report);
        Ok(report)
    }

    /// Makes one unit of progress; false when nothing can move.
    fn step(&self, machine: &CheckStateMachine<'_>, audit: &mut Audit) -> Result<bool, AuditError> {
        let ids: Vec<CheckId> = audit.checks().iter().map(Check::id).collect();
        let mut progressed = false;

        for id in ids {
            let Some(check) = audit.check_by_id(id) else {
                continue;
            };
            let state = machine.state(check);
            let guard = machine.guard_for(audit, check);

            match state {
                CheckState::Pending | CheckState::Blocked if guard.any_dead_end() => {
                    let reason = self.dead_requirement(machine, audit, id);
                    machine.transition_to(audit, id, CheckState::Aborted, TransitionMetadata::reason(reason))?;
                    progressed = true;
                }
                CheckState::Pending | CheckState::Blocked => {
                    match machine.transition_to(audit, id, CheckState::Ready, TransitionMetadata::default()) {
                        Ok(_) => {
                            machine.execute(audit, id, self.fetcher, &self.controls)?;
                            return Ok(true);
                        }
                        Err(err) if err.is_guard_failure() && state == CheckState::Pending => {
                            machine.transition_to(audit, id, CheckState::Blocked, TransitionMetadata::default())?;
                            progressed = true;
                        }
                        Err(err) if err.is_guard_failure() => {}
                        Err(err) => return Err(err),
                    }
                }
                CheckState::Ready => {
                    machine.execute(audit, id, self.fetcher, &self.controls)?;
                    return Ok(true);
                }
                CheckState::Running
                | CheckState::Failed
                | CheckState::Completed
                | CheckState::Aborted => {}
            }
        }
        Ok(progressed)
    }

    fn dead_requirement(&self, machine: &CheckStateMachine<'_>, audit: &Audit, id: CheckId) -> String {
        audit
            .check_by_id(id)
            .into_iter()
            .flat_map(|check| check.kind().requirements())
            .filter_map(|kind| audit.check(*kind))
            .find(|requirement| machine.state(requirement).is_dead_end())
            .map(|requirement| format!("requirement {} is {}", requirement.kind(), machine.state(requirement)))
            .unwrap_or_else(|| "requirement failed".to_string())
    }

    fn report(&self, audit: &Audit, started: Instant) -> AuditReport {
        let checks: Vec<CheckReport> = audit
            .checks()
            .iter()
            .map(|check| {
                let history = self.ledger.history(check.id());
                let latest = history.last();
                CheckReport {
                    id: check.id(),
                    kind: check.kind(),
                    state: latest.map_or(CheckState::Pending, |transition| transition.to_state),
                    data: check.data().cloned(),
                    failure: latest.and_then(|transition| transition.metadata.failure.clone()),
                    reason: latest.and_then(|transition| transition.metadata.reason.clone()),
                    transitions: history.len(),
                }
            })
            .collect();
        AuditReport {
            audit_id: audit.id(),
            root_url: audit.root().href().to_string(),
            finished: checks.iter().all(|check| check.state.is_terminal()),
            checks,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::MemoryFetcher;
    use crate::ledger::MemoryTransitionLedger;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;

    fn root() -> Link {
        Link::normalize("https://site.test/").expect("valid root")
    }

    #[test]
    fn with_kinds_rejects_missing_requirements_and_duplicates() {
        assert!(matches!(
            Audit::with_kinds(root(), [CheckKind::DeclarationStructure]),
            Err(AuditError::MissingRequirement {
                requirement: CheckKind::DeclarationUrl,
                ..
            })
        ));
        assert!(matches!(
            Audit::with_kinds(root(), [CheckKind::Reachable, CheckKind::Reachable]),
            Err(AuditError::DuplicateKind(CheckKind::Reachable))
        ));
        let audit = Audit::with_kinds(root(), [CheckKind::DeclarationUrl, CheckKind::Reachable])
            .expect("valid audit");
        let kinds: Vec<CheckKind> = audit.checks().iter().map(Check::kind).collect();
        assert_eq!(kinds, vec![CheckKind::Reachable, CheckKind::DeclarationUrl]);
    }

    #[derive(Default)]
    struct Recorder {
        completed: RefCell<Vec<CheckKind>>,
    }

    impl AuditObserver for Recorder {
        fn on_check_completed(&self, audit: &Audit, check: &Check) {
            assert_eq!(audit.check(check.kind()).map(Check::id), Some(check.id()));
            self.completed.borrow_mut().push(check.kind());
        }
    }

    #[test]
    fn observer_sees_each_completion_in_priority_order() {
        let fetcher = MemoryFetcher::new().with_page("https://site.test/", "<title>Home</title>");
        let ledger = MemoryTransitionLedger::new();
        let recorder = Recorder::default();
        let mut audit = Audit::with_kinds(
            root(),
            [CheckKind::AccessibilityMention, CheckKind::Reachable],
        )
        .expect("valid audit");

        let report = Auditor::new(&fetcher, &ledger)
            .with_observer(&recorder)
            .run(&mut audit)
            .expect("audit runs");

        assert!(report.finished);
        assert_eq!(
            *recorder.completed.borrow(),
            vec![CheckKind::Reachable, CheckKind::AccessibilityMention]
        );
    }

    #[test]
    fn supersede_requires_a_terminal_check() {
        let fetcher = MemoryFetcher::new().with_page("https://site.test/", "<title>Home</title>");
        let ledger = MemoryTransitionLedger::new();
        let mut audit = Audit::with_kinds(root(), [CheckKind::Reachable]).expect("valid audit");
        assert!(matches!(
            audit.supersede(CheckKind::Reachable, &ledger),
            Err(AuditError::NotTerminal {
                state: CheckState::Pending,
                ..
            })
        ));

        Auditor::new(&fetcher, &ledger).run(&mut audit).expect("audit runs");
        let old = audit.check(CheckKind::Reachable).map(Check::id).expect("check");
        let fresh = audit.supersede(CheckKind::Reachable, &ledger).expect("superseded");

        assert_ne!(old, fresh);
        assert_eq!(ledger.current_state(old), CheckState::Completed);
        assert_eq!(ledger.current_state(fresh), CheckState::Pending);
        assert_eq!(audit.superseded().len(), 1);

        let report = Auditor::new(&fetcher, &ledger).run(&mut audit).expect("rerun");
        assert_eq!(report.check(CheckKind::Reachable).map(|check| check.id), Some(fresh));
        assert_eq!(report.count(CheckState::Completed), 1);
    }

    #[test]
    fn transition_to_unknown_check_is_rejected() {
        let ledger = MemoryTransitionLedger::new();
        let machine = CheckStateMachine::new(&ledger, &NoopObserver);
        let audit = Audit::new(root());
        assert!(matches!(
            machine.transition_to(&audit, CheckId::new(), CheckState::Ready, TransitionMetadata::default()),
            Err(AuditError::UnknownCheck(_))
        ));
    }
}
