//! Structured tracing events for crawl and audit lifecycles.
//!
//! Every event carries an `event` field (`crawl.page_fetched`,
//! `check.transition`, ...) so JSON logs can be filtered on it. Verbosity
//! follows `RUST_LOG`; see [`crate::telemetry::init_tracing`].

use crate::checks::CheckId;
use crate::state::CheckState;
use tracing::{debug, info, warn};

/// RAII guard that tags everything logged while an audit runs with its id.
pub struct AuditSpan {
    _span: tracing::span::EnteredSpan,
}

impl AuditSpan {
    /// Creates and enters the span.
    pub fn enter(audit_id: &str, root: &str) -> Self {
        let span = tracing::info_span!("a11ycrawl.audit", audit_id = %audit_id, root = %root);
        Self {
            _span: span.entered(),
        }
    }
}

/// A crawled page was fetched and parsed.
pub fn emit_page_fetched(url: &str, headings: usize, queued: usize) {
    debug!(event = "crawl.page_fetched", url = %url, headings, queued);
}

/// A crawled page was skipped after a fetch or parse failure.
pub fn emit_page_skipped(url: &str, error: &dyn std::fmt::Display) {
    warn!(event = "crawl.page_skipped", url = %url, error = %error);
}

/// A crawl stopped.
pub fn emit_crawl_finished(root: &str, pages_visited: usize, found: bool) {
    info!(event = "crawl.finished", root = %root, pages_visited, found);
}

/// A transition was recorded in the ledger.
pub fn emit_transition_appended(
    check_id: CheckId,
    kind: &str,
    from: CheckState,
    to: CheckState,
    sort_key: u64,
) {
    info!(
        event = "check.transition",
        check_id = %check_id,
        kind = %kind,
        from = %from,
        to = %to,
        sort_key,
    );
}

/// A guarded transition was refused.
pub fn emit_guard_failed(check_id: CheckId, kind: &str, error: &dyn std::fmt::Display) {
    debug!(event = "check.guard_failed", check_id = %check_id, kind = %kind, error = %error);
}

/// A check's analysis raised.
pub fn emit_check_failed(check_id: CheckId, kind: &str, error_type: &str, message: &str) {
    warn!(
        event = "check.failed",
        check_id = %check_id,
        kind = %kind,
        error_type = %error_type,
        message = %message,
    );
}

/// The audit driver stopped.
pub fn emit_audit_finished(audit_id: &str, duration_ms: u64, completed: usize, finished: bool) {
    info!(
        event = "audit.finished",
        audit_id = %audit_id,
        duration_ms,
        completed,
        finished,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emitters_do_not_panic_without_subscriber() {
        let _span = AuditSpan::enter("audit-1", "https://site.test/");
        emit_page_fetched("https://site.test/", 3, 2);
        emit_page_skipped("https://site.test/x/", &"status 404");
        emit_crawl_finished("https://site.test/", 2, true);
        emit_transition_appended(CheckId::new(), "reachable", CheckState::Pending, CheckState::Ready, 1);
        emit_guard_failed(CheckId::new(), "audit_date", &"1 requirement(s) not completed");
        emit_check_failed(CheckId::new(), "reachable", "fetch_error", "timeout");
        emit_audit_finished("audit-1", 12, 6, true);
    }
}
