//! Structured observability hooks for reconciliation events.
//!
//! This module provides:
//! - A refresh-cycle tracing span via [`refresh_span`]
//! - Emission functions for structural warnings, refresh cycles, gateway calls
//!   and suggestion-cache decisions
//!
//! Every event carries a stable `event = "..."` field so log pipelines can
//! filter on it. Verbosity follows `ORBTREE_LOG`; set `--json` on the CLI for
//! newline-delimited JSON.

use tracing::{debug, info, warn};

/// Span covering one CI refresh cycle.
///
/// Attach it with `Instrument::instrument` rather than entering it, because
/// a cycle awaits fetches while the span is active.
///
/// # Example
///
/// ```ignore
/// cache.run_cycle(..).instrument(refresh_span(7, false)).await;
/// // every event inside the cycle is tagged cycle = 7
/// ```
pub fn refresh_span(cycle: u64, forced: bool) -> tracing::Span {
    tracing::info_span!("orbtree.refresh", cycle = cycle, forced = forced)
}

/// Emit event: a parent-link cycle was broken by re-rooting one branch.
pub fn emit_cycle_broken(repo: &str, members: &[String], detached: &str) {
    warn!(
        event = "hierarchy.cycle_broken",
        repo = %repo,
        members = ?members,
        detached = %detached,
    );
}

/// Emit event: a branch whose parent was never observed was attached to the root.
pub fn emit_orphan_attached(repo: &str, branch: &str, parent: &str) {
    warn!(
        event = "hierarchy.orphan_attached",
        repo = %repo,
        branch = %branch,
        parent = %parent,
    );
}

/// Emit event: two records named the same branch.
pub fn emit_duplicate_branch(repo: &str, branch: &str) {
    warn!(event = "hierarchy.duplicate_branch", repo = %repo, branch = %branch);
}

/// Emit event: a CI refresh cycle completed.
pub fn emit_refresh_finished(fetched: usize, failed: usize, deferred: usize, duration_ms: u64) {
    info!(
        event = "ci_cache.refresh_finished",
        fetched = fetched,
        failed = failed,
        deferred = deferred,
        duration_ms = duration_ms,
    );
}

/// Emit event: a single CI fetch failed and was degraded to `unknown`.
pub fn emit_ci_fetch_failed(pr: &str, error: &dyn std::fmt::Display) {
    warn!(event = "ci_cache.fetch_failed", pr = %pr, error = %error);
}

/// Emit event: an advisory gateway call finished.
pub fn emit_gateway_call(digest: &str, attempt: u32, duration_ms: u64, ok: bool) {
    info!(
        event = "advisory.gateway_call",
        digest = %digest,
        attempt = attempt,
        duration_ms = duration_ms,
        ok = ok,
    );
}

/// Emit event: how a suggestion request was served (`hit`, `joined`, `miss`).
pub fn emit_suggestion_cache(digest: &str, outcome: &str) {
    debug!(event = "advisory.cache", digest = %digest, outcome = %outcome);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_span_create() {
        let _entered = refresh_span(1, true).entered();
        emit_refresh_finished(1, 0, 0, 5);
    }
}
