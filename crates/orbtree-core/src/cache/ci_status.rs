//! Per-PR CI status cache with tiered expiry and a budgeted refresh cycle.
//!
//! Entry lifetime depends on the status it holds:
//!
//! | status               | tier   | default |
//! |----------------------|--------|---------|
//! | `pending`            | short  | 300s    |
//! | `passing`/`failing`  | long   | 900s    |
//! | `unknown`            | medium | 600s    |
//!
//! A refresh cycle fetches at most `max_requests_per_cycle` PRs, choosing
//! expired or absent entries and preferring `pending`, then `unknown`, then
//! stable ones. Cycles are single-flight: a call that finds another cycle
//! running returns a skipped report immediately.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Duration;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, warn, Instrument};

use crate::cache::{CacheEntry, Clock};
use crate::domain::model::{CIStatus, Forest, PrKey};
use crate::metrics::METRICS;
use crate::obs::{emit_ci_fetch_failed, emit_refresh_finished, refresh_span};

/// Failure of one CI status fetch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CiFetchError {
    #[error("CI fetch for {pr} timed out after {timeout_ms}ms")]
    Timeout { pr: String, timeout_ms: u64 },

    #[error("CI source rate limited: {0}")]
    RateLimited(String),

    #[error("CI fetch failed: {0}")]
    Failed(String),
}

/// Injectable source of CI status for one PR.
///
/// Implement this for the hosted review API, or use a scripted fake in tests.
#[async_trait]
pub trait CiFetcher: Send + Sync {
    async fn fetch_ci(&self, pr: &PrKey) -> Result<CIStatus, CiFetchError>;
}

/// TTL per status tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CiTtlPolicy {
    pub pending: Duration,
    pub stable: Duration,
    pub unknown: Duration,
}

impl Default for CiTtlPolicy {
    fn default() -> Self {
        Self {
            pending: Duration::seconds(300),
            stable: Duration::seconds(900),
            unknown: Duration::seconds(600),
        }
    }
}

impl CiTtlPolicy {
    pub fn ttl_for(&self, status: CIStatus) -> Duration {
        match status {
            CIStatus::Pending => self.pending,
            CIStatus::Passing | CIStatus::Failing => self.stable,
            CIStatus::Unknown => self.unknown,
        }
    }
}

/// Whether a cycle honours TTLs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RefreshMode {
    #[default]
    Normal,
    /// Re-fetch every tracked PR regardless of TTL. PRs beyond the cycle
    /// budget stay queued and are served first by later cycles.
    Forced,
}

/// What happened to one fetched PR.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FetchOutcome {
    Updated { status: CIStatus },
    /// The fetch failed; the entry now holds `unknown` with the medium TTL.
    Degraded { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchResult {
    pub pr: PrKey,
    #[serde(flatten)]
    pub outcome: FetchOutcome,
}

/// Summary of one refresh cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    /// Another cycle was already running; nothing was done.
    pub skipped: bool,
    /// PRs present in the forest.
    pub tracked: usize,
    /// PRs due this cycle (expired, absent, or force-queued).
    pub eligible: usize,
    /// Due PRs left for a later cycle because of the budget.
    pub deferred: usize,
    /// Force-queued PRs still waiting after this cycle.
    pub forced_backlog: usize,
    pub fetched: Vec<FetchResult>,
    pub duration_ms: u64,
}

impl RefreshReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    pub fn failed_count(&self) -> usize {
        self.fetched
            .iter()
            .filter(|r| matches!(r.outcome, FetchOutcome::Degraded { .. }))
            .count()
    }
}

#[derive(Default)]
struct CiState {
    entries: HashMap<PrKey, CacheEntry<CIStatus>>,
    /// Most recent status per PR, kept past expiry for display and priority.
    last_known: HashMap<PrKey, CIStatus>,
    forced: BTreeSet<PrKey>,
}

impl CiState {
    /// Valid cached status, evicting the entry if it has expired.
    fn lookup(&mut self, pr: &PrKey, now: chrono::DateTime<chrono::Utc>) -> Option<CIStatus> {
        match self.entries.get(pr) {
            Some(entry) if entry.is_valid(now) => Some(*entry.value()),
            Some(_) => {
                self.entries.remove(pr);
                None
            }
            None => None,
        }
    }

    fn current(&self, pr: &PrKey) -> Option<CIStatus> {
        self.entries
            .get(pr)
            .map(|e| *e.value())
            .or_else(|| self.last_known.get(pr).copied())
    }

    /// Lower sorts first: pending, then unknown/never fetched, then stable.
    fn priority(&self, pr: &PrKey) -> u8 {
        match self.current(pr) {
            Some(CIStatus::Pending) => 0,
            Some(CIStatus::Unknown) | None => 1,
            Some(_) => 2,
        }
    }
}

/// Process-wide CI status cache.
pub struct CiStatusCache {
    policy: CiTtlPolicy,
    max_requests_per_cycle: usize,
    fetch_timeout: std::time::Duration,
    clock: Arc<dyn Clock>,
    fetcher: Arc<dyn CiFetcher>,
    state: Mutex<CiState>,
    refresh_gate: Mutex<()>,
}

impl CiStatusCache {
    pub const DEFAULT_BUDGET: usize = 10;
    pub const DEFAULT_FETCH_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

    pub fn new(fetcher: Arc<dyn CiFetcher>, clock: Arc<dyn Clock>, policy: CiTtlPolicy) -> Self {
        Self {
            policy,
            max_requests_per_cycle: Self::DEFAULT_BUDGET,
            fetch_timeout: Self::DEFAULT_FETCH_TIMEOUT,
            clock,
            fetcher,
            state: Mutex::new(CiState::default()),
            refresh_gate: Mutex::new(()),
        }
    }

    pub fn with_budget(mut self, max_requests_per_cycle: usize) -> Self {
        self.max_requests_per_cycle = max_requests_per_cycle;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn max_requests_per_cycle(&self) -> usize {
        self.max_requests_per_cycle
    }

    pub fn policy(&self) -> &CiTtlPolicy {
        &self.policy
    }

    /// Cached status if its entry is still valid. Expired entries are evicted.
    pub async fn get(&self, pr: &PrKey) -> Option<CIStatus> {
        let now = self.clock.now();
        self.state.lock().await.lookup(pr, now)
    }

    /// Status to render: the valid entry, else the last known (possibly
    /// stale) value, else `unknown`. Never blocks on a fetch.
    pub async fn status_for_display(&self, pr: &PrKey) -> CIStatus {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        state
            .lookup(pr, now)
            .or_else(|| state.last_known.get(pr).copied())
            .unwrap_or_default()
    }

    /// Overwrite node statuses with what the cache knows.
    ///
    /// PRs the cache has never seen keep the status their record carried.
    pub async fn enrich(&self, forest: &mut Forest) {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        forest.visit_mut(&mut |repo, node| {
            let Some(number) = node.pr_number else {
                return;
            };
            let pr = PrKey::new(repo, number);
            if let Some(status) = state
                .lookup(&pr, now)
                .or_else(|| state.last_known.get(&pr).copied())
            {
                node.ci_status = status;
            }
        });
    }

    /// Number of stored entries, valid or not yet evicted.
    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Run one refresh cycle with the configured budget.
    pub async fn refresh(&self, forest: &Forest, mode: RefreshMode) -> RefreshReport {
        self.refresh_with_budget(forest, mode, self.max_requests_per_cycle)
            .await
    }

    /// Run one refresh cycle issuing at most `budget` fetches.
    pub async fn refresh_with_budget(
        &self,
        forest: &Forest,
        mode: RefreshMode,
        budget: usize,
    ) -> RefreshReport {
        let Ok(_gate) = self.refresh_gate.try_lock() else {
            debug!("refresh already in progress, skipping");
            return RefreshReport::skipped();
        };
        let cycle = METRICS.inc_refresh_cycles();
        self.run_cycle(forest, mode, budget)
            .instrument(refresh_span(cycle, mode == RefreshMode::Forced))
            .await
    }

    async fn run_cycle(&self, forest: &Forest, mode: RefreshMode, budget: usize) -> RefreshReport {
        let started = Instant::now();
        let tracked = forest.pr_keys();
        let mut report = RefreshReport {
            tracked: tracked.len(),
            ..RefreshReport::default()
        };

        let selected = {
            let now = self.clock.now();
            let mut guard = self.state.lock().await;
            let state = &mut *guard;

            state.entries.retain(|pr, _| tracked.contains(pr));
            state.last_known.retain(|pr, _| tracked.contains(pr));
            if mode == RefreshMode::Forced {
                state.forced.extend(tracked.iter().cloned());
            }
            state.forced.retain(|pr| tracked.contains(pr));

            let mut forced: Vec<(u8, PrKey)> = state
                .forced
                .iter()
                .map(|pr| (state.priority(pr), pr.clone()))
                .collect();
            forced.sort();

            let mut due: Vec<(u8, PrKey)> = tracked
                .iter()
                .filter(|pr| !state.forced.contains(*pr))
                .filter(|pr| !state.entries.get(*pr).is_some_and(|e| e.is_valid(now)))
                .map(|pr| (state.priority(pr), pr.clone()))
                .collect();
            due.sort();

            report.eligible = forced.len() + due.len();
            let selected: Vec<PrKey> = forced
                .into_iter()
                .chain(due)
                .take(budget)
                .map(|(_, pr)| pr)
                .collect();
            for pr in &selected {
                state.forced.remove(pr);
            }
            report.deferred = report.eligible - selected.len();
            report.forced_backlog = state.forced.len();
            selected
        };

        let results = self.fetch_all(&selected).await;

        let now = self.clock.now();
        let mut state = self.state.lock().await;
        for (pr, result) in results {
            let (status, outcome) = match result {
                Ok(status) => {
                    METRICS.inc_ci_fetches();
                    (status, FetchOutcome::Updated { status })
                }
                Err(err) => {
                    METRICS.inc_ci_fetch_failures();
                    emit_ci_fetch_failed(&pr.to_string(), &err);
                    (
                        CIStatus::Unknown,
                        FetchOutcome::Degraded {
                            error: err.to_string(),
                        },
                    )
                }
            };
            state.entries.insert(
                pr.clone(),
                CacheEntry::new(status, now, self.policy.ttl_for(status)),
            );
            state.last_known.insert(pr.clone(), status);
            report.fetched.push(FetchResult { pr, outcome });
        }
        report.fetched.sort_by(|a, b| a.pr.cmp(&b.pr));

        report.duration_ms = started.elapsed().as_millis() as u64;
        emit_refresh_finished(
            report.fetched.len(),
            report.failed_count(),
            report.deferred,
            report.duration_ms,
        );
        report
    }

    /// Fetch every PR concurrently, each under the fetch timeout.
    ///
    /// Returns one result per input PR, even if a fetch task panics.
    async fn fetch_all(&self, prs: &[PrKey]) -> Vec<(PrKey, Result<CIStatus, CiFetchError>)> {
        let mut join_set = JoinSet::new();
        for pr in prs.iter().cloned() {
            let fetcher = Arc::clone(&self.fetcher);
            let timeout = self.fetch_timeout;
            join_set.spawn(async move {
                let result = match tokio::time::timeout(timeout, fetcher.fetch_ci(&pr)).await {
                    Ok(result) => result,
                    Err(_) => Err(CiFetchError::Timeout {
                        pr: pr.to_string(),
                        timeout_ms: timeout.as_millis() as u64,
                    }),
                };
                (pr, result)
            });
        }

        let mut results = Vec::with_capacity(prs.len());
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(pair) => results.push(pair),
                Err(e) => warn!(error = %e, "ci fetch task aborted"),
            }
        }

        let answered: HashSet<PrKey> = results.iter().map(|(pr, _)| pr.clone()).collect();
        for pr in prs {
            if !answered.contains(pr) {
                results.push((
                    pr.clone(),
                    Err(CiFetchError::Failed("fetch task aborted".to_string())),
                ));
            }
        }
        results
    }
}
