//! In-memory fakes for the collaborator traits (testing only)
//!
//! Provides `ManualClock`, `ScriptedCiFetcher`, `ScriptedGateway` and
//! `StaticRecordSource`, which satisfy the trait contracts without touching
//! the network, the `gh` CLI or the wall clock.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use crate::advisory::error::GatewayError;
use crate::advisory::gateway::AdvisoryGateway;
use crate::advisory::model::{AdvisoryResult, SimplifiedGraph};
use crate::cache::ci_status::{CiFetchError, CiFetcher};
use crate::cache::Clock;
use crate::domain::model::{CIStatus, ForestInput, PrKey};
use crate::source::{RecordSource, SourceError, SourceResult};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// ManualClock
// ---------------------------------------------------------------------------

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// A clock at 2024-01-01T00:00:00Z, the `t = 0` of time-based tests.
    pub fn at_epoch() -> Self {
        Self::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
                .single()
                .unwrap_or_default(),
        )
    }

    pub fn advance_secs(&self, secs: i64) {
        *lock(&self.now) += chrono::Duration::seconds(secs);
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *lock(&self.now) = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *lock(&self.now)
    }
}

// ---------------------------------------------------------------------------
// ScriptedCiFetcher
// ---------------------------------------------------------------------------

/// CI fetcher answering from a per-PR script and recording every call.
///
/// Unscripted PRs fail with `CiFetchError::Failed`.
#[derive(Debug, Default)]
pub struct ScriptedCiFetcher {
    script: Mutex<HashMap<PrKey, Result<CIStatus, CiFetchError>>>,
    log: Mutex<Vec<PrKey>>,
    delay: Option<Duration>,
}

impl ScriptedCiFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every fetch.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set(&self, pr: PrKey, status: CIStatus) {
        lock(&self.script).insert(pr, Ok(status));
    }

    pub fn fail(&self, pr: PrKey, error: CiFetchError) {
        lock(&self.script).insert(pr, Err(error));
    }

    pub fn calls(&self) -> usize {
        lock(&self.log).len()
    }

    /// PRs fetched so far, in call order.
    pub fn fetched(&self) -> Vec<PrKey> {
        lock(&self.log).clone()
    }

    pub fn reset_log(&self) {
        lock(&self.log).clear();
    }
}

#[async_trait]
impl CiFetcher for ScriptedCiFetcher {
    async fn fetch_ci(&self, pr: &PrKey) -> Result<CIStatus, CiFetchError> {
        lock(&self.log).push(pr.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        lock(&self.script)
            .get(pr)
            .cloned()
            .unwrap_or_else(|| Err(CiFetchError::Failed(format!("no script for {pr}"))))
    }
}

// ---------------------------------------------------------------------------
// ScriptedGateway
// ---------------------------------------------------------------------------

/// Advisory gateway answering from a queue, then from a fallback.
#[derive(Debug, Default)]
pub struct ScriptedGateway {
    queue: Mutex<VecDeque<Result<AdvisoryResult, GatewayError>>>,
    fallback: Mutex<Option<Result<AdvisoryResult, GatewayError>>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every call not covered by the queue with `response`.
    pub fn always(response: Result<AdvisoryResult, GatewayError>) -> Self {
        let gateway = Self::default();
        *lock(&gateway.fallback) = Some(response);
        gateway
    }

    /// Sleep this long inside every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push(&self, response: Result<AdvisoryResult, GatewayError>) {
        lock(&self.queue).push_back(response);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AdvisoryGateway for ScriptedGateway {
    async fn propose_orderings(
        &self,
        _graph: &SimplifiedGraph,
    ) -> Result<AdvisoryResult, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let queued = lock(&self.queue).pop_front();
        match queued {
            Some(response) => response,
            None => lock(&self.fallback).clone().unwrap_or_else(|| {
                Err(GatewayError::Unavailable("script exhausted".to_string()))
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// StaticRecordSource
// ---------------------------------------------------------------------------

/// Record source returning whatever input it currently holds.
#[derive(Debug, Default)]
pub struct StaticRecordSource {
    input: Mutex<Option<ForestInput>>,
    loads: AtomicUsize,
}

impl StaticRecordSource {
    pub fn new(input: ForestInput) -> Self {
        Self {
            input: Mutex::new(Some(input)),
            loads: AtomicUsize::new(0),
        }
    }

    /// A source whose every load fails until [`set`](Self::set) is called.
    pub fn failing() -> Self {
        Self::default()
    }

    pub fn set(&self, input: ForestInput) {
        *lock(&self.input) = Some(input);
    }

    pub fn clear(&self) {
        *lock(&self.input) = None;
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordSource for StaticRecordSource {
    async fn load(&self) -> SourceResult<ForestInput> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        lock(&self.input).clone().ok_or_else(|| SourceError::Command {
            command: "static".to_string(),
            message: "no records configured".to_string(),
        })
    }
}
