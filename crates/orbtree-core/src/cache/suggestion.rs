//! Advisory results memoized by tree snapshot digest.
//!
//! At most one computation runs per digest at any time. The first caller to
//! miss spawns the computation as a detached task and parks a shared handle
//! to it in the in-flight map; later callers for the same digest await that
//! handle instead of starting their own. Because the work runs on its own
//! task, a waiter that gives up (e.g. on a client timeout) does not cancel
//! it: the task still completes and fills the cache for the next caller.
//!
//! Lock order is `in_flight` then `entries`. The computing task stores its
//! result and leaves the in-flight map under both locks, so a caller can
//! never observe "not cached and not in flight" for a digest whose result
//! is about to land.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chrono::Duration;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::advisory::error::AdvisoryError;
use crate::advisory::model::AdvisoryResult;
use crate::cache::{CacheEntry, Clock};
use crate::domain::snapshot::{SnapshotDigest, TreeSnapshot};
use crate::metrics::METRICS;
use crate::obs::emit_suggestion_cache;

type Computation = Shared<BoxFuture<'static, Result<Arc<AdvisoryResult>, AdvisoryError>>>;

/// How a request was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionOrigin {
    /// A valid cached entry.
    Cache,
    /// This caller started the computation.
    Computed,
    /// This caller waited on a computation another caller started.
    Joined,
}

/// A result together with how it was obtained.
#[derive(Debug, Clone)]
pub struct SuggestionServed {
    pub digest: SnapshotDigest,
    pub result: Arc<AdvisoryResult>,
    pub origin: SuggestionOrigin,
}

struct Inner {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<SnapshotDigest, CacheEntry<Arc<AdvisoryResult>>>>,
    in_flight: Mutex<HashMap<SnapshotDigest, Computation>>,
}

impl Inner {
    fn lookup_locked(
        &self,
        entries: &mut HashMap<SnapshotDigest, CacheEntry<Arc<AdvisoryResult>>>,
        digest: &SnapshotDigest,
    ) -> Option<Arc<AdvisoryResult>> {
        let now = self.clock.now();
        match entries.get(digest) {
            Some(entry) if entry.is_valid(now) => Some(Arc::clone(entry.value())),
            Some(_) => {
                entries.remove(digest);
                None
            }
            None => None,
        }
    }

    /// Insert `result` for `digest`, dropping every entry that has expired.
    fn insert_locked(
        &self,
        entries: &mut HashMap<SnapshotDigest, CacheEntry<Arc<AdvisoryResult>>>,
        digest: SnapshotDigest,
        result: Arc<AdvisoryResult>,
    ) {
        let now = self.clock.now();
        entries.retain(|_, entry| entry.is_valid(now));
        entries.insert(digest, CacheEntry::new(result, now, self.ttl));
    }
}

/// Shared handle to the suggestion cache. Clones share state.
#[derive(Clone)]
pub struct SuggestionCache {
    inner: Arc<Inner>,
}

impl SuggestionCache {
    pub const DEFAULT_TTL_SECS: i64 = 300;

    pub fn new(clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                ttl,
                clock,
                entries: Mutex::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn with_default_ttl(clock: Arc<dyn Clock>) -> Self {
        Self::new(clock, Duration::seconds(Self::DEFAULT_TTL_SECS))
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    /// Valid cached result for `snapshot`; an expired entry is evicted.
    pub async fn lookup(&self, snapshot: &TreeSnapshot) -> Option<Arc<AdvisoryResult>> {
        let mut entries = self.inner.entries.lock().await;
        self.inner.lookup_locked(&mut entries, snapshot.digest())
    }

    /// Insert or replace the entry for `snapshot` with a fresh timestamp.
    /// Expired entries for other digests are swept on the way.
    pub async fn store(&self, snapshot: &TreeSnapshot, result: AdvisoryResult) {
        let mut entries = self.inner.entries.lock().await;
        self.inner
            .insert_locked(&mut entries, snapshot.digest().clone(), Arc::new(result));
    }

    /// Number of stored entries, valid or not yet swept.
    pub async fn len(&self) -> usize {
        self.inner.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Whether a computation for `snapshot` is currently running.
    pub async fn is_in_flight(&self, snapshot: &TreeSnapshot) -> bool {
        self.inner
            .in_flight
            .lock()
            .await
            .contains_key(snapshot.digest())
    }

    /// Cached result, or the result of `compute`, run at most once per digest
    /// across concurrent callers. Failed computations are not cached.
    pub async fn get_or_compute<F, Fut>(
        &self,
        snapshot: &TreeSnapshot,
        compute: F,
    ) -> Result<SuggestionServed, AdvisoryError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<AdvisoryResult, AdvisoryError>> + Send + 'static,
    {
        let digest = snapshot.digest().clone();

        if let Some(result) = self.lookup(snapshot).await {
            return Ok(self.served(&digest, result, SuggestionOrigin::Cache));
        }

        let (computation, origin) = {
            let mut in_flight = self.inner.in_flight.lock().await;
            match in_flight.get(&digest) {
                Some(running) => (running.clone(), SuggestionOrigin::Joined),
                None => {
                    // A computation may have landed between the lookup above
                    // and taking the in-flight lock.
                    let cached = {
                        let mut entries = self.inner.entries.lock().await;
                        self.inner.lookup_locked(&mut entries, &digest)
                    };
                    if let Some(result) = cached {
                        return Ok(self.served(&digest, result, SuggestionOrigin::Cache));
                    }
                    let computation = self.spawn(digest.clone(), compute());
                    in_flight.insert(digest.clone(), computation.clone());
                    (computation, SuggestionOrigin::Computed)
                }
            }
        };

        let result = computation.await?;
        Ok(self.served(&digest, result, origin))
    }

    fn spawn<Fut>(&self, digest: SnapshotDigest, work: Fut) -> Computation
    where
        Fut: Future<Output = Result<AdvisoryResult, AdvisoryError>> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let outcome = work.await.map(Arc::new);
            let mut in_flight = inner.in_flight.lock().await;
            if let Ok(result) = &outcome {
                let mut entries = inner.entries.lock().await;
                inner.insert_locked(&mut entries, digest.clone(), Arc::clone(result));
            }
            in_flight.remove(&digest);
            outcome
        });
        async move {
            match handle.await {
                Ok(outcome) => outcome,
                Err(e) => Err(AdvisoryError::GatewayUnavailable(format!(
                    "advisory task failed: {e}"
                ))),
            }
        }
        .boxed()
        .shared()
    }

    fn served(
        &self,
        digest: &SnapshotDigest,
        result: Arc<AdvisoryResult>,
        origin: SuggestionOrigin,
    ) -> SuggestionServed {
        match origin {
            SuggestionOrigin::Cache => {
                METRICS.inc_suggestion_hits();
                emit_suggestion_cache(digest.short(), "hit");
            }
            SuggestionOrigin::Joined => {
                METRICS.inc_suggestion_hits();
                emit_suggestion_cache(digest.short(), "joined");
            }
            SuggestionOrigin::Computed => {
                METRICS.inc_suggestion_misses();
                emit_suggestion_cache(digest.short(), "miss");
            }
        }
        SuggestionServed {
            digest: digest.clone(),
            result,
            origin,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SystemClock;
    use crate::domain::model::{BranchNode, CIStatus, Forest, NodeDetails, RepoTree};
    use crate::fakes::ManualClock;

    fn snapshot(branch: &str) -> TreeSnapshot {
        let mut tree = RepoTree::new("org/app", "main");
        tree.roots.push(BranchNode {
            workspace_id: branch.to_string(),
            branch: branch.to_string(),
            parent_branch: String::new(),
            pr_number: None,
            ci_status: CIStatus::Unknown,
            orphan: false,
            details: NodeDetails::default(),
            children: Vec::new(),
        });
        let mut forest = Forest::new();
        forest.insert(tree);
        TreeSnapshot::capture(&forest).unwrap()
    }

    #[tokio::test]
    async fn test_store_then_lookup() {
        let cache = SuggestionCache::with_default_ttl(Arc::new(SystemClock));
        let snap = snapshot("a");
        assert!(cache.lookup(&snap).await.is_none());
        cache.store(&snap, AdvisoryResult::empty("stored")).await;
        let hit = cache.lookup(&snap).await.unwrap();
        assert_eq!(hit.analysis_summary, "stored");
        assert!(cache.lookup(&snapshot("b")).await.is_none());
    }

    #[tokio::test]
    async fn test_failed_computation_is_not_cached() {
        let cache = SuggestionCache::with_default_ttl(Arc::new(SystemClock));
        let snap = snapshot("a");
        let err = cache
            .get_or_compute(&snap, || async {
                Err(AdvisoryError::GatewayUnavailable("down".to_string()))
            })
            .await
            .unwrap_err();
        assert_eq!(err, AdvisoryError::GatewayUnavailable("down".to_string()));
        assert!(cache.is_empty().await);
        assert!(!cache.is_in_flight(&snap).await);
    }

    #[tokio::test]
    async fn test_second_call_is_served_from_cache() {
        let cache = SuggestionCache::with_default_ttl(Arc::new(SystemClock));
        let snap = snapshot("a");
        let first = cache
            .get_or_compute(&snap, || async { Ok(AdvisoryResult::empty("fresh")) })
            .await
            .unwrap();
        assert_eq!(first.origin, SuggestionOrigin::Computed);
        let second = cache
            .get_or_compute(&snap, || async {
                Err(AdvisoryError::GatewayUnavailable("must not run".to_string()))
            })
            .await
            .unwrap();
        assert_eq!(second.origin, SuggestionOrigin::Cache);
        assert_eq!(second.result.analysis_summary, "fresh");
    }

    #[tokio::test]
    async fn test_expired_entries_are_swept_on_store() {
        let clock = Arc::new(ManualClock::at_epoch());
        let cache = SuggestionCache::with_default_ttl(clock.clone());
        for branch in ["a", "b", "c"] {
            cache.store(&snapshot(branch), AdvisoryResult::empty(branch)).await;
        }
        assert_eq!(cache.len().await, 3);

        clock.advance_secs(SuggestionCache::DEFAULT_TTL_SECS + 1);
        cache.store(&snapshot("d"), AdvisoryResult::empty("d")).await;
        assert_eq!(cache.len().await, 1);
        assert!(cache.lookup(&snapshot("d")).await.is_some());
    }

    #[tokio::test]
    async fn test_computed_result_sweeps_expired_entries() {
        let clock = Arc::new(ManualClock::at_epoch());
        let cache = SuggestionCache::with_default_ttl(clock.clone());
        cache.store(&snapshot("a"), AdvisoryResult::empty("a")).await;
        cache.store(&snapshot("b"), AdvisoryResult::empty("b")).await;

        clock.advance_secs(SuggestionCache::DEFAULT_TTL_SECS);
        cache
            .get_or_compute(&snapshot("c"), || async { Ok(AdvisoryResult::empty("c")) })
            .await
            .unwrap();
        assert_eq!(cache.len().await, 1);
    }
}
