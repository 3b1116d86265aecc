//! Periodic refresh loop.
//!
//! One scheduler per process: each tick loads records, rebuilds the forest,
//! runs one budgeted CI refresh cycle, enriches the forest and publishes it on
//! a `watch` channel. A tick that cannot load or reconcile records keeps the
//! previously published forest.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::cache::ci_status::{RefreshMode, RefreshReport};
use crate::domain::model::{Forest, StructuralWarning};
use crate::reconciler::Reconciler;
use crate::source::RecordSource;

/// The forest as of the latest successful tick.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RefreshedForest {
    /// Successful ticks so far; 0 before the first.
    pub generation: u64,
    pub refreshed_at: Option<DateTime<Utc>>,
    pub forest: Forest,
    pub warnings: Vec<StructuralWarning>,
    pub report: RefreshReport,
}

/// What one tick did.
#[derive(Debug, Clone)]
pub enum TickOutcome {
    Published(Arc<RefreshedForest>),
    /// Records could not be loaded or reconciled; nothing was published.
    Kept { reason: String },
}

pub struct RefreshLoop {
    reconciler: Arc<Reconciler>,
    source: Arc<dyn RecordSource>,
    interval: Duration,
    published: watch::Sender<Arc<RefreshedForest>>,
}

impl RefreshLoop {
    pub fn new(
        reconciler: Arc<Reconciler>,
        source: Arc<dyn RecordSource>,
        interval: Duration,
    ) -> Self {
        let (published, _) = watch::channel(Arc::new(RefreshedForest::default()));
        Self {
            reconciler,
            source,
            interval,
            published,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<RefreshedForest>> {
        self.published.subscribe()
    }

    /// Latest published forest.
    pub fn current(&self) -> Arc<RefreshedForest> {
        Arc::clone(&self.published.borrow())
    }

    /// Run one load → reconcile → refresh → publish pass.
    pub async fn tick(&self, mode: RefreshMode) -> TickOutcome {
        let input = match self.source.load().await {
            Ok(input) => input,
            Err(e) => {
                warn!(error = %e, "record source failed; keeping previous forest");
                return TickOutcome::Kept {
                    reason: e.to_string(),
                };
            }
        };
        let outcome = match self.reconciler.build_forest(&input) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "records could not be reconciled; keeping previous forest");
                return TickOutcome::Kept {
                    reason: e.to_string(),
                };
            }
        };

        let mut forest = outcome.forest;
        let report = self.reconciler.refresh_ci(&forest, mode).await;
        self.reconciler.enrich(&mut forest).await;

        let refreshed = Arc::new(RefreshedForest {
            generation: self.current().generation + 1,
            refreshed_at: Some(Utc::now()),
            forest,
            warnings: outcome.warnings,
            report,
        });
        self.published.send_replace(Arc::clone(&refreshed));
        TickOutcome::Published(refreshed)
    }

    /// Tick every interval until `shutdown` flips to `true` or its sender
    /// is dropped. The first tick runs immediately.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_secs = self.interval.as_secs(), "refresh loop started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    if let TickOutcome::Published(state) = self.tick(RefreshMode::Normal).await {
                        info!(
                            generation = state.generation,
                            workspaces = state.forest.workspace_count(),
                            fetched = state.report.fetched.len(),
                            "published forest"
                        );
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!("refresh loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrbConfig;
    use crate::domain::model::{BranchRecord, CIStatus, ForestInput, PrKey, RepoRecords};
    use crate::fakes::{ManualClock, ScriptedCiFetcher, ScriptedGateway, StaticRecordSource};

    fn input() -> ForestInput {
        let mut input = ForestInput::new();
        input.insert(
            "org/app".to_string(),
            RepoRecords::new(
                "main",
                vec![
                    BranchRecord::new("a").with_pr(1),
                    BranchRecord::new("b").with_parent("a").with_pr(2),
                ],
            ),
        );
        input
    }

    fn refresh_loop(source: Arc<StaticRecordSource>) -> RefreshLoop {
        let fetcher = Arc::new(ScriptedCiFetcher::new());
        fetcher.set(PrKey::new("org/app", 1), CIStatus::Passing);
        fetcher.set(PrKey::new("org/app", 2), CIStatus::Pending);
        let reconciler = Reconciler::new(
            OrbConfig::default(),
            fetcher,
            Arc::new(ScriptedGateway::new()),
            Arc::new(ManualClock::at_epoch()),
        )
        .unwrap();
        RefreshLoop::new(Arc::new(reconciler), source, Duration::from_secs(900))
    }

    #[tokio::test]
    async fn test_tick_publishes_enriched_forest() {
        let source = Arc::new(StaticRecordSource::new(input()));
        let rl = refresh_loop(source);
        let mut rx = rl.subscribe();

        let TickOutcome::Published(state) = rl.tick(RefreshMode::Normal).await else {
            panic!("expected a published forest");
        };
        assert_eq!(state.generation, 1);
        assert_eq!(state.report.fetched.len(), 2);
        let tree = &state.forest.trees["org/app"];
        assert_eq!(tree.find("a").unwrap().ci_status, CIStatus::Passing);
        assert_eq!(tree.find("b").unwrap().ci_status, CIStatus::Pending);

        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().generation, 1);
    }

    #[tokio::test]
    async fn test_source_failure_keeps_previous_forest() {
        let source = Arc::new(StaticRecordSource::new(input()));
        let rl = refresh_loop(Arc::clone(&source));
        rl.tick(RefreshMode::Normal).await;

        source.clear();
        let outcome = rl.tick(RefreshMode::Normal).await;
        assert!(matches!(outcome, TickOutcome::Kept { .. }));
        assert_eq!(rl.current().generation, 1);
        assert_eq!(rl.current().forest.workspace_count(), 2);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let source = Arc::new(StaticRecordSource::new(input()));
        let rl = Arc::new(refresh_loop(Arc::clone(&source)));
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut rx = rl.subscribe();

        let runner = {
            let rl = Arc::clone(&rl);
            tokio::spawn(async move { rl.run(stop_rx).await })
        };
        rx.changed().await.unwrap();
        stop_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), runner)
            .await
            .unwrap()
            .unwrap();
        assert!(source.loads() >= 1);
        assert!(rl.current().generation >= 1);
    }
}
