//! The reconciliation facade: one place that owns both caches and the
//! external collaborators, wired from an [`OrbConfig`].

use std::sync::Arc;

use tracing::{info, instrument};

use crate::advisory::error::AdvisoryError;
use crate::advisory::gateway::{AdvisoryGateway, DisabledGateway};
use crate::advisory::http::HttpAdvisoryGateway;
use crate::advisory::service::{AdvisoryResponse, AdvisoryService};
use crate::cache::ci_status::{CiFetcher, CiStatusCache, RefreshMode, RefreshReport};
use crate::cache::suggestion::SuggestionCache;
use crate::cache::{Clock, SystemClock};
use crate::config::OrbConfig;
use crate::domain::error::{OrbError, Result};
use crate::domain::model::{Forest, ForestInput};
use crate::hierarchy::{build_forest_with_default, ForestOutcome};
use crate::source::gh::{GhCiFetcher, GhRunner};

/// Owns the CI status cache, the advisory service and the configuration.
pub struct Reconciler {
    config: OrbConfig,
    ci_cache: Arc<CiStatusCache>,
    advisory: AdvisoryService,
}

impl Reconciler {
    /// Wire a reconciler from explicit collaborators. Rejects invalid config.
    pub fn new(
        config: OrbConfig,
        fetcher: Arc<dyn CiFetcher>,
        gateway: Arc<dyn AdvisoryGateway>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let ci_cache = CiStatusCache::new(fetcher, Arc::clone(&clock), config.ci_cache.ttl_policy())
            .with_budget(config.ci_cache.max_requests_per_cycle)
            .with_fetch_timeout(config.ci_cache.fetch_timeout());
        let advisory = AdvisoryService::new(
            SuggestionCache::new(clock, config.suggestions.ttl()),
            gateway,
            config.suggestions.settings(),
        );
        Ok(Self {
            config,
            ci_cache: Arc::new(ci_cache),
            advisory,
        })
    }

    /// Wire the production collaborators: `gh` for CI status, and the HTTP
    /// gateway when an endpoint is configured.
    pub fn from_config(config: OrbConfig) -> Result<Self> {
        let runner = GhRunner::new().with_timeout(config.ci_cache.fetch_timeout());
        let gateway: Arc<dyn AdvisoryGateway> = match &config.gateway.endpoint {
            Some(endpoint) => Arc::new(
                HttpAdvisoryGateway::new(
                    endpoint.clone(),
                    config.gateway.token.clone(),
                    &config.gateway.user_agent,
                )
                .map_err(|e| OrbError::InvalidConfig(e.to_string()))?,
            ),
            None => {
                info!("no advisory endpoint configured; suggestions are unavailable");
                Arc::new(DisabledGateway)
            }
        };
        Self::new(
            config,
            Arc::new(GhCiFetcher::new(runner)),
            gateway,
            Arc::new(SystemClock),
        )
    }

    pub fn config(&self) -> &OrbConfig {
        &self.config
    }

    pub fn ci_cache(&self) -> &Arc<CiStatusCache> {
        &self.ci_cache
    }

    pub fn advisory(&self) -> &AdvisoryService {
        &self.advisory
    }

    /// Reconcile records into trees. Repositories that do not name a default
    /// branch use the configured one.
    pub fn build_forest(&self, input: &ForestInput) -> Result<ForestOutcome> {
        build_forest_with_default(input, &self.config.default_branch)
    }

    /// Apply cached CI status to the forest's nodes.
    pub async fn enrich(&self, forest: &mut Forest) {
        self.ci_cache.enrich(forest).await;
    }

    /// One budgeted CI refresh cycle for the PRs in `forest`.
    pub async fn refresh_ci(&self, forest: &Forest, mode: RefreshMode) -> RefreshReport {
        self.ci_cache.refresh(forest, mode).await
    }

    pub async fn refresh_ci_with_budget(
        &self,
        forest: &Forest,
        mode: RefreshMode,
        budget: usize,
    ) -> RefreshReport {
        self.ci_cache
            .refresh_with_budget(forest, mode, budget)
            .await
    }

    /// Advisory orderings for an already reconciled forest.
    pub async fn suggest(&self, forest: &Forest) -> AdvisoryResponse {
        self.advisory.respond(forest).await
    }

    /// Reconcile, enrich and answer in one step.
    #[instrument(skip_all, fields(repos = input.len()))]
    pub async fn suggest_for_input(&self, input: &ForestInput) -> AdvisoryResponse {
        let mut forest = match self.build_forest(input) {
            Ok(outcome) => outcome.forest,
            Err(e) => return AdvisoryResponse::from_outcome(Err(AdvisoryError::from(e))),
        };
        self.enrich(&mut forest).await;
        self.suggest(&forest).await
    }

    /// Like [`suggest_for_input`](Self::suggest_for_input) for a raw JSON
    /// document. Unparseable input is answered with `invalid_input`.
    pub async fn suggest_from_json(&self, raw: &str) -> AdvisoryResponse {
        match serde_json::from_str::<ForestInput>(raw) {
            Ok(input) => self.suggest_for_input(&input).await,
            Err(e) => AdvisoryResponse::from_outcome(Err(AdvisoryError::InvalidInput(
                e.to_string(),
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advisory::error::AdvisoryErrorKind;
    use crate::fakes::{ManualClock, ScriptedCiFetcher, ScriptedGateway};

    fn reconciler(config: OrbConfig) -> Result<Reconciler> {
        Reconciler::new(
            config,
            Arc::new(ScriptedCiFetcher::new()),
            Arc::new(ScriptedGateway::new()),
            Arc::new(ManualClock::at_epoch()),
        )
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = OrbConfig::default();
        config.ci_cache.stable_ttl_secs = 0;
        assert!(matches!(
            reconciler(config),
            Err(OrbError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_budget_comes_from_config() {
        let mut config = OrbConfig::default();
        config.ci_cache.max_requests_per_cycle = 3;
        let r = reconciler(config).unwrap();
        assert_eq!(r.ci_cache().max_requests_per_cycle(), 3);
    }

    #[tokio::test]
    async fn test_unparseable_input_is_invalid_input() {
        let r = reconciler(OrbConfig::default()).unwrap();
        match r.suggest_from_json("{\"org/app\": 7}").await {
            AdvisoryResponse::Error { kind, .. } => assert_eq!(kind, AdvisoryErrorKind::InvalidInput),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_branch_name_is_invalid_input() {
        let r = reconciler(OrbConfig::default()).unwrap();
        let response = r
            .suggest_from_json(r#"{"org/app": [{"branch": ""}, {"branch": "a"}]}"#)
            .await;
        match response {
            AdvisoryResponse::Error { kind, .. } => assert_eq!(kind, AdvisoryErrorKind::InvalidInput),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_from_config_without_endpoint_is_unavailable() {
        let r = Reconciler::from_config(OrbConfig::default()).unwrap();
        let response = r
            .suggest_from_json(r#"{"org/app": [{"branch": "a"}, {"branch": "b"}]}"#)
            .await;
        match response {
            AdvisoryResponse::Error { kind, .. } => {
                assert_eq!(kind, AdvisoryErrorKind::GatewayUnavailable)
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
