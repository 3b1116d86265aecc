//! Advisory query surface: degenerate short-circuits, the snapshot-keyed
//! cache, bounded gateway calls and structured responses.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{instrument, warn};

use crate::advisory::error::{
    AdvisoryError, AdvisoryErrorKind, GatewayError, NO_WORKSPACES_MESSAGE,
    SINGLE_WORKSPACE_MESSAGE,
};
use crate::advisory::gateway::AdvisoryGateway;
use crate::advisory::model::{AdvisoryResult, SimplifiedGraph};
use crate::cache::{SuggestionCache, SuggestionOrigin, SuggestionServed};
use crate::domain::model::Forest;
use crate::domain::snapshot::TreeSnapshot;
use crate::metrics::METRICS;
use crate::obs::emit_gateway_call;

/// Limits applied to each advisory request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvisorySettings {
    /// Bound on a single gateway call.
    pub gateway_timeout: Duration,
    /// Bound on how long a caller waits. The underlying call keeps running.
    pub wait_timeout: Option<Duration>,
    /// Total calls per request when responses are malformed (1 + retries).
    pub max_attempts: u32,
}

impl Default for AdvisorySettings {
    fn default() -> Self {
        Self {
            gateway_timeout: Duration::from_secs(30),
            wait_timeout: None,
            max_attempts: 2,
        }
    }
}

/// Wire response of the advisory query.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AdvisoryResponse {
    Ok {
        snapshot_digest: String,
        origin: SuggestionOrigin,
        result: AdvisoryResult,
    },
    Error {
        kind: AdvisoryErrorKind,
        message: String,
        /// Present for degenerate inputs: an empty result with a fixed summary.
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<AdvisoryResult>,
    },
}

impl AdvisoryResponse {
    pub fn from_outcome(outcome: Result<SuggestionServed, AdvisoryError>) -> Self {
        match outcome {
            Ok(served) => Self::Ok {
                snapshot_digest: served.digest.to_string(),
                origin: served.origin,
                result: (*served.result).clone(),
            },
            Err(err) => {
                let result = match &err {
                    AdvisoryError::NoWorkspaces => Some(AdvisoryResult::empty(NO_WORKSPACES_MESSAGE)),
                    AdvisoryError::SingleWorkspace => {
                        Some(AdvisoryResult::empty(SINGLE_WORKSPACE_MESSAGE))
                    }
                    _ => None,
                };
                Self::Error {
                    kind: err.kind(),
                    message: err.to_string(),
                    result,
                }
            }
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }
}

/// Answers "how could this forest be worked in parallel?".
#[derive(Clone)]
pub struct AdvisoryService {
    cache: SuggestionCache,
    gateway: Arc<dyn AdvisoryGateway>,
    settings: AdvisorySettings,
}

impl AdvisoryService {
    pub fn new(
        cache: SuggestionCache,
        gateway: Arc<dyn AdvisoryGateway>,
        settings: AdvisorySettings,
    ) -> Self {
        Self {
            cache,
            gateway,
            settings,
        }
    }

    pub fn cache(&self) -> &SuggestionCache {
        &self.cache
    }

    pub fn settings(&self) -> &AdvisorySettings {
        &self.settings
    }

    /// Orderings for `forest`.
    ///
    /// Zero or one workspace is answered before the cache is consulted and
    /// never reaches the gateway.
    #[instrument(skip_all, fields(workspaces = forest.workspace_count()))]
    pub async fn suggest(&self, forest: &Forest) -> Result<SuggestionServed, AdvisoryError> {
        let graph = SimplifiedGraph::from_forest(forest);
        match graph.len() {
            0 => return Err(AdvisoryError::NoWorkspaces),
            1 => return Err(AdvisoryError::SingleWorkspace),
            _ => {}
        }

        let snapshot = TreeSnapshot::capture(forest)?;
        let gateway = Arc::clone(&self.gateway);
        let settings = self.settings;
        let digest = snapshot.digest().short().to_string();
        let request = self.cache.get_or_compute(&snapshot, move || {
            call_gateway(gateway, graph, settings, digest)
        });

        match self.settings.wait_timeout {
            Some(wait) => tokio::time::timeout(wait, request).await.map_err(|_| {
                warn!(
                    wait_ms = wait.as_millis() as u64,
                    "stopped waiting for advisory result; call continues"
                );
                AdvisoryError::GatewayUnavailable(format!(
                    "no result within {}ms",
                    wait.as_millis()
                ))
            })?,
            None => request.await,
        }
    }

    /// [`suggest`](Self::suggest) rendered as a wire response.
    pub async fn respond(&self, forest: &Forest) -> AdvisoryResponse {
        AdvisoryResponse::from_outcome(self.suggest(forest).await)
    }
}

/// One advisory computation: bounded gateway calls, retrying once on a
/// response that fails to parse or validate against `graph`.
async fn call_gateway(
    gateway: Arc<dyn AdvisoryGateway>,
    graph: SimplifiedGraph,
    settings: AdvisorySettings,
    digest: String,
) -> Result<AdvisoryResult, AdvisoryError> {
    let timeout_ms = settings.gateway_timeout.as_millis() as u64;
    let mut last = GatewayError::Malformed("no attempt made".to_string());

    for attempt in 1..=settings.max_attempts.max(1) {
        METRICS.inc_gateway_calls();
        let start = Instant::now();
        let outcome =
            match tokio::time::timeout(settings.gateway_timeout, gateway.propose_orderings(&graph))
                .await
            {
                Ok(Ok(result)) => match result.validate(&graph) {
                    Ok(()) => Ok(result),
                    Err(reason) => Err(GatewayError::Malformed(reason)),
                },
                Ok(Err(e)) => Err(e),
                Err(_) => Err(GatewayError::Timeout { timeout_ms }),
            };
        let duration_ms = start.elapsed().as_millis() as u64;
        emit_gateway_call(&digest, attempt, duration_ms, outcome.is_ok());

        match outcome {
            Ok(result) => return Ok(result),
            Err(GatewayError::Malformed(reason)) => {
                warn!(attempt, reason = %reason, "malformed advisory response");
                last = GatewayError::Malformed(reason);
            }
            Err(other) => return Err(other.into()),
        }
    }
    Err(last.into())
}
