//! The advisory gateway seam.

use async_trait::async_trait;

use crate::advisory::error::GatewayError;
use crate::advisory::model::{AdvisoryResult, SimplifiedGraph};

/// Proposes orderings (phases of parallelizable work) for a dependency graph.
///
/// Implementations perform one external call per invocation. Timeouts and
/// retries are applied by the caller.
#[async_trait]
pub trait AdvisoryGateway: Send + Sync {
    async fn propose_orderings(
        &self,
        graph: &SimplifiedGraph,
    ) -> Result<AdvisoryResult, GatewayError>;
}

/// Gateway used when no endpoint is configured. Every call is unavailable.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledGateway;

#[async_trait]
impl AdvisoryGateway for DisabledGateway {
    async fn propose_orderings(
        &self,
        _graph: &SimplifiedGraph,
    ) -> Result<AdvisoryResult, GatewayError> {
        Err(GatewayError::Unavailable(
            "no advisory endpoint configured".to_string(),
        ))
    }
}
