//! Error taxonomy for the advisory query surface and its gateway.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Summary returned when there is nothing to order.
pub const NO_WORKSPACES_MESSAGE: &str = "No active workspaces to analyze.";

/// Summary returned when a single workspace leaves nothing to parallelize.
pub const SINGLE_WORKSPACE_MESSAGE: &str =
    "Only one active workspace; no parallelization needed.";

/// Failure of one advisory gateway call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("advisory gateway unavailable: {0}")]
    Unavailable(String),

    #[error("advisory gateway rate limited")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("advisory gateway returned a malformed response: {0}")]
    Malformed(String),

    #[error("advisory gateway timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

/// Wire kind of an [`AdvisoryError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvisoryErrorKind {
    NoWorkspaces,
    SingleWorkspace,
    GatewayUnavailable,
    GatewayRateLimited,
    MalformedGatewayResponse,
    InvalidInput,
}

/// Outcome of an advisory request that produced no ordering.
///
/// `Clone` so one failure can be handed to every single-flight waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdvisoryError {
    #[error("{}", NO_WORKSPACES_MESSAGE)]
    NoWorkspaces,

    #[error("{}", SINGLE_WORKSPACE_MESSAGE)]
    SingleWorkspace,

    #[error("advisory gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("advisory gateway rate limited")]
    GatewayRateLimited { retry_after_secs: Option<u64> },

    #[error("malformed gateway response: {0}")]
    MalformedGatewayResponse(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl AdvisoryError {
    pub fn kind(&self) -> AdvisoryErrorKind {
        match self {
            Self::NoWorkspaces => AdvisoryErrorKind::NoWorkspaces,
            Self::SingleWorkspace => AdvisoryErrorKind::SingleWorkspace,
            Self::GatewayUnavailable(_) => AdvisoryErrorKind::GatewayUnavailable,
            Self::GatewayRateLimited { .. } => AdvisoryErrorKind::GatewayRateLimited,
            Self::MalformedGatewayResponse(_) => AdvisoryErrorKind::MalformedGatewayResponse,
            Self::InvalidInput(_) => AdvisoryErrorKind::InvalidInput,
        }
    }

    /// Degenerate inputs are answered without the gateway and are not failures.
    pub fn is_degenerate(&self) -> bool {
        matches!(self, Self::NoWorkspaces | Self::SingleWorkspace)
    }
}

impl From<GatewayError> for AdvisoryError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Unavailable(msg) => Self::GatewayUnavailable(msg),
            GatewayError::Timeout { .. } => Self::GatewayUnavailable(err.to_string()),
            GatewayError::RateLimited { retry_after_secs } => {
                Self::GatewayRateLimited { retry_after_secs }
            }
            GatewayError::Malformed(msg) => Self::MalformedGatewayResponse(msg),
        }
    }
}

impl From<crate::domain::error::OrbError> for AdvisoryError {
    fn from(err: crate::domain::error::OrbError) -> Self {
        Self::InvalidInput(err.to_string())
    }
}
