//! Advisory orderings: which workspaces can proceed in parallel.
//!
//! - [`model`]: the simplified graph sent out and the strategies returned
//! - [`gateway`]: the [`AdvisoryGateway`] seam
//! - [`http`]: the reqwest-backed gateway
//! - [`service`]: short-circuits, single-flight caching, bounded calls

pub mod error;
pub mod gateway;
pub mod http;
pub mod model;
pub mod service;

pub use error::{AdvisoryError, AdvisoryErrorKind, GatewayError};
pub use gateway::{AdvisoryGateway, DisabledGateway};
pub use http::HttpAdvisoryGateway;
pub use model::{AdvisoryResult, GraphWorkspace, Phase, SimplifiedGraph, Strategy};
pub use service::{AdvisoryResponse, AdvisorySettings, AdvisoryService};
