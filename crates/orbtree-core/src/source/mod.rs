//! Record sources: where branch/PR records come from.
//!
//! - [`file::JsonFileSource`]: a JSON document on disk
//! - [`gh::GhRecordSource`]: an organization's open PRs via the `gh` CLI

pub mod file;
pub mod gh;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::model::ForestInput;

pub use file::JsonFileSource;
pub use gh::{GhCiFetcher, GhRecordSource, GhRunner, OrgFetch, RepoFilter};

/// Errors raised while loading records.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse records: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("`{command}` failed: {message}")]
    Command { command: String, message: String },

    #[error("`{command}` timed out after {timeout_secs}s")]
    Timeout { command: String, timeout_secs: u64 },

    #[error("rate limited: {0}")]
    RateLimited(String),
}

pub type SourceResult<T> = std::result::Result<T, SourceError>;

/// Produces the full record mapping for one reconciliation pass.
#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn load(&self) -> SourceResult<ForestInput>;
}
