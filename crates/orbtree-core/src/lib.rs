//! orbtree core library
//!
//! Reconciles in-progress branches and pull requests into per-repository
//! dependency trees, keeps their CI status fresh under a request budget, and
//! memoizes advisory orderings by tree snapshot.

pub mod advisory;
pub mod cache;
pub mod config;
pub mod domain;
pub mod export;
pub mod fakes;
pub mod hierarchy;
pub mod metrics;
pub mod obs;
pub mod reconciler;
pub mod refresh;
pub mod source;
pub mod telemetry;

pub use advisory::{
    AdvisoryError, AdvisoryErrorKind, AdvisoryGateway, AdvisoryResponse, AdvisoryResult,
    AdvisoryService, AdvisorySettings, DisabledGateway, GatewayError, HttpAdvisoryGateway, Phase,
    SimplifiedGraph, Strategy,
};
pub use cache::{
    CacheEntry, CiFetchError, CiFetcher, CiStatusCache, CiTtlPolicy, Clock, FetchOutcome,
    RefreshMode, RefreshReport, SuggestionCache, SuggestionOrigin, SuggestionServed, SystemClock,
};
pub use config::OrbConfig;
pub use domain::{
    BranchNode, BranchRecord, CIStatus, CommitSummary, Forest, ForestInput, NodeDetails, OrbError,
    PrKey, RepoRecords, RepoTree, Result, SnapshotDigest, StructuralWarning, TreeSnapshot,
    DEFAULT_BRANCH,
};
pub use export::{render_text, ForestDocument, ForestStats};
pub use hierarchy::{
    build_forest, build_forest_with_default, ForestOutcome, HierarchyBuilder, HierarchyOutcome,
};
pub use metrics::METRICS;
pub use reconciler::Reconciler;
pub use refresh::{RefreshLoop, RefreshedForest, TickOutcome};
pub use source::{
    GhCiFetcher, GhRecordSource, GhRunner, JsonFileSource, OrgFetch, RecordSource, RepoFilter,
    SourceError, SourceResult,
};
pub use telemetry::init_tracing;

/// orbtree version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
