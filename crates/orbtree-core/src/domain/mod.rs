//! Domain model: records, reconciled trees, CI status, snapshots, errors.

pub mod error;
pub mod model;
pub mod snapshot;

pub use error::{OrbError, Result};
pub use model::{
    BranchNode, BranchRecord, CIStatus, CommitSummary, Forest, ForestInput, NodeDetails, PrKey,
    RepoRecords, RepoTree, StructuralWarning, DEFAULT_BRANCH,
};
pub use snapshot::{SnapshotDigest, TreeSnapshot};
