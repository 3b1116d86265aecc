//! Deterministic tree snapshots and their content digest.
//!
//! A [`TreeSnapshot`] projects a [`Forest`] onto its structural fields only
//! (workspace ids, branch names, parent links, PR numbers, CI status,
//! orphan flags), orders every collection canonically, serializes the result
//! as compact JSON with sorted object keys, and hashes it with SHA-256.
//! Display metadata never reaches the digest.

use std::fmt;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::domain::error::Result;
use crate::domain::model::{BranchNode, CIStatus, Forest};

/// Hex-encoded SHA-256 of a snapshot's canonical bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SnapshotDigest(String);

impl SnapshotDigest {
    fn of(bytes: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl fmt::Display for SnapshotDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Serialize)]
struct SnapshotNode<'a> {
    workspace_id: &'a str,
    branch: &'a str,
    parent_branch: &'a str,
    pr_number: Option<u64>,
    ci_status: CIStatus,
    orphan: bool,
    children: Vec<SnapshotNode<'a>>,
}

impl<'a> SnapshotNode<'a> {
    fn project(node: &'a BranchNode) -> Self {
        let mut children: Vec<_> = node.children.iter().map(Self::project).collect();
        children.sort_by(|a, b| a.branch.cmp(b.branch));
        Self {
            workspace_id: &node.workspace_id,
            branch: &node.branch,
            parent_branch: &node.parent_branch,
            pr_number: node.pr_number,
            ci_status: node.ci_status,
            orphan: node.orphan,
            children,
        }
    }
}

#[derive(Serialize)]
struct SnapshotRepo<'a> {
    repo: &'a str,
    default_branch: &'a str,
    roots: Vec<SnapshotNode<'a>>,
}

/// Immutable, canonically serialized view of a [`Forest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeSnapshot {
    canonical: String,
    digest: SnapshotDigest,
}

impl TreeSnapshot {
    pub fn capture(forest: &Forest) -> Result<Self> {
        let repos: Vec<SnapshotRepo<'_>> = forest
            .trees
            .values()
            .map(|tree| {
                let mut roots: Vec<_> = tree.roots.iter().map(SnapshotNode::project).collect();
                roots.sort_by(|a, b| a.branch.cmp(b.branch));
                SnapshotRepo {
                    repo: &tree.repo,
                    default_branch: &tree.default_branch,
                    roots,
                }
            })
            .collect();
        // `trees` is a BTreeMap, so repos are already in name order.
        let value = serde_json::to_value(&repos)?;
        let canonical = serde_json::to_string(&sort_keys(value))?;
        let digest = SnapshotDigest::of(canonical.as_bytes());
        Ok(Self { canonical, digest })
    }

    pub fn digest(&self) -> &SnapshotDigest {
        &self.digest
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.canonical.as_bytes()
    }

    pub fn canonical_json(&self) -> &str {
        &self.canonical
    }
}

/// Rebuild every object with lexicographically ordered keys.
fn sort_keys(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut entries: Vec<_> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            serde_json::Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, sort_keys(v)))
                    .collect(),
            )
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.into_iter().map(sort_keys).collect())
        }
        other => other,
    }
}
