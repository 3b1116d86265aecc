//! Branch/PR records, the reconciled tree types, and CI status.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default branch assumed when a repository does not name one.
pub const DEFAULT_BRANCH: &str = "main";

/// Last known CI outcome for a pull request.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum CIStatus {
    Passing,
    Failing,
    Pending,
    #[default]
    Unknown,
}

impl CIStatus {
    /// Lenient parse of status strings from external tools.
    ///
    /// Anything unrecognised (including the empty string) is `Unknown`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pass" | "passed" | "passing" | "success" | "succeeded" => Self::Passing,
            "fail" | "failed" | "failing" | "failure" | "error" => Self::Failing,
            "pending" | "running" | "queued" | "in_progress" => Self::Pending,
            _ => Self::Unknown,
        }
    }

    /// Aggregate per-check buckets (`pass`, `fail`, `pending`, ...) into one
    /// status: any failure wins, then any pending check, then any pass.
    pub fn from_check_buckets<I, S>(buckets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut has_pending = false;
        let mut has_pass = false;
        for bucket in buckets {
            match bucket.as_ref() {
                "fail" => return Self::Failing,
                "pending" => has_pending = true,
                "pass" => has_pass = true,
                _ => {}
            }
        }
        if has_pending {
            Self::Pending
        } else if has_pass {
            Self::Passing
        } else {
            Self::Unknown
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Passing => "passing",
            Self::Failing => "failing",
            Self::Pending => "pending",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for CIStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one pull request across repositories.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PrKey {
    pub repo: String,
    pub number: u64,
}

impl PrKey {
    pub fn new(repo: impl Into<String>, number: u64) -> Self {
        Self {
            repo: repo.into(),
            number,
        }
    }
}

impl fmt::Display for PrKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.repo, self.number)
    }
}

/// One raw branch/PR record as supplied by a record source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BranchRecord {
    pub branch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_number: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ci_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_draft: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Newest commits the branch adds over its parent.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commits_from_parent: Vec<CommitSummary>,
}

impl BranchRecord {
    pub fn new(branch: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
            ..Self::default()
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent_branch = Some(parent.into());
        self
    }

    pub fn with_pr(mut self, number: u64) -> Self {
        self.pr_number = Some(number);
        self
    }

    pub fn with_ci_status(mut self, status: impl Into<String>) -> Self {
        self.ci_status = Some(status.into());
        self
    }

    pub fn with_workspace_id(mut self, id: impl Into<String>) -> Self {
        self.workspace_id = Some(id.into());
        self
    }

    pub fn with_updated_at(mut self, at: DateTime<Utc>) -> Self {
        self.updated_at = Some(at);
        self
    }

    pub fn with_commits(mut self, commits: Vec<CommitSummary>) -> Self {
        self.commits_from_parent = commits;
        self
    }

    /// Declared parent, with `None` and `""` treated alike.
    pub fn parent(&self) -> Option<&str> {
        self.parent_branch
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }
}

/// A commit as shown next to a branch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitSummary {
    pub sha: String,
    pub short_sha: String,
    /// First line of the message, at most 80 characters.
    pub message: String,
    pub author: String,
    #[serde(default)]
    pub author_login: String,
    #[serde(default)]
    pub author_avatar_url: String,
    /// `YYYY-MM-DD`
    pub date: String,
    pub html_url: String,
}

/// Records for one repository.
///
/// Deserializes from either a bare array of records or an object with
/// `default_branch` and `branches`. A repository that does not name its
/// default branch takes the one configured for the whole run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "RepoRecordsRepr")]
pub struct RepoRecords {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_branch: Option<String>,
    pub branches: Vec<BranchRecord>,
}

impl RepoRecords {
    pub fn new(default_branch: impl Into<String>, branches: Vec<BranchRecord>) -> Self {
        Self {
            default_branch: Some(default_branch.into()),
            branches,
        }
    }

    /// Records whose default branch is left to the caller's configuration.
    pub fn bare(branches: Vec<BranchRecord>) -> Self {
        Self {
            default_branch: None,
            branches,
        }
    }

    /// The repository's own default branch, else `fallback`.
    pub fn default_branch_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.default_branch
            .as_deref()
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .unwrap_or(fallback)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RepoRecordsRepr {
    Bare(Vec<BranchRecord>),
    Full {
        #[serde(default)]
        default_branch: Option<String>,
        #[serde(default)]
        branches: Vec<BranchRecord>,
    },
}

impl From<RepoRecordsRepr> for RepoRecords {
    fn from(repr: RepoRecordsRepr) -> Self {
        match repr {
            RepoRecordsRepr::Bare(branches) => Self::bare(branches),
            RepoRecordsRepr::Full {
                default_branch,
                branches,
            } => Self {
                default_branch,
                branches,
            },
        }
    }
}

/// Repository name → records. The input contract of the reconciliation core.
pub type ForestInput = BTreeMap<String, RepoRecords>;

/// Display-only metadata carried alongside a node.
///
/// Excluded from snapshot digests and from the advisory graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_draft: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commits_from_parent: Vec<CommitSummary>,
}

impl NodeDetails {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

impl From<&BranchRecord> for NodeDetails {
    fn from(record: &BranchRecord) -> Self {
        Self {
            title: record.title.clone(),
            author: record.author.clone(),
            url: record.url.clone(),
            is_draft: record.is_draft,
            labels: record.labels.clone(),
            updated_at: record.updated_at,
            commits_from_parent: record.commits_from_parent.clone(),
        }
    }
}

/// One tracked unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchNode {
    pub workspace_id: String,
    pub branch: String,
    /// Declared parent; empty when rooted on the default branch.
    pub parent_branch: String,
    pub pr_number: Option<u64>,
    pub ci_status: CIStatus,
    /// Re-rooted because the declared parent was missing or formed a cycle.
    #[serde(default)]
    pub orphan: bool,
    #[serde(default, skip_serializing_if = "NodeDetails::is_empty")]
    pub details: NodeDetails,
    #[serde(default)]
    pub children: Vec<BranchNode>,
}

impl BranchNode {
    /// Depth-first, pre-order walk of this node and its descendants.
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a BranchNode)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }

    pub fn walk_mut(&mut self, visit: &mut dyn FnMut(&mut BranchNode)) {
        visit(self);
        for child in &mut self.children {
            child.walk_mut(visit);
        }
    }
}

/// One repository's forest under a synthetic default-branch root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoTree {
    pub repo: String,
    /// The synthetic root; always considered complete.
    pub default_branch: String,
    pub roots: Vec<BranchNode>,
}

impl RepoTree {
    pub fn new(repo: impl Into<String>, default_branch: impl Into<String>) -> Self {
        Self {
            repo: repo.into(),
            default_branch: default_branch.into(),
            roots: Vec::new(),
        }
    }

    /// All nodes, depth-first in child order.
    pub fn nodes(&self) -> Vec<&BranchNode> {
        let mut out = Vec::new();
        for root in &self.roots {
            root.walk(&mut |node| out.push(node));
        }
        out
    }

    pub fn node_count(&self) -> usize {
        self.nodes().len()
    }

    pub fn find(&self, branch: &str) -> Option<&BranchNode> {
        self.nodes().into_iter().find(|n| n.branch == branch)
    }

    pub fn orphans(&self) -> Vec<&BranchNode> {
        self.roots.iter().filter(|n| n.orphan).collect()
    }

    pub fn visit_mut(&mut self, visit: &mut dyn FnMut(&mut BranchNode)) {
        for root in &mut self.roots {
            root.walk_mut(visit);
        }
    }

    pub fn pr_keys(&self) -> BTreeSet<PrKey> {
        self.nodes()
            .into_iter()
            .filter_map(|n| n.pr_number.map(|num| PrKey::new(self.repo.clone(), num)))
            .collect()
    }
}

/// Every repository's tree at one instant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Forest {
    pub trees: BTreeMap<String, RepoTree>,
}

impl Forest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, tree: RepoTree) {
        self.trees.insert(tree.repo.clone(), tree);
    }

    /// Number of tracked workspaces (the synthetic roots are not counted).
    pub fn workspace_count(&self) -> usize {
        self.trees.values().map(RepoTree::node_count).sum()
    }

    pub fn pr_keys(&self) -> BTreeSet<PrKey> {
        self.trees.values().flat_map(RepoTree::pr_keys).collect()
    }

    pub fn visit_mut(&mut self, visit: &mut dyn FnMut(&str, &mut BranchNode)) {
        for (repo, tree) in &mut self.trees {
            tree.visit_mut(&mut |node| visit(repo, node));
        }
    }
}

/// Non-fatal irregularity found while reconciling records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StructuralWarning {
    /// Two records named the same branch; the most recently observed was kept.
    DuplicateBranch { repo: String, branch: String },
    /// The declared parent was never observed; the node was re-rooted.
    MissingParent {
        repo: String,
        branch: String,
        parent: String,
    },
    /// Parent links formed a cycle; `detached` was re-rooted.
    CycleBroken {
        repo: String,
        members: Vec<String>,
        detached: String,
    },
}

impl fmt::Display for StructuralWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateBranch { repo, branch } => {
                write!(f, "{repo}: duplicate records for branch '{branch}'")
            }
            Self::MissingParent {
                repo,
                branch,
                parent,
            } => write!(
                f,
                "{repo}: parent '{parent}' of '{branch}' not found, attached to root"
            ),
            Self::CycleBroken {
                repo,
                members,
                detached,
            } => write!(
                f,
                "{repo}: cycle among [{}] broken by detaching '{detached}'",
                members.join(", ")
            ),
        }
    }
}
