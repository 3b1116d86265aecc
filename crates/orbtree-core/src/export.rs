//! Rendered outputs: the forest JSON document and a plain-text tree view.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::error::Result;
use crate::domain::model::{BranchNode, CIStatus, Forest, RepoTree, StructuralWarning};

/// Counts shown in the document header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForestStats {
    /// Repositories considered, including those without open PRs.
    pub total_repos: usize,
    pub repos_with_prs: usize,
    pub total_open_prs: usize,
    pub orphans: usize,
    pub warnings: usize,
}

/// The complete output document for one fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestDocument {
    pub organization: String,
    pub generated_at: DateTime<Utc>,
    pub generation_time_seconds: f64,
    pub stats: ForestStats,
    pub trees: BTreeMap<String, RepoTree>,
    /// Age after which a viewer should flag the document as stale.
    pub stale_minutes: u64,
    #[serde(default)]
    pub warnings: Vec<StructuralWarning>,
}

impl ForestDocument {
    pub fn new(
        organization: impl Into<String>,
        forest: Forest,
        warnings: Vec<StructuralWarning>,
        total_repos: usize,
        generated_at: DateTime<Utc>,
        elapsed: Duration,
        stale_minutes: u64,
    ) -> Self {
        let mut stats = ForestStats {
            total_repos: total_repos.max(forest.trees.len()),
            warnings: warnings.len(),
            ..ForestStats::default()
        };
        for tree in forest.trees.values() {
            let prs = tree.nodes().iter().filter(|n| n.pr_number.is_some()).count();
            if prs > 0 {
                stats.repos_with_prs += 1;
            }
            stats.total_open_prs += prs;
            stats.orphans += tree.orphans().len();
        }
        Self {
            organization: organization.into(),
            generated_at,
            generation_time_seconds: (elapsed.as_secs_f64() * 100.0).round() / 100.0,
            stats,
            trees: forest.trees,
            stale_minutes,
            warnings,
        }
    }

    /// Whether the document is older than `stale_minutes` at `now`.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now - self.generated_at > chrono::Duration::minutes(self.stale_minutes as i64)
    }

    pub fn forest(&self) -> Forest {
        Forest {
            trees: self.trees.clone(),
        }
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Write the document, creating parent directories as needed.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_json_pretty()?)?;
        Ok(())
    }
}

fn status_marker(status: CIStatus) -> &'static str {
    match status {
        CIStatus::Passing => "✓",
        CIStatus::Failing => "✗",
        CIStatus::Pending => "…",
        CIStatus::Unknown => "?",
    }
}

fn render_node(out: &mut String, node: &BranchNode, prefix: &str, last: bool) {
    let connector = if last { "└── " } else { "├── " };
    let _ = write!(out, "{prefix}{connector}{} {}", status_marker(node.ci_status), node.branch);
    if let Some(pr) = node.pr_number {
        let _ = write!(out, " (#{pr})");
    }
    if node.orphan {
        let _ = write!(out, " [orphan of {}]", node.parent_branch);
    }
    if let Some(title) = &node.details.title {
        let _ = write!(out, " {title}");
    }
    match node.details.commits_from_parent.len() {
        0 => {}
        1 => out.push_str(" [1 commit]"),
        n => {
            let _ = write!(out, " [{n} commits]");
        }
    }
    out.push('\n');

    let child_prefix = format!("{prefix}{}", if last { "    " } else { "│   " });
    for (i, child) in node.children.iter().enumerate() {
        render_node(out, child, &child_prefix, i + 1 == node.children.len());
    }
}

/// Render the forest as an indented tree, one block per repository, followed
/// by any warnings.
pub fn render_text(forest: &Forest, warnings: &[StructuralWarning]) -> String {
    let mut out = String::new();
    for tree in forest.trees.values() {
        let _ = writeln!(out, "{} ({})", tree.repo, tree.default_branch);
        for (i, root) in tree.roots.iter().enumerate() {
            render_node(&mut out, root, "", i + 1 == tree.roots.len());
        }
    }
    if !warnings.is_empty() {
        out.push_str("\nwarnings:\n");
        for warning in warnings {
            let _ = writeln!(out, "  - {warning}");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{BranchRecord, CommitSummary, RepoRecords};
    use crate::hierarchy::build_forest;
    use chrono::TimeZone;

    fn sample() -> (Forest, Vec<StructuralWarning>) {
        let mut input = crate::domain::model::ForestInput::new();
        input.insert(
            "org/app".to_string(),
            RepoRecords::new(
                "main",
                vec![
                    BranchRecord::new("a").with_parent("main").with_pr(1),
                    BranchRecord::new("b")
                        .with_parent("a")
                        .with_pr(2)
                        .with_commits(vec![CommitSummary::default(); 2]),
                    BranchRecord::new("c").with_parent("gone").with_pr(3),
                ],
            ),
        );
        input.insert(
            "org/docs".to_string(),
            RepoRecords::new("main", vec![BranchRecord::new("notes")]),
        );
        let outcome = build_forest(&input).unwrap();
        (outcome.forest, outcome.warnings)
    }

    #[test]
    fn test_document_stats() {
        let (forest, warnings) = sample();
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let doc = ForestDocument::new(
            "org",
            forest,
            warnings,
            5,
            at,
            Duration::from_millis(1234),
            60,
        );
        assert_eq!(doc.stats.total_repos, 5);
        assert_eq!(doc.stats.repos_with_prs, 1);
        assert_eq!(doc.stats.total_open_prs, 3);
        assert_eq!(doc.stats.orphans, 1);
        assert_eq!(doc.stats.warnings, 1);
        assert_eq!(doc.generation_time_seconds, 1.23);
        assert!(!doc.is_stale(at + chrono::Duration::minutes(59)));
        assert!(doc.is_stale(at + chrono::Duration::minutes(61)));
    }

    #[test]
    fn test_document_write_and_reload() {
        let (forest, warnings) = sample();
        let doc = ForestDocument::new("org", forest, warnings, 2, Utc::now(), Duration::ZERO, 60);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("org_data.json");
        doc.write_to(&path).unwrap();
        let reloaded = ForestDocument::from_json(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(reloaded.trees, doc.trees);
        assert_eq!(reloaded.forest().workspace_count(), 4);
    }

    #[test]
    fn test_render_text() {
        let (forest, warnings) = sample();
        let text = render_text(&forest, &warnings);
        assert!(text.contains("org/app (main)"));
        assert!(text.contains("├── ? a (#1)"));
        assert!(text.contains("│   └── ? b (#2) [2 commits]"));
        assert!(text.contains("[orphan of gone]"));
        assert!(text.contains("warnings:"));
    }
}
