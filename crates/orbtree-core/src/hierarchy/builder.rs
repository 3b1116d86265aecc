//! Flat branch records → one rooted tree per repository.
//!
//! Nodes live in an arena indexed by branch name (sorted), with parent links
//! stored as arena indices. Parent links form a functional graph (each node
//! has at most one parent), so every cycle is found by walking parent chains
//! and is broken by re-rooting its lexicographically largest member. Children
//! are emitted in branch-name order, which makes the output independent of
//! input order.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use tracing::{debug, instrument};

use crate::domain::error::{OrbError, Result};
use crate::domain::model::{
    BranchNode, BranchRecord, CIStatus, Forest, ForestInput, NodeDetails, RepoTree,
    StructuralWarning, DEFAULT_BRANCH,
};
use crate::obs::{emit_cycle_broken, emit_duplicate_branch, emit_orphan_attached};

/// A reconciled tree plus the structural warnings raised while building it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HierarchyOutcome {
    pub tree: RepoTree,
    pub warnings: Vec<StructuralWarning>,
}

/// A reconciled forest plus every repository's structural warnings.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ForestOutcome {
    pub forest: Forest,
    pub warnings: Vec<StructuralWarning>,
}

/// Builds a [`RepoTree`] for one repository.
#[derive(Debug, Clone, Copy)]
pub struct HierarchyBuilder<'a> {
    repo: &'a str,
    default_branch: &'a str,
}

struct Slot<'r> {
    name: &'r str,
    record: &'r BranchRecord,
    parent: Option<usize>,
    orphan: bool,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    Unseen,
    OnPath,
    Done,
}

impl<'a> HierarchyBuilder<'a> {
    pub fn new(repo: &'a str, default_branch: &'a str) -> Self {
        Self {
            repo,
            default_branch,
        }
    }

    /// Reconcile `records` into a tree.
    ///
    /// Never drops a record: unknown parents and broken cycles re-root the
    /// node as an orphan and add a warning. Fails only on records that cannot
    /// be placed at all (an empty branch name).
    #[instrument(skip(self, records), fields(repo = %self.repo, records = records.len()))]
    pub fn build(&self, records: &[BranchRecord]) -> Result<HierarchyOutcome> {
        let mut warnings = Vec::new();
        let index = self.index(records, &mut warnings)?;

        let mut slots: Vec<Slot<'_>> = index
            .into_iter()
            .map(|(name, (_, record))| Slot {
                name,
                record,
                parent: None,
                orphan: false,
            })
            .collect();
        let position: HashMap<&str, usize> = slots
            .iter()
            .enumerate()
            .map(|(i, slot)| (slot.name, i))
            .collect();

        for slot in &mut slots {
            let record = slot.record;
            let Some(parent) = record.parent() else {
                continue;
            };
            if parent == self.default_branch {
                continue;
            }
            match position.get(parent) {
                Some(&idx) => slot.parent = Some(idx),
                None => {
                    slot.orphan = true;
                    emit_orphan_attached(self.repo, slot.name, parent);
                    warnings.push(StructuralWarning::MissingParent {
                        repo: self.repo.to_string(),
                        branch: slot.name.to_string(),
                        parent: parent.to_string(),
                    });
                }
            }
        }

        self.break_cycles(&mut slots, &mut warnings);

        let mut children: Vec<Vec<usize>> = vec![Vec::new(); slots.len()];
        let mut roots = Vec::new();
        // Slots are in name order, so every child list comes out sorted.
        for (i, slot) in slots.iter().enumerate() {
            match slot.parent {
                Some(p) => children[p].push(i),
                None => roots.push(i),
            }
        }

        let mut tree = RepoTree::new(self.repo, self.default_branch);
        tree.roots = roots
            .into_iter()
            .map(|i| self.materialize(i, &slots, &children))
            .collect();

        debug!(nodes = slots.len(), warnings = warnings.len(), "tree built");
        Ok(HierarchyOutcome { tree, warnings })
    }

    /// Index records by branch name, resolving duplicates.
    fn index<'r>(
        &self,
        records: &'r [BranchRecord],
        warnings: &mut Vec<StructuralWarning>,
    ) -> Result<BTreeMap<&'r str, (usize, &'r BranchRecord)>> {
        let mut index: BTreeMap<&'r str, (usize, &'r BranchRecord)> = BTreeMap::new();
        for (pos, record) in records.iter().enumerate() {
            let name = record.branch.trim();
            if name.is_empty() {
                return Err(OrbError::InvalidInput(format!(
                    "{}: record {pos} has an empty branch name",
                    self.repo
                )));
            }
            if name == self.default_branch {
                // The default branch is the synthetic root itself.
                continue;
            }
            match index.entry(name) {
                Entry::Vacant(slot) => {
                    slot.insert((pos, record));
                }
                Entry::Occupied(mut slot) => {
                    emit_duplicate_branch(self.repo, name);
                    warnings.push(StructuralWarning::DuplicateBranch {
                        repo: self.repo.to_string(),
                        branch: name.to_string(),
                    });
                    if supersedes(record, slot.get().1) {
                        slot.insert((pos, record));
                    }
                }
            }
        }
        Ok(index)
    }

    fn break_cycles(&self, slots: &mut [Slot<'_>], warnings: &mut Vec<StructuralWarning>) {
        let mut state = vec![Visit::Unseen; slots.len()];
        for start in 0..slots.len() {
            if state[start] != Visit::Unseen {
                continue;
            }
            let mut path = Vec::new();
            let mut cursor = Some(start);
            while let Some(current) = cursor {
                match state[current] {
                    Visit::Done => break,
                    Visit::OnPath => {
                        if let Some(from) = path.iter().position(|&p| p == current) {
                            self.detach_largest(slots, &path[from..], warnings);
                        }
                        break;
                    }
                    Visit::Unseen => {
                        state[current] = Visit::OnPath;
                        path.push(current);
                        cursor = slots[current].parent;
                    }
                }
            }
            for idx in path {
                state[idx] = Visit::Done;
            }
        }
    }

    fn detach_largest(
        &self,
        slots: &mut [Slot<'_>],
        cycle: &[usize],
        warnings: &mut Vec<StructuralWarning>,
    ) {
        // Arena order is name order, so the largest index is the largest name.
        let Some(&victim) = cycle.iter().max() else {
            return;
        };
        let mut members: Vec<String> = cycle.iter().map(|&i| slots[i].name.to_string()).collect();
        members.sort();
        let detached = slots[victim].name.to_string();

        slots[victim].parent = None;
        slots[victim].orphan = true;

        emit_cycle_broken(self.repo, &members, &detached);
        warnings.push(StructuralWarning::CycleBroken {
            repo: self.repo.to_string(),
            members,
            detached,
        });
    }

    fn materialize(&self, idx: usize, slots: &[Slot<'_>], children: &[Vec<usize>]) -> BranchNode {
        let slot = &slots[idx];
        let record = slot.record;
        let parent_branch = match record.parent() {
            Some(p) if p != self.default_branch => p.to_string(),
            _ => String::new(),
        };
        BranchNode {
            workspace_id: record
                .workspace_id
                .clone()
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| format!("{}:{}", self.repo, slot.name)),
            branch: slot.name.to_string(),
            parent_branch,
            pr_number: record.pr_number,
            ci_status: record
                .ci_status
                .as_deref()
                .map(CIStatus::parse)
                .unwrap_or_default(),
            orphan: slot.orphan,
            details: NodeDetails::from(record),
            children: children[idx]
                .iter()
                .map(|&c| self.materialize(c, slots, children))
                .collect(),
        }
    }
}

/// Whether `candidate` should replace `current` for the same branch name.
///
/// The later `updated_at` wins; without a usable timestamp the record seen
/// later in the input wins.
fn supersedes(candidate: &BranchRecord, current: &BranchRecord) -> bool {
    match (candidate.updated_at, current.updated_at) {
        (Some(new), Some(old)) if new != old => new > old,
        (None, Some(_)) => false,
        _ => true,
    }
}

/// Reconcile every repository in `input`, assuming [`DEFAULT_BRANCH`] for
/// repositories that do not name their default branch.
pub fn build_forest(input: &ForestInput) -> Result<ForestOutcome> {
    build_forest_with_default(input, DEFAULT_BRANCH)
}

/// Reconcile every repository in `input`. Repositories that do not name
/// their default branch use `default_branch`.
pub fn build_forest_with_default(
    input: &ForestInput,
    default_branch: &str,
) -> Result<ForestOutcome> {
    let mut outcome = ForestOutcome::default();
    for (repo, records) in input {
        let built = HierarchyBuilder::new(repo, records.default_branch_or(default_branch))
            .build(&records.branches)?;
        outcome.warnings.extend(built.warnings);
        outcome.forest.insert(built.tree);
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::RepoRecords;

    fn build(records: Vec<BranchRecord>) -> HierarchyOutcome {
        HierarchyBuilder::new("org/app", "main")
            .build(&records)
            .unwrap()
    }

    #[test]
    fn test_default_branch_record_is_the_root() {
        let out = build(vec![BranchRecord::new("main")]);
        assert!(out.tree.roots.is_empty());
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn test_parent_named_default_branch_is_rooted() {
        let out = build(vec![BranchRecord::new("a").with_parent("main")]);
        assert_eq!(out.tree.roots.len(), 1);
        assert_eq!(out.tree.roots[0].parent_branch, "");
        assert!(!out.tree.roots[0].orphan);
    }

    #[test]
    fn test_self_parent_is_a_cycle_of_one() {
        let out = build(vec![BranchRecord::new("loop").with_parent("loop")]);
        assert_eq!(out.tree.roots.len(), 1);
        assert!(out.tree.roots[0].orphan);
        assert!(matches!(
            &out.warnings[0],
            StructuralWarning::CycleBroken { detached, .. } if detached == "loop"
        ));
    }

    #[test]
    fn test_empty_branch_name_is_invalid_input() {
        let err = HierarchyBuilder::new("org/app", "main")
            .build(&[BranchRecord::new("  ")])
            .unwrap_err();
        assert!(matches!(err, OrbError::InvalidInput(_)));
    }

    #[test]
    fn test_workspace_id_defaults_to_repo_and_branch() {
        let out = build(vec![
            BranchRecord::new("a"),
            BranchRecord::new("b").with_workspace_id("ws-b"),
        ]);
        assert_eq!(out.tree.find("a").unwrap().workspace_id, "org/app:a");
        assert_eq!(out.tree.find("b").unwrap().workspace_id, "ws-b");
    }

    #[test]
    fn test_supersedes_prefers_newer_timestamp() {
        use chrono::{TimeZone, Utc};
        let old = BranchRecord::new("a").with_updated_at(Utc.timestamp_opt(100, 0).unwrap());
        let new = BranchRecord::new("a").with_updated_at(Utc.timestamp_opt(200, 0).unwrap());
        assert!(supersedes(&new, &old));
        assert!(!supersedes(&old, &new));
        assert!(!supersedes(&BranchRecord::new("a"), &old));
        assert!(supersedes(&BranchRecord::new("a"), &BranchRecord::new("a")));
    }

    #[test]
    fn test_bare_records_take_the_fallback_default_branch() {
        let mut input = ForestInput::new();
        input.insert(
            "org/app".to_string(),
            RepoRecords::bare(vec![
                BranchRecord::new("develop"),
                BranchRecord::new("feat").with_parent("develop"),
            ]),
        );
        input.insert(
            "org/lib".to_string(),
            RepoRecords::new("trunk", vec![BranchRecord::new("x").with_parent("trunk")]),
        );

        let out = build_forest_with_default(&input, "develop").unwrap();
        assert!(out.warnings.is_empty());
        let app = &out.forest.trees["org/app"];
        assert_eq!(app.default_branch, "develop");
        assert_eq!(app.node_count(), 1);
        assert!(!app.find("feat").unwrap().orphan);
        assert_eq!(out.forest.trees["org/lib"].default_branch, "trunk");

        let fallback = build_forest(&input).unwrap();
        assert_eq!(fallback.forest.trees["org/app"].default_branch, DEFAULT_BRANCH);
        assert_eq!(fallback.forest.trees["org/app"].node_count(), 2);
    }
}
