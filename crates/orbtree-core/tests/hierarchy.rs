//! Hierarchy reconciliation acceptance tests.
//!
//! Covers:
//! - rebuilding from reordered records yields byte-identical snapshots
//! - every record appears exactly once in the output tree
//! - output trees never contain a cycle, whatever the input declares
//! - default-branch-only input, a simple chain, a two-member cycle
//! - missing parents and duplicate branch names degrade to warnings

use std::collections::{BTreeMap, HashSet};

use chrono::{TimeZone, Utc};
use orbtree_core::{
    build_forest, BranchRecord, ForestInput, HierarchyBuilder, RepoRecords, RepoTree,
    SnapshotDigest, StructuralWarning, TreeSnapshot,
};
use proptest::prelude::*;

fn build(records: Vec<BranchRecord>) -> (RepoTree, Vec<StructuralWarning>) {
    let out = HierarchyBuilder::new("org/app", "main")
        .build(&records)
        .expect("records should reconcile");
    (out.tree, out.warnings)
}

fn input(records: Vec<BranchRecord>) -> ForestInput {
    let mut input = ForestInput::new();
    input.insert("org/app".to_string(), RepoRecords::new("main", records));
    input
}

#[derive(Debug, Clone)]
enum ParentChoice {
    Root,
    DefaultBranch,
    Missing(u8),
    Member(prop::sample::Index),
}

fn parent_choice() -> impl Strategy<Value = ParentChoice> {
    prop_oneof![
        1 => Just(ParentChoice::Root),
        1 => Just(ParentChoice::DefaultBranch),
        1 => (0u8..3).prop_map(ParentChoice::Missing),
        2 => any::<prop::sample::Index>().prop_map(ParentChoice::Member),
    ]
}

/// Records over distinct branches `b00..`, whose parents may be missing,
/// cyclic, self-referential or the default branch.
fn arb_records(max: usize) -> impl Strategy<Value = Vec<BranchRecord>> {
    prop::collection::vec(parent_choice(), 1..max).prop_map(|choices| {
        let n = choices.len();
        choices
            .into_iter()
            .enumerate()
            .map(|(i, choice)| {
                let record = BranchRecord::new(format!("b{i:02}"));
                match choice {
                    ParentChoice::Root => record,
                    ParentChoice::DefaultBranch => record.with_parent("main"),
                    ParentChoice::Missing(k) => record.with_parent(format!("ghost{k}")),
                    ParentChoice::Member(idx) => {
                        record.with_parent(format!("b{:02}", idx.index(n)))
                    }
                }
            })
            .collect()
    })
}

/// A record set and a permutation of it.
fn arb_records_and_shuffle() -> impl Strategy<Value = (Vec<BranchRecord>, Vec<BranchRecord>)> {
    arb_records(16).prop_flat_map(|records| (Just(records.clone()), Just(records).prop_shuffle()))
}

fn snapshot_of(records: Vec<BranchRecord>) -> (Vec<u8>, SnapshotDigest) {
    let forest = build_forest(&input(records)).unwrap().forest;
    let snapshot = TreeSnapshot::capture(&forest).unwrap();
    (snapshot.as_bytes().to_vec(), snapshot.digest().clone())
}

/// Parent link of every node, read back from the tree shape.
fn parent_links(tree: &RepoTree) -> BTreeMap<String, Option<String>> {
    fn visit(node: &orbtree_core::BranchNode, parent: Option<&str>, out: &mut BTreeMap<String, Option<String>>) {
        out.insert(node.branch.clone(), parent.map(str::to_string));
        for child in &node.children {
            visit(child, Some(&node.branch), out);
        }
    }
    let mut out = BTreeMap::new();
    for root in &tree.roots {
        visit(root, None, &mut out);
    }
    out
}

fn assert_acyclic(tree: &RepoTree) {
    let links = parent_links(tree);
    for start in links.keys() {
        let mut seen = HashSet::new();
        let mut cursor = Some(start.clone());
        while let Some(branch) = cursor {
            assert!(seen.insert(branch.clone()), "cycle through {branch}");
            cursor = links.get(&branch).cloned().flatten();
        }
    }
}

// ---- Scenarios ----

#[test]
fn default_branch_only_yields_empty_tree() {
    let (tree, warnings) = build(vec![BranchRecord::new("main")]);
    assert_eq!(tree.default_branch, "main");
    assert!(tree.roots.is_empty());
    assert!(warnings.is_empty());
}

#[test]
fn simple_chain_nests_without_orphans() {
    let (tree, warnings) = build(vec![
        BranchRecord::new("a").with_parent(""),
        BranchRecord::new("b").with_parent("a"),
    ]);
    assert_eq!(tree.roots.len(), 1);
    let a = &tree.roots[0];
    assert_eq!(a.branch, "a");
    assert_eq!(a.children.len(), 1);
    assert_eq!(a.children[0].branch, "b");
    assert!(a.children[0].children.is_empty());
    assert!(tree.orphans().is_empty());
    assert!(warnings.is_empty());
}

#[test]
fn two_member_cycle_detaches_larger_name() {
    let (tree, warnings) = build(vec![
        BranchRecord::new("x").with_parent("y"),
        BranchRecord::new("y").with_parent("x"),
    ]);
    assert_eq!(tree.roots.len(), 1);
    let y = &tree.roots[0];
    assert_eq!(y.branch, "y");
    assert!(y.orphan);
    assert_eq!(y.children.len(), 1);
    assert_eq!(y.children[0].branch, "x");
    assert!(!y.children[0].orphan);

    assert_eq!(
        warnings,
        vec![StructuralWarning::CycleBroken {
            repo: "org/app".to_string(),
            members: vec!["x".to_string(), "y".to_string()],
            detached: "y".to_string(),
        }]
    );
}

#[test]
fn missing_parent_is_orphaned_not_dropped() {
    let (tree, warnings) = build(vec![
        BranchRecord::new("feature").with_parent("deleted"),
        BranchRecord::new("fix").with_parent("feature"),
    ]);
    let feature = tree.find("feature").expect("feature kept");
    assert!(feature.orphan);
    assert_eq!(feature.parent_branch, "deleted");
    assert_eq!(feature.children[0].branch, "fix");
    assert!(matches!(
        warnings.as_slice(),
        [StructuralWarning::MissingParent { branch, parent, .. }]
            if branch == "feature" && parent == "deleted"
    ));
}

#[test]
fn duplicate_branch_keeps_most_recent_record() {
    let (tree, warnings) = build(vec![
        BranchRecord::new("a")
            .with_pr(2)
            .with_updated_at(Utc.timestamp_opt(2_000, 0).unwrap()),
        BranchRecord::new("a")
            .with_pr(1)
            .with_updated_at(Utc.timestamp_opt(1_000, 0).unwrap()),
    ]);
    assert_eq!(tree.node_count(), 1);
    assert_eq!(tree.find("a").unwrap().pr_number, Some(2));
    assert!(matches!(
        warnings.as_slice(),
        [StructuralWarning::DuplicateBranch { branch, .. }] if branch == "a"
    ));
}

#[test]
fn children_are_ordered_by_branch_name() {
    let (tree, _) = build(vec![
        BranchRecord::new("zeta"),
        BranchRecord::new("alpha"),
        BranchRecord::new("mid").with_parent("alpha"),
        BranchRecord::new("low").with_parent("alpha"),
    ]);
    let roots: Vec<&str> = tree.roots.iter().map(|n| n.branch.as_str()).collect();
    assert_eq!(roots, vec!["alpha", "zeta"]);
    let children: Vec<&str> = tree.roots[0]
        .children
        .iter()
        .map(|n| n.branch.as_str())
        .collect();
    assert_eq!(children, vec!["low", "mid"]);
}

// ---- Properties ----

proptest! {
    #[test]
    fn reordered_input_yields_identical_snapshot((records, shuffled) in arb_records_and_shuffle()) {
        let mut reversed = records.clone();
        reversed.reverse();
        let expected = snapshot_of(records);
        let from_shuffled = snapshot_of(shuffled);
        let from_reversed = snapshot_of(reversed);
        prop_assert_eq!(&expected, &from_shuffled);
        prop_assert_eq!(&expected, &from_reversed);
    }

    #[test]
    fn every_record_appears_exactly_once(records in arb_records(20)) {
        let (tree, _) = build(records.clone());
        let mut names: Vec<String> = tree.nodes().iter().map(|n| n.branch.clone()).collect();
        names.sort();
        let mut expected: Vec<String> = records.iter().map(|r| r.branch.clone()).collect();
        expected.sort();
        prop_assert_eq!(names, expected);
    }

    #[test]
    fn output_is_acyclic_for_any_input(records in arb_records(20)) {
        let (tree, warnings) = build(records);
        assert_acyclic(&tree);
        for warning in &warnings {
            if let StructuralWarning::CycleBroken { members, detached, .. } = warning {
                prop_assert_eq!(Some(detached), members.iter().max());
                prop_assert!(tree.find(detached).unwrap().orphan);
            }
        }
    }
}

#[test]
fn forest_keeps_repositories_apart() {
    let mut forest_input = input(vec![BranchRecord::new("a")]);
    forest_input.insert(
        "org/lib".to_string(),
        RepoRecords::new("develop", vec![BranchRecord::new("a").with_parent("develop")]),
    );
    let outcome = build_forest(&forest_input).unwrap();
    assert_eq!(outcome.forest.trees.len(), 2);
    assert_eq!(outcome.forest.workspace_count(), 2);
    assert_eq!(outcome.forest.trees["org/lib"].default_branch, "develop");
    assert!(outcome.warnings.is_empty());
}
