//! Hierarchy reconciliation: flat records in, acyclic trees out.

pub mod builder;

pub use builder::{
    build_forest, build_forest_with_default, ForestOutcome, HierarchyBuilder, HierarchyOutcome,
};
