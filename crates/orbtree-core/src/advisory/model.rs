//! Advisory gateway wire types: the simplified graph sent out and the
//! ordering strategies that come back.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::domain::model::{CIStatus, Forest};

/// One workspace as the gateway sees it. No cache state, no display data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphWorkspace {
    pub workspace_id: String,
    pub branch: String,
    pub parent_branch: String,
    pub pr_number: Option<u64>,
    pub ci_status: CIStatus,
}

/// The dependency graph handed to the advisory gateway.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimplifiedGraph {
    pub workspaces: Vec<GraphWorkspace>,
}

impl SimplifiedGraph {
    /// Flatten a forest depth-first in tree order.
    pub fn from_forest(forest: &Forest) -> Self {
        let workspaces = forest
            .trees
            .values()
            .flat_map(|tree| tree.nodes())
            .map(|node| GraphWorkspace {
                workspace_id: node.workspace_id.clone(),
                branch: node.branch.clone(),
                parent_branch: node.parent_branch.clone(),
                pr_number: node.pr_number,
                ci_status: node.ci_status,
            })
            .collect();
        Self { workspaces }
    }

    pub fn len(&self) -> usize {
        self.workspaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workspaces.is_empty()
    }
}

/// A group of workspaces the gateway claims can proceed simultaneously.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phase {
    pub phase_number: u32,
    pub workspace_ids: Vec<String>,
    #[serde(default)]
    pub description: String,
}

/// One named ordering of all work, partitioned into phases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Strategy {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub phases: Vec<Phase>,
    #[serde(default)]
    pub bottleneck_branches: Vec<String>,
}

/// Structured gateway answer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvisoryResult {
    pub strategies: Vec<Strategy>,
    #[serde(default)]
    pub analysis_summary: String,
    #[serde(default)]
    pub dependency_insights: Vec<String>,
}

impl AdvisoryResult {
    /// An empty result carrying only an explanatory summary.
    pub fn empty(summary: impl Into<String>) -> Self {
        Self {
            strategies: Vec::new(),
            analysis_summary: summary.into(),
            dependency_insights: Vec::new(),
        }
    }

    /// Check the result against the graph it answers.
    ///
    /// Rejects results without strategies, blank or repeated strategy ids,
    /// strategies without phases, phase numbers that are zero or not strictly
    /// increasing, and references to workspaces absent from `graph`.
    pub fn validate(&self, graph: &SimplifiedGraph) -> Result<(), String> {
        if self.strategies.is_empty() {
            return Err("response contains no strategies".to_string());
        }
        let known: HashSet<&str> = graph
            .workspaces
            .iter()
            .map(|w| w.workspace_id.as_str())
            .collect();
        let mut ids = HashSet::new();
        for strategy in &self.strategies {
            if strategy.id.trim().is_empty() {
                return Err("strategy with empty id".to_string());
            }
            if !ids.insert(strategy.id.as_str()) {
                return Err(format!("duplicate strategy id '{}'", strategy.id));
            }
            if strategy.phases.is_empty() {
                return Err(format!("strategy '{}' has no phases", strategy.id));
            }
            let mut previous = 0u32;
            for phase in &strategy.phases {
                if phase.phase_number <= previous {
                    return Err(format!(
                        "strategy '{}': phase {} out of order",
                        strategy.id, phase.phase_number
                    ));
                }
                previous = phase.phase_number;
                if let Some(unknown) = phase
                    .workspace_ids
                    .iter()
                    .find(|id| !known.contains(id.as_str()))
                {
                    return Err(format!(
                        "strategy '{}': unknown workspace '{unknown}'",
                        strategy.id
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(ids: &[&str]) -> SimplifiedGraph {
        SimplifiedGraph {
            workspaces: ids
                .iter()
                .map(|id| GraphWorkspace {
                    workspace_id: id.to_string(),
                    branch: id.to_string(),
                    parent_branch: String::new(),
                    pr_number: None,
                    ci_status: CIStatus::Unknown,
                })
                .collect(),
        }
    }

    fn strategy(id: &str, phases: Vec<(u32, Vec<&str>)>) -> Strategy {
        Strategy {
            id: id.to_string(),
            name: id.to_string(),
            description: String::new(),
            phases: phases
                .into_iter()
                .map(|(n, ids)| Phase {
                    phase_number: n,
                    workspace_ids: ids.into_iter().map(String::from).collect(),
                    description: String::new(),
                })
                .collect(),
            bottleneck_branches: Vec::new(),
        }
    }

    #[test]
    fn test_valid_result_passes() {
        let result = AdvisoryResult {
            strategies: vec![strategy("s1", vec![(1, vec!["a", "b"]), (2, vec!["c"])])],
            analysis_summary: "ok".to_string(),
            dependency_insights: Vec::new(),
        };
        assert!(result.validate(&graph(&["a", "b", "c"])).is_ok());
    }

    #[test]
    fn test_unknown_workspace_rejected() {
        let result = AdvisoryResult {
            strategies: vec![strategy("s1", vec![(1, vec!["ghost"])])],
            ..AdvisoryResult::default()
        };
        let err = result.validate(&graph(&["a"])).unwrap_err();
        assert!(err.contains("ghost"));
    }

    #[test]
    fn test_phase_order_and_empty_rejected() {
        let out_of_order = AdvisoryResult {
            strategies: vec![strategy("s1", vec![(2, vec!["a"]), (1, vec!["b"])])],
            ..AdvisoryResult::default()
        };
        assert!(out_of_order.validate(&graph(&["a", "b"])).is_err());
        assert!(AdvisoryResult::empty("x").validate(&graph(&["a"])).is_err());
    }

    #[test]
    fn test_duplicate_strategy_ids_rejected() {
        let dup = AdvisoryResult {
            strategies: vec![
                strategy("s", vec![(1, vec!["a"])]),
                strategy("s", vec![(1, vec!["a"])]),
            ],
            ..AdvisoryResult::default()
        };
        assert!(dup.validate(&graph(&["a"])).unwrap_err().contains("duplicate"));
    }

    #[test]
    fn test_result_parses_with_optional_fields_missing() {
        let parsed: AdvisoryResult = serde_json::from_str(
            r#"{"strategies":[{"id":"s","name":"S","phases":[{"phase_number":1,"workspace_ids":["a"]}]}]}"#,
        )
        .unwrap();
        assert_eq!(parsed.strategies[0].phases[0].workspace_ids, vec!["a"]);
        assert!(parsed.dependency_insights.is_empty());
    }
}
