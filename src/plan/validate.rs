//! Structural checks run on a freshly received plan

use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet};

use crate::core::errors::{ConductorError, Result};
use crate::plan::graph::ActionGraph;
use crate::plan::types::Edge;

/// Validate an action graph before execution.
///
/// Rejects duplicate ids within a timeline, edges to missing actions, and
/// precedence cycles (which would deadlock the dispatcher).
pub fn validate_plan(graph: &ActionGraph) -> Result<()> {
    validate_unique_ids(graph)?;
    validate_edge_targets(graph)?;
    validate_acyclic(graph)
}

/// Action ids must be unique within each timeline
pub fn validate_unique_ids(graph: &ActionGraph) -> Result<()> {
    for (agent, timeline) in graph.timelines().iter().enumerate() {
        let mut seen = HashSet::new();
        for action in timeline {
            if !seen.insert(action.id.as_str()) {
                return Err(ConductorError::validation_field(
                    format!("duplicate action id '{}' on agent {}", action.id, agent),
                    "id",
                ));
            }
        }
    }
    Ok(())
}

/// Every pre/suc edge must resolve
pub fn validate_edge_targets(graph: &ActionGraph) -> Result<()> {
    for timeline in graph.timelines() {
        for action in timeline {
            for edge in action.pre.iter().chain(action.suc.iter()) {
                graph.locate(edge)?;
            }
        }
    }
    Ok(())
}

/// The precedence relation, together with timeline order, must be acyclic
pub fn validate_acyclic(graph: &ActionGraph) -> Result<()> {
    let mut dag: DiGraph<Edge, ()> = DiGraph::new();
    let mut node_indices: HashMap<Edge, NodeIndex> = HashMap::new();

    for (agent, timeline) in graph.timelines().iter().enumerate() {
        for action in timeline {
            let edge = Edge::new(agent, action.id.clone());
            let idx = dag.add_node(edge.clone());
            node_indices.insert(edge, idx);
        }
    }

    for (agent, timeline) in graph.timelines().iter().enumerate() {
        for (k, action) in timeline.iter().enumerate() {
            let to = node_indices[&Edge::new(agent, action.id.clone())];
            if k > 0 {
                let from = node_indices[&Edge::new(agent, timeline[k - 1].id.clone())];
                dag.add_edge(from, to, ());
            }
            for pre in &action.pre {
                let from = node_indices.get(pre).ok_or_else(|| {
                    ConductorError::desync(pre.agent, pre.action.clone(), "predecessor not in plan")
                })?;
                dag.add_edge(*from, to, ());
            }
        }
    }

    if is_cyclic_directed(&dag) {
        return Err(ConductorError::planning(
            "precedence graph contains cycles",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::types::Action;

    #[test]
    fn test_valid_plan() {
        let graph = ActionGraph::new(vec![
            vec![
                Action::new("a1", 0, 0).with_suc(0, "a2").with_suc(1, "b1"),
                Action::new("a2", 0, 0).with_pre(0, "a1"),
            ],
            vec![Action::new("b1", 0, 0).with_pre(0, "a1")],
        ]);
        assert!(validate_plan(&graph).is_ok());
    }

    #[test]
    fn test_cycle_rejected() {
        // a1 waits on b1, b1 waits on a2, a2 follows a1
        let graph = ActionGraph::new(vec![
            vec![
                Action::new("a1", 0, 0).with_pre(1, "b1"),
                Action::new("a2", 0, 0),
            ],
            vec![Action::new("b1", 0, 0).with_pre(0, "a2")],
        ]);
        let err = validate_plan(&graph).unwrap_err();
        assert_eq!(err.category(), "planning");
    }

    #[test]
    fn test_dangling_successor_rejected() {
        let graph = ActionGraph::new(vec![vec![Action::new("a1", 0, 0).with_suc(0, "a9")]]);
        let err = validate_plan(&graph).unwrap_err();
        assert_eq!(err.category(), "desync");
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let graph = ActionGraph::new(vec![vec![Action::new("a1", 0, 0), Action::new("a1", 1, 1)]]);
        let err = validate_plan(&graph).unwrap_err();
        assert_eq!(err.category(), "validation");
    }
}
