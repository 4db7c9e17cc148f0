//! Consistent commit computation
//!
//! Given per-agent seed indices, finds the smallest per-agent prefix lengths
//! that dominate the seeds (plus lookahead) and are causally closed: every
//! unsatisfied predecessor of a frozen action is itself frozen.

use std::collections::VecDeque;
use tracing::debug;

use crate::core::errors::Result;
use crate::plan::graph::ActionGraph;
use crate::plan::types::{Index, NO_INDEX};

/// Compute the commit frontier for every agent.
///
/// `seeds[i]` is the last triggered or completed index of agent `i`
/// (`-1` when none). The result is deterministic, never below
/// `min(seeds[i] + offset, len_i - 1)`, and grows monotonically with the seeds.
pub fn consistent_commit(graph: &ActionGraph, seeds: &[Index], offset: usize) -> Result<Vec<Index>> {
    let n = graph.num_agents();

    let mut frontier: Vec<Index> = (0..n)
        .map(|i| {
            let seed = seeds.get(i).copied().unwrap_or(NO_INDEX);
            (seed + offset as Index).min(graph.last_index(i)).max(NO_INDEX)
        })
        .collect();

    // Highest index already scanned per agent; each action is visited once
    let mut scanned: Vec<Index> = vec![NO_INDEX; n];
    let mut queued = vec![true; n];
    let mut worklist: VecDeque<usize> = (0..n).collect();

    while let Some(i) = worklist.pop_front() {
        queued[i] = false;

        let from = (scanned[i] + 1).max(0) as usize;
        let to = frontier[i];
        if to < from as Index {
            continue;
        }

        for k in from..=(to as usize) {
            for edge in graph.predecessors(i, k) {
                // Same-agent edges are already implied by index order
                if edge.agent == i {
                    continue;
                }
                let l = graph.locate(edge)? as Index;
                if frontier[edge.agent] < l {
                    debug!(
                        "Frontier of agent {} raised {} -> {} by ({}, {})",
                        edge.agent, frontier[edge.agent], l, i, k
                    );
                    frontier[edge.agent] = l;
                    if !queued[edge.agent] {
                        queued[edge.agent] = true;
                        worklist.push_back(edge.agent);
                    }
                }
            }
        }
        scanned[i] = to;
    }

    Ok(frontier)
}

/// Whether `frontier` is causally closed over the remaining predecessor edges
pub fn is_causally_closed(graph: &ActionGraph, frontier: &[Index]) -> Result<bool> {
    for (i, &upto) in frontier.iter().enumerate() {
        if upto < 0 {
            continue;
        }
        for k in 0..=(upto as usize) {
            for edge in graph.predecessors(i, k) {
                if edge.agent == i {
                    continue;
                }
                let l = graph.locate(edge)? as Index;
                if frontier.get(edge.agent).copied().unwrap_or(NO_INDEX) < l {
                    return Ok(false);
                }
            }
        }
    }
    Ok(true)
}
