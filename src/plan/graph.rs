//! Per-agent action timelines with cross-referenced precedence edges

use std::collections::HashSet;
use tracing::debug;

use crate::core::errors::{ConductorError, Result};
use crate::plan::types::{Action, ActionId, AgentIdx, Edge, Index};

/// Action graph: one ordered timeline per agent
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionGraph {
    timelines: Vec<Vec<Action>>,
}

impl ActionGraph {
    pub fn new(timelines: Vec<Vec<Action>>) -> Self {
        Self { timelines }
    }

    pub fn num_agents(&self) -> usize {
        self.timelines.len()
    }

    /// Number of actions on an agent's timeline
    pub fn len(&self, agent: AgentIdx) -> usize {
        self.timelines.get(agent).map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.timelines.iter().all(Vec::is_empty)
    }

    /// Total number of actions over all agents
    pub fn total_actions(&self) -> usize {
        self.timelines.iter().map(Vec::len).sum()
    }

    /// Index of the last action of an agent, `-1` for an empty timeline
    pub fn last_index(&self, agent: AgentIdx) -> Index {
        self.len(agent) as Index - 1
    }

    pub fn timeline(&self, agent: AgentIdx) -> &[Action] {
        self.timelines.get(agent).map_or(&[], Vec::as_slice)
    }

    pub fn timelines(&self) -> &[Vec<Action>] {
        &self.timelines
    }

    pub fn action(&self, agent: AgentIdx, index: usize) -> Option<&Action> {
        self.timelines.get(agent)?.get(index)
    }

    fn action_mut(&mut self, agent: AgentIdx, index: usize) -> Option<&mut Action> {
        self.timelines.get_mut(agent)?.get_mut(index)
    }

    /// Position of an action id on an agent's timeline
    pub fn index_of(&self, agent: AgentIdx, id: &str) -> Option<usize> {
        self.timelines.get(agent)?.iter().position(|a| a.id == id)
    }

    /// Resolve an edge to a timeline index; a missing target is a desync fault
    pub fn locate(&self, edge: &Edge) -> Result<usize> {
        self.index_of(edge.agent, &edge.action).ok_or_else(|| {
            ConductorError::desync(edge.agent, edge.action.clone(), "edge target not in timeline")
        })
    }

    pub fn predecessors(&self, agent: AgentIdx, index: usize) -> &[Edge] {
        self.action(agent, index).map_or(&[], |a| a.pre.as_slice())
    }

    pub fn successors(&self, agent: AgentIdx, index: usize) -> &[Edge] {
        self.action(agent, index).map_or(&[], |a| a.suc.as_slice())
    }

    /// Remove one predecessor edge. Returns whether the predecessor set is now empty.
    pub fn remove_predecessor(&mut self, agent: AgentIdx, index: usize, edge: &Edge) -> bool {
        match self.action_mut(agent, index) {
            Some(action) => {
                action.pre.retain(|e| e != edge);
                action.pre.is_empty()
            }
            None => false,
        }
    }

    /// Whether the action at `(agent, index)` has a sequencing edge to its own agent
    pub fn has_same_agent_successor(&self, agent: AgentIdx, index: usize) -> bool {
        self.action(agent, index)
            .and_then(|a| a.same_agent_successor(agent))
            .is_some()
    }

    /// Keep actions `0..=keep` of an agent and return the dropped ones as edges.
    /// Edges pointing into the dropped suffix are left for `prune_dangling`.
    pub fn truncate(&mut self, agent: AgentIdx, keep: Index) -> Vec<Edge> {
        let Some(timeline) = self.timelines.get_mut(agent) else {
            return Vec::new();
        };
        let new_len = (keep + 1).max(0) as usize;
        if new_len >= timeline.len() {
            return Vec::new();
        }
        let removed: Vec<Edge> = timeline
            .drain(new_len..)
            .map(|a| Edge::new(agent, a.id))
            .collect();
        debug!("Agent {} truncated to {} actions, dropped {}", agent, new_len, removed.len());
        removed
    }

    /// Drop every edge that references a removed action
    pub fn prune_dangling(&mut self, removed: &HashSet<Edge>) {
        if removed.is_empty() {
            return;
        }
        for timeline in &mut self.timelines {
            for action in timeline.iter_mut() {
                action.pre.retain(|e| !removed.contains(e));
                action.suc.retain(|e| !removed.contains(e));
            }
        }
    }

    /// Append new actions to an agent's timeline
    pub fn append(&mut self, agent: AgentIdx, actions: Vec<Action>) {
        if let Some(timeline) = self.timelines.get_mut(agent) {
            timeline.extend(actions);
        }
    }

    /// Add the sequencing edge `prev -> next` on one agent.
    ///
    /// The successor half is always recorded. The predecessor half is only
    /// added when `block_next` is set: a completed `prev` will never report
    /// again, so blocking `next` on it would stall the agent forever.
    pub fn splice(&mut self, agent: AgentIdx, prev: usize, next: usize, block_next: bool) {
        let (Some(prev_id), Some(next_id)) = (
            self.action(agent, prev).map(|a| a.id.clone()),
            self.action(agent, next).map(|a| a.id.clone()),
        ) else {
            return;
        };

        let to_next = Edge::new(agent, next_id);
        if let Some(action) = self.action_mut(agent, prev) {
            if !action.suc.contains(&to_next) {
                action.suc.push(to_next);
            }
        }

        let from_prev = Edge::new(agent, prev_id);
        if let Some(action) = self.action_mut(agent, next) {
            if block_next {
                if !action.pre.contains(&from_prev) {
                    action.pre.push(from_prev);
                }
            } else {
                action.pre.retain(|e| *e != from_prev);
            }
        }
    }

    /// Ensure `target` lists `from` as a successor (reverse of a predecessor edge)
    pub fn ensure_successor(&mut self, target: &Edge, from: Edge) -> Result<()> {
        let index = self.locate(target)?;
        if let Some(action) = self.action_mut(target.agent, index) {
            if !action.suc.contains(&from) {
                action.suc.push(from);
            }
        }
        Ok(())
    }

    /// Ensure `target` lists `from` as a predecessor (reverse of a successor edge)
    pub fn ensure_predecessor(&mut self, target: &Edge, from: Edge) -> Result<()> {
        let index = self.locate(target)?;
        if let Some(action) = self.action_mut(target.agent, index) {
            if !action.pre.contains(&from) {
                action.pre.push(from);
            }
        }
        Ok(())
    }

    /// Remove the predecessor edge `from` on `(agent, index)` without any readiness check
    pub fn drop_predecessor(&mut self, agent: AgentIdx, index: usize, from: &Edge) {
        if let Some(action) = self.action_mut(agent, index) {
            action.pre.retain(|e| e != from);
        }
    }

    pub fn drop_successor(&mut self, agent: AgentIdx, index: usize, to: &Edge) {
        if let Some(action) = self.action_mut(agent, index) {
            action.suc.retain(|e| e != to);
        }
    }

    /// Ids present on an agent's timeline
    pub fn ids(&self, agent: AgentIdx) -> Vec<ActionId> {
        self.timeline(agent).iter().map(|a| a.id.clone()).collect()
    }
}
