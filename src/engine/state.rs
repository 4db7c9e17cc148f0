//! Plan state: the action graph plus per-agent progress scalars.
//!
//! Every mutation goes through `&mut PlanState` and returns [`Effects`]
//! describing the I/O to perform afterwards, so the caller can release its
//! lock before talking to robots or the planner.

use serde::Serialize;
use std::time::Instant;
use tracing::{debug, info};

use crate::core::errors::Result;
use crate::engine::termination::{RunReport, Termination};
use crate::link::protocol::PlanId;
use crate::plan::consistency::consistent_commit;
use crate::plan::graph::ActionGraph;
use crate::plan::types::{ActionId, ActionStatus, AgentIdx, Index, NO_INDEX};

/// A move decided inside the critical section
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    pub agent: AgentIdx,
    pub index: usize,
    pub action: ActionId,
    pub x: i32,
    pub y: i32,
}

/// A commit frontier to publish to the planner
#[derive(Debug, Clone, PartialEq)]
pub struct CommitNotice {
    pub plan_id: Option<PlanId>,
    pub committed: Vec<Index>,
    /// Issue order under the engine lock; a lower value is superseded
    pub seq: u64,
}

/// Side effects captured under the lock, executed after release
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Effects {
    pub dispatched: Vec<Dispatch>,
    pub commit: Option<CommitNotice>,
    /// Agents that exhausted their timeline during this step
    pub finished: Vec<AgentIdx>,
    /// Set exactly once, when the last agent finishes
    pub report: Option<RunReport>,
}

impl Effects {
    pub fn is_empty(&self) -> bool {
        self.dispatched.is_empty()
            && self.commit.is_none()
            && self.finished.is_empty()
            && self.report.is_none()
    }
}

/// Read-only view of the plan state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanSnapshot {
    pub progress: Vec<Index>,
    pub seeds: Vec<Index>,
    pub committed: Vec<Index>,
    pub in_flight: Vec<Option<usize>>,
    pub lengths: Vec<usize>,
    pub finished: Vec<bool>,
}

/// Shared plan state; the single unit guarded by the engine lock
#[derive(Debug, Clone)]
pub struct PlanState {
    pub(crate) plan_id: Option<PlanId>,
    pub(crate) graph: ActionGraph,
    /// Last completed index per agent
    pub(crate) progress: Vec<Index>,
    /// Last triggered or completed index per agent
    pub(crate) seeds: Vec<Index>,
    /// Last published commit frontier; never decreases
    pub(crate) committed: Vec<Index>,
    /// Dispatched, not yet reported action per agent
    pub(crate) in_flight: Vec<Option<usize>>,
    pub(crate) offset: usize,
    pub(crate) termination: Termination,
    /// Sequence number of the last issued [`CommitNotice`]
    pub(crate) commit_seq: u64,
}

impl PlanState {
    pub fn new(graph: ActionGraph, plan_id: Option<PlanId>, offset: usize, started: Instant) -> Self {
        let n = graph.num_agents();
        Self {
            plan_id,
            graph,
            progress: vec![NO_INDEX; n],
            seeds: vec![NO_INDEX; n],
            committed: vec![NO_INDEX; n],
            in_flight: vec![None; n],
            offset,
            termination: Termination::new(n, started),
            commit_seq: 0,
        }
    }

    pub fn num_agents(&self) -> usize {
        self.graph.num_agents()
    }

    pub fn graph(&self) -> &ActionGraph {
        &self.graph
    }

    pub fn plan_id(&self) -> Option<&PlanId> {
        self.plan_id.as_ref()
    }

    pub fn committed(&self) -> &[Index] {
        &self.committed
    }

    pub fn progress(&self, agent: AgentIdx) -> Index {
        self.progress.get(agent).copied().unwrap_or(NO_INDEX)
    }

    pub fn is_acting(&self, agent: AgentIdx) -> bool {
        matches!(self.in_flight.get(agent), Some(Some(_)))
    }

    pub fn termination(&self) -> &Termination {
        &self.termination
    }

    /// Lifecycle state of one action
    pub fn status(&self, agent: AgentIdx, index: usize) -> Option<ActionStatus> {
        let action = self.graph.action(agent, index)?;
        let status = if (index as Index) <= self.progress(agent) {
            ActionStatus::Done
        } else if self.in_flight[agent] == Some(index) {
            ActionStatus::Dispatched
        } else if action.is_ready() {
            ActionStatus::Ready
        } else {
            ActionStatus::Pending
        };
        Some(status)
    }

    pub fn snapshot(&self) -> PlanSnapshot {
        let n = self.num_agents();
        PlanSnapshot {
            progress: self.progress.clone(),
            seeds: self.seeds.clone(),
            committed: self.committed.clone(),
            in_flight: self.in_flight.clone(),
            lengths: (0..n).map(|i| self.graph.len(i)).collect(),
            finished: (0..n).map(|i| self.termination.is_finished(i)).collect(),
        }
    }

    /// Fire every initially ready action and publish the first frontier
    pub fn start(&mut self, now: Instant) -> Result<Effects> {
        let mut effects = Effects::default();
        for agent in 0..self.num_agents() {
            if self.graph.len(agent) == 0 {
                info!("agent {:>2} has no actions", agent + 1);
                if self.termination.mark_finished(agent, now) {
                    effects.finished.push(agent);
                }
            } else {
                self.try_fire(agent, 0, &mut effects);
            }
        }
        self.refresh_commit(&mut effects)?;
        effects.report = self.termination.take_report();
        Ok(effects)
    }

    /// Recompute the consistent frontier from the seeds; record a notice if it moved
    pub(crate) fn refresh_commit(&mut self, effects: &mut Effects) -> Result<()> {
        let frontier = consistent_commit(&self.graph, &self.seeds, self.offset)?;
        let merged: Vec<Index> = frontier
            .iter()
            .zip(&self.committed)
            .map(|(&now, &before)| now.max(before))
            .collect();
        if merged != self.committed {
            debug!("Commit frontier {:?} -> {:?}", self.committed, merged);
            self.committed = merged;
            effects.commit = Some(self.commit_notice());
        }
        Ok(())
    }

    /// Stamp the current frontier for publication
    pub(crate) fn commit_notice(&mut self) -> CommitNotice {
        self.commit_seq += 1;
        CommitNotice {
            plan_id: self.plan_id.clone(),
            committed: self.committed.clone(),
            seq: self.commit_seq,
        }
    }
}
