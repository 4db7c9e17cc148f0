//! Progress tracker: applies completion reports to the plan state

use std::time::Instant;
use tracing::{debug, info, warn};

use crate::core::errors::{ConductorError, Result};
use crate::engine::state::{Effects, PlanState};
use crate::plan::types::{AgentIdx, Edge, Index};

impl PlanState {
    /// Apply a completion report for `(agent, index)`.
    ///
    /// Reports that do not match the agent's in-flight action (replays,
    /// stray counters) leave the state untouched and produce no effects.
    /// A successor edge pointing at a missing action is a desync fault.
    pub fn complete(&mut self, agent: AgentIdx, index: Index, now: Instant) -> Result<Effects> {
        if agent >= self.num_agents() {
            return Err(ConductorError::protocol(format!("report for unknown agent {}", agent))
                .with_context("index", index.to_string()));
        }

        let mut effects = Effects::default();
        if index < 0 || self.in_flight[agent] != Some(index as usize) {
            if index <= self.progress(agent) {
                debug!("agent {:>2} duplicate report for action {}, ignored", agent + 1, index);
            } else {
                warn!(
                    "agent {:>2} reported action {} but {:?} is in flight, ignored",
                    agent + 1,
                    index,
                    self.in_flight[agent]
                );
            }
            return Ok(effects);
        }
        let k = index as usize;

        self.in_flight[agent] = None;
        self.progress[agent] = index;

        let (done_id, successors) = match self.graph.action(agent, k) {
            Some(action) => (action.id.clone(), action.suc.clone()),
            None => {
                return Err(ConductorError::desync(
                    agent,
                    index.to_string(),
                    "completed index beyond timeline",
                ))
            }
        };
        info!("agent {:>2} finishes action {:>2}:{:>10}", agent + 1, k, done_id);

        let done = Edge::new(agent, done_id);
        for child in &successors {
            let j_idx = self.graph.locate(child).map_err(|_| {
                ConductorError::desync(
                    child.agent,
                    child.action.clone(),
                    format!("successor of agent {} action {}", agent + 1, done.action),
                )
            })?;
            if self.graph.remove_predecessor(child.agent, j_idx, &done) {
                self.try_fire(child.agent, j_idx, &mut effects);
            }
        }
        // A spliced timeline may leave the next action ready without an edge from this one
        self.try_fire_next(agent, &mut effects);

        self.seeds[agent] = self.seeds[agent].max(index);
        self.refresh_commit(&mut effects)?;

        if !self.graph.has_same_agent_successor(agent, k) && self.termination.mark_finished(agent, now) {
            info!(
                "agent {:>2} finishes all actions ({}/{} done)",
                agent + 1,
                self.termination.finished_count(),
                self.num_agents()
            );
            effects.finished.push(agent);
            effects.report = self.termination.take_report();
        }

        Ok(effects)
    }
}
