//! Replan coordinator: validates plan revisions against the commit frontier
//! and splices the new suffixes into the action graph.

use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::core::errors::{ConductorError, Result};
use crate::engine::state::{CommitNotice, Effects, PlanState};
use crate::link::protocol::{index_from_wire, timelines_from_wire, Message, PlanId};
use crate::plan::graph::ActionGraph;
use crate::plan::types::{Action, AgentIdx, Edge, Index};
use crate::plan::validate::{validate_acyclic, validate_unique_ids};

/// A plan revision in engine coordinates
#[derive(Debug, Clone, PartialEq)]
pub struct ReplanRequest {
    pub plan_id: Option<PlanId>,
    /// Frontier the planner computed the revision against
    pub committed: Vec<Index>,
    /// New actions per agent; an empty suffix leaves the agent untouched
    pub suffixes: Vec<Vec<Action>>,
}

impl TryFrom<Message> for ReplanRequest {
    type Error = ConductorError;

    fn try_from(message: Message) -> Result<Self> {
        match message {
            Message::Replan {
                plan_id,
                committed_indexes,
                instructions,
            } => Ok(Self {
                plan_id,
                committed: committed_indexes.into_iter().map(index_from_wire).collect(),
                suffixes: timelines_from_wire(instructions)?,
            }),
            other => Err(ConductorError::protocol(format!(
                "expected replan, got {}",
                other.kind()
            ))),
        }
    }
}

/// Result of a replan attempt
#[derive(Debug)]
pub enum ReplanOutcome {
    /// Revision applied; `ack` carries the frontier the revision was based on
    Accepted { ack: CommitNotice, effects: Effects },
    /// Revision refused; nothing changed and `echo` carries the authoritative frontier
    Rejected { echo: CommitNotice, reason: ConductorError },
}

impl ReplanOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ReplanOutcome::Accepted { .. })
    }
}

impl PlanState {
    /// Apply a plan revision.
    ///
    /// The revision is built on a copy of the graph and swapped in only once
    /// every edge resolves and the result passes the same structural checks
    /// as an initial plan. A rejected or faulty revision mutates nothing.
    pub fn replan(&mut self, request: ReplanRequest) -> Result<ReplanOutcome> {
        let n = self.num_agents();

        if request.committed != self.committed {
            warn!(
                "Replan rejected: planner frontier {:?}, controller frontier {:?}",
                request.committed, self.committed
            );
            let reason = ConductorError::stale_replan(request.committed, self.committed.clone());
            return Ok(ReplanOutcome::Rejected {
                echo: self.commit_notice(),
                reason,
            });
        }
        if request.suffixes.len() > n {
            return Err(ConductorError::protocol(format!(
                "replan carries {} timelines for {} agents",
                request.suffixes.len(),
                n
            )));
        }

        let mut graph = self.graph.clone();
        let extended: Vec<AgentIdx> = request
            .suffixes
            .iter()
            .enumerate()
            .filter(|(_, suffix)| !suffix.is_empty())
            .map(|(agent, _)| agent)
            .collect();

        let mut removed = HashSet::new();
        for &agent in &extended {
            removed.extend(graph.truncate(agent, self.committed[agent]));
        }
        graph.prune_dangling(&removed);

        let mut fresh: Vec<(AgentIdx, usize)> = Vec::new();
        for (agent, suffix) in request.suffixes.into_iter().enumerate() {
            if suffix.is_empty() {
                continue;
            }
            let first = graph.len(agent);
            let count = suffix.len();
            graph.append(agent, suffix);
            if first > 0 {
                let prev = first - 1;
                graph.splice(agent, prev, first, prev as Index > self.progress(agent));
            }
            fresh.extend((first..first + count).map(|k| (agent, k)));
        }

        self.reconcile(&mut graph, &fresh)?;

        if let Err(reason) = validate_unique_ids(&graph).and_then(|_| validate_acyclic(&graph)) {
            warn!("Replan rejected: {}", reason);
            return Ok(ReplanOutcome::Rejected {
                echo: self.commit_notice(),
                reason,
            });
        }

        self.graph = graph;
        if request.plan_id.is_some() {
            self.plan_id = request.plan_id;
        }
        info!(
            "Replan accepted: {} agents extended, {} actions removed, {} added",
            extended.len(),
            removed.len(),
            fresh.len()
        );

        let mut effects = Effects::default();
        for &agent in &extended {
            if self.termination.reopen(agent) {
                info!("agent {:>2} resumes after replan", agent + 1);
            }
        }
        for agent in 0..n {
            self.try_fire_next(agent, &mut effects);
        }

        let ack = self.commit_notice();
        self.refresh_commit(&mut effects)?;
        Ok(ReplanOutcome::Accepted { ack, effects })
    }

    /// Make the edges of newly appended actions bidirectional.
    ///
    /// Edges to actions that are already done are dropped: those actions will
    /// never report again. Successor edges into dispatched or done actions
    /// are dropped because those cannot be blocked any more.
    fn reconcile(&self, graph: &mut ActionGraph, fresh: &[(AgentIdx, usize)]) -> Result<()> {
        for &(agent, k) in fresh {
            let Some(action) = graph.action(agent, k) else {
                continue;
            };
            let me = Edge::new(agent, action.id.clone());
            let pre = action.pre.clone();
            let suc = action.suc.clone();

            for edge in &pre {
                let l = graph.locate(edge)?;
                if self.is_done(edge.agent, l) {
                    debug!("Dropping satisfied predecessor {} of {}", edge, me);
                    graph.drop_predecessor(agent, k, edge);
                } else {
                    graph.ensure_successor(edge, me.clone())?;
                }
            }
            for edge in &suc {
                let l = graph.locate(edge)?;
                if self.is_done(edge.agent, l) || self.in_flight[edge.agent] == Some(l) {
                    debug!("Dropping successor {} of {}, already underway", edge, me);
                    graph.drop_successor(agent, k, edge);
                } else {
                    graph.ensure_predecessor(edge, me.clone())?;
                }
            }
        }
        Ok(())
    }

    fn is_done(&self, agent: AgentIdx, index: usize) -> bool {
        index as Index <= self.progress(agent)
    }
}
