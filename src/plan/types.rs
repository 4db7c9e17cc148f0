//! Core plan types
//!
//! Agents are addressed by zero-based index inside the engine. Edges on the
//! wire use one-based agent ids; conversion happens in `link::protocol`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Zero-based agent index
pub type AgentIdx = usize;

/// Opaque action identifier, compared by equality only
pub type ActionId = String;

/// Timeline position; `-1` means "none"
pub type Index = isize;

/// Sentinel for "no action"
pub const NO_INDEX: Index = -1;

/// Reference to an action of some agent
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub agent: AgentIdx,
    pub action: ActionId,
}

impl Edge {
    pub fn new(agent: AgentIdx, action: impl Into<ActionId>) -> Self {
        Self {
            agent,
            action: action.into(),
        }
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.agent, self.action)
    }
}

/// One move instruction on an agent's timeline
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: ActionId,
    /// Target position
    pub x: i32,
    pub y: i32,
    /// Unsatisfied predecessors; consumed as they complete
    pub pre: Vec<Edge>,
    /// Successors, including the same-agent sequencing edge
    pub suc: Vec<Edge>,
}

impl Action {
    /// Create an action with no edges
    pub fn new(id: impl Into<ActionId>, x: i32, y: i32) -> Self {
        Self {
            id: id.into(),
            x,
            y,
            pre: Vec::new(),
            suc: Vec::new(),
        }
    }

    /// Add a predecessor edge
    pub fn with_pre(mut self, agent: AgentIdx, action: impl Into<ActionId>) -> Self {
        self.pre.push(Edge::new(agent, action));
        self
    }

    /// Add a successor edge
    pub fn with_suc(mut self, agent: AgentIdx, action: impl Into<ActionId>) -> Self {
        self.suc.push(Edge::new(agent, action));
        self
    }

    pub fn is_ready(&self) -> bool {
        self.pre.is_empty()
    }

    /// Next action of the same agent, if the sequencing edge exists
    pub fn same_agent_successor(&self, owner: AgentIdx) -> Option<&Edge> {
        self.suc.iter().find(|e| e.agent == owner)
    }
}

/// Lifecycle of an action as seen by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionStatus {
    /// At least one unsatisfied predecessor
    Pending,
    /// Predecessor set empty, not yet sent
    Ready,
    /// Sent to the robot, awaiting its report
    Dispatched,
    /// Report received
    Done,
}
