//! Multi-agent plan execution controller
//!
//! Executes a precedence-constrained motion plan on a fleet of robots:
//! dispatches each action once its predecessors completed, tracks progress
//! from robot reports, publishes a causally consistent commit frontier to the
//! planner and splices in plan revisions beyond that frontier.

// Core infrastructure modules
pub mod core {
    pub mod config;
    pub mod errors;
}

pub mod plan;      // Action graph, consistency, validation
pub mod engine;    // Dispatcher, progress, replan, termination
pub mod link;      // Robot/planner interfaces and wire messages
pub mod net;       // WebSocket transports
pub mod instance;
pub mod session;

// Re-exports for convenience
pub use core::config::{ConductorConfig, SoundCues};
pub use core::errors::{ConductorError, Result};
pub use engine::{Engine, PlanSnapshot, PlanState, ReplanOutcome, ReplanRequest, RunReport};
pub use instance::{AgentTask, Instance};
pub use plan::{Action, ActionGraph, Edge};
