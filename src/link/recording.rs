//! In-memory links that record everything sent through them

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use crate::core::errors::{ConductorError, Result};
use crate::link::planner::PlannerLink;
use crate::link::protocol::Message;
use crate::link::robot::{RobotCommand, RobotLink};
use crate::plan::types::AgentIdx;

/// Robot link that buffers commands instead of sending them
#[derive(Clone, Default)]
pub struct RecordingRobotLink {
    sent: Arc<Mutex<Vec<(AgentIdx, RobotCommand)>>>,
}

impl RecordingRobotLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything sent so far
    pub fn commands(&self) -> Vec<(AgentIdx, RobotCommand)> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }

    /// Move targets sent to one agent, in order
    pub fn moves_for(&self, agent: AgentIdx) -> Vec<(i32, i32)> {
        self.commands()
            .into_iter()
            .filter_map(|(a, cmd)| match cmd {
                RobotCommand::MoveTo { x, y, .. } if a == agent => Some((x, y)),
                _ => None,
            })
            .collect()
    }

    /// Number of move commands over all agents
    pub fn move_count(&self) -> usize {
        self.commands().iter().filter(|(_, c)| c.is_move()).count()
    }

    pub fn clear(&self) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.clear();
        }
    }
}

#[async_trait]
impl RobotLink for RecordingRobotLink {
    async fn send(&self, agent: AgentIdx, command: RobotCommand) -> Result<()> {
        self.sent
            .lock()
            .map_err(|_| ConductorError::robot_link(agent, "recording buffer poisoned"))?
            .push((agent, command));
        Ok(())
    }
}

/// Planner link that buffers messages instead of sending them
#[derive(Clone, Default)]
pub struct RecordingPlannerLink {
    sent: Arc<Mutex<Vec<Message>>>,
}

impl RecordingPlannerLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }

    /// Committed indexes (wire form) of every message sent, in order
    pub fn committed_history(&self) -> Vec<Vec<i64>> {
        self.messages()
            .into_iter()
            .filter_map(|m| match m {
                Message::Commit {
                    committed_indexes, ..
                } => Some(committed_indexes),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.clear();
        }
    }
}

#[async_trait]
impl PlannerLink for RecordingPlannerLink {
    async fn send(&self, message: Message) -> Result<()> {
        self.sent
            .lock()
            .map_err(|_| ConductorError::planner_link("recording buffer poisoned"))?
            .push(message);
        Ok(())
    }
}
