//! Problem instance sent to the planner

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

use crate::core::errors::{ConductorError, Result};

/// Start and goal of one agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentTask {
    pub x_init: i32,
    pub y_init: i32,
    pub x_goal: i32,
    pub y_goal: i32,
}

/// Multi-agent problem instance.
///
/// Keys other than `agents` are planner metadata and pass through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub agents: Vec<AgentTask>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Instance {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConductorError::io(format!("read instance {}", path.display()), e))?;
        Self::from_yaml_str(&text)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let instance: Self = serde_yaml::from_str(text)?;
        if instance.agents.is_empty() {
            return Err(ConductorError::validation_field("instance has no agents", "agents"));
        }
        Ok(instance)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Keep only the first `n` agents
    pub fn truncate(&mut self, n: usize) {
        self.agents.truncate(n);
    }

    /// Swap every agent's start and goal
    pub fn reverse(&mut self) {
        for task in &mut self.agents {
            std::mem::swap(&mut task.x_init, &mut task.x_goal);
            std::mem::swap(&mut task.y_init, &mut task.y_goal);
        }
    }

    /// Replace starts with observed positions, in agent order
    pub fn use_current_starts(&mut self, locations: &[(i32, i32)]) {
        for (task, &(x, y)) in self.agents.iter_mut().zip(locations) {
            task.x_init = x;
            task.y_init = y;
        }
    }

    /// The instance as the planner expects it
    pub fn to_request(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}
