use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::errors::{ConductorError, Result};
use crate::link::robot::LightScenario;

/// Controller configuration with all tuning parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConductorConfig {
    // Problem instance
    /// Path of the YAML problem instance
    pub instance: Option<PathBuf>,
    /// Upper bound on the number of agents taken from the instance
    pub num_agents: usize,
    /// Swap starts and goals of every agent
    pub reversed: bool,
    /// Replace instance starts with the positions reported by the robots
    pub use_current_starts: bool,

    // Networking
    /// Port the edge adapters connect to
    pub port: u16,
    /// Planning service address
    pub planning_address: String,
    /// Planning service port
    pub planning_port: u16,

    // Motion
    /// Maximum speed passed with every move
    pub max_speed: u8,
    /// Hardware move type (2 = move without backing up)
    pub move_type: u8,
    /// Hardware speed profile (3 = accelerate then decelerate)
    pub speed_type: u8,

    // Commit frontier
    /// Lookahead added past the last triggered index when freezing timelines
    pub commit_offset: usize,

    // Waits
    /// Extra wait for late edge adapters after enough robots registered (ms)
    pub wait_time_ms: u64,
    /// Poll interval for bounded setup waits (ms)
    pub poll_interval_ms: u64,
    /// Delay between the all-finished cue and the final report (ms)
    pub grace_period_ms: u64,
    /// Upper bound on robot registration and setup moves (ms)
    pub setup_timeout_ms: u64,

    // Feedback
    pub sounds: SoundCues,
    pub setup_light: LightScenario,
}

/// Preset sound ids played at lifecycle points
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SoundCues {
    pub setup: u8,
    pub start: u8,
    /// Played whenever an action is dispatched; disabled by default
    pub action_start: Option<u8>,
    pub agent_finished: u8,
    pub all_finished: u8,
}

impl Default for SoundCues {
    fn default() -> Self {
        Self {
            setup: 1,
            start: 3,
            action_start: None,
            agent_finished: 6,
            all_finished: 7,
        }
    }
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            instance: None,
            num_agents: 1000,
            reversed: false,
            use_current_starts: false,

            port: 3000,
            planning_address: "127.0.0.1".to_string(),
            planning_port: 8081,

            max_speed: 80,
            move_type: 2,
            speed_type: 3,

            commit_offset: 0,

            wait_time_ms: 2000,
            poll_interval_ms: 100,
            grace_period_ms: 500,
            setup_timeout_ms: 60_000,

            sounds: SoundCues::default(),
            setup_light: LightScenario::default(),
        }
    }
}

impl ConductorConfig {
    /// Load a configuration file; missing keys fall back to defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConductorError::io(format!("read config {}", path.display()), e))?;
        let config: Self = serde_yaml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.num_agents == 0 {
            return Err(ConductorError::configuration_field(
                "num_agents must be greater than 0",
                "num_agents",
            ));
        }
        if self.max_speed == 0 {
            return Err(ConductorError::configuration_field(
                "max_speed must be greater than 0",
                "max_speed",
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConductorError::configuration_field(
                "poll_interval_ms must be greater than 0",
                "poll_interval_ms",
            ));
        }
        if self.setup_timeout_ms < self.poll_interval_ms {
            return Err(ConductorError::configuration_field(
                "setup_timeout_ms must not be shorter than poll_interval_ms",
                "setup_timeout_ms",
            ));
        }
        if self.planning_address.is_empty() {
            return Err(ConductorError::configuration_field(
                "planning_address cannot be empty",
                "planning_address",
            ));
        }
        Ok(())
    }

    pub fn planner_url(&self) -> String {
        format!("ws://{}:{}", self.planning_address, self.planning_port)
    }

    pub fn wait_time(&self) -> Duration {
        Duration::from_millis(self.wait_time_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn setup_timeout(&self) -> Duration {
        Duration::from_millis(self.setup_timeout_ms)
    }
}
