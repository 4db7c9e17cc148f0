//! Robot link: the closed set of commands a robot understands

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::core::errors::Result;
use crate::plan::types::AgentIdx;

/// Light colour and duration for the setup/finish visual state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LightScenario {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    pub duration_ms: u32,
}

impl Default for LightScenario {
    fn default() -> Self {
        Self {
            red: 0,
            green: 0,
            blue: 255,
            duration_ms: 2550,
        }
    }
}

/// Commands sent to a robot. Fire-and-forget.
#[derive(Debug, Clone, PartialEq)]
pub enum RobotCommand {
    MoveTo {
        x: i32,
        y: i32,
        max_speed: u8,
        move_type: u8,
        speed_type: u8,
    },
    PlaySound {
        sound_id: u8,
    },
    LightOn {
        scenario: LightScenario,
    },
    LightOff,
}

impl RobotCommand {
    /// Operation name understood by the edge adapter
    pub fn operation(&self) -> &'static str {
        match self {
            RobotCommand::MoveTo { .. } => "moveTo",
            RobotCommand::PlaySound { .. } => "playPresetSound",
            RobotCommand::LightOn { .. } => "turnOnLightWithScenario",
            RobotCommand::LightOff => "turnOffLight",
        }
    }

    /// Positional parameters for the operation
    pub fn params(&self) -> Value {
        match self {
            RobotCommand::MoveTo {
                x,
                y,
                max_speed,
                move_type,
                speed_type,
            } => json!([
                [{"x": x, "y": y}],
                {"maxSpeed": max_speed, "moveType": move_type, "speedType": speed_type}
            ]),
            RobotCommand::PlaySound { sound_id } => json!([sound_id]),
            RobotCommand::LightOn { scenario } => json!([[{
                "red": scenario.red,
                "green": scenario.green,
                "blue": scenario.blue,
                "durationMs": scenario.duration_ms,
            }]]),
            RobotCommand::LightOff => json!([]),
        }
    }

    pub fn is_move(&self) -> bool {
        matches!(self, RobotCommand::MoveTo { .. })
    }
}

/// Outbound side of the robot link
#[async_trait]
pub trait RobotLink: Send + Sync {
    /// Deliver a command to the robot driving `agent`
    async fn send(&self, agent: AgentIdx, command: RobotCommand) -> Result<()>;
}
