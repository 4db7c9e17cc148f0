//! External interfaces: robots, planner, and the messages between them

pub mod robot;
pub mod planner;
pub mod registry;
pub mod protocol;
pub mod recording;

pub use robot::{LightScenario, RobotCommand, RobotLink};
pub use planner::PlannerLink;
pub use registry::{AgentSlot, LinkId, LinkRegistry, RegistryBuilder, RobotRecord};
pub use protocol::{EdgeInstruction, Message, PlanId, PlanStatus, ReportBody, WireAction};
pub use recording::{RecordingPlannerLink, RecordingRobotLink};
