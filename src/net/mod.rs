//! WebSocket transports for the edge adapters and the planner

pub mod edge;
pub mod planner;

pub use edge::{EdgeHub, EdgeRobotLink, HubEvent};
pub use planner::{PlannerConnection, ReceivedPlan, WsPlannerLink};
