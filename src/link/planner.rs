//! Planner link: outbound side used by the engine

use async_trait::async_trait;

use crate::core::errors::Result;
use crate::link::protocol::Message;

/// Sends commit notifications and replan acknowledgements to the planner
#[async_trait]
pub trait PlannerLink: Send + Sync {
    async fn send(&self, message: Message) -> Result<()>;
}
