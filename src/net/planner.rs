//! WebSocket client for the planning service

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use crate::core::errors::{ConductorError, Result};
use crate::link::planner::PlannerLink;
use crate::link::protocol::{graph_from_wire, Message, PlanId, PlanStatus};
use crate::plan::graph::ActionGraph;

/// Plan received in answer to the initial request
#[derive(Debug, Clone)]
pub struct ReceivedPlan {
    pub plan_id: Option<PlanId>,
    pub graph: ActionGraph,
}

/// Open connection to the planner
pub struct PlannerConnection {
    outbound: mpsc::UnboundedSender<String>,
    inbound: mpsc::UnboundedReceiver<Result<Message>>,
}

impl PlannerConnection {
    pub async fn connect(url: &str) -> Result<Self> {
        info!("Connecting to planner at {}", url);
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| ConductorError::planner_link_with_source(format!("cannot reach {}", url), e))?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = ws_sender.send(WsMessage::Text(text)).await {
                    warn!("Planner write failed: {}", e);
                    break;
                }
            }
        });

        let (in_tx, in_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(frame) = ws_receiver.next().await {
                let decoded = match frame {
                    Ok(WsMessage::Text(text)) => Message::decode_planner(&text),
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => Err(ConductorError::planner_link_with_source("read failed", e)),
                };
                if in_tx.send(decoded).is_err() {
                    break;
                }
            }
            debug!("Planner reader finished");
        });

        Ok(Self {
            outbound: out_tx,
            inbound: in_rx,
        })
    }

    /// Send the problem instance and wait for the plan.
    ///
    /// A failure status, an undecodable answer or a closed link all end the run.
    pub async fn request_plan(&mut self, instance: &Value) -> Result<ReceivedPlan> {
        info!("Requesting plan");
        let started = Instant::now();
        self.outbound
            .send(instance.to_string())
            .map_err(|_| ConductorError::planner_link("planner connection closed before request"))?;

        loop {
            let message = self
                .inbound
                .recv()
                .await
                .ok_or_else(|| ConductorError::planner_link("planner closed the connection before answering"))??;
            let planning_time = started.elapsed();
            match message {
                Message::PlanResult {
                    status: PlanStatus::Success,
                    plan_id,
                    instructions,
                } => {
                    info!("planning: success, planning time (ms): {:.3}", planning_time.as_secs_f64() * 1000.0);
                    return Ok(ReceivedPlan {
                        plan_id,
                        graph: graph_from_wire(instructions)?,
                    });
                }
                Message::PlanResult {
                    status: PlanStatus::Failure,
                    ..
                } => {
                    info!("planning: failure, planning time (ms): {:.3}", planning_time.as_secs_f64() * 1000.0);
                    return Err(ConductorError::planning("planner reported failure"));
                }
                other => warn!("Ignoring {} message while waiting for the plan", other.kind()),
            }
        }
    }

    /// Split into the outbound link for the engine and the inbound message stream
    pub fn split(self) -> (WsPlannerLink, mpsc::UnboundedReceiver<Result<Message>>) {
        (WsPlannerLink { outbound: self.outbound }, self.inbound)
    }
}

/// [`PlannerLink`] over the planner WebSocket
#[derive(Clone)]
pub struct WsPlannerLink {
    outbound: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl PlannerLink for WsPlannerLink {
    async fn send(&self, message: Message) -> Result<()> {
        let text = message.encode()?;
        self.outbound
            .send(text)
            .map_err(|_| ConductorError::planner_link("planner connection closed"))
    }
}
