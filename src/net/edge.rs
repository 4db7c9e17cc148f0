//! WebSocket hub for edge adapters
//!
//! Each adapter connection gets a link id. Inbound text is decoded into
//! [`HubEvent`]s on one channel; outbound instructions go through a
//! per-connection writer task.

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use crate::core::errors::{ConductorError, Result};
use crate::link::protocol::{EdgeInstruction, Message};
use crate::link::registry::{LinkId, LinkRegistry, RobotRecord};
use crate::link::robot::{RobotCommand, RobotLink};
use crate::plan::types::AgentIdx;

/// Something an edge adapter said
#[derive(Debug, Clone, PartialEq)]
pub enum HubEvent {
    Init { link: LinkId, robots: Vec<RobotRecord> },
    Report { link: LinkId, offset: usize, counter: u64 },
    Disconnected { link: LinkId },
}

/// Accepts edge adapter connections and routes instructions to them
pub struct EdgeHub {
    local_addr: SocketAddr,
    links: DashMap<LinkId, mpsc::UnboundedSender<String>>,
    next_link: AtomicU64,
}

impl EdgeHub {
    /// Listen on `0.0.0.0:port` and start accepting adapters
    pub async fn bind(port: u16) -> anyhow::Result<(Arc<Self>, mpsc::UnboundedReceiver<HubEvent>)> {
        use anyhow::Context;

        let addr = format!("0.0.0.0:{}", port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind edge hub on {}", addr))?;
        let local_addr = listener.local_addr().context("Edge hub has no local address")?;
        info!("Edge hub listening on ws://{}", local_addr);

        let hub = Arc::new(Self {
            local_addr,
            links: DashMap::new(),
            next_link: AtomicU64::new(1),
        });
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        tokio::spawn(Self::accept_loop(hub.clone(), listener, events_tx));
        Ok((hub, events_rx))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Queue an instruction on a link
    pub fn send(&self, link: LinkId, instruction: &EdgeInstruction) -> Result<()> {
        let text = serde_json::to_string(instruction)?;
        let sender = self.links.get(&link).ok_or_else(|| {
            ConductorError::robot_link(instruction.agent, format!("link {} is not connected", link))
        })?;
        sender
            .send(text)
            .map_err(|_| ConductorError::robot_link(instruction.agent, format!("link {} closed", link)))
    }

    /// Robot link that addresses agents through `registry`
    pub fn robot_link(self: &Arc<Self>, registry: Arc<LinkRegistry>) -> EdgeRobotLink {
        EdgeRobotLink {
            hub: self.clone(),
            registry,
        }
    }

    async fn accept_loop(hub: Arc<Self>, listener: TcpListener, events: mpsc::UnboundedSender<HubEvent>) {
        while let Ok((stream, peer)) = listener.accept().await {
            let hub = hub.clone();
            let events = events.clone();
            tokio::spawn(async move {
                match accept_async(stream).await {
                    Ok(ws_stream) => hub.handle_connection(ws_stream, peer, events).await,
                    Err(e) => warn!("Handshake with {} failed: {}", peer, e),
                }
            });
        }
    }

    async fn handle_connection(
        &self,
        ws_stream: tokio_tungstenite::WebSocketStream<TcpStream>,
        peer: SocketAddr,
        events: mpsc::UnboundedSender<HubEvent>,
    ) {
        let link = self.next_link.fetch_add(1, Ordering::SeqCst);
        info!("Edge adapter {} connected as link {}", peer, link);

        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        self.links.insert(link, tx);

        let send_task = tokio::spawn(async move {
            while let Some(text) = rx.recv().await {
                if ws_sender.send(WsMessage::Text(text)).await.is_err() {
                    break;
                }
            }
        });

        while let Some(frame) = ws_receiver.next().await {
            let text = match frame {
                Ok(WsMessage::Text(text)) => text,
                Ok(WsMessage::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    warn!("Link {} read error: {}", link, e);
                    break;
                }
            };
            match Message::decode(&text) {
                Ok(Message::Init { body }) => {
                    let _ = events.send(HubEvent::Init { link, robots: body });
                }
                Ok(Message::Report { body }) => {
                    let _ = events.send(HubEvent::Report {
                        link,
                        offset: body.agent,
                        counter: body.operation_id,
                    });
                }
                Ok(other) => debug!("Link {} sent unexpected {} message", link, other.kind()),
                Err(e) => warn!("Link {}: {}", link, e),
            }
        }

        self.links.remove(&link);
        send_task.abort();
        info!("Edge adapter link {} disconnected", link);
        let _ = events.send(HubEvent::Disconnected { link });
    }
}

/// [`RobotLink`] over the edge hub
pub struct EdgeRobotLink {
    hub: Arc<EdgeHub>,
    registry: Arc<LinkRegistry>,
}

#[async_trait]
impl RobotLink for EdgeRobotLink {
    async fn send(&self, agent: AgentIdx, command: RobotCommand) -> Result<()> {
        let slot = self
            .registry
            .slot(agent)
            .ok_or_else(|| ConductorError::robot_link(agent, "agent not registered"))?;
        self.hub.send(slot.link, &EdgeInstruction::new(slot.offset, &command))
    }
}
