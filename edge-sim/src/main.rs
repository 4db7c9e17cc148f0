//! Simulated edge adapter.
//!
//! Announces `k` virtual robots to the controller and answers every `moveTo`
//! with a report after a fixed travel delay. Sound and light commands are
//! only logged.

use anyhow::{Context, Result};
use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn, Level};

use conductor::link::protocol::{EdgeInstruction, Message, ReportBody};
use conductor::link::registry::RobotRecord;

#[derive(Parser, Debug)]
#[command(name = "edge-sim", about = "Simulated robots for the conductor controller")]
struct Args {
    /// Number of simulated robots
    #[arg(short = 'k', long, default_value_t = 1)]
    agents: usize,

    /// Controller address
    #[arg(short, long, default_value = "localhost")]
    addr: String,

    /// Controller port
    #[arg(short, long, default_value_t = 3000)]
    port: u16,

    /// Simulated travel time per move (ms)
    #[arg(short, long, default_value_t = 300)]
    delay_ms: u64,

    /// Robot id prefix; ids are `<prefix>-<n>`
    #[arg(long, default_value = "sim")]
    prefix: String,

    /// First operation counter of every robot
    #[arg(long, default_value_t = 1)]
    first_counter: u64,

    #[arg(short, long)]
    verbose: bool,
}

/// State of one virtual robot
struct Robot {
    x: i32,
    y: i32,
    counter: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .init();

    let url = format!("ws://{}:{}/", args.addr, args.port);
    let (ws_stream, _) = connect_async(url.as_str())
        .await
        .with_context(|| format!("connecting to {}", url))?;
    info!("Connected to controller at {}", url);
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if ws_sender.send(WsMessage::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let mut robots: Vec<Robot> = (0..args.agents)
        .map(|i| Robot {
            x: 100 + 50 * i as i32,
            y: 100,
            counter: args.first_counter.saturating_sub(1),
        })
        .collect();
    let records: Vec<RobotRecord> = robots
        .iter()
        .enumerate()
        .map(|(i, r)| RobotRecord {
            id: format!("{}-{:03}", args.prefix, i),
            x: r.x,
            y: r.y,
        })
        .collect();
    tx.send(Message::Init { body: records }.encode()?)?;
    info!("Announced {} robots", args.agents);

    let delay = Duration::from_millis(args.delay_ms);
    while let Some(frame) = ws_receiver.next().await {
        let text = match frame.context("controller connection failed")? {
            WsMessage::Text(text) => text,
            WsMessage::Close(_) => break,
            _ => continue,
        };
        let instruction: EdgeInstruction = match serde_json::from_str(&text) {
            Ok(instruction) => instruction,
            Err(e) => {
                warn!("Undecodable instruction {}: {}", text, e);
                continue;
            }
        };
        let Some(robot) = robots.get_mut(instruction.agent) else {
            warn!("Instruction for unknown robot {}", instruction.agent);
            continue;
        };

        match instruction.operation.as_str() {
            "moveTo" => {
                let target = &instruction.params[0][0];
                let (Some(x), Some(y)) = (target["x"].as_i64(), target["y"].as_i64()) else {
                    warn!("moveTo without target: {}", instruction.params);
                    continue;
                };
                robot.x = x as i32;
                robot.y = y as i32;
                robot.counter += 1;
                debug!("robot {} moving to ({}, {}), op {}", instruction.agent, x, y, robot.counter);

                let report = Message::Report {
                    body: ReportBody {
                        agent: instruction.agent,
                        operation_id: robot.counter,
                    },
                }
                .encode()?;
                let tx = tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(report);
                });
            }
            "playPresetSound" | "turnOnLightWithScenario" | "turnOffLight" => {
                info!("robot {} {} {}", instruction.agent, instruction.operation, instruction.params);
            }
            other => warn!("robot {} ignoring unsupported operation {}", instruction.agent, other),
        }
    }

    info!("Controller closed the connection");
    writer.abort();
    Ok(())
}
