//! One complete hardware run: register robots, move them to their starts,
//! obtain a plan and execute it.

use anyhow::{anyhow, bail, Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, warn};

use crate::core::config::ConductorConfig;
use crate::core::errors::ConductorError;
use crate::engine::{Engine, ReplanRequest, RunReport};
use crate::instance::Instance;
use crate::link::registry::{LinkRegistry, RegistryBuilder};
use crate::link::robot::{RobotCommand, RobotLink};
use crate::net::edge::{EdgeHub, HubEvent};
use crate::net::planner::PlannerConnection;

/// Run the controller until every agent finished or a fatal fault occurs
pub async fn run(config: ConductorConfig) -> Result<RunReport> {
    config.validate()?;
    let config = Arc::new(config);

    let path = config
        .instance
        .clone()
        .ok_or_else(|| anyhow!("no problem instance configured"))?;
    let instance = Instance::load(&path).with_context(|| format!("loading {}", path.display()))?;
    info!("Instance {}: {} agents", path.display(), instance.len());

    let (hub, events) = EdgeHub::bind(config.port).await?;
    run_on(config, instance, hub, events).await
}

/// Run `instance` with edge adapters connecting to an already bound hub
pub async fn run_on(
    config: Arc<ConductorConfig>,
    mut instance: Instance,
    hub: Arc<EdgeHub>,
    mut events: mpsc::UnboundedReceiver<HubEvent>,
) -> Result<RunReport> {
    let n = instance.len().min(config.num_agents);
    instance.truncate(n);

    let registry = Arc::new(register_robots(&config, &mut events, n).await?);

    if config.reversed {
        instance.reverse();
    }
    if config.use_current_starts {
        instance.use_current_starts(&registry.start_locations());
    }

    let robots: Arc<dyn RobotLink> = Arc::new(hub.robot_link(registry.clone()));
    setup_robots(&config, &instance, &registry, robots.as_ref(), &mut events).await?;

    let mut connection = PlannerConnection::connect(&config.planner_url()).await?;
    let plan = connection.request_plan(&instance.to_request()?).await?;
    let (planner, mut replans) = connection.split();

    let engine = Arc::new(Engine::new(
        plan.graph,
        plan.plan_id,
        registry.clone(),
        robots.clone(),
        Arc::new(planner),
        config.clone(),
    )?);

    if let Some(report) = engine.start().await? {
        return Ok(report);
    }

    let (fatal_tx, mut fatal_rx) = mpsc::unbounded_channel();
    let listener = {
        let engine = engine.clone();
        tokio::spawn(async move {
            while let Some(message) = replans.recv().await {
                let request = match message.and_then(ReplanRequest::try_from) {
                    Ok(request) => request,
                    Err(e) => {
                        warn!("Ignoring planner message: {}", e);
                        continue;
                    }
                };
                if let Err(e) = engine.on_replan(request).await {
                    if e.is_recoverable() {
                        warn!("Replan failed: {}", e);
                    } else {
                        let _ = fatal_tx.send(e);
                        break;
                    }
                }
            }
            info!("Planner link closed, re-planning unavailable");
        })
    };

    let outcome = execute(&engine, &mut events, &mut fatal_rx).await;
    listener.abort();
    outcome
}

async fn execute(
    engine: &Engine,
    events: &mut mpsc::UnboundedReceiver<HubEvent>,
    fatal: &mut mpsc::UnboundedReceiver<ConductorError>,
) -> Result<RunReport> {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(HubEvent::Report { link, offset, counter }) => {
                    match engine.on_report(link, offset, counter).await {
                        Ok(Some(report)) => return Ok(report),
                        Ok(None) => {}
                        Err(e) if e.is_recoverable() => warn!("Report ignored: {}", e),
                        Err(e) => return Err(e.into()),
                    }
                }
                Some(HubEvent::Init { link, .. }) => warn!("Link {} registered after setup, ignored", link),
                Some(HubEvent::Disconnected { link }) => warn!("Link {} lost during execution", link),
                None => bail!("edge hub stopped"),
            },
            Some(e) = fatal.recv() => {
                error!("Fatal planner fault: {}", e);
                return Err(e.into());
            }
        }
    }
}

/// Wait until at least `n` robots announced themselves, then give late
/// adapters `wait_time` to connect. Agents are ordered by robot id, descending.
async fn register_robots(
    config: &ConductorConfig,
    events: &mut mpsc::UnboundedReceiver<HubEvent>,
    n: usize,
) -> Result<LinkRegistry> {
    let mut builder = RegistryBuilder::new();
    let deadline = Instant::now() + config.setup_timeout();

    while builder.len() < n {
        match next_event(events, config.poll_interval(), deadline).await? {
            Some(HubEvent::Init { link, robots }) => {
                info!("Link {} brought {} robots", link, robots.len());
                builder.register(link, &robots);
            }
            Some(other) => debug!("Ignoring {:?} during registration", other),
            None if Instant::now() >= deadline => {
                bail!("only {} of {} robots registered in time", builder.len(), n)
            }
            None => {}
        }
    }

    let grace_end = Instant::now() + config.wait_time();
    loop {
        let remaining = grace_end.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match timeout(remaining, events.recv()).await {
            Ok(Some(HubEvent::Init { link, robots })) => {
                info!("Link {} brought {} robots", link, robots.len());
                builder.register(link, &robots);
            }
            Ok(Some(_)) => {}
            Ok(None) => bail!("edge hub stopped"),
            Err(_) => break,
        }
    }

    let registry = builder.build(n);
    for (agent, slot) in registry.slots().iter().enumerate() {
        info!(
            "agent {:>2} = robot {} (link {}, offset {}) at ({}, {})",
            agent + 1,
            slot.robot_id,
            slot.link,
            slot.offset,
            slot.x,
            slot.y
        );
    }
    Ok(registry)
}

/// Move every robot to its start and record its first report as the
/// operation counter baseline.
async fn setup_robots(
    config: &ConductorConfig,
    instance: &Instance,
    registry: &LinkRegistry,
    robots: &dyn RobotLink,
    events: &mut mpsc::UnboundedReceiver<HubEvent>,
) -> Result<()> {
    for (agent, task) in instance.agents.iter().enumerate().take(registry.len()) {
        robots
            .send(agent, RobotCommand::PlaySound { sound_id: config.sounds.setup })
            .await?;
        robots
            .send(
                agent,
                RobotCommand::MoveTo {
                    x: task.x_init,
                    y: task.y_init,
                    max_speed: config.max_speed,
                    move_type: config.move_type,
                    speed_type: config.speed_type,
                },
            )
            .await?;
    }

    let deadline = Instant::now() + config.setup_timeout();
    while !registry.all_initialized() {
        match next_event(events, config.poll_interval(), deadline).await? {
            Some(HubEvent::Report { link, offset, counter }) => {
                let Some(agent) = registry.agent_for(link, offset) else {
                    warn!("Setup report from unknown robot (link {}, offset {})", link, offset);
                    continue;
                };
                if registry.set_init_counter(agent, counter) {
                    debug!("agent {:>2} at start, counter {}", agent + 1, counter);
                    robots
                        .send(agent, RobotCommand::LightOn { scenario: config.setup_light.clone() })
                        .await?;
                }
            }
            Some(HubEvent::Disconnected { link }) => bail!("link {} lost during setup", link),
            Some(HubEvent::Init { link, .. }) => warn!("Link {} registered after setup, ignored", link),
            None if Instant::now() >= deadline => bail!("robots did not reach their starts in time"),
            None => {}
        }
    }
    info!("All {} robots at their starts", registry.len());
    Ok(())
}

/// Next hub event, or `None` after one poll interval without one
async fn next_event(
    events: &mut mpsc::UnboundedReceiver<HubEvent>,
    poll: Duration,
    deadline: Instant,
) -> Result<Option<HubEvent>> {
    let wait = poll.min(deadline.saturating_duration_since(Instant::now()));
    match timeout(wait, events.recv()).await {
        Ok(Some(event)) => Ok(Some(event)),
        Ok(None) => bail!("edge hub stopped"),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use serde_json::{json, Value};
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tokio_tungstenite::{accept_async, connect_async};

    use crate::link::protocol::{EdgeInstruction, Message, ReportBody};
    use crate::link::registry::RobotRecord;

    fn config() -> ConductorConfig {
        ConductorConfig {
            wait_time_ms: 200,
            poll_interval_ms: 10,
            grace_period_ms: 0,
            setup_timeout_ms: 5_000,
            ..Default::default()
        }
    }

    fn instance() -> Instance {
        Instance::from_yaml_str(
            "agents:\n  - {x_init: 0, y_init: 0, x_goal: 5, y_goal: 5}\n  - {x_init: 1, y_init: 0, x_goal: 6, y_goal: 6}\n",
        )
        .unwrap()
    }

    /// Edge adapter announcing `ids` and answering every move with a report
    /// after `delay`. Yields `(offset, operation)` for each instruction seen.
    async fn spawn_adapter(
        port: u16,
        ids: &[&str],
        first_counter: u64,
        delay: Duration,
    ) -> mpsc::UnboundedReceiver<(usize, String)> {
        let (mut ws, _) = connect_async(format!("ws://127.0.0.1:{}", port)).await.unwrap();
        let body: Vec<RobotRecord> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| RobotRecord {
                id: id.to_string(),
                x: i as i32,
                y: 0,
            })
            .collect();
        ws.send(WsMessage::Text(Message::Init { body }.encode().unwrap()))
            .await
            .unwrap();

        let (seen_tx, seen_rx) = mpsc::unbounded_channel();
        let mut counters = vec![first_counter - 1; ids.len()];
        tokio::spawn(async move {
            while let Some(Ok(WsMessage::Text(text))) = ws.next().await {
                let instruction: EdgeInstruction = serde_json::from_str(&text).unwrap();
                if instruction.operation == "moveTo" {
                    tokio::time::sleep(delay).await;
                    counters[instruction.agent] += 1;
                    let report = Message::Report {
                        body: ReportBody {
                            agent: instruction.agent,
                            operation_id: counters[instruction.agent],
                        },
                    };
                    if ws.send(WsMessage::Text(report.encode().unwrap())).await.is_err() {
                        break;
                    }
                }
                let _ = seen_tx.send((instruction.agent, instruction.operation));
            }
        });
        seen_rx
    }

    /// Planner answering the plan request with `plan`, then sending `follow_up`.
    /// Yields every text frame it receives.
    async fn spawn_planner(plan: Value, follow_up: Option<Value>) -> (u16, mpsc::UnboundedReceiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (seen_tx, seen_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let mut answered = false;
            while let Some(Ok(WsMessage::Text(text))) = ws.next().await {
                let _ = seen_tx.send(text);
                if !answered {
                    answered = true;
                    let _ = ws.send(WsMessage::Text(plan.to_string())).await;
                    if let Some(message) = &follow_up {
                        let _ = ws.send(WsMessage::Text(message.to_string())).await;
                    }
                }
            }
        });
        (port, seen_rx)
    }

    /// a1 on agent 1, b1 on agent 2 waiting on a1
    fn plan() -> Value {
        json!({
            "status": "success",
            "planId": "p1",
            "instructions": [
                [{"id": "a1", "x_to": 5, "y_to": 5, "pre": [], "suc": [[2, "b1"]]}],
                [{"id": "b1", "x_to": 6, "y_to": 6, "pre": [[1, "a1"]], "suc": []}]
            ]
        })
    }

    #[tokio::test]
    async fn test_registration_orders_by_descending_id() {
        let config = config();
        let (hub, mut events) = EdgeHub::bind(0).await.unwrap();
        let port = hub.local_addr().port();
        let _first = spawn_adapter(port, &["r1", "r3"], 1, Duration::ZERO).await;
        let _late = spawn_adapter(port, &["r2"], 1, Duration::ZERO).await;

        let registry = register_robots(&config, &mut events, 2).await.unwrap();
        let ids: Vec<&str> = registry.slots().iter().map(|s| s.robot_id.as_str()).collect();
        assert_eq!(ids, vec!["r3", "r2"]);
        assert_ne!(registry.slots()[0].link, registry.slots()[1].link);
        assert_eq!(registry.slots()[0].offset, 1);
    }

    #[tokio::test]
    async fn test_registration_times_out() {
        let config = ConductorConfig {
            setup_timeout_ms: 50,
            ..config()
        };
        let (_hub, mut events) = EdgeHub::bind(0).await.unwrap();
        let err = register_robots(&config, &mut events, 1).await.unwrap_err();
        assert!(err.to_string().contains("registered in time"));
    }

    #[tokio::test]
    async fn test_setup_records_init_counters() {
        let config = config();
        let (hub, mut events) = EdgeHub::bind(0).await.unwrap();
        let mut seen = spawn_adapter(hub.local_addr().port(), &["a", "b"], 41, Duration::ZERO).await;
        let registry = Arc::new(register_robots(&config, &mut events, 2).await.unwrap());
        let robots = hub.robot_link(registry.clone());

        setup_robots(&config, &instance(), &registry, &robots, &mut events)
            .await
            .unwrap();
        assert_eq!(registry.init_counter(0), Some(41));
        assert_eq!(registry.init_counter(1), Some(41));

        let mut operations = Vec::new();
        while operations.len() < 6 {
            let next = timeout(Duration::from_secs(5), seen.recv()).await.unwrap().unwrap();
            operations.push(next);
        }
        // Robot "b" sorts first and sits at offset 1 on the link
        let for_b: Vec<&str> = operations
            .iter()
            .filter(|(offset, _)| *offset == 1)
            .map(|(_, op)| op.as_str())
            .collect();
        assert_eq!(for_b, vec!["playPresetSound", "moveTo", "turnOnLightWithScenario"]);
    }

    #[tokio::test]
    async fn test_setup_times_out_without_reports() {
        let config = ConductorConfig {
            setup_timeout_ms: 100,
            ..config()
        };
        let (hub, mut events) = EdgeHub::bind(0).await.unwrap();
        let url = format!("ws://127.0.0.1:{}", hub.local_addr().port());
        let (mut silent, _) = connect_async(url).await.unwrap();
        silent
            .send(WsMessage::Text(r#"{"type":"init","body":[{"id":"s","x":0,"y":0}]}"#.to_string()))
            .await
            .unwrap();
        let registry = Arc::new(register_robots(&config, &mut events, 1).await.unwrap());
        let robots = hub.robot_link(registry.clone());

        let err = setup_robots(&config, &instance(), &registry, &robots, &mut events)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("did not reach"));
        assert!(!registry.all_initialized());
    }

    #[tokio::test]
    async fn test_full_run_produces_report() {
        let (planner_port, mut planner_seen) = spawn_planner(plan(), None).await;
        let config = Arc::new(ConductorConfig {
            planning_port: planner_port,
            ..config()
        });
        let (hub, events) = EdgeHub::bind(0).await.unwrap();
        let _adapter = spawn_adapter(hub.local_addr().port(), &["r2", "r1"], 1, Duration::ZERO).await;

        let report = timeout(Duration::from_secs(10), run_on(config, instance(), hub, events))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.agents, 2);
        assert_eq!(report.finish_times_ms.len(), 2);

        let request: Value = serde_json::from_str(&planner_seen.recv().await.unwrap()).unwrap();
        assert_eq!(request["agents"].as_array().map(Vec::len), Some(2));
        let commit: Value = serde_json::from_str(&planner_seen.recv().await.unwrap()).unwrap();
        assert_eq!(commit["type"], "commit");
        assert_eq!(commit["planId"], "p1");
    }

    #[tokio::test]
    async fn test_desynchronized_replan_ends_run() {
        // Frontier after start is [a1, nothing]; the revision points at a missing action
        let replan = json!({
            "type": "replan",
            "planId": "p2",
            "committedIndexes": [1, 0],
            "instructions": [[{"id": "n1", "x_to": 1, "y_to": 1, "pre": [[2, "ghost"]]}], []]
        });
        let (planner_port, _planner_seen) = spawn_planner(plan(), Some(replan)).await;
        let config = Arc::new(ConductorConfig {
            planning_port: planner_port,
            ..config()
        });
        let (hub, events) = EdgeHub::bind(0).await.unwrap();
        let _adapter =
            spawn_adapter(hub.local_addr().port(), &["r2", "r1"], 1, Duration::from_millis(300)).await;

        let err = timeout(Duration::from_secs(10), run_on(config, instance(), hub, events))
            .await
            .unwrap()
            .unwrap_err();
        let category = err.downcast_ref::<ConductorError>().map(|e| e.category());
        assert_eq!(category, Some("desync"));
    }
}
