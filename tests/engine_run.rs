use pretty_assertions::assert_eq;
use std::sync::Arc;

use conductor::link::protocol::Message;
use conductor::link::recording::{RecordingPlannerLink, RecordingRobotLink};
use conductor::link::registry::{LinkRegistry, RegistryBuilder, RobotRecord};
use conductor::link::robot::RobotCommand;
use conductor::{Action, ActionGraph, ConductorConfig, Engine};

fn registry(n: usize) -> Arc<LinkRegistry> {
    let mut builder = RegistryBuilder::new();
    // Descending ids keep agent order equal to offset order
    let records: Vec<RobotRecord> = (0..n)
        .map(|i| RobotRecord {
            id: format!("robot-{}", 9 - i),
            x: 0,
            y: 0,
        })
        .collect();
    builder.register(1, &records);
    let registry = builder.build(n);
    for agent in 0..n {
        registry.set_init_counter(agent, 100);
    }
    Arc::new(registry)
}

fn config() -> ConductorConfig {
    ConductorConfig {
        grace_period_ms: 0,
        ..Default::default()
    }
}

struct Harness {
    engine: Engine,
    robots: RecordingRobotLink,
    planner: RecordingPlannerLink,
}

fn harness(graph: ActionGraph, config: ConductorConfig) -> Harness {
    let robots = RecordingRobotLink::new();
    let planner = RecordingPlannerLink::new();
    let engine = Engine::new(
        graph.clone(),
        Some(serde_json::json!("plan-1")),
        registry(graph.num_agents()),
        Arc::new(robots.clone()),
        Arc::new(planner.clone()),
        Arc::new(config),
    )
    .unwrap();
    Harness {
        engine,
        robots,
        planner,
    }
}

/// Agent 1: a1 -> a2, agent 2: b1 waiting on a1
fn two_agent_plan() -> ActionGraph {
    ActionGraph::new(vec![
        vec![
            Action::new("a1", 10, 10).with_suc(0, "a2").with_suc(1, "b1"),
            Action::new("a2", 20, 20).with_pre(0, "a1"),
        ],
        vec![Action::new("b1", 30, 30).with_pre(0, "a1")],
    ])
}

#[tokio::test]
async fn test_two_agent_run() {
    let h = harness(two_agent_plan(), config());

    assert!(h.engine.start().await.unwrap().is_none());
    assert_eq!(h.robots.moves_for(0), vec![(10, 10)]);
    assert!(h.robots.moves_for(1).is_empty());
    assert!(h
        .robots
        .commands()
        .contains(&(0, RobotCommand::PlaySound { sound_id: 3 })));

    // counter 101 = first plan action after the setup move at 100
    assert!(h.engine.on_report(1, 0, 101).await.unwrap().is_none());
    assert_eq!(h.robots.moves_for(0), vec![(10, 10), (20, 20)]);
    assert_eq!(h.robots.moves_for(1), vec![(30, 30)]);

    assert!(h.engine.on_report(1, 0, 102).await.unwrap().is_none());
    let report = h.engine.on_report(1, 1, 101).await.unwrap().unwrap();
    assert_eq!(report.agents, 2);
    assert!(report.makespan_ms >= 0.0);
    assert!(report.sum_of_costs_ms >= report.makespan_ms);

    let snapshot = h.engine.snapshot().await;
    assert_eq!(snapshot.progress, vec![1, 0]);
    assert_eq!(snapshot.finished, vec![true, true]);
    assert!(h.engine.is_terminated().await);

    let commands = h.robots.commands();
    for agent in 0..2 {
        assert!(commands.contains(&(agent, RobotCommand::PlaySound { sound_id: 6 })));
        assert!(commands.contains(&(agent, RobotCommand::LightOff)));
        assert!(commands.contains(&(agent, RobotCommand::PlaySound { sound_id: 7 })));
    }
}

#[tokio::test]
async fn test_commit_notifications_are_monotone_and_one_based() {
    let h = harness(two_agent_plan(), config());
    h.engine.start().await.unwrap();
    h.engine.on_completion(0, 0).await.unwrap();
    h.engine.on_completion(0, 1).await.unwrap();
    h.engine.on_completion(1, 0).await.unwrap();

    let history = h.planner.committed_history();
    assert_eq!(history.first(), Some(&vec![1, 0]));
    assert_eq!(history.last(), Some(&vec![2, 1]));
    for pair in history.windows(2) {
        assert!(pair[0].iter().zip(&pair[1]).all(|(a, b)| a <= b));
    }
    assert!(h.planner.messages().iter().all(|m| matches!(
        m,
        Message::Commit { plan_id: Some(id), .. } if id == "plan-1"
    )));
}

#[tokio::test]
async fn test_replayed_report_is_ignored() {
    let h = harness(two_agent_plan(), config());
    h.engine.start().await.unwrap();
    h.engine.on_report(1, 0, 101).await.unwrap();
    let moves = h.robots.move_count();
    let snapshot = h.engine.snapshot().await;

    assert!(h.engine.on_report(1, 0, 101).await.unwrap().is_none());
    assert_eq!(h.robots.move_count(), moves);
    assert_eq!(h.engine.snapshot().await, snapshot);
}

#[tokio::test]
async fn test_at_most_one_action_in_flight() {
    // Agent 1 has three independent actions; only one may be out at a time
    let graph = ActionGraph::new(vec![vec![
        Action::new("a1", 1, 0).with_suc(0, "a2"),
        Action::new("a2", 2, 0).with_pre(0, "a1").with_suc(0, "a3"),
        Action::new("a3", 3, 0).with_pre(0, "a2"),
    ]]);
    let h = harness(graph, config());
    h.engine.start().await.unwrap();

    for step in 0..3 {
        let snapshot = h.engine.snapshot().await;
        assert_eq!(snapshot.in_flight, vec![Some(step)]);
        assert_eq!(h.robots.move_count(), step + 1);
        h.engine.on_completion(0, step as isize).await.unwrap();
    }
    assert!(h.engine.is_terminated().await);
}

#[tokio::test]
async fn test_termination_reported_exactly_once() {
    // Three agents in a chain: c1 waits on b1, b1 waits on a1
    let graph = ActionGraph::new(vec![
        vec![Action::new("a1", 0, 0).with_suc(1, "b1")],
        vec![Action::new("b1", 0, 0).with_pre(0, "a1").with_suc(2, "c1")],
        vec![Action::new("c1", 0, 0).with_pre(1, "b1")],
    ]);
    let h = harness(graph, config());
    h.engine.start().await.unwrap();

    let mut reports = 0;
    for agent in 0..3 {
        if h.engine.on_completion(agent, 0).await.unwrap().is_some() {
            reports += 1;
        }
    }
    // A late duplicate must not produce a second report
    if h.engine.on_completion(2, 0).await.unwrap().is_some() {
        reports += 1;
    }
    assert_eq!(reports, 1);
    assert_eq!(h.engine.snapshot().await.progress, vec![0, 0, 0]);
}

#[tokio::test]
async fn test_empty_plan_terminates_on_start() {
    let h = harness(ActionGraph::new(vec![vec![], vec![]]), config());
    let report = h.engine.start().await.unwrap().unwrap();
    assert_eq!(report.sum_of_costs_ms, 0.0);
    assert_eq!(report.makespan_ms, 0.0);
    assert_eq!(h.robots.move_count(), 0);
}

#[tokio::test]
async fn test_action_start_cue() {
    let mut config = config();
    config.sounds.action_start = Some(4);
    let h = harness(two_agent_plan(), config);
    h.engine.start().await.unwrap();
    h.engine.on_completion(0, 0).await.unwrap();

    let cues = h
        .robots
        .commands()
        .into_iter()
        .filter(|(_, c)| *c == RobotCommand::PlaySound { sound_id: 4 })
        .count();
    assert_eq!(cues, 3);
}

#[tokio::test]
async fn test_cyclic_plan_rejected() {
    let graph = ActionGraph::new(vec![
        vec![Action::new("a1", 0, 0).with_pre(1, "b1").with_suc(1, "b1")],
        vec![Action::new("b1", 0, 0).with_pre(0, "a1").with_suc(0, "a1")],
    ]);
    let result = Engine::new(
        graph,
        None,
        registry(2),
        Arc::new(RecordingRobotLink::new()),
        Arc::new(RecordingPlannerLink::new()),
        Arc::new(config()),
    );
    assert_eq!(result.err().map(|e| e.category()), Some("planning"));
}
