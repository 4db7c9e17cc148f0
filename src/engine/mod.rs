//! Execution engine
//!
//! The engine owns the plan state behind one async mutex. Every step
//! (start, completion, replan) runs as a pure state transition under the
//! lock and returns [`Effects`]; the lock is released before any command or
//! planner message goes out, so link latency never extends the critical
//! section.

pub mod state;
pub mod dispatcher;
pub mod progress;
pub mod replan;
pub mod termination;

pub use replan::{ReplanOutcome, ReplanRequest};
pub use state::{CommitNotice, Dispatch, Effects, PlanSnapshot, PlanState};
pub use termination::{RunReport, Termination};

use futures::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::core::config::ConductorConfig;
use crate::core::errors::{ConductorError, Result};
use crate::link::planner::PlannerLink;
use crate::link::protocol::{Message, PlanId};
use crate::link::registry::{LinkId, LinkRegistry};
use crate::link::robot::{RobotCommand, RobotLink};
use crate::plan::graph::ActionGraph;
use crate::plan::types::{AgentIdx, Index};
use crate::plan::validate::validate_plan;

/// Drives one plan to completion against robot and planner links
pub struct Engine {
    run_id: Uuid,
    state: Mutex<PlanState>,
    registry: Arc<LinkRegistry>,
    robots: Arc<dyn RobotLink>,
    planner: Arc<dyn PlannerLink>,
    config: Arc<ConductorConfig>,
    halted: AtomicBool,
    /// Sequence number of the last frontier handed to the planner
    published: Mutex<u64>,
}

impl Engine {
    /// Validate the plan and build an engine around it.
    ///
    /// The plan must have exactly one timeline per registered agent.
    pub fn new(
        graph: ActionGraph,
        plan_id: Option<PlanId>,
        registry: Arc<LinkRegistry>,
        robots: Arc<dyn RobotLink>,
        planner: Arc<dyn PlannerLink>,
        config: Arc<ConductorConfig>,
    ) -> Result<Self> {
        if graph.num_agents() != registry.len() {
            return Err(ConductorError::planning(format!(
                "plan has {} timelines for {} agents",
                graph.num_agents(),
                registry.len()
            )));
        }
        validate_plan(&graph)?;

        let run_id = Uuid::new_v4();
        info!(
            "Run {}: {} agents, {} actions, commit offset {}",
            run_id,
            graph.num_agents(),
            graph.total_actions(),
            config.commit_offset
        );
        let state = PlanState::new(graph, plan_id, config.commit_offset, Instant::now());
        Ok(Self {
            run_id,
            state: Mutex::new(state),
            registry,
            robots,
            planner,
            config,
            halted: AtomicBool::new(false),
            published: Mutex::new(0),
        })
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn registry(&self) -> &Arc<LinkRegistry> {
        &self.registry
    }

    /// Fire every initially ready action.
    ///
    /// Returns the run report when the plan has no actions at all.
    pub async fn start(&self) -> Result<Option<RunReport>> {
        let effects = {
            let mut state = self.state.lock().await;
            state.start(Instant::now())
        };
        let effects = self.guard(effects)?;
        self.apply(&effects, true).await
    }

    /// Handle a raw robot report identified by link and local offset.
    ///
    /// Reports whose counter does not map to a timeline position (setup
    /// moves, counters from before the plan) are ignored.
    pub async fn on_report(&self, link: LinkId, offset: usize, counter: u64) -> Result<Option<RunReport>> {
        let agent = self.registry.agent_for(link, offset).ok_or_else(|| {
            ConductorError::protocol("report from unregistered robot")
                .with_context("link", link.to_string())
                .with_context("offset", offset.to_string())
        })?;
        match self.registry.timeline_index(agent, counter) {
            Some(index) => self.on_completion(agent, index).await,
            None => {
                debug!("agent {:>2} report {} precedes the plan, ignored", agent + 1, counter);
                Ok(None)
            }
        }
    }

    /// Handle completion of `agent`'s action at `index`
    pub async fn on_completion(&self, agent: AgentIdx, index: Index) -> Result<Option<RunReport>> {
        self.ensure_running()?;
        let effects = {
            let mut state = self.state.lock().await;
            state.complete(agent, index, Instant::now())
        };
        let effects = self.guard(effects)?;
        self.apply(&effects, false).await
    }

    /// Validate and apply a plan revision, then acknowledge it to the planner
    pub async fn on_replan(&self, request: ReplanRequest) -> Result<ReplanOutcome> {
        self.ensure_running()?;
        let outcome = {
            let mut state = self.state.lock().await;
            state.replan(request)
        };
        let outcome = self.guard(outcome)?;

        match &outcome {
            ReplanOutcome::Accepted { ack, effects } => {
                self.publish(ack).await;
                self.apply(effects, false).await?;
            }
            ReplanOutcome::Rejected { echo, reason } => {
                info!("Replan rejected ({}), re-asserting frontier", reason);
                self.publish(echo).await;
            }
        }
        Ok(outcome)
    }

    pub async fn snapshot(&self) -> PlanSnapshot {
        self.state.lock().await.snapshot()
    }

    /// Whether the final report has been produced
    pub async fn is_terminated(&self) -> bool {
        self.state.lock().await.termination().is_reported()
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_halted() {
            return Err(ConductorError::internal("engine halted after an unrecoverable fault"));
        }
        Ok(())
    }

    /// Stop accepting steps once a fatal fault surfaces
    fn guard<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            if !err.is_recoverable() {
                error!("Run {} halted: {}", self.run_id, err);
                self.halted.store(true, Ordering::SeqCst);
            }
        }
        result
    }

    /// Perform the I/O decided by one step
    async fn apply(&self, effects: &Effects, initial: bool) -> Result<Option<RunReport>> {
        for dispatch in &effects.dispatched {
            if initial {
                self.command(dispatch.agent, RobotCommand::PlaySound { sound_id: self.config.sounds.start })
                    .await;
            }
            if let Some(sound_id) = self.config.sounds.action_start {
                self.command(dispatch.agent, RobotCommand::PlaySound { sound_id }).await;
            }
            self.command(
                dispatch.agent,
                RobotCommand::MoveTo {
                    x: dispatch.x,
                    y: dispatch.y,
                    max_speed: self.config.max_speed,
                    move_type: self.config.move_type,
                    speed_type: self.config.speed_type,
                },
            )
            .await;
        }

        if let Some(notice) = &effects.commit {
            info!("Commit frontier {:?}", notice.committed);
            self.publish(notice).await;
        }

        for &agent in &effects.finished {
            self.command(agent, RobotCommand::PlaySound { sound_id: self.config.sounds.agent_finished })
                .await;
        }

        let Some(report) = &effects.report else {
            return Ok(None);
        };
        join_all((0..self.registry.len()).map(|agent| async move {
            self.command(agent, RobotCommand::LightOff).await;
            self.command(agent, RobotCommand::PlaySound { sound_id: self.config.sounds.all_finished })
                .await;
        }))
        .await;
        tokio::time::sleep(self.config.grace_period()).await;
        info!("Run {} finished", self.run_id);
        Ok(Some(report.clone()))
    }

    async fn command(&self, agent: AgentIdx, command: RobotCommand) {
        let operation = command.operation();
        if let Err(e) = self.robots.send(agent, command).await {
            warn!("agent {:>2} {} not delivered: {}", agent + 1, operation, e);
        }
    }

    /// Send a frontier unless a later one already went out.
    ///
    /// Notices are stamped under the state lock but sent after it is
    /// released, so concurrent steps may arrive here out of order.
    async fn publish(&self, notice: &CommitNotice) {
        let mut published = self.published.lock().await;
        if notice.seq <= *published {
            debug!("Frontier {:?} superseded, not sent", notice.committed);
            return;
        }
        *published = notice.seq;
        self.notify_planner(Message::commit(notice.plan_id.clone(), &notice.committed))
            .await;
    }

    /// Planner errors after the plan arrived do not stop execution
    async fn notify_planner(&self, message: Message) {
        let kind = message.kind();
        if let Err(e) = self.planner.send(message).await {
            warn!("Planner did not receive {}: {}", kind, e);
        }
    }
}
