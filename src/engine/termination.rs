//! Termination detection and run metrics

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::info;

use crate::plan::types::AgentIdx;

/// Aggregate performance of a completed run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub agents: usize,
    /// Per-agent finish time relative to run start
    pub finish_times_ms: Vec<f64>,
    /// Sum over agents of finish time minus run start
    pub sum_of_costs_ms: f64,
    /// Latest finish time relative to run start
    pub makespan_ms: f64,
}

/// Tracks which agents have exhausted their timelines
#[derive(Debug, Clone)]
pub struct Termination {
    started: Instant,
    started_at: DateTime<Utc>,
    finished: Vec<Option<Duration>>,
    reported: bool,
}

impl Termination {
    pub fn new(num_agents: usize, started: Instant) -> Self {
        Self {
            started,
            started_at: Utc::now(),
            finished: vec![None; num_agents],
            reported: false,
        }
    }

    /// Mark an agent finished. Returns false if it already was.
    pub fn mark_finished(&mut self, agent: AgentIdx, now: Instant) -> bool {
        match self.finished.get_mut(agent) {
            Some(slot) if slot.is_none() => {
                *slot = Some(now.saturating_duration_since(self.started));
                true
            }
            _ => false,
        }
    }

    /// Put a finished agent back to work (its timeline was extended)
    pub fn reopen(&mut self, agent: AgentIdx) -> bool {
        match self.finished.get_mut(agent) {
            Some(slot) if slot.is_some() => {
                *slot = None;
                true
            }
            _ => false,
        }
    }

    pub fn is_finished(&self, agent: AgentIdx) -> bool {
        matches!(self.finished.get(agent), Some(Some(_)))
    }

    pub fn finished_count(&self) -> usize {
        self.finished.iter().filter(|f| f.is_some()).count()
    }

    pub fn all_finished(&self) -> bool {
        self.finished.iter().all(Option::is_some)
    }

    /// Produce the report the first time every agent is finished; `None` afterwards
    pub fn take_report(&mut self) -> Option<RunReport> {
        if self.reported || !self.all_finished() {
            return None;
        }
        self.reported = true;

        let finish_times_ms: Vec<f64> = self
            .finished
            .iter()
            .map(|f| f.map_or(0.0, |d| d.as_secs_f64() * 1000.0))
            .collect();
        let sum_of_costs_ms: f64 = finish_times_ms.iter().sum();
        let makespan_ms = finish_times_ms.iter().copied().fold(0.0, f64::max);

        info!("sum_of_costs (ms): {:.3}", sum_of_costs_ms);
        info!("    makespan (ms): {:.3}", makespan_ms);

        Some(RunReport {
            started_at: self.started_at,
            agents: self.finished.len(),
            finish_times_ms,
            sum_of_costs_ms,
            makespan_ms,
        })
    }

    pub fn is_reported(&self) -> bool {
        self.reported
    }
}
