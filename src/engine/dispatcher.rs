//! Dispatcher: decides whether an action may be sent to its robot

use tracing::{debug, info};

use crate::engine::state::{Dispatch, Effects, PlanState};
use crate::plan::types::{AgentIdx, Index};

impl PlanState {
    /// Fire the action at `(agent, index)` if it is the agent's next action,
    /// has no unsatisfied predecessor, and the agent is idle.
    ///
    /// At most one action per agent is ever in flight.
    pub fn try_fire(&mut self, agent: AgentIdx, index: usize, effects: &mut Effects) -> bool {
        let Some(action) = self.graph.action(agent, index) else {
            return false;
        };
        if !action.is_ready() {
            return false;
        }
        if self.is_acting(agent) {
            debug!("agent {:>2} busy, action {} stays ready", agent + 1, index);
            return false;
        }
        if index as Index != self.progress(agent) + 1 {
            debug!(
                "agent {:>2} action {} is not next (progress {})",
                agent + 1,
                index,
                self.progress(agent)
            );
            return false;
        }

        info!("agent {:>2}    starts action {:>2}:{:>10}", agent + 1, index, action.id);
        effects.dispatched.push(Dispatch {
            agent,
            index,
            action: action.id.clone(),
            x: action.x,
            y: action.y,
        });

        self.in_flight[agent] = Some(index);
        self.seeds[agent] = self.seeds[agent].max(index as Index);
        true
    }

    /// Fire the agent's next action if it is idle and the action is ready
    pub fn try_fire_next(&mut self, agent: AgentIdx, effects: &mut Effects) -> bool {
        if self.is_acting(agent) {
            return false;
        }
        let next = self.progress(agent) + 1;
        if next < 0 || next as usize >= self.graph.len(agent) {
            return false;
        }
        self.try_fire(agent, next as usize, effects)
    }
}
