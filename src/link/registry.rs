//! Registry of physical links and the agents they drive

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::plan::types::{AgentIdx, Index};

/// Identifier assigned to each edge adapter connection
pub type LinkId = u64;

/// One robot as announced by an edge adapter's `init` message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RobotRecord {
    pub id: String,
    pub x: i32,
    pub y: i32,
}

/// Where an agent lives: which link, and its position on that link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSlot {
    pub link: LinkId,
    pub offset: usize,
    pub robot_id: String,
    pub x: i32,
    pub y: i32,
}

/// Collects `init` announcements until enough robots are known
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    slots: Vec<AgentSlot>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record every robot of one link, in the order the link listed them
    pub fn register(&mut self, link: LinkId, records: &[RobotRecord]) {
        for (offset, record) in records.iter().enumerate() {
            self.slots.push(AgentSlot {
                link,
                offset,
                robot_id: record.id.clone(),
                x: record.x,
                y: record.y,
            });
        }
        debug!("Link {} registered {} robots", link, records.len());
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Order agents by robot id (descending) and keep the first `limit`
    pub fn build(mut self, limit: usize) -> LinkRegistry {
        self.slots.sort_by(|a, b| b.robot_id.cmp(&a.robot_id));
        self.slots.truncate(limit);
        info!(
            "Registry built with {} agents: {:?}",
            self.slots.len(),
            self.slots.iter().map(|s| s.robot_id.as_str()).collect::<Vec<_>>()
        );
        LinkRegistry::new(self.slots)
    }
}

/// Owned agent-to-link mapping, passed to the engine at construction
#[derive(Debug, Default)]
pub struct LinkRegistry {
    slots: Vec<AgentSlot>,
    /// Operation counter observed when each agent's setup move completed
    init_counters: DashMap<AgentIdx, u64>,
}

impl LinkRegistry {
    pub fn new(slots: Vec<AgentSlot>) -> Self {
        Self {
            slots,
            init_counters: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot(&self, agent: AgentIdx) -> Option<&AgentSlot> {
        self.slots.get(agent)
    }

    pub fn slots(&self) -> &[AgentSlot] {
        &self.slots
    }

    /// Resolve a `(link, offset)` pair from a report to an agent
    pub fn agent_for(&self, link: LinkId, offset: usize) -> Option<AgentIdx> {
        self.slots
            .iter()
            .position(|s| s.link == link && s.offset == offset)
    }

    /// Record the setup counter. Only the first value per agent is kept;
    /// returns whether this call recorded it.
    pub fn set_init_counter(&self, agent: AgentIdx, counter: u64) -> bool {
        if agent >= self.slots.len() {
            return false;
        }
        let mut recorded = false;
        self.init_counters.entry(agent).or_insert_with(|| {
            recorded = true;
            counter
        });
        recorded
    }

    pub fn init_counter(&self, agent: AgentIdx) -> Option<u64> {
        self.init_counters.get(&agent).map(|c| *c)
    }

    /// Whether every agent has completed its setup move
    pub fn all_initialized(&self) -> bool {
        (0..self.slots.len()).all(|agent| self.init_counters.contains_key(&agent))
    }

    /// Convert a hardware operation counter into a zero-based timeline index
    pub fn timeline_index(&self, agent: AgentIdx, counter: u64) -> Option<Index> {
        let init = self.init_counter(agent)?;
        let index = counter as i128 - init as i128 - 1;
        if index < 0 {
            None
        } else {
            Some(index as Index)
        }
    }

    /// Positions reported by the robots at registration, in agent order
    pub fn start_locations(&self) -> Vec<(i32, i32)> {
        self.slots.iter().map(|s| (s.x, s.y)).collect()
    }
}
