//! Wire messages exchanged with edge adapters and the planner
//!
//! Inbound text is decoded into [`Message`] at the boundary; the engine only
//! ever sees typed values. Agent ids in edges and committed indexes are
//! one-based on the wire and zero-based inside the engine.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::errors::{ConductorError, Result};
use crate::link::registry::RobotRecord;
use crate::link::robot::RobotCommand;
use crate::plan::graph::ActionGraph;
use crate::plan::types::{Action, Edge, Index, NO_INDEX};

/// Opaque plan identifier, echoed back as received
pub type PlanId = Value;

/// Wire edge: `[agentId (1-based), actionId]`
pub type WireEdge = (usize, String);

/// Body of a robot report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportBody {
    /// Robot offset on its link
    pub agent: usize,
    /// Strictly increasing per-robot operation counter
    pub operation_id: u64,
}

/// Action as the planner encodes it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireAction {
    pub id: String,
    #[serde(alias = "targetX")]
    pub x_to: i32,
    #[serde(alias = "targetY")]
    pub y_to: i32,
    #[serde(default)]
    pub pre: Vec<WireEdge>,
    #[serde(default)]
    pub suc: Vec<WireEdge>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanStatus {
    Success,
    Failure,
}

/// Every message that crosses a link boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Edge adapter announces its robots
    Init { body: Vec<RobotRecord> },
    /// Robot finished a command
    Report { body: ReportBody },
    /// Controller publishes its commit frontier
    Commit {
        #[serde(rename = "planId", alias = "plan_id", default)]
        plan_id: Option<PlanId>,
        #[serde(rename = "committedIndexes", alias = "committed_indexes")]
        committed_indexes: Vec<i64>,
    },
    /// Planner revises the plan beyond the frontier
    Replan {
        #[serde(rename = "planId", alias = "plan_id", default)]
        plan_id: Option<PlanId>,
        #[serde(rename = "committedIndexes", alias = "committed_indexes")]
        committed_indexes: Vec<i64>,
        #[serde(default)]
        instructions: Vec<Vec<WireAction>>,
    },
    /// Planner answers the initial request
    PlanResult {
        status: PlanStatus,
        #[serde(rename = "planId", alias = "plan_id", default)]
        plan_id: Option<PlanId>,
        #[serde(default)]
        instructions: Vec<Vec<WireAction>>,
    },
}

/// Command addressed to one robot of an edge adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeInstruction {
    /// Robot offset on the link
    pub agent: usize,
    pub operation: String,
    pub params: Value,
}

impl EdgeInstruction {
    pub fn new(offset: usize, command: &RobotCommand) -> Self {
        Self {
            agent: offset,
            operation: command.operation().to_string(),
            params: command.params(),
        }
    }
}

impl Message {
    /// Decode a message from an edge adapter
    pub fn decode(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| {
            ConductorError::protocol(format!("undecodable message: {}", e))
                .with_context("text", truncate_for_log(text))
        })
    }

    /// Decode a message from the planner. Plan responses carry no `type`
    /// tag; they are recognised by their `status` field.
    pub fn decode_planner(text: &str) -> Result<Self> {
        let mut value: Value = serde_json::from_str(text).map_err(|e| {
            ConductorError::protocol(format!("planner sent invalid JSON: {}", e))
                .with_context("text", truncate_for_log(text))
        })?;
        if let Value::Object(map) = &mut value {
            if !map.contains_key("type") && map.contains_key("status") {
                map.insert("type".to_string(), Value::String("plan_result".to_string()));
            }
        }
        serde_json::from_value(value).map_err(|e| {
            ConductorError::protocol(format!("unexpected planner message: {}", e))
                .with_context("text", truncate_for_log(text))
        })
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Build a commit notification from engine indices
    pub fn commit(plan_id: Option<PlanId>, committed: &[Index]) -> Self {
        Message::Commit {
            plan_id,
            committed_indexes: committed.iter().map(|&i| index_to_wire(i)).collect(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Message::Init { .. } => "init",
            Message::Report { .. } => "report",
            Message::Commit { .. } => "commit",
            Message::Replan { .. } => "replan",
            Message::PlanResult { .. } => "plan_result",
        }
    }
}

fn truncate_for_log(text: &str) -> String {
    text.chars().take(200).collect()
}

/// Engine index to wire index: one-based, 0 meaning nothing committed
pub fn index_to_wire(index: Index) -> i64 {
    if index < 0 {
        0
    } else {
        index as i64 + 1
    }
}

/// Wire index to engine index; both 0 and -1 mean nothing committed
pub fn index_from_wire(wire: i64) -> Index {
    if wire <= 0 {
        NO_INDEX
    } else {
        (wire - 1) as Index
    }
}

pub fn edge_from_wire(edge: &WireEdge) -> Result<Edge> {
    let (agent, action) = edge;
    if *agent == 0 {
        return Err(ConductorError::protocol(format!(
            "edge to action '{}' uses agent id 0; agent ids are 1-based",
            action
        )));
    }
    Ok(Edge::new(agent - 1, action.clone()))
}

impl WireAction {
    pub fn into_action(self) -> Result<Action> {
        let pre = self.pre.iter().map(edge_from_wire).collect::<Result<Vec<_>>>()?;
        let suc = self.suc.iter().map(edge_from_wire).collect::<Result<Vec<_>>>()?;
        Ok(Action {
            id: self.id,
            x: self.x_to,
            y: self.y_to,
            pre,
            suc,
        })
    }
}

/// Convert per-agent wire timelines to engine actions
pub fn timelines_from_wire(instructions: Vec<Vec<WireAction>>) -> Result<Vec<Vec<Action>>> {
    instructions
        .into_iter()
        .map(|timeline| {
            timeline
                .into_iter()
                .map(WireAction::into_action)
                .collect::<Result<Vec<_>>>()
        })
        .collect()
}

/// Convert a full plan into an action graph
pub fn graph_from_wire(instructions: Vec<Vec<WireAction>>) -> Result<ActionGraph> {
    Ok(ActionGraph::new(timelines_from_wire(instructions)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_decode_edge_messages() {
        let init = Message::decode(r#"{"type":"init","body":[{"id":"c1","x":100,"y":200}]}"#).unwrap();
        assert_eq!(
            init,
            Message::Init {
                body: vec![RobotRecord {
                    id: "c1".to_string(),
                    x: 100,
                    y: 200
                }]
            }
        );

        let report = Message::decode(r#"{"type":"report","body":{"agent":1,"operation_id":42}}"#).unwrap();
        assert_eq!(
            report,
            Message::Report {
                body: ReportBody {
                    agent: 1,
                    operation_id: 42
                }
            }
        );
    }

    #[test]
    fn test_decode_plan_result_without_tag() {
        let text = json!({
            "status": "success",
            "planId": 3,
            "instructions": [
                [{"id": "a1", "x_to": 10, "y_to": 20, "pre": [], "suc": [[1, "a2"], [2, "b1"]]},
                 {"id": "a2", "x_to": 11, "y_to": 21, "pre": [[1, "a1"]], "suc": []}],
                [{"id": "b1", "x_to": 5, "y_to": 5, "pre": [[1, "a1"]], "suc": []}]
            ]
        })
        .to_string();

        let Message::PlanResult { status, plan_id, instructions } = Message::decode_planner(&text).unwrap() else {
            panic!("expected plan result");
        };
        assert_eq!(status, PlanStatus::Success);
        assert_eq!(plan_id, Some(json!(3)));

        let graph = graph_from_wire(instructions).unwrap();
        assert_eq!(graph.num_agents(), 2);
        assert_eq!(graph.successors(0, 0), &[Edge::new(0, "a2"), Edge::new(1, "b1")]);
        assert_eq!(graph.predecessors(1, 0), &[Edge::new(0, "a1")]);
    }

    #[test]
    fn test_decode_failure_status() {
        let msg = Message::decode_planner(r#"{"status":"failure"}"#).unwrap();
        assert!(matches!(msg, Message::PlanResult { status: PlanStatus::Failure, .. }));
    }

    #[test]
    fn test_decode_replan() {
        let text = r#"{"type":"replan","planId":"p2","committedIndexes":[2,0],
                       "instructions":[[{"id":"z","x_to":1,"y_to":1,"pre":[[2,"b1"]]}],[]]}"#;
        let Message::Replan { committed_indexes, instructions, .. } = Message::decode_planner(text).unwrap() else {
            panic!("expected replan");
        };
        assert_eq!(committed_indexes, vec![2, 0]);
        let committed: Vec<Index> = committed_indexes.into_iter().map(index_from_wire).collect();
        assert_eq!(committed, vec![1, -1]);
        let suffixes = timelines_from_wire(instructions).unwrap();
        assert_eq!(suffixes[0][0].pre, vec![Edge::new(1, "b1")]);
        assert!(suffixes[1].is_empty());
    }

    #[test]
    fn test_commit_encoding_is_one_based() {
        let msg = Message::commit(Some(json!("p1")), &[-1, 0, 4]);
        let value: Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(value["type"], "commit");
        assert_eq!(value["planId"], "p1");
        assert_eq!(value["committedIndexes"], json!([0, 1, 5]));
    }

    #[test]
    fn test_zero_agent_id_rejected() {
        let action = WireAction {
            id: "a".to_string(),
            x_to: 0,
            y_to: 0,
            pre: vec![(0, "b".to_string())],
            suc: vec![],
        };
        assert_eq!(action.into_action().unwrap_err().category(), "protocol");
    }

    #[test]
    fn test_garbage_is_protocol_error() {
        let err = Message::decode("{not json").unwrap_err();
        assert_eq!(err.category(), "protocol");
        assert!(Message::decode(r#"{"type":"dance"}"#).is_err());
    }

    #[test]
    fn test_edge_instruction_from_command() {
        let instruction = EdgeInstruction::new(2, &RobotCommand::PlaySound { sound_id: 7 });
        let value = serde_json::to_value(&instruction).unwrap();
        assert_eq!(value, json!({"agent": 2, "operation": "playPresetSound", "params": [7]}));
    }
}
