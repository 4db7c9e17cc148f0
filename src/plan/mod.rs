//! Plan data model
//!
//! Action timelines, precedence edges, the consistent-commit computation and
//! structural validation. Pure data and graph queries; no I/O.

pub mod types;
pub mod graph;
pub mod consistency;
pub mod validate;

pub use types::*;
pub use graph::ActionGraph;
pub use consistency::{consistent_commit, is_causally_closed};
pub use validate::validate_plan;
