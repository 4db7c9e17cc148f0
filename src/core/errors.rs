use std::collections::HashMap;
use thiserror::Error;

/// Unified error type for the plan execution engine
#[derive(Debug, Error)]
pub enum ConductorError {
    /// An edge references an action the target timeline does not contain.
    /// Planner and controller disagree about the graph; never retried.
    #[error("Desynchronized plan: agent {agent} has no action '{action}' ({context})")]
    Desync {
        agent: usize,
        action: String,
        context: String,
    },

    /// A replan was computed against a commit frontier the controller no longer holds
    #[error("Stale replan: planner frontier {proposed:?} != controller frontier {current:?}")]
    StaleReplan {
        proposed: Vec<isize>,
        current: Vec<isize>,
    },

    /// The planner answered with a failure status or an unusable plan
    #[error("Planning failed: {message}")]
    Planning { message: String },

    /// The planner connection failed
    #[error("Planner link error: {message}")]
    PlannerLink {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Sending a command to a robot failed
    #[error("Robot link error: agent {agent} - {message}")]
    RobotLink { agent: usize, message: String },

    /// A message could not be interpreted
    #[error("Protocol error: {message}")]
    Protocol {
        message: String,
        context: HashMap<String, String>,
    },

    /// Validation errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    /// IO errors
    #[error("IO operation failed: {operation}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    /// Serialization errors
    #[error("Serialization failed: {format}")]
    Serialization {
        format: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl ConductorError {
    /// Create a desynchronization fault
    pub fn desync<A: Into<String>, C: Into<String>>(agent: usize, action: A, context: C) -> Self {
        Self::Desync {
            agent,
            action: action.into(),
            context: context.into(),
        }
    }

    /// Create a stale replan rejection
    pub fn stale_replan(proposed: Vec<isize>, current: Vec<isize>) -> Self {
        Self::StaleReplan { proposed, current }
    }

    /// Create a planning failure
    pub fn planning<S: Into<String>>(message: S) -> Self {
        Self::Planning {
            message: message.into(),
        }
    }

    /// Create a planner link error
    pub fn planner_link<S: Into<String>>(message: S) -> Self {
        Self::PlannerLink {
            message: message.into(),
            source: None,
        }
    }

    /// Create a planner link error with source
    pub fn planner_link_with_source<S: Into<String>, E: std::error::Error + Send + Sync + 'static>(
        message: S,
        source: E,
    ) -> Self {
        Self::PlannerLink {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a robot link error
    pub fn robot_link<S: Into<String>>(agent: usize, message: S) -> Self {
        Self::RobotLink {
            agent,
            message: message.into(),
        }
    }

    /// Create a protocol error
    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Self::Protocol {
            message: message.into(),
            context: HashMap::new(),
        }
    }

    /// Add context to a protocol error
    pub fn with_context<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        if let Self::Protocol { ref mut context, .. } = self {
            context.insert(key.into(), value.into());
        }
        self
    }

    /// Create a validation error with field
    pub fn validation_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Validation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
            field: None,
        }
    }

    /// Create a configuration error with field
    pub fn configuration_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Configuration {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create an IO error
    pub fn io<S: Into<String>>(operation: S, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }

    /// Create a serialization error
    pub fn serialization<S: Into<String>, E: std::error::Error + Send + Sync + 'static>(
        format: S,
        source: E,
    ) -> Self {
        Self::Serialization {
            format: format.into(),
            source: Box::new(source),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// Whether the run can continue after this error
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::StaleReplan { .. } => true,
            Self::RobotLink { .. } | Self::Protocol { .. } => true,
            _ => false,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Desync { .. } => "desync",
            Self::StaleReplan { .. } => "stale_replan",
            Self::Planning { .. } => "planning",
            Self::PlannerLink { .. } => "planner_link",
            Self::RobotLink { .. } => "robot_link",
            Self::Protocol { .. } => "protocol",
            Self::Validation { .. } => "validation",
            Self::Configuration { .. } => "configuration",
            Self::Io { .. } => "io",
            Self::Serialization { .. } => "serialization",
            Self::Internal { .. } => "internal",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, ConductorError>;

impl From<std::io::Error> for ConductorError {
    fn from(err: std::io::Error) -> Self {
        Self::io("io_operation", err)
    }
}

impl From<serde_json::Error> for ConductorError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization("json", err)
    }
}

impl From<serde_yaml::Error> for ConductorError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::serialization("yaml", err)
    }
}

impl From<anyhow::Error> for ConductorError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = ConductorError::desync(1, "a7", "successor of agent 0");
        assert!(matches!(err, ConductorError::Desync { agent: 1, .. }));
        assert_eq!(err.category(), "desync");
        assert!(err.to_string().contains("a7"));
    }

    #[test]
    fn test_protocol_context() {
        let err = ConductorError::protocol("bad report")
            .with_context("link", "3")
            .with_context("offset", "0");

        if let ConductorError::Protocol { context, .. } = err {
            assert_eq!(context.get("link"), Some(&"3".to_string()));
            assert_eq!(context.get("offset"), Some(&"0".to_string()));
        } else {
            panic!("Expected protocol error");
        }
    }

    #[test]
    fn test_error_recoverability() {
        assert!(ConductorError::stale_replan(vec![0], vec![1]).is_recoverable());
        assert!(!ConductorError::desync(0, "x", "").is_recoverable());
        assert!(!ConductorError::planning("no solution").is_recoverable());
        assert!(!ConductorError::planner_link("closed").is_recoverable());
        assert!(ConductorError::protocol("garbled").is_recoverable());
        assert!(ConductorError::robot_link(0, "offline").is_recoverable());
        assert!(!ConductorError::configuration("test").is_recoverable());
    }

    #[test]
    fn test_json_conversion() {
        let err: ConductorError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert_eq!(err.category(), "serialization");
    }
}
