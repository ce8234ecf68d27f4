//! Error types for the Vigil runtime.

use thiserror::Error;

/// Main error type for Vigil operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VigilError {
    /// No sequence of registered actions reaches the goal.
    #[error("No plan reaches the goal: {reason}")]
    PlannerNoSolution { reason: String },

    /// A critical action's preconditions did not hold at dispatch time.
    #[error("Preconditions unmet for agent {agent_id}: {missing:?}")]
    PreconditionUnmet { agent_id: String, missing: Vec<String> },

    /// An agent exceeded its time budget.
    #[error("Agent {agent_id} timed out after {timeout_ms}ms")]
    AgentTimeout { agent_id: String, timeout_ms: u64 },

    /// An agent reported an error.
    #[error("Agent {agent_id} failed: {message}")]
    AgentFailure { agent_id: String, message: String },

    /// The run exhausted its replanning budget.
    #[error("Replan limit of {limit} exceeded")]
    ReplanLimitExceeded { limit: u32 },

    /// The registry manifest is malformed or inconsistent.
    #[error("Invalid manifest: {message}")]
    ManifestInvalid { message: String },

    /// A fact key is not known to the registry.
    #[error("Unknown fact: {key}")]
    UnknownFact { key: String },

    /// An action id is not present in the registry.
    #[error("Unknown action: {id}")]
    UnknownAction { id: String },

    /// A registered action has no agent implementation bound to it.
    #[error("No agent bound for action {id}")]
    UnboundAgent { id: String },

    /// Configuration could not be loaded.
    #[error("Configuration error for {key}: {message}")]
    Config { key: String, message: String },

    /// The process-wide engine is already running.
    #[error("Engine already initialized")]
    AlreadyInitialized,

    /// The process-wide engine has not been started.
    #[error("Engine not initialized")]
    NotInitialized,

    /// A background run task ended without producing a trace.
    #[error("Run {run_id} aborted: {message}")]
    RunAborted { run_id: String, message: String },

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O error while reading a manifest or config file.
    #[error("I/O error: {0}")]
    Io(String),
}

impl VigilError {
    /// Shorthand for a planner failure.
    pub fn no_solution(reason: impl Into<String>) -> Self {
        VigilError::PlannerNoSolution {
            reason: reason.into(),
        }
    }

    /// Shorthand for a manifest validation failure.
    pub fn manifest(message: impl Into<String>) -> Self {
        VigilError::ManifestInvalid {
            message: message.into(),
        }
    }
}

/// Convenience Result type for Vigil operations.
pub type Result<T> = std::result::Result<T, VigilError>;

impl From<serde_json::Error> for VigilError {
    fn from(err: serde_json::Error) -> Self {
        VigilError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for VigilError {
    fn from(err: std::io::Error) -> Self {
        VigilError::Io(err.to_string())
    }
}
