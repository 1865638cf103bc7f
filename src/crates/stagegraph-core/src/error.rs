//! Error types for graph construction, stage failures and run-level failures
//!
//! Errors fall into three layers that are deliberately kept apart:
//!
//! ```text
//! GraphError          - build-time, returned by GraphBuilder / EngineConfig
//! ├── DuplicateStage
//! ├── UnknownStage
//! ├── TypeMismatch
//! ├── Validation      - carries a ValidationIssue
//! ├── Configuration
//! └── Yaml
//!
//! StageError          - data recorded against one stage, never raised
//! ├── Domain          - emitted by the stage through Context::send_error
//! ├── ContractViolation - engine-detected: the stage emitted no event
//! └── Timeout         - the stage exceeded its configured timeout
//!
//! RunFailure          - the run itself could not proceed
//! ├── NoEntryAccepts
//! ├── StepLimitExceeded
//! └── StageFault      - a handler panicked
//! ```
//!
//! Only [`GraphError`] is returned through `Result`. A [`StageError`] is a value
//! collected into [`RunResult::errors`](crate::RunResult::errors), and a
//! [`RunFailure`] is attached to a run that ended in
//! [`RunState::Failed`](crate::RunState::Failed).
//!
//! # Example
//!
//! ```rust
//! use stagegraph_core::error::{GraphError, ValidationIssue};
//!
//! fn describe(err: &GraphError) -> String {
//!     match err {
//!         GraphError::UnknownStage(id) => format!("wire {id} first"),
//!         GraphError::Validation(ValidationIssue::Unreachable { stages }) => {
//!             format!("dead stages: {}", stages.join(", "))
//!         }
//!         other => other.to_string(),
//!     }
//! }
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias for build-time operations
pub type Result<T> = std::result::Result<T, GraphError>;

/// Errors raised while assembling a graph or loading engine configuration
#[derive(Debug, Error)]
pub enum GraphError {
    /// A stage with this id was already registered
    #[error("Stage '{0}' is already registered")]
    DuplicateStage(String),

    /// An edge referenced a stage id that was never registered
    #[error("Unknown stage '{0}'")]
    UnknownStage(String),

    /// The edge message kind does not match the receiving stage's input kind
    ///
    /// Raised by [`GraphBuilder::add_edge`](crate::GraphBuilder::add_edge) so that
    /// a mismatch can never reach a run.
    #[error("Edge {from} -> {to} carries '{edge_kind}' but '{to}' accepts '{input_kind}'")]
    TypeMismatch {
        /// Source stage
        from: String,
        /// Receiving stage
        to: String,
        /// Message kind declared on the edge
        edge_kind: String,
        /// Input kind of the receiving stage
        input_kind: String,
    },

    /// Whole-graph validation failed in [`GraphBuilder::build`](crate::GraphBuilder::build)
    #[error("Graph validation failed: {0}")]
    Validation(ValidationIssue),

    /// Invalid engine configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Configuration document could not be parsed
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl GraphError {
    /// Shorthand for a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}

/// The specific structural violation found by graph validation
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ValidationIssue {
    /// No stages were registered
    #[error("graph has no stages")]
    EmptyGraph,

    /// Every stage has an incoming edge and none was marked as an entry
    #[error("graph has no entry stage")]
    NoEntryStage,

    /// Stages that no entry stage can reach
    #[error("stages unreachable from any entry: {}", stages.join(", "))]
    Unreachable {
        /// Unreachable stage ids in registration order
        stages: Vec<String>,
    },

    /// An edge carries a message kind its source stage never declares as an output
    #[error("stage '{from}' never emits '{kind}' (edge to '{to}')")]
    NeverEmitted {
        /// Source stage
        from: String,
        /// Target stage
        to: String,
        /// Edge message kind
        kind: String,
    },
}

/// A stage-level failure, recorded as data against the stage that produced it
///
/// Stage errors never abort a run. The branch that produced one stops, every
/// other branch keeps going, and the run still finishes as
/// [`RunState::Completed`](crate::RunState::Completed).
///
/// ```rust
/// use stagegraph_core::StageError;
///
/// let err: StageError = "risk engine unavailable".into();
/// assert_eq!(err.to_string(), "risk engine unavailable");
/// assert!(err.is_domain());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageError {
    /// Business-logic failure reported by the stage itself
    #[error("{message}")]
    Domain {
        /// Message supplied by the stage
        message: String,
    },

    /// The stage broke the handler contract (for example it emitted no event)
    #[error("contract violation: {reason}")]
    ContractViolation {
        /// What the engine observed
        reason: String,
    },

    /// The stage did not finish within its timeout
    #[error("stage timed out after {timeout_ms}ms")]
    Timeout {
        /// Configured timeout
        timeout_ms: u64,
    },
}

impl StageError {
    /// Create a domain error
    pub fn domain(message: impl Into<String>) -> Self {
        Self::Domain {
            message: message.into(),
        }
    }

    /// Create a contract violation
    pub fn contract_violation(reason: impl Into<String>) -> Self {
        Self::ContractViolation {
            reason: reason.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(timeout_ms: u64) -> Self {
        Self::Timeout { timeout_ms }
    }

    pub fn is_domain(&self) -> bool {
        matches!(self, Self::Domain { .. })
    }

    pub fn is_contract_violation(&self) -> bool {
        matches!(self, Self::ContractViolation { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Whether a retry policy may re-run the invocation that produced this error
    ///
    /// Contract violations are defects in the handler and are never retried.
    pub fn is_retryable(&self) -> bool {
        !self.is_contract_violation()
    }
}

impl From<String> for StageError {
    fn from(message: String) -> Self {
        Self::domain(message)
    }
}

impl From<&str> for StageError {
    fn from(message: &str) -> Self {
        Self::domain(message)
    }
}

/// Why a run ended in [`RunState::Failed`](crate::RunState::Failed)
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "failure", rename_all = "snake_case")]
pub enum RunFailure {
    /// No entry stage accepts the initial message kind, so nothing was dispatched
    #[error("no entry stage accepts messages of kind '{kind}'")]
    NoEntryAccepts {
        /// Kind of the initial message
        kind: String,
    },

    /// The run dispatched `limit` invocations without draining its queue
    #[error("step limit of {limit} invocations exceeded")]
    StepLimitExceeded {
        /// Configured `max_steps`
        limit: usize,
    },

    /// A handler panicked instead of converting its failure with `send_error`
    #[error("stage '{stage}' faulted: {message}")]
    StageFault {
        /// Stage whose handler faulted
        stage: String,
        /// Panic payload, when it was a string
        message: String,
    },
}
