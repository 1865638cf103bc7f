//! Run outcome types

use crate::error::{RunFailure, StageError};
use crate::message::Message;
use crate::stage::StageId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::any::Any;
use uuid::Uuid;

/// Lifecycle state of a run
///
/// ```text
/// Pending ──▶ Running ──┬──▶ Completed
///    │                  ├──▶ Stalled
///    │                  ├──▶ Cancelled
///    └──────────────────┴──▶ Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Initial messages enqueued, nothing invoked yet
    Pending,
    /// Dispatching stage invocations
    Running,
    /// Queue drained with at least one terminal output or stage error
    Completed,
    /// Queue drained without any terminal output or stage error
    Stalled,
    /// Cancellation was requested; in-flight work finished, nothing further dispatched
    Cancelled,
    /// The run could not start or hit a run-level failure, see [`RunResult::failure`]
    Failed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }
}

/// A terminal output and the stage that produced it
#[derive(Debug, Clone)]
pub struct TerminalOutput {
    pub stage: StageId,
    pub message: Message,
}

/// A contained stage error and the stage it is attributed to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFailure {
    pub stage: StageId,
    pub error: StageError,
}

/// Everything a run produced
///
/// Every terminal output and every stage error collected during the run is
/// listed, so a caller can tell apart full success, partial success with
/// contained failures, a stalled run and a cancelled one.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub run_id: Uuid,
    pub final_state: RunState,

    /// Terminal outputs in the order they were recorded
    pub terminal_outputs: Vec<TerminalOutput>,

    /// Stage errors in the order they were recorded
    pub errors: Vec<StageFailure>,

    /// Set when `final_state` is [`RunState::Failed`]
    pub failure: Option<RunFailure>,

    /// Stages never invoked during this run, in registration order
    pub unreached_stages: Vec<StageId>,

    /// Messages sent with `send_to_next` that matched no outgoing edge
    pub dropped_messages: usize,

    /// Messages still queued when the run stopped dispatching
    pub pending_messages: usize,

    /// Stage invocations dispatched (retries of one invocation count once)
    pub invocations: usize,

    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunResult {
    /// Completed with at least one output and no stage errors
    pub fn is_success(&self) -> bool {
        self.final_state == RunState::Completed
            && self.errors.is_empty()
            && !self.terminal_outputs.is_empty()
    }

    /// Completed with both outputs and contained stage errors
    pub fn is_partial(&self) -> bool {
        self.final_state == RunState::Completed
            && !self.errors.is_empty()
            && !self.terminal_outputs.is_empty()
    }

    /// Terminal output messages without their stage attribution
    pub fn messages(&self) -> Vec<&Message> {
        self.terminal_outputs.iter().map(|o| &o.message).collect()
    }

    /// Terminal outputs whose payload is a `T`
    pub fn outputs_of<T: Any>(&self) -> Vec<&T> {
        self.terminal_outputs
            .iter()
            .filter_map(|o| o.message.downcast_ref::<T>())
            .collect()
    }

    /// Errors attributed to `stage`
    pub fn errors_for(&self, stage: &str) -> Vec<&StageError> {
        self.errors
            .iter()
            .filter(|f| f.stage == stage)
            .map(|f| &f.error)
            .collect()
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            run_id: self.run_id,
            final_state: self.final_state,
            output_count: self.terminal_outputs.len(),
            output_stages: self.terminal_outputs.iter().map(|o| o.stage.clone()).collect(),
            errors: self.errors.clone(),
            failure: self.failure.clone(),
            unreached_stages: self.unreached_stages.clone(),
            dropped_messages: self.dropped_messages,
            pending_messages: self.pending_messages,
            invocations: self.invocations,
            duration_ms: (self.finished_at - self.started_at).num_milliseconds().max(0) as u64,
        }
    }
}

/// Serializable digest of a [`RunResult`] for logs and reports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub final_state: RunState,
    pub output_count: usize,
    pub output_stages: Vec<StageId>,
    pub errors: Vec<StageFailure>,
    pub failure: Option<RunFailure>,
    pub unreached_stages: Vec<StageId>,
    pub dropped_messages: usize,
    pub pending_messages: usize,
    pub invocations: usize,
    pub duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(state: RunState, outputs: usize, errors: usize) -> RunResult {
        let now = Utc::now();
        RunResult {
            run_id: Uuid::new_v4(),
            final_state: state,
            terminal_outputs: (0..outputs)
                .map(|i| TerminalOutput {
                    stage: format!("out{}", i),
                    message: Message::new(i as u32),
                })
                .collect(),
            errors: (0..errors)
                .map(|i| StageFailure {
                    stage: format!("err{}", i),
                    error: StageError::domain("boom"),
                })
                .collect(),
            failure: None,
            unreached_stages: vec![],
            dropped_messages: 0,
            pending_messages: 0,
            invocations: outputs + errors,
            started_at: now,
            finished_at: now,
        }
    }

    #[test]
    fn test_success_and_partial() {
        assert!(result(RunState::Completed, 1, 0).is_success());
        assert!(!result(RunState::Completed, 1, 1).is_success());
        assert!(result(RunState::Completed, 1, 1).is_partial());
        assert!(!result(RunState::Completed, 0, 1).is_partial());
        assert!(!result(RunState::Cancelled, 1, 0).is_success());
    }

    #[test]
    fn test_accessors() {
        let r = result(RunState::Completed, 2, 1);
        assert_eq!(r.outputs_of::<u32>(), vec![&0u32, &1u32]);
        assert!(r.outputs_of::<String>().is_empty());
        assert_eq!(r.messages().len(), 2);
        assert_eq!(r.errors_for("err0"), vec![&StageError::domain("boom")]);
        assert!(r.errors_for("out0").is_empty());
    }

    #[test]
    fn test_summary_serializes() {
        let summary = result(RunState::Completed, 1, 1).summary();
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["final_state"], "completed");
        assert_eq!(json["output_count"], 1);
        assert_eq!(json["errors"][0]["stage"], "err0");
        assert_eq!(json["errors"][0]["error"]["kind"], "domain");
    }

    #[test]
    fn test_failed_summary_serializes() {
        let mut failed = result(RunState::Failed, 0, 0);
        failed.failure = Some(RunFailure::NoEntryAccepts {
            kind: "String".into(),
        });
        failed.unreached_stages = vec!["a".into()];

        let json = serde_json::to_value(failed.summary()).unwrap();
        assert_eq!(json["final_state"], "failed");
        assert_eq!(json["failure"]["failure"], "no_entry_accepts");
        assert_eq!(json["failure"]["kind"], "String");
        assert_eq!(json["unreached_stages"][0], "a");

        let back: RunSummary = serde_json::from_value(json).unwrap();
        assert_eq!(back, failed.summary());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!RunState::Pending.is_terminal());
        assert!(!RunState::Running.is_terminal());
        assert!(RunState::Stalled.is_terminal());
        assert!(RunState::Failed.is_terminal());
    }
}
