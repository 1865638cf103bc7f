//! Observability hook for stage lifecycle events
//!
//! The engine reports every stage invocation to an [`ObservabilityHook`]:
//!
//! ```text
//! on_run_start ─▶ on_stage_start ─▶ on_stage_end ─▶ ... ─▶ on_run_end
//! ```
//!
//! Hooks are injected by the caller and never influence routing. Each call is
//! bounded by [`EngineConfig::hook_timeout_ms`](crate::EngineConfig); a hook
//! that does not return in time is logged and skipped, the run carries on.
//!
//! Provided implementations:
//!
//! - [`NoopHook`] - the default, does nothing
//! - [`TracingHook`] - writes `tracing` records
//! - [`RecordingHook`] - keeps events in memory for inspection and tests

use crate::engine::RunState;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// What a finished invocation produced
///
/// When one invocation emitted several events the most severe wins:
/// contract violation, then error, then output, then next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Next,
    Output,
    Error,
    ContractViolation,
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Next => "next",
            Self::Output => "output",
            Self::Error => "error",
            Self::ContractViolation => "contract_violation",
        };
        f.write_str(s)
    }
}

/// Receiver of run and stage lifecycle events
#[async_trait]
pub trait ObservabilityHook: Send + Sync {
    async fn on_run_start(&self, _run_id: Uuid) {}

    async fn on_stage_start(&self, stage: &str, run_id: Uuid);

    async fn on_stage_end(
        &self,
        stage: &str,
        run_id: Uuid,
        duration: Duration,
        outcome: OutcomeKind,
    );

    async fn on_run_end(&self, _run_id: Uuid, _state: RunState) {}
}

/// Hook that ignores every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHook;

#[async_trait]
impl ObservabilityHook for NoopHook {
    async fn on_stage_start(&self, _stage: &str, _run_id: Uuid) {}

    async fn on_stage_end(
        &self,
        _stage: &str,
        _run_id: Uuid,
        _duration: Duration,
        _outcome: OutcomeKind,
    ) {
    }
}

/// Hook that logs lifecycle events through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingHook;

#[async_trait]
impl ObservabilityHook for TracingHook {
    async fn on_run_start(&self, run_id: Uuid) {
        tracing::info!(run_id = %run_id, "Run started");
    }

    async fn on_stage_start(&self, stage: &str, run_id: Uuid) {
        tracing::debug!(run_id = %run_id, stage = %stage, "Stage started");
    }

    async fn on_stage_end(
        &self,
        stage: &str,
        run_id: Uuid,
        duration: Duration,
        outcome: OutcomeKind,
    ) {
        match outcome {
            OutcomeKind::Next | OutcomeKind::Output => tracing::info!(
                run_id = %run_id,
                stage = %stage,
                outcome = %outcome,
                elapsed_ms = duration.as_millis() as u64,
                "Stage finished"
            ),
            OutcomeKind::Error | OutcomeKind::ContractViolation => tracing::warn!(
                run_id = %run_id,
                stage = %stage,
                outcome = %outcome,
                elapsed_ms = duration.as_millis() as u64,
                "Stage failed"
            ),
        }
    }

    async fn on_run_end(&self, run_id: Uuid, state: RunState) {
        tracing::info!(run_id = %run_id, state = ?state, "Run finished");
    }
}

/// One event captured by [`RecordingHook`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HookEvent {
    RunStarted {
        run_id: Uuid,
        at: DateTime<Utc>,
    },
    StageStarted {
        run_id: Uuid,
        stage: String,
        at: DateTime<Utc>,
    },
    StageEnded {
        run_id: Uuid,
        stage: String,
        duration_ms: u64,
        outcome: OutcomeKind,
        at: DateTime<Utc>,
    },
    RunEnded {
        run_id: Uuid,
        state: RunState,
        at: DateTime<Utc>,
    },
}

/// Hook that stores every event in memory
#[derive(Debug, Default)]
pub struct RecordingHook {
    events: Mutex<Vec<HookEvent>>,
}

impl RecordingHook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all events so far
    pub fn events(&self) -> Vec<HookEvent> {
        self.events.lock().clone()
    }

    /// Stage ids in the order their invocations started
    pub fn started_stages(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                HookEvent::StageStarted { stage, .. } => Some(stage.clone()),
                _ => None,
            })
            .collect()
    }

    /// `(stage, outcome)` pairs in completion order
    pub fn outcomes(&self) -> Vec<(String, OutcomeKind)> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                HookEvent::StageEnded { stage, outcome, .. } => Some((stage.clone(), *outcome)),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    fn record(&self, event: HookEvent) {
        self.events.lock().push(event);
    }
}

#[async_trait]
impl ObservabilityHook for RecordingHook {
    async fn on_run_start(&self, run_id: Uuid) {
        self.record(HookEvent::RunStarted { run_id, at: Utc::now() });
    }

    async fn on_stage_start(&self, stage: &str, run_id: Uuid) {
        self.record(HookEvent::StageStarted {
            run_id,
            stage: stage.to_string(),
            at: Utc::now(),
        });
    }

    async fn on_stage_end(
        &self,
        stage: &str,
        run_id: Uuid,
        duration: Duration,
        outcome: OutcomeKind,
    ) {
        self.record(HookEvent::StageEnded {
            run_id,
            stage: stage.to_string(),
            duration_ms: duration.as_millis() as u64,
            outcome,
            at: Utc::now(),
        });
    }

    async fn on_run_end(&self, run_id: Uuid, state: RunState) {
        self.record(HookEvent::RunEnded { run_id, state, at: Utc::now() });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recording_hook_captures_order() {
        let hook = RecordingHook::new();
        let run_id = Uuid::new_v4();

        hook.on_run_start(run_id).await;
        hook.on_stage_start("a", run_id).await;
        hook.on_stage_end("a", run_id, Duration::from_millis(3), OutcomeKind::Next).await;
        hook.on_stage_start("b", run_id).await;
        hook.on_stage_end("b", run_id, Duration::from_millis(1), OutcomeKind::Error).await;
        hook.on_run_end(run_id, RunState::Completed).await;

        assert_eq!(hook.events().len(), 6);
        assert_eq!(hook.started_stages(), vec!["a", "b"]);
        assert_eq!(
            hook.outcomes(),
            vec![("a".to_string(), OutcomeKind::Next), ("b".to_string(), OutcomeKind::Error)]
        );

        hook.clear();
        assert!(hook.events().is_empty());
    }

    #[test]
    fn test_outcome_kind_serde() {
        let json = serde_json::to_string(&OutcomeKind::ContractViolation).unwrap();
        assert_eq!(json, "\"contract_violation\"");
        assert_eq!(OutcomeKind::Output.to_string(), "output");
    }

    #[tokio::test]
    async fn test_noop_and_tracing_hooks_do_not_panic() {
        let run_id = Uuid::new_v4();
        let hooks: [&dyn ObservabilityHook; 2] = [&NoopHook, &TracingHook];
        for hook in hooks {
            hook.on_run_start(run_id).await;
            hook.on_stage_start("s", run_id).await;
            hook.on_stage_end("s", run_id, Duration::ZERO, OutcomeKind::ContractViolation).await;
            hook.on_run_end(run_id, RunState::Stalled).await;
        }
    }
}
