//! Single stage invocation with timeout, retry and fault capture

use crate::context::{Context, Emission};
use crate::error::StageError;
use crate::graph::Graph;
use crate::hook::OutcomeKind;
use crate::message::Message;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// What one invocation produced, after retries
#[derive(Debug)]
pub(crate) struct InvocationReport {
    pub emissions: Vec<Emission>,
    pub elapsed: Duration,
    pub attempts: u32,
    /// Panic message when the handler faulted instead of returning
    pub fault: Option<String>,
}

impl InvocationReport {
    pub fn outcome(&self) -> OutcomeKind {
        if self.fault.is_some() {
            return OutcomeKind::Error;
        }
        let mut outcome = OutcomeKind::Next;
        for emission in &self.emissions {
            let kind = match emission {
                Emission::Next(_) => OutcomeKind::Next,
                Emission::Output(_) => OutcomeKind::Output,
                Emission::Error(e) if e.is_contract_violation() => OutcomeKind::ContractViolation,
                Emission::Error(_) => OutcomeKind::Error,
            };
            if severity(kind) > severity(outcome) {
                outcome = kind;
            }
        }
        outcome
    }
}

fn severity(kind: OutcomeKind) -> u8 {
    match kind {
        OutcomeKind::Next => 0,
        OutcomeKind::Output => 1,
        OutcomeKind::Error => 2,
        OutcomeKind::ContractViolation => 3,
    }
}

/// Run `stage` on `message` until it produces a non-retryable outcome
///
/// Takes the graph by value so the future is `'static` and can be spawned.
pub(crate) async fn invoke(
    graph: Graph,
    stage: usize,
    message: Message,
    run_id: Uuid,
    default_timeout: Option<Duration>,
) -> InvocationReport {
    let spec = graph.spec_at(stage);
    let timeout = spec.timeout.or(default_timeout);
    let started = Instant::now();
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let ctx = Context::new(spec.id.clone(), run_id, attempt);
        let call = AssertUnwindSafe(spec.executor.invoke(message.clone(), ctx.clone()))
            .catch_unwind();

        let finished = match timeout {
            Some(limit) => tokio::time::timeout(limit, call).await.ok(),
            None => Some(call.await),
        };
        let mut emissions = ctx.seal();

        match finished {
            Some(Err(panic)) => {
                let message = panic_message(&*panic);
                tracing::error!(
                    run_id = %run_id,
                    stage = %spec.id,
                    attempt = attempt,
                    panic = %message,
                    "Stage handler panicked"
                );
                return InvocationReport {
                    emissions: Vec::new(),
                    elapsed: started.elapsed(),
                    attempts: attempt,
                    fault: Some(message),
                };
            }
            None => {
                let limit_ms = timeout.map(|d| d.as_millis() as u64).unwrap_or_default();
                tracing::warn!(
                    run_id = %run_id,
                    stage = %spec.id,
                    attempt = attempt,
                    timeout_ms = limit_ms,
                    discarded = emissions.len(),
                    "Stage timed out"
                );
                emissions = vec![Emission::Error(StageError::timeout(limit_ms))];
            }
            Some(Ok(())) if emissions.is_empty() => {
                tracing::warn!(run_id = %run_id, stage = %spec.id, "Stage produced no event");
                emissions.push(Emission::Error(StageError::contract_violation(
                    "stage produced no event",
                )));
            }
            Some(Ok(())) => {}
        }

        let retryable = emissions
            .iter()
            .all(|e| matches!(e, Emission::Error(err) if err.is_retryable()));

        if let Some(policy) = spec.retry.as_ref() {
            if retryable && policy.should_retry(attempt) {
                let delay = policy.calculate_delay(attempt - 1);
                tracing::warn!(
                    run_id = %run_id,
                    stage = %spec.id,
                    attempt = attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Stage failed, retrying after delay"
                );
                tokio::time::sleep(delay).await;
                continue;
            }
            if retryable && attempt > 1 {
                tracing::error!(
                    run_id = %run_id,
                    stage = %spec.id,
                    attempts = attempt,
                    "Stage failed after all retry attempts"
                );
            } else if attempt > 1 {
                tracing::info!(
                    run_id = %run_id,
                    stage = %spec.id,
                    attempts = attempt,
                    "Stage succeeded after retry"
                );
            }
        }

        return InvocationReport {
            emissions,
            elapsed: started.elapsed(),
            attempts: attempt,
            fault: None,
        };
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
