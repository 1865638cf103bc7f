//! Run execution
//!
//! The [`Engine`] drives one message through a validated [`Graph`]:
//!
//! 1. The initial message is enqueued for every entry stage whose input kind
//!    matches it, in registration order.
//! 2. Ready deliveries are dispatched in FIFO order. Sequential mode runs one
//!    invocation at a time; concurrent mode runs up to `max_concurrency` on
//!    separate tasks, never two of the same stage unless it is parallel-safe.
//! 3. Each finished invocation is applied: `send_to_next` messages are cloned
//!    onto every matching outgoing edge, outputs and errors are recorded.
//!    A stage error stops its own branch only.
//! 4. When nothing is queued or in flight the run ends as
//!    [`Completed`](RunState::Completed), or [`Stalled`](RunState::Stalled)
//!    if it produced neither an output nor an error.
//!
//! # Example
//!
//! ```rust,no_run
//! use stagegraph_core::{from_fn, Engine, GraphBuilder, StageSpec};
//!
//! # async fn example() -> stagegraph_core::Result<()> {
//! let mut builder = GraphBuilder::new();
//! builder
//!     .add_stage(StageSpec::new(
//!         "parse",
//!         from_fn(|raw: String, ctx| async move {
//!             match raw.trim().parse::<i64>() {
//!                 Ok(n) => ctx.send_to_next(n),
//!                 Err(e) => ctx.send_error(format!("not a number: {}", e)),
//!             }
//!         })
//!         .emits::<i64>(),
//!     ))?
//!     .add_stage(StageSpec::new(
//!         "square",
//!         from_fn(|n: i64, ctx| async move { ctx.send_output(n * n) }),
//!     ))?
//!     .add_edge_for::<i64>("parse", "square")?;
//!
//! let engine = Engine::new(builder.build()?);
//! let result = engine.run(" 12 ".to_string()).await;
//! assert!(result.is_success());
//! assert_eq!(result.outputs_of::<i64>(), vec![&144]);
//! # Ok(())
//! # }
//! ```

mod invocation;
mod result;
mod scheduler;

pub use result::{RunResult, RunState, RunSummary, StageFailure, TerminalOutput};

use crate::config::{EngineConfig, ScheduleMode};
use crate::context::Emission;
use crate::error::{Result, RunFailure};
use crate::graph::Graph;
use crate::hook::{NoopHook, ObservabilityHook, OutcomeKind};
use crate::message::Message;
use crate::stage::StageId;
use chrono::Utc;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use invocation::InvocationReport;
use scheduler::{Delivery, InFlight, ReadyQueue};
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

type Pending = BoxFuture<'static, (usize, std::result::Result<InvocationReport, JoinError>)>;

/// Executes runs over one graph
///
/// An engine is cheap to clone and holds no per-run state, so the same engine
/// can serve many runs at once.
#[derive(Clone)]
pub struct Engine {
    graph: Graph,
    config: EngineConfig,
    hook: Arc<dyn ObservabilityHook>,
}

impl Engine {
    /// Engine with the default configuration and no hook
    pub fn new(graph: Graph) -> Self {
        Self {
            graph,
            config: EngineConfig::default(),
            hook: Arc::new(NoopHook),
        }
    }

    /// Replace the configuration
    ///
    /// # Errors
    ///
    /// [`GraphError::Configuration`](crate::GraphError::Configuration) if the
    /// configuration does not validate.
    pub fn with_config(mut self, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    pub fn with_hook(mut self, hook: Arc<dyn ObservabilityHook>) -> Self {
        self.hook = hook;
        self
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run the graph on `input`
    pub async fn run<T>(&self, input: T) -> RunResult
    where
        T: Any + Clone + Send + Sync + fmt::Debug,
    {
        self.execute(Message::new(input), None).await
    }

    /// Run the graph on an already wrapped message
    pub async fn run_message(&self, message: Message) -> RunResult {
        self.execute(message, None).await
    }

    /// Run the graph on `input`, stopping dispatch once `cancel` fires
    ///
    /// Invocations already in flight finish and their outputs and errors are
    /// kept. Messages still queued are counted in
    /// [`RunResult::pending_messages`].
    pub async fn run_with_cancellation<T>(&self, input: T, cancel: CancellationToken) -> RunResult
    where
        T: Any + Clone + Send + Sync + fmt::Debug,
    {
        self.execute(Message::new(input), Some(cancel)).await
    }

    async fn execute(&self, message: Message, cancel: Option<CancellationToken>) -> RunResult {
        let mut run = RunTracker::new(&self.graph);
        let run_id = run.run_id;

        tracing::info!(
            run_id = %run_id,
            input_kind = %message.kind().short_name(),
            mode = %self.config.mode,
            stages = self.graph.len(),
            "Starting run"
        );
        self.notify("on_run_start", self.hook.on_run_start(run_id)).await;

        let kind = *message.kind();
        let entries: Vec<usize> = self
            .graph
            .entry_indices()
            .iter()
            .copied()
            .filter(|&i| self.graph.spec_at(i).input_kind == kind)
            .collect();

        let mut queue = ReadyQueue::default();
        if entries.is_empty() {
            tracing::error!(
                run_id = %run_id,
                input_kind = %kind.short_name(),
                "No entry stage accepts the input"
            );
            run.failure = Some(RunFailure::NoEntryAccepts {
                kind: kind.short_name(),
            });
            return self.finish(run, &queue).await;
        }
        fan_out(&mut queue, &entries, message);
        tracing::debug!(run_id = %run_id, entries = entries.len(), "Run pending");

        run.state = RunState::Running;
        let limit = self.config.concurrency_limit();
        let mut in_flight = InFlight::new(self.graph.len());
        let mut tasks: FuturesUnordered<Pending> = FuturesUnordered::new();
        let mut cancelled = false;

        loop {
            while !cancelled && run.failure.is_none() && in_flight.total() < limit {
                if queue.is_empty() {
                    break;
                }
                if cancel.as_ref().map_or(false, |c| c.is_cancelled()) {
                    tracing::info!(
                        run_id = %run_id,
                        queued = queue.len(),
                        in_flight = in_flight.total(),
                        "Cancellation requested, no further dispatch"
                    );
                    cancelled = true;
                    break;
                }
                if run.invocations >= self.config.max_steps {
                    tracing::error!(
                        run_id = %run_id,
                        max_steps = self.config.max_steps,
                        "Step limit reached"
                    );
                    run.failure = Some(RunFailure::StepLimitExceeded {
                        limit: self.config.max_steps,
                    });
                    break;
                }

                let graph = &self.graph;
                let busy = &in_flight;
                let delivery = match queue
                    .pop_ready(|s| graph.spec_at(s).parallel_safe || !busy.is_busy(s))
                {
                    Some(delivery) => delivery,
                    None => break,
                };

                let stage = delivery.stage;
                run.invocations += 1;
                run.invoked[stage] = true;
                in_flight.start(stage);

                let stage_id = self.graph.spec_at(stage).id.as_str();
                tracing::debug!(run_id = %run_id, stage = %stage_id, "Dispatching stage");
                self.notify("on_stage_start", self.hook.on_stage_start(stage_id, run_id))
                    .await;
                tasks.push(self.dispatch(delivery, run_id));
            }

            let (stage, joined) = match tasks.next().await {
                Some(done) => done,
                None => break,
            };
            in_flight.finish(stage);
            self.settle(&mut run, &mut queue, stage, joined).await;
        }

        // A stage may cancel while being the last one in flight
        if !cancelled && cancel.as_ref().map_or(false, |c| c.is_cancelled()) {
            tracing::info!(run_id = %run_id, "Cancellation requested during the last invocation");
            cancelled = true;
        }

        run.state = if run.failure.is_some() {
            RunState::Failed
        } else if cancelled {
            RunState::Cancelled
        } else if run.outputs.is_empty() && run.errors.is_empty() {
            RunState::Stalled
        } else {
            RunState::Completed
        };

        self.finish(run, &queue).await
    }

    /// Apply one finished invocation to the run
    async fn settle(
        &self,
        run: &mut RunTracker,
        queue: &mut ReadyQueue,
        stage: usize,
        joined: std::result::Result<InvocationReport, JoinError>,
    ) {
        let run_id = run.run_id;
        let stage_id = self.graph.spec_at(stage).id.clone();

        let report = match joined {
            Ok(report) => report,
            Err(join_error) => {
                self.notify(
                    "on_stage_end",
                    self.hook
                        .on_stage_end(&stage_id, run_id, Duration::ZERO, OutcomeKind::Error),
                )
                .await;
                self.record_fault(run, &stage_id, join_error.to_string());
                return;
            }
        };

        tracing::debug!(
            run_id = %run_id,
            stage = %stage_id,
            attempts = report.attempts,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Stage finished"
        );
        self.notify(
            "on_stage_end",
            self.hook
                .on_stage_end(&stage_id, run_id, report.elapsed, report.outcome()),
        )
        .await;

        match report.fault {
            Some(message) => self.record_fault(run, &stage_id, message),
            None => run.absorb(&self.graph, stage, report.emissions, queue),
        }
    }

    fn dispatch(&self, delivery: Delivery, run_id: Uuid) -> Pending {
        let Delivery { stage, message } = delivery;
        let invocation = invocation::invoke(
            self.graph.clone(),
            stage,
            message,
            run_id,
            self.config.default_stage_timeout(),
        );
        match self.config.mode {
            ScheduleMode::Sequential => {
                async move { (stage, Ok::<_, JoinError>(invocation.await)) }.boxed()
            }
            ScheduleMode::Concurrent => {
                let handle = tokio::spawn(invocation);
                async move { (stage, handle.await) }.boxed()
            }
        }
    }

    /// First fault wins; later ones are only logged
    fn record_fault(&self, run: &mut RunTracker, stage: &str, message: String) {
        tracing::error!(
            run_id = %run.run_id,
            stage = %stage,
            error = %message,
            "Stage faulted, halting dispatch"
        );
        if run.failure.is_none() {
            run.failure = Some(RunFailure::StageFault {
                stage: stage.to_string(),
                message,
            });
        }
    }

    async fn notify<F>(&self, event: &'static str, call: F)
    where
        F: Future<Output = ()>,
    {
        if tokio::time::timeout(self.config.hook_timeout(), call)
            .await
            .is_err()
        {
            tracing::warn!(
                hook_event = event,
                timeout_ms = self.config.hook_timeout_ms,
                "Observability hook timed out, continuing"
            );
        }
    }

    async fn finish(&self, mut run: RunTracker, queue: &ReadyQueue) -> RunResult {
        if run.failure.is_some() {
            run.state = RunState::Failed;
        }
        let unreached_stages: Vec<StageId> = (0..self.graph.len())
            .filter(|&i| !run.invoked[i])
            .map(|i| self.graph.spec_at(i).id.clone())
            .collect();

        let result = RunResult {
            run_id: run.run_id,
            final_state: run.state,
            terminal_outputs: run.outputs,
            errors: run.errors,
            failure: run.failure,
            unreached_stages,
            dropped_messages: run.dropped,
            pending_messages: queue.len(),
            invocations: run.invocations,
            started_at: run.started_at,
            finished_at: Utc::now(),
        };

        match result.final_state {
            RunState::Completed => tracing::info!(
                run_id = %result.run_id,
                outputs = result.terminal_outputs.len(),
                errors = result.errors.len(),
                invocations = result.invocations,
                "Run completed"
            ),
            RunState::Stalled => tracing::warn!(
                run_id = %result.run_id,
                unreached = ?result.unreached_stages,
                dropped = result.dropped_messages,
                "Run stalled without output or error"
            ),
            RunState::Cancelled => tracing::info!(
                run_id = %result.run_id,
                pending = result.pending_messages,
                outputs = result.terminal_outputs.len(),
                "Run cancelled"
            ),
            state => tracing::error!(
                run_id = %result.run_id,
                state = ?state,
                failure = ?result.failure,
                "Run failed"
            ),
        }

        self.notify("on_run_end", self.hook.on_run_end(result.run_id, result.final_state))
            .await;
        result
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("graph", &self.graph)
            .field("config", &self.config)
            .finish()
    }
}

/// Run `graph` once with `message`
///
/// Shorthand for an [`Engine`] with the default configuration.
pub async fn run(
    graph: &Graph,
    message: Message,
    hook: Option<Arc<dyn ObservabilityHook>>,
    cancel: Option<CancellationToken>,
) -> RunResult {
    let mut engine = Engine::new(graph.clone());
    if let Some(hook) = hook {
        engine = engine.with_hook(hook);
    }
    engine.execute(message, cancel).await
}

/// Mutable bookkeeping for one run
struct RunTracker {
    run_id: Uuid,
    state: RunState,
    outputs: Vec<TerminalOutput>,
    errors: Vec<StageFailure>,
    failure: Option<RunFailure>,
    invoked: Vec<bool>,
    invocations: usize,
    dropped: usize,
    started_at: chrono::DateTime<Utc>,
}

impl RunTracker {
    fn new(graph: &Graph) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            state: RunState::Pending,
            outputs: Vec::new(),
            errors: Vec::new(),
            failure: None,
            invoked: vec![false; graph.len()],
            invocations: 0,
            dropped: 0,
            started_at: Utc::now(),
        }
    }

    fn absorb(
        &mut self,
        graph: &Graph,
        stage: usize,
        emissions: Vec<Emission>,
        queue: &mut ReadyQueue,
    ) {
        let stage_id = &graph.spec_at(stage).id;
        for emission in emissions {
            match emission {
                Emission::Next(message) => {
                    let targets = graph.routes(stage, message.kind());
                    if targets.is_empty() {
                        tracing::warn!(
                            run_id = %self.run_id,
                            stage = %stage_id,
                            kind = %message.kind().short_name(),
                            "No outgoing edge for message, dropping"
                        );
                        self.dropped += 1;
                        continue;
                    }
                    fan_out(queue, &targets, message);
                }
                Emission::Output(message) => {
                    tracing::debug!(run_id = %self.run_id, stage = %stage_id, "Terminal output");
                    self.outputs.push(TerminalOutput {
                        stage: stage_id.clone(),
                        message,
                    });
                }
                Emission::Error(error) => {
                    tracing::warn!(
                        run_id = %self.run_id,
                        stage = %stage_id,
                        error = %error,
                        "Stage error"
                    );
                    self.errors.push(StageFailure {
                        stage: stage_id.clone(),
                        error,
                    });
                }
            }
        }
    }
}

/// Enqueue `message` for every target, cloning for all but the last
fn fan_out(queue: &mut ReadyQueue, targets: &[usize], message: Message) {
    if let Some((&last, rest)) = targets.split_last() {
        for &target in rest {
            queue.push(target, message.clone());
        }
        queue.push(last, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StageError;
    use crate::graph::GraphBuilder;
    use crate::hook::RecordingHook;
    use crate::stage::{from_fn, StageSpec};
    use async_trait::async_trait;

    #[derive(Debug, Clone)]
    struct Tx(u32);

    fn relay(id: &str) -> StageSpec {
        StageSpec::new(
            id,
            from_fn(|tx: Tx, ctx| async move { ctx.send_to_next(tx) }).emits::<Tx>(),
        )
    }

    fn sink(id: &str) -> StageSpec {
        StageSpec::new(id, from_fn(|tx: Tx, ctx| async move { ctx.send_output(tx.0) }))
    }

    fn single(stage: StageSpec) -> Graph {
        let mut b = GraphBuilder::new();
        b.add_stage(stage).unwrap();
        b.build().unwrap()
    }

    #[tokio::test]
    async fn test_chain_completes() {
        let mut b = GraphBuilder::new();
        b.add_stage(relay("a"))
            .unwrap()
            .add_stage(sink("b"))
            .unwrap()
            .add_edge_for::<Tx>("a", "b")
            .unwrap();
        let result = Engine::new(b.build().unwrap()).run(Tx(5)).await;

        assert_eq!(result.final_state, RunState::Completed);
        assert_eq!(result.outputs_of::<u32>(), vec![&5]);
        assert_eq!(result.invocations, 2);
        assert!(result.unreached_stages.is_empty());
        assert_eq!(result.pending_messages, 0);
    }

    #[tokio::test]
    async fn test_fan_out_clones_to_every_edge() {
        let mut b = GraphBuilder::new();
        b.add_stage(relay("a"))
            .unwrap()
            .add_stage(sink("b"))
            .unwrap()
            .add_stage(sink("c"))
            .unwrap()
            .add_edge_for::<Tx>("a", "b")
            .unwrap()
            .add_edge_for::<Tx>("a", "c")
            .unwrap();
        let result = Engine::new(b.build().unwrap()).run(Tx(7)).await;

        let stages: Vec<&str> = result
            .terminal_outputs
            .iter()
            .map(|o| o.stage.as_str())
            .collect();
        assert_eq!(stages, vec!["b", "c"]);
        assert_eq!(result.outputs_of::<u32>(), vec![&7, &7]);
    }

    #[tokio::test]
    async fn test_unroutable_message_is_dropped_and_stalls() {
        let result = Engine::new(single(relay("a"))).run(Tx(1)).await;

        assert_eq!(result.final_state, RunState::Stalled);
        assert_eq!(result.dropped_messages, 1);
        assert!(result.terminal_outputs.is_empty());
    }

    #[tokio::test]
    async fn test_no_entry_accepts_input() {
        let result = Engine::new(single(sink("a"))).run("wrong".to_string()).await;

        assert_eq!(result.final_state, RunState::Failed);
        assert!(matches!(
            result.failure,
            Some(RunFailure::NoEntryAccepts { ref kind }) if kind == "String"
        ));
        assert_eq!(result.invocations, 0);
        assert_eq!(result.unreached_stages, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_step_limit_on_cycle() {
        let mut b = GraphBuilder::new();
        b.add_stage(relay("a"))
            .unwrap()
            .add_stage(relay("b"))
            .unwrap()
            .add_edge_for::<Tx>("a", "b")
            .unwrap()
            .add_edge_for::<Tx>("b", "a")
            .unwrap()
            .mark_entry("a")
            .unwrap();
        let engine = Engine::new(b.build().unwrap())
            .with_config(EngineConfig::default().with_max_steps(10))
            .unwrap();
        let result = engine.run(Tx(0)).await;

        assert_eq!(result.final_state, RunState::Failed);
        assert!(matches!(
            result.failure,
            Some(RunFailure::StepLimitExceeded { limit: 10 })
        ));
        assert_eq!(result.invocations, 10);
        assert_eq!(result.pending_messages, 1);
    }

    #[tokio::test]
    async fn test_panic_becomes_stage_fault() {
        let graph = single(StageSpec::new(
            "bad",
            from_fn(|_: Tx, _ctx| async move { panic!("invariant broken") }),
        ));
        let result = Engine::new(graph).run(Tx(0)).await;

        assert_eq!(result.final_state, RunState::Failed);
        match result.failure {
            Some(RunFailure::StageFault { stage, message }) => {
                assert_eq!(stage, "bad");
                assert_eq!(message, "invariant broken");
            }
            other => panic!("unexpected failure: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_join_error_reports_stage_end_and_faults() {
        let hook = Arc::new(RecordingHook::new());
        let engine = Engine::new(single(sink("a"))).with_hook(hook.clone());
        let mut run = RunTracker::new(engine.graph());
        let mut queue = ReadyQueue::default();

        let handle = tokio::spawn(futures::future::pending::<InvocationReport>());
        handle.abort();
        let join_error = handle.await.unwrap_err();

        engine.settle(&mut run, &mut queue, 0, Err(join_error)).await;

        assert_eq!(hook.outcomes(), vec![("a".to_string(), OutcomeKind::Error)]);
        assert!(matches!(
            run.failure,
            Some(RunFailure::StageFault { ref stage, .. }) if stage == "a"
        ));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_dispatch() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = Engine::new(single(sink("a")))
            .run_with_cancellation(Tx(1), cancel)
            .await;

        assert_eq!(result.final_state, RunState::Cancelled);
        assert_eq!(result.invocations, 0);
        assert_eq!(result.pending_messages, 1);
    }

    #[tokio::test]
    async fn test_cancel_from_last_stage_in_flight() {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let graph = single(StageSpec::new(
            "last",
            from_fn(move |tx: Tx, ctx| {
                let token = token.clone();
                async move {
                    token.cancel();
                    ctx.send_output(tx.0)
                }
            }),
        ));
        let result = Engine::new(graph).run_with_cancellation(Tx(4), cancel).await;

        assert_eq!(result.final_state, RunState::Cancelled);
        assert_eq!(result.outputs_of::<u32>(), vec![&4]);
        assert_eq!(result.pending_messages, 0);
    }

    #[tokio::test]
    async fn test_hook_sees_every_invocation() {
        let mut b = GraphBuilder::new();
        b.add_stage(relay("a"))
            .unwrap()
            .add_stage(StageSpec::new(
                "b",
                from_fn(|_: Tx, ctx| async move { ctx.send_error("nope") }),
            ))
            .unwrap()
            .add_edge_for::<Tx>("a", "b")
            .unwrap();
        let hook = Arc::new(RecordingHook::new());
        let result = Engine::new(b.build().unwrap())
            .with_hook(hook.clone())
            .run(Tx(1))
            .await;

        assert_eq!(result.final_state, RunState::Completed);
        assert_eq!(hook.started_stages(), vec!["a", "b"]);
        assert_eq!(
            hook.outcomes(),
            vec![
                ("a".to_string(), OutcomeKind::Next),
                ("b".to_string(), OutcomeKind::Error)
            ]
        );
        assert_eq!(hook.events().len(), 6);
        assert_eq!(result.errors_for("b"), vec![&StageError::domain("nope")]);
    }

    struct StuckHook;

    #[async_trait]
    impl ObservabilityHook for StuckHook {
        async fn on_stage_start(&self, _stage: &str, _run_id: Uuid) {
            futures::future::pending::<()>().await
        }

        async fn on_stage_end(
            &self,
            _stage: &str,
            _run_id: Uuid,
            _elapsed: Duration,
            _outcome: OutcomeKind,
        ) {
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_hook_does_not_block_run() {
        let config = EngineConfig::default().with_hook_timeout(Duration::from_millis(50));
        let engine = Engine::new(single(sink("a")))
            .with_config(config)
            .unwrap()
            .with_hook(Arc::new(StuckHook));
        let result = engine.run(Tx(3)).await;

        assert_eq!(result.final_state, RunState::Completed);
        assert_eq!(result.outputs_of::<u32>(), vec![&3]);
    }

    #[test]
    fn test_with_config_validates() {
        let engine = Engine::new(single(sink("a")));
        assert!(engine.with_config(EngineConfig::concurrent(0)).is_err());
    }

    #[tokio::test]
    async fn test_free_run_function() {
        let graph = single(sink("a"));
        let result = run(&graph, Message::new(Tx(9)), None, None).await;
        assert!(result.is_success());
    }
}
