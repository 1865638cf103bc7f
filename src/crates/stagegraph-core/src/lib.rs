//! # stagegraph-core - Typed Executor Graphs with Contained Failures
//!
//! `stagegraph-core` routes one input message through a graph of
//! independent processing stages. Each stage consumes one message type and
//! ends every invocation with exactly one kind of outcome: a message routed to
//! the next stages, a terminal output, or an error attributed to that stage.
//! A failing stage stops its own branch; sibling branches run to completion.
//!
//! ## Core Concepts
//!
//! - **[`Message`] / [`MessageKind`]** - immutable typed payloads; the kind is
//!   the payload's Rust type
//! - **[`Executor`]** - a stage handler with one input type, talking to the
//!   graph only through its [`Context`]
//! - **[`GraphBuilder`] / [`Graph`]** - stages plus typed edges, validated once
//!   at build time (duplicate ids, unknown ids, kind mismatches, missing
//!   entries, unreachable stages)
//! - **[`Engine`]** - executes runs sequentially or concurrently and returns a
//!   [`RunResult`] listing every terminal output and every stage error
//! - **[`ObservabilityHook`]** - optional receiver of stage lifecycle events
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use stagegraph_core::prelude::*;
//!
//! #[derive(Debug, Clone)]
//! struct Transaction { id: String, amount: u64 }
//!
//! #[derive(Debug, Clone)]
//! struct Scored { id: String, score: u64 }
//!
//! #[tokio::main]
//! async fn main() -> stagegraph_core::Result<()> {
//!     let mut builder = GraphBuilder::new();
//!     builder
//!         .add_stage(StageSpec::new(
//!             "score",
//!             from_fn(|tx: Transaction, ctx| async move {
//!                 ctx.send_to_next(Scored { id: tx.id, score: tx.amount / 100 });
//!             })
//!             .emits::<Scored>(),
//!         ))?
//!         .add_stage(StageSpec::new(
//!             "alert",
//!             from_fn(|s: Scored, ctx| async move {
//!                 if s.score > 50 {
//!                     ctx.send_output(format!("alert for {}", s.id));
//!                 } else {
//!                     ctx.send_error(format!("{} below threshold", s.id));
//!                 }
//!             }),
//!         ))?
//!         .add_edge_for::<Scored>("score", "alert")?;
//!
//!     let engine = Engine::new(builder.build()?).with_hook(Arc::new(TracingHook));
//!     let result = engine
//!         .run(Transaction { id: "tx-1".into(), amount: 9_000 })
//!         .await;
//!
//!     assert_eq!(result.final_state, RunState::Completed);
//!     println!("{:?}", result.summary());
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`graph`] - construction and validation
//! - [`engine`] - run execution and results
//! - [`config`] - scheduling configuration from code, env or YAML
//! - [`hook`] - observability hooks
//! - [`retry`] - per-stage retry policies
//! - [`visualization`] - DOT / Mermaid / ASCII rendering

pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod graph;
pub mod hook;
pub mod message;
pub mod retry;
pub mod stage;
pub mod visualization;

pub use config::{EngineConfig, ScheduleMode};
pub use context::Context;
pub use engine::{run, Engine, RunResult, RunState, RunSummary, StageFailure, TerminalOutput};
pub use error::{GraphError, Result, RunFailure, StageError, ValidationIssue};
pub use graph::{Edge, Graph, GraphBuilder};
pub use hook::{HookEvent, NoopHook, ObservabilityHook, OutcomeKind, RecordingHook, TracingHook};
pub use message::{Message, MessageKind, Payload};
pub use retry::{RetryPolicy, MAX_RETRY_DELAY};
pub use stage::{from_fn, Executor, FnExecutor, StageId, StageSpec};
pub use visualization::{visualize, VisualizationFormat, VisualizationOptions};

pub use async_trait::async_trait;
pub use tokio_util::sync::CancellationToken;

/// Common imports for building and running graphs
pub mod prelude {
    pub use crate::{
        async_trait, from_fn, CancellationToken, Context, Engine, EngineConfig, Executor, Graph,
        GraphBuilder, Message, MessageKind, ObservabilityHook, RetryPolicy, RunResult, RunState,
        ScheduleMode, StageError, StageSpec, TracingHook,
    };
    pub use std::sync::Arc;
}
