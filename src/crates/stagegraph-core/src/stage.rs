//! Stages: the units of work wired into a graph
//!
//! A stage is an [`Executor`] (the handler) plus the registration details in a
//! [`StageSpec`]: its unique id, whether it may run concurrently with itself,
//! an optional timeout and retry policy, and whether it is an explicit entry.
//!
//! Executors hold no per-run state. Long-lived resources such as a database
//! client are passed in when the executor is constructed and are owned by the
//! caller; the engine only ever sees the [`Executor`] contract.
//!
//! # Implementing the trait
//!
//! ```rust
//! use stagegraph_core::{async_trait, Context, Executor, MessageKind};
//! use std::sync::Arc;
//!
//! #[derive(Debug, Clone)]
//! struct Transaction { id: String, amount: u64 }
//!
//! #[derive(Debug, Clone)]
//! struct Scored { id: String, score: f32 }
//!
//! struct RiskClient;
//! impl RiskClient {
//!     async fn score(&self, tx: &Transaction) -> Result<f32, String> {
//!         Ok(tx.amount as f32 / 1000.0)
//!     }
//! }
//!
//! struct ScoreStage { client: Arc<RiskClient> }
//!
//! #[async_trait]
//! impl Executor for ScoreStage {
//!     type Input = Transaction;
//!
//!     fn output_kinds(&self) -> Vec<MessageKind> {
//!         vec![MessageKind::of::<Scored>()]
//!     }
//!
//!     async fn handle(&self, tx: Transaction, ctx: Context) {
//!         match self.client.score(&tx).await {
//!             Ok(score) => ctx.send_to_next(Scored { id: tx.id, score }),
//!             Err(e) => ctx.send_error(format!("risk engine unavailable: {}", e)),
//!         }
//!     }
//! }
//! ```
//!
//! # Closures
//!
//! ```rust
//! use stagegraph_core::{from_fn, StageSpec};
//!
//! let stage = StageSpec::new(
//!     "normalize",
//!     from_fn(|raw: String, ctx| async move {
//!         ctx.send_to_next(raw.trim().to_lowercase());
//!     })
//!     .emits::<String>(),
//! );
//! assert_eq!(stage.id(), "normalize");
//! ```

use crate::context::Context;
use crate::error::StageError;
use crate::message::{Message, MessageKind};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

/// Unique stage identifier within a graph
pub type StageId = String;

/// A stage handler consuming one input type
#[async_trait]
pub trait Executor: Send + Sync + 'static {
    /// Payload type this stage accepts
    type Input: Clone + fmt::Debug + Send + Sync + 'static;

    /// Message kinds this stage may route downstream with `send_to_next`
    ///
    /// Graph validation rejects edges carrying a kind not listed here.
    fn output_kinds(&self) -> Vec<MessageKind> {
        Vec::new()
    }

    /// Process one input and emit the outcome through `ctx`
    async fn handle(&self, input: Self::Input, ctx: Context);
}

/// Type-erased executor stored in the graph
#[async_trait]
pub(crate) trait DynExecutor: Send + Sync {
    fn input_kind(&self) -> MessageKind;
    fn output_kinds(&self) -> Vec<MessageKind>;
    async fn invoke(&self, message: Message, ctx: Context);
}

struct Erased<E>(E);

#[async_trait]
impl<E: Executor> DynExecutor for Erased<E> {
    fn input_kind(&self) -> MessageKind {
        MessageKind::of::<E::Input>()
    }

    fn output_kinds(&self) -> Vec<MessageKind> {
        self.0.output_kinds()
    }

    async fn invoke(&self, message: Message, ctx: Context) {
        let kind = *message.kind();
        match message.into_payload::<E::Input>() {
            Some(input) => self.0.handle(input, ctx).await,
            None => ctx.send_error(StageError::contract_violation(format!(
                "received '{}' but accepts '{}'",
                kind,
                MessageKind::of::<E::Input>()
            ))),
        }
    }
}

/// Executor built from an async closure, see [`from_fn`]
pub struct FnExecutor<T, F> {
    handler: F,
    outputs: Vec<MessageKind>,
    _input: PhantomData<fn(T)>,
}

/// Build an executor from an async closure taking `(input, ctx)`
pub fn from_fn<T, F, Fut>(handler: F) -> FnExecutor<T, F>
where
    T: Clone + fmt::Debug + Send + Sync + 'static,
    F: Fn(T, Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    FnExecutor {
        handler,
        outputs: Vec::new(),
        _input: PhantomData,
    }
}

impl<T, F> FnExecutor<T, F> {
    /// Declare that the closure routes `U` messages downstream
    pub fn emits<U: 'static>(mut self) -> Self {
        let kind = MessageKind::of::<U>();
        if !self.outputs.contains(&kind) {
            self.outputs.push(kind);
        }
        self
    }
}

#[async_trait]
impl<T, F, Fut> Executor for FnExecutor<T, F>
where
    T: Clone + fmt::Debug + Send + Sync + 'static,
    F: Fn(T, Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    type Input = T;

    fn output_kinds(&self) -> Vec<MessageKind> {
        self.outputs.clone()
    }

    async fn handle(&self, input: T, ctx: Context) {
        (self.handler)(input, ctx).await
    }
}

/// Registration record for one stage
#[derive(Clone)]
pub struct StageSpec {
    pub(crate) id: StageId,
    pub(crate) executor: Arc<dyn DynExecutor>,
    pub(crate) input_kind: MessageKind,
    pub(crate) output_kinds: Vec<MessageKind>,
    pub(crate) parallel_safe: bool,
    pub(crate) timeout: Option<Duration>,
    pub(crate) retry: Option<RetryPolicy>,
    pub(crate) entry: bool,
}

impl StageSpec {
    /// Register `executor` under `id`
    pub fn new<E: Executor>(id: impl Into<StageId>, executor: E) -> Self {
        let executor: Arc<dyn DynExecutor> = Arc::new(Erased(executor));
        Self {
            id: id.into(),
            input_kind: executor.input_kind(),
            output_kinds: executor.output_kinds(),
            executor,
            parallel_safe: false,
            timeout: None,
            retry: None,
            entry: false,
        }
    }

    /// Allow several invocations of this stage to be in flight at once
    ///
    /// Only has an effect when the engine runs in concurrent mode.
    pub fn parallel_safe(mut self) -> Self {
        self.parallel_safe = true;
        self
    }

    /// Bound each invocation; exceeding it is recorded as a [`StageError::Timeout`]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Mark as an entry stage even if it has incoming edges
    pub fn as_entry(mut self) -> Self {
        self.entry = true;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn input_kind(&self) -> MessageKind {
        self.input_kind
    }

    pub fn output_kinds(&self) -> &[MessageKind] {
        &self.output_kinds
    }

    pub fn is_parallel_safe(&self) -> bool {
        self.parallel_safe
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn retry_policy(&self) -> Option<&RetryPolicy> {
        self.retry.as_ref()
    }

    pub fn is_marked_entry(&self) -> bool {
        self.entry
    }
}

impl fmt::Debug for StageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageSpec")
            .field("id", &self.id)
            .field("executor", &"<executor>")
            .field("input_kind", &self.input_kind)
            .field("output_kinds", &self.output_kinds)
            .field("parallel_safe", &self.parallel_safe)
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .field("entry", &self.entry)
            .finish()
    }
}
