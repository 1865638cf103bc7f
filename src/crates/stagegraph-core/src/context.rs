//! Per-invocation emission handle
//!
//! A [`Context`] is the only way a stage talks to the rest of the graph. The
//! stage decides *what* happens to its result (route it on, finish the run
//! branch with an output, or record an error); the engine decides *how* that
//! is delivered.
//!
//! | Method | Effect |
//! |--------|--------|
//! | [`send_to_next`](Context::send_to_next) | route along every outgoing edge whose kind matches |
//! | [`send_output`](Context::send_output) | record a terminal output, never routed further |
//! | [`send_error`](Context::send_error) | record a contained [`StageError`] for this stage |
//!
//! An invocation that returns without calling any of them is recorded as a
//! contract violation. Once the handler returns the context is sealed; sends
//! made afterwards (for example from a task the handler spawned) are dropped
//! with a warning.

use crate::error::StageError;
use crate::message::Message;
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// One event recorded by a stage invocation
#[derive(Debug, Clone)]
pub(crate) enum Emission {
    Next(Message),
    Output(Message),
    Error(StageError),
}

/// Handle a stage uses to emit its outcome
///
/// Cloning is cheap and every clone records into the same invocation.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    stage: String,
    run_id: Uuid,
    attempt: u32,
    slot: Mutex<Slot>,
}

#[derive(Default)]
struct Slot {
    emissions: Vec<Emission>,
    sealed: bool,
}

impl Context {
    pub(crate) fn new(stage: impl Into<String>, run_id: Uuid, attempt: u32) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                stage: stage.into(),
                run_id,
                attempt,
                slot: Mutex::new(Slot::default()),
            }),
        }
    }

    /// Id of the stage this invocation belongs to
    pub fn stage_id(&self) -> &str {
        &self.inner.stage
    }

    /// Id of the run this invocation belongs to
    pub fn run_id(&self) -> Uuid {
        self.inner.run_id
    }

    /// 1-based attempt number; greater than 1 only when a retry policy re-ran the stage
    pub fn attempt(&self) -> u32 {
        self.inner.attempt
    }

    /// Route a message to every downstream stage whose edge carries this type
    ///
    /// With several matching edges the message fans out and each destination
    /// receives its own clone.
    pub fn send_to_next<T>(&self, value: T)
    where
        T: Any + Clone + Send + Sync + fmt::Debug,
    {
        self.push(Emission::Next(Message::new(value)));
    }

    /// Route an already wrapped message, see [`send_to_next`](Self::send_to_next)
    pub fn send_message(&self, message: Message) {
        self.push(Emission::Next(message));
    }

    /// Record a terminal output of the run
    pub fn send_output<T>(&self, value: T)
    where
        T: Any + Clone + Send + Sync + fmt::Debug,
    {
        self.push(Emission::Output(Message::new(value)));
    }

    /// Record a stage-local failure
    ///
    /// Downstream stages fed only by this branch do not run; other branches
    /// are unaffected.
    pub fn send_error(&self, error: impl Into<StageError>) {
        self.push(Emission::Error(error.into()));
    }

    /// Whether this invocation has emitted anything yet
    pub fn has_emitted(&self) -> bool {
        !self.inner.slot.lock().emissions.is_empty()
    }

    fn push(&self, emission: Emission) {
        let mut slot = self.inner.slot.lock();
        if slot.sealed {
            tracing::warn!(
                stage = %self.inner.stage,
                run_id = %self.inner.run_id,
                "Ignoring emission after the stage invocation finished"
            );
            return;
        }
        slot.emissions.push(emission);
    }

    /// Close the context and hand back everything it recorded
    pub(crate) fn seal(&self) -> Vec<Emission> {
        let mut slot = self.inner.slot.lock();
        slot.sealed = true;
        std::mem::take(&mut slot.emissions)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("stage", &self.inner.stage)
            .field("run_id", &self.inner.run_id)
            .field("attempt", &self.inner.attempt)
            .finish()
    }
}
