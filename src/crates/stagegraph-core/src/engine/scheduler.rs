//! Ready queue and in-flight bookkeeping for one run

use crate::message::Message;
use std::collections::VecDeque;

/// A message waiting to be handed to a stage
#[derive(Debug)]
pub(crate) struct Delivery {
    pub stage: usize,
    pub message: Message,
}

/// FIFO queue of deliveries
///
/// `pop_ready` takes the oldest delivery whose stage may start now. In
/// sequential mode nothing is ever busy, so this is plain FIFO order.
#[derive(Debug, Default)]
pub(crate) struct ReadyQueue {
    items: VecDeque<Delivery>,
}

impl ReadyQueue {
    pub fn push(&mut self, stage: usize, message: Message) {
        self.items.push_back(Delivery { stage, message });
    }

    pub fn pop_ready(&mut self, can_start: impl Fn(usize) -> bool) -> Option<Delivery> {
        let pos = self.items.iter().position(|d| can_start(d.stage))?;
        self.items.remove(pos)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Invocations currently running, per stage
#[derive(Debug)]
pub(crate) struct InFlight {
    per_stage: Vec<usize>,
    total: usize,
}

impl InFlight {
    pub fn new(stages: usize) -> Self {
        Self {
            per_stage: vec![0; stages],
            total: 0,
        }
    }

    pub fn start(&mut self, stage: usize) {
        self.per_stage[stage] += 1;
        self.total += 1;
    }

    pub fn finish(&mut self, stage: usize) {
        self.per_stage[stage] = self.per_stage[stage].saturating_sub(1);
        self.total = self.total.saturating_sub(1);
    }

    pub fn is_busy(&self, stage: usize) -> bool {
        self.per_stage[stage] > 0
    }

    pub fn total(&self) -> usize {
        self.total
    }
}
