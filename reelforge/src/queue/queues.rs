//! Bounded per-stage queues with duplicate suppression.

use crate::state::Stage;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// One unit of dispatched work.
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub item_id: String,
    pub stage: Stage,
    pub enqueued_at: DateTime<Utc>,
}

/// Outcome of an enqueue attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueResult {
    Queued,
    /// The same `(item, stage)` is already queued or running.
    Duplicate,
    /// The stage queue is at capacity; the item is picked up by a later
    /// discovery pass.
    Full,
    /// The queue was closed by shutdown.
    Closed,
}

/// A stage's receive side, handed to its worker pool.
pub struct StageReceiver {
    pub stage: Stage,
    pub receiver: mpsc::Receiver<QueuedJob>,
}

/// All stage queues plus the shared in-flight set.
pub struct StageQueues {
    senders: HashMap<Stage, mpsc::Sender<QueuedJob>>,
    in_flight: Arc<DashMap<(String, Stage), ()>>,
}

impl StageQueues {
    /// Builds a queue of `capacity` per production stage, returning the
    /// receive sides for the worker pools.
    pub fn build(capacity: usize, stages: &[Stage]) -> (Self, Vec<StageReceiver>) {
        let mut senders = HashMap::new();
        let mut receivers = Vec::new();
        for &stage in stages {
            let (tx, rx) = mpsc::channel(capacity.max(1));
            senders.insert(stage, tx);
            receivers.push(StageReceiver {
                stage,
                receiver: rx,
            });
        }
        (
            Self {
                senders,
                in_flight: Arc::new(DashMap::new()),
            },
            receivers,
        )
    }

    /// Enqueues a job unless it is already in flight or the queue is full.
    pub fn try_enqueue(&self, item_id: &str, stage: Stage) -> EnqueueResult {
        let Some(sender) = self.senders.get(&stage) else {
            return EnqueueResult::Closed;
        };
        let key = (item_id.to_string(), stage);
        // Entry insertion doubles as the duplicate check
        if self.in_flight.insert(key.clone(), ()).is_some() {
            return EnqueueResult::Duplicate;
        }
        let job = QueuedJob {
            item_id: item_id.to_string(),
            stage,
            enqueued_at: Utc::now(),
        };
        match sender.try_send(job) {
            Ok(()) => EnqueueResult::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.in_flight.remove(&key);
                EnqueueResult::Full
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.in_flight.remove(&key);
                EnqueueResult::Closed
            }
        }
    }

    /// Shared handle workers use to clear in-flight entries on completion.
    pub fn in_flight_handle(&self) -> Arc<DashMap<(String, Stage), ()>> {
        Arc::clone(&self.in_flight)
    }

    /// Jobs queued or running right now.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Closes every queue; workers drain what they already hold and stop.
    pub fn close(&mut self) {
        self.senders.clear();
    }
}
