//! Work queue and per-stage worker pools.
//!
//! One bounded queue per stage feeds a fixed-size worker pool. Duplicate
//! `(item, stage)` enqueues are suppressed by an in-flight set, a per-item
//! lock keeps one worker per item across the whole system, and every job
//! runs under a composite deadline linked to the supervisor's shutdown
//! token.

mod queues;
mod worker;

pub use queues::{EnqueueResult, QueuedJob, StageQueues, StageReceiver};
pub use worker::{execute_job, run_stage_pool, WorkerDeps};
