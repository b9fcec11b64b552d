//! Per-item durable state.
//!
//! The [`Item`] record, the forward-only state machine over it, the
//! single-file local store, and the startup reconciliation that realigns
//! local state, dashboard state, and on-disk artifacts after a crash.
//!
//! No component mutates an item's state except through the state machine's
//! transition checks; workers hold the per-item lock across the whole
//! three-step commit (artifact finalize, local state write, dashboard
//! update).

mod db;
mod item;
mod machine;
mod reconcile;

pub use db::{StateDb, StateError};
pub use item::{Item, ItemFailure, ItemSource};
pub use machine::{classify_failure, retry_delay, ItemState, Stage, STAGE_ORDER};
pub use reconcile::{reconcile, ReconcileReport};
