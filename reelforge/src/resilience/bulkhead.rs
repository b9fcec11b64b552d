//! Per-service bulkheads bounding in-flight calls.
//!
//! A bulkhead caps how many calls to one service are in flight at once, so a
//! slow collaborator cannot absorb every worker in the process. Calls beyond
//! the cap wait in a bounded queue with their own timeout; anything past the
//! queue bound is rejected immediately.

use super::error::CallError;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Configuration for one service's bulkhead.
#[derive(Debug, Clone)]
pub struct BulkheadConfig {
    /// Maximum concurrent in-flight calls (default: 8).
    pub max_in_flight: usize,
    /// Maximum callers allowed to wait for a slot (default: 32).
    pub max_waiting: usize,
    /// How long a waiter holds on before giving up (default: 10s).
    pub queue_timeout: Duration,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 8,
            max_waiting: 32,
            queue_timeout: Duration::from_secs(10),
        }
    }
}

/// In-flight call limiter for a single service.
pub struct Bulkhead {
    service: String,
    semaphore: Arc<Semaphore>,
    waiting: AtomicUsize,
    config: BulkheadConfig,
}

/// Permit for one in-flight call; dropping it releases the slot.
#[derive(Debug)]
pub struct BulkheadPermit {
    _permit: OwnedSemaphorePermit,
}

impl Bulkhead {
    pub fn new(service: impl Into<String>, config: BulkheadConfig) -> Self {
        Self {
            service: service.into(),
            semaphore: Arc::new(Semaphore::new(config.max_in_flight.max(1))),
            waiting: AtomicUsize::new(0),
            config,
        }
    }

    /// Acquires an in-flight slot, waiting up to the queue timeout.
    ///
    /// Rejections (queue full, queue timeout) surface as
    /// [`CallError::Transient`]; the caller's retry policy applies.
    pub async fn acquire(&self) -> Result<BulkheadPermit, CallError> {
        // Fast path: a slot is free right now.
        if let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() {
            return Ok(BulkheadPermit { _permit: permit });
        }

        let waiting = self.waiting.fetch_add(1, Ordering::SeqCst);
        if waiting >= self.config.max_waiting {
            self.waiting.fetch_sub(1, Ordering::SeqCst);
            return Err(CallError::Transient {
                message: format!("bulkhead queue full for {}", self.service),
            });
        }

        let acquired = tokio::time::timeout(
            self.config.queue_timeout,
            Arc::clone(&self.semaphore).acquire_owned(),
        )
        .await;
        self.waiting.fetch_sub(1, Ordering::SeqCst);

        match acquired {
            Ok(Ok(permit)) => Ok(BulkheadPermit { _permit: permit }),
            Ok(Err(_)) => Err(CallError::Unexpected {
                message: format!("bulkhead semaphore closed for {}", self.service),
            }),
            Err(_) => Err(CallError::Transient {
                message: format!("bulkhead queue timeout for {}", self.service),
            }),
        }
    }

    /// Slots currently available.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

/// Registry of bulkheads keyed by service name.
pub struct BulkheadRegistry {
    config: BulkheadConfig,
    bulkheads: DashMap<String, Arc<Bulkhead>>,
}

impl BulkheadRegistry {
    pub fn new(config: BulkheadConfig) -> Self {
        Self {
            config,
            bulkheads: DashMap::new(),
        }
    }

    /// Bulkhead for a service, created on first use.
    pub fn bulkhead(&self, service: &str) -> Arc<Bulkhead> {
        self.bulkheads
            .entry(service.to_string())
            .or_insert_with(|| Arc::new(Bulkhead::new(service, self.config.clone())))
            .clone()
    }
}
