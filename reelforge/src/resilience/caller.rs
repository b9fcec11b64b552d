//! The resilient caller: breaker, bulkhead, deadline, and retry in one place.

use super::backoff::backoff_delay;
use super::breaker::{BreakerRegistry, BreakerSnapshot, CircuitBreakerConfig};
use super::bulkhead::{BulkheadConfig, BulkheadRegistry};
use super::error::CallError;
use super::http::{AsyncHttpClient, HttpRequest, HttpResponse, ReqwestHttpClient};
use super::OperationClass;
use dashmap::DashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Configuration for the resilient caller.
#[derive(Debug, Clone, Default)]
pub struct ResilientCallerConfig {
    pub breaker: CircuitBreakerConfig,
    pub bulkhead: BulkheadConfig,
}

/// Per-call options supplied by the stage adapter.
#[derive(Debug, Clone)]
pub struct CallOptions {
    /// Attempt budget for this call, including the first try.
    pub max_attempts: u32,
    /// Provider-side dedupe key, sent as the `Idempotency-Key` header.
    pub idempotency_key: Option<String>,
    /// Deadline tighter than the class deadline, when the stage budget or
    /// supervisor drain demands one.
    pub deadline: Option<Duration>,
    /// Cancellation for the owning job.
    pub cancel: CancellationToken,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            idempotency_key: None,
            deadline: None,
            cancel: CancellationToken::new(),
        }
    }
}

/// Mediates every outbound HTTP call.
///
/// Shared across all workers; per-service state (breakers, bulkheads) is
/// created lazily on first use.
pub struct ResilientCaller {
    transports: DashMap<OperationClass, Arc<dyn AsyncHttpClient>>,
    injected_transport: Option<Arc<dyn AsyncHttpClient>>,
    breakers: BreakerRegistry,
    bulkheads: BulkheadRegistry,
}

impl ResilientCaller {
    pub fn new(config: ResilientCallerConfig) -> Self {
        Self {
            transports: DashMap::new(),
            injected_transport: None,
            breakers: BreakerRegistry::new(config.breaker),
            bulkheads: BulkheadRegistry::new(config.bulkhead),
        }
    }

    /// Caller with a single injected transport for every class. Tests use
    /// this to script responses without a network.
    pub fn with_transport(
        config: ResilientCallerConfig,
        transport: Arc<dyn AsyncHttpClient>,
    ) -> Self {
        Self {
            transports: DashMap::new(),
            injected_transport: Some(transport),
            breakers: BreakerRegistry::new(config.breaker),
            bulkheads: BulkheadRegistry::new(config.bulkhead),
        }
    }

    fn transport(&self, class: OperationClass) -> Result<Arc<dyn AsyncHttpClient>, CallError> {
        if let Some(ref transport) = self.injected_transport {
            return Ok(Arc::clone(transport));
        }
        if let Some(existing) = self.transports.get(&class) {
            return Ok(Arc::clone(existing.value()));
        }
        let built: Arc<dyn AsyncHttpClient> = Arc::new(ReqwestHttpClient::for_class(class)?);
        self.transports.insert(class, Arc::clone(&built));
        Ok(built)
    }

    /// Performs a mediated call.
    ///
    /// Each attempt re-checks the circuit breaker, acquires a bulkhead slot
    /// for the duration of the request only, and runs under
    /// `min(class overall timeout, options.deadline)`. Retryable failures
    /// back off with full jitter (or the provider's `Retry-After`) before
    /// the next attempt.
    pub async fn call(
        &self,
        service: &str,
        class: OperationClass,
        mut request: HttpRequest,
        options: CallOptions,
    ) -> Result<HttpResponse, CallError> {
        if let Some(ref key) = options.idempotency_key {
            request = request.header("Idempotency-Key", key.clone());
        }

        let transport = self.transport(class)?;
        let breaker = self.breakers.breaker(service, class);
        let bulkhead = self.bulkheads.bulkhead(service);
        let deadline = match options.deadline {
            Some(d) => d.min(class.overall_timeout()),
            None => class.overall_timeout(),
        };
        let max_attempts = options.max_attempts.max(1);

        let mut last_error = CallError::Unexpected {
            message: "no attempt made".to_string(),
        };

        for attempt in 1..=max_attempts {
            if options.cancel.is_cancelled() {
                return Err(CallError::Cancelled);
            }
            breaker.try_acquire()?;

            let started = Instant::now();
            let outcome = {
                let _slot = match bulkhead.acquire().await {
                    Ok(slot) => slot,
                    Err(e) => {
                        breaker.record_failure();
                        last_error = e;
                        self.maybe_backoff(&last_error, attempt, max_attempts, &options)
                            .await?;
                        continue;
                    }
                };
                tokio::select! {
                    biased;
                    _ = options.cancel.cancelled() => Err(CallError::Cancelled),
                    result = tokio::time::timeout(deadline, transport.execute(request.clone())) => {
                        match result {
                            Ok(inner) => inner,
                            Err(_) => Err(CallError::Timeout { elapsed: started.elapsed() }),
                        }
                    }
                }
            };
            let latency = started.elapsed();

            let error = match outcome {
                Ok(response) => match Self::classify(response) {
                    Ok(response) => {
                        breaker.record_success();
                        debug!(
                            service,
                            class = class.as_str(),
                            attempt,
                            latency_ms = latency.as_millis() as u64,
                            outcome = "ok",
                            "external call"
                        );
                        return Ok(response);
                    }
                    Err(e) => e,
                },
                Err(e) => e,
            };

            debug!(
                service,
                class = class.as_str(),
                attempt,
                latency_ms = latency.as_millis() as u64,
                outcome = error.kind().as_str(),
                "external call"
            );

            if matches!(error, CallError::Cancelled) {
                breaker.abandon_probe();
                return Err(error);
            }
            if error.is_retryable() {
                breaker.record_failure();
            } else {
                // Auth/client/validation failures mean the service answered;
                // the circuit stays healthy.
                breaker.record_success();
            }
            last_error = error;
            self.maybe_backoff(&last_error, attempt, max_attempts, &options)
                .await?;
        }

        warn!(
            service,
            class = class.as_str(),
            attempts = max_attempts,
            kind = last_error.kind().as_str(),
            "external call exhausted attempts"
        );
        Err(last_error)
    }

    /// Sleeps before the next attempt, or returns the error when the attempt
    /// budget is spent or the error is not retryable.
    async fn maybe_backoff(
        &self,
        error: &CallError,
        attempt: u32,
        max_attempts: u32,
        options: &CallOptions,
    ) -> Result<(), CallError> {
        if !error.is_retryable() || attempt >= max_attempts {
            return Err(error.clone());
        }
        let delay = match error {
            CallError::RateLimited {
                retry_after: Some(delay),
            } => *delay,
            _ => backoff_delay(attempt),
        };
        tokio::select! {
            biased;
            _ = options.cancel.cancelled() => Err(CallError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    /// Maps HTTP status to the error taxonomy.
    fn classify(response: HttpResponse) -> Result<HttpResponse, CallError> {
        let status = response.status;
        if response.is_success() {
            return Ok(response);
        }
        let message = String::from_utf8_lossy(&response.body)
            .chars()
            .take(200)
            .collect::<String>();
        match status {
            401 | 403 => Err(CallError::Auth {
                message: format!("HTTP {}", status),
            }),
            429 => Err(CallError::RateLimited {
                retry_after: response.retry_after,
            }),
            408 => Err(CallError::Transient {
                message: format!("HTTP 408: {}", message),
            }),
            400..=499 => Err(CallError::Client { status, message }),
            500..=599 => Err(CallError::Transient {
                message: format!("HTTP {}: {}", status, message),
            }),
            other => Err(CallError::Unexpected {
                message: format!("HTTP {}: {}", other, message),
            }),
        }
    }

    /// Current breaker states, for health reporting and persistence.
    pub fn breaker_snapshots(&self) -> Vec<BreakerSnapshot> {
        self.breakers.snapshots()
    }

    /// Persists breaker states to disk.
    pub fn save_breakers(&self, path: &Path) -> std::io::Result<()> {
        self.breakers.save(path)
    }

    /// Restores breaker states from a previous run.
    pub fn load_breakers(&self, path: &Path) -> std::io::Result<()> {
        self.breakers.load(path)
    }
}
