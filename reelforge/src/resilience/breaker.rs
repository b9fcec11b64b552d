//! Circuit breakers, one per (service, operation class).
//!
//! # State Machine
//!
//! ```text
//! Closed --[threshold failures within window]--> Open
//! Open --[cool-down elapsed, next call is the probe]--> HalfOpen
//! HalfOpen --[probe succeeds]--> Closed
//! HalfOpen --[probe fails]--> Open (cool-down restarts)
//! ```
//!
//! While Open, calls are rejected in microseconds with
//! [`CallError::CircuitOpen`] instead of waiting out a timeout against a
//! service that is known-bad. Breaker state survives restarts via
//! [`BreakerRegistry::save`]/[`BreakerRegistry::load`].

use super::error::CallError;
use super::OperationClass;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Configuration for a circuit breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failures within the window that trip the breaker (default: 5).
    pub failure_threshold: usize,
    /// Trailing window over which failures are counted (default: 60s).
    pub window: Duration,
    /// Time the breaker stays Open before admitting a probe (default: 30s).
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window: Duration::from_secs(60),
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation; calls pass through.
    Closed,
    /// Calls are rejected fast.
    Open,
    /// One probe call is in flight; its outcome decides the next state.
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    /// Recent failure instants, pruned to the trailing window.
    failures: VecDeque<Instant>,
    /// When the breaker last opened.
    opened_at: Option<Instant>,
    /// Whether the half-open probe slot is taken.
    probe_outstanding: bool,
}

/// A single circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    label: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(label: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            label: label.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failures: VecDeque::new(),
                opened_at: None,
                probe_outstanding: false,
            }),
        }
    }

    /// Admits or rejects a call.
    ///
    /// Open breakers whose cool-down has elapsed transition to HalfOpen and
    /// admit exactly this call as the probe.
    pub fn try_acquire(&self) -> Result<(), CallError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let cooled = inner
                    .opened_at
                    .map(|at| at.elapsed() >= self.config.cooldown)
                    .unwrap_or(true);
                if cooled {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_outstanding = true;
                    info!(breaker = %self.label, "circuit half-open, admitting probe");
                    Ok(())
                } else {
                    Err(CallError::CircuitOpen {
                        service: self.label.clone(),
                    })
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_outstanding {
                    Err(CallError::CircuitOpen {
                        service: self.label.clone(),
                    })
                } else {
                    inner.probe_outstanding = true;
                    Ok(())
                }
            }
        }
    }

    /// Records a successful call.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.state != CircuitState::Closed {
            info!(breaker = %self.label, "circuit closed");
        }
        inner.state = CircuitState::Closed;
        inner.failures.clear();
        inner.opened_at = None;
        inner.probe_outstanding = false;
    }

    /// Records a failed call; may trip the breaker.
    pub fn record_failure(&self) {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(now);
                inner.probe_outstanding = false;
                warn!(breaker = %self.label, "probe failed, circuit re-opened");
            }
            CircuitState::Open => {}
            CircuitState::Closed => {
                inner.failures.push_back(now);
                while let Some(oldest) = inner.failures.front() {
                    if now.duration_since(*oldest) > self.config.window {
                        inner.failures.pop_front();
                    } else {
                        break;
                    }
                }
                if inner.failures.len() >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(now);
                    inner.failures.clear();
                    warn!(
                        breaker = %self.label,
                        threshold = self.config.failure_threshold,
                        "failure threshold reached, circuit opened"
                    );
                }
            }
        }
    }

    /// Frees the half-open probe slot without deciding the outcome.
    ///
    /// Used when the probe call was cancelled before the service answered,
    /// so the next caller can probe instead.
    pub fn abandon_probe(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.state == CircuitState::HalfOpen {
            inner.probe_outstanding = false;
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).state
    }

    fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        BreakerSnapshot {
            label: self.label.clone(),
            state: inner.state,
            open_for_secs: inner.opened_at.map(|at| at.elapsed().as_secs()),
        }
    }

    fn restore(&self, snapshot: &BreakerSnapshot) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.state = match snapshot.state {
            // A restart interrupts any in-flight probe; resume from Open so
            // the next call re-probes after the remaining cool-down.
            CircuitState::HalfOpen => CircuitState::Open,
            other => other,
        };
        if inner.state == CircuitState::Open {
            let elapsed = Duration::from_secs(snapshot.open_for_secs.unwrap_or(0));
            inner.opened_at = Instant::now().checked_sub(elapsed).or(Some(Instant::now()));
        }
        inner.probe_outstanding = false;
    }
}

/// Serialized breaker state, written to `state/circuit-breakers.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub label: String,
    pub state: CircuitState,
    /// Seconds the breaker has been open, for cool-down accounting across
    /// restarts.
    pub open_for_secs: Option<u64>,
}

/// Registry of breakers keyed by (service, operation class).
pub struct BreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl BreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    /// Breaker for a (service, class) pair, created on first use.
    pub fn breaker(&self, service: &str, class: OperationClass) -> Arc<CircuitBreaker> {
        let key = format!("{}/{}", service, class.as_str());
        self.breakers
            .entry(key.clone())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(key, self.config.clone())))
            .clone()
    }

    /// Current state of every breaker, sorted by label.
    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let mut all: Vec<BreakerSnapshot> =
            self.breakers.iter().map(|e| e.value().snapshot()).collect();
        all.sort_by(|a, b| a.label.cmp(&b.label));
        all
    }

    /// Persists breaker states with a temp-file-then-rename write.
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let snapshots = self.snapshots();
        let body = serde_json::to_vec_pretty(&snapshots)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, body)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Restores breaker states saved by a previous run.
    ///
    /// A missing file is not an error; unknown labels re-create their
    /// breakers so an Open breaker stays Open across the restart.
    pub fn load(&self, path: &Path) -> std::io::Result<()> {
        let body = match std::fs::read(path) {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };
        let snapshots: Vec<BreakerSnapshot> = serde_json::from_slice(&body)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        for snapshot in &snapshots {
            let breaker = self
                .breakers
                .entry(snapshot.label.clone())
                .or_insert_with(|| {
                    Arc::new(CircuitBreaker::new(snapshot.label.clone(), self.config.clone()))
                })
                .clone();
            breaker.restore(snapshot);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            window: Duration::from_secs(60),
            cooldown: Duration::from_millis(50),
        }
    }

    #[test]
    fn opens_after_threshold_failures() {
        let cb = CircuitBreaker::new("stock/search", fast_config());
        for _ in 0..2 {
            cb.try_acquire().unwrap();
            cb.record_failure();
        }
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn open_rejects_fast() {
        let cb = CircuitBreaker::new("stock/search", fast_config());
        for _ in 0..3 {
            cb.record_failure();
        }
        let start = Instant::now();
        let err = cb.try_acquire().unwrap_err();
        assert!(start.elapsed() < Duration::from_millis(50));
        assert!(matches!(err, CallError::CircuitOpen { .. }));
    }

    #[test]
    fn cooldown_admits_single_probe() {
        let cb = CircuitBreaker::new("stock/search", fast_config());
        for _ in 0..3 {
            cb.record_failure();
        }
        std::thread::sleep(Duration::from_millis(60));

        // First caller after cool-down is the probe
        cb.try_acquire().unwrap();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        // Second caller is still rejected while the probe is out
        assert!(cb.try_acquire().is_err());
    }

    #[test]
    fn probe_success_closes() {
        let cb = CircuitBreaker::new("tts/generation", fast_config());
        for _ in 0..3 {
            cb.record_failure();
        }
        std::thread::sleep(Duration::from_millis(60));
        cb.try_acquire().unwrap();
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.try_acquire().unwrap();
    }

    #[test]
    fn probe_failure_reopens() {
        let cb = CircuitBreaker::new("tts/generation", fast_config());
        for _ in 0..3 {
            cb.record_failure();
        }
        std::thread::sleep(Duration::from_millis(60));
        cb.try_acquire().unwrap();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.try_acquire().is_err());
    }

    #[test]
    fn success_clears_failure_history() {
        let cb = CircuitBreaker::new("textgen/generation", fast_config());
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn registry_keys_by_service_and_class() {
        let registry = BreakerRegistry::new(fast_config());
        let a = registry.breaker("stock", OperationClass::Search);
        let b = registry.breaker("stock", OperationClass::Download);
        let a2 = registry.breaker("stock", OperationClass::Search);
        assert!(Arc::ptr_eq(&a, &a2));
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("circuit-breakers.json");

        let registry = BreakerRegistry::new(fast_config());
        let breaker = registry.breaker("stock", OperationClass::Search);
        for _ in 0..3 {
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Open);
        registry.save(&path).unwrap();

        let restored = BreakerRegistry::new(fast_config());
        restored.load(&path).unwrap();
        let breaker = restored.breaker("stock", OperationClass::Search);
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn load_missing_file_is_ok() {
        let dir = tempfile::TempDir::new().unwrap();
        let registry = BreakerRegistry::new(fast_config());
        registry.load(&dir.path().join("nope.json")).unwrap();
    }
}
