//! Per-stage pipeline metrics.
//!
//! Lock-free counters updated from worker tasks, snapshotted by the
//! supervisor's health report. Latency percentiles come from a bounded
//! sample per stage rather than a full histogram; at pipeline volumes the
//! sample is effectively complete.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Maximum retained latency samples per stage.
const LATENCY_SAMPLE_CAP: usize = 512;

/// Counters for a single stage.
#[derive(Default)]
pub struct StageCounters {
    dispatched: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    latencies_ms: Mutex<Vec<u64>>,
}

impl StageCounters {
    fn record_latency(&self, elapsed: Duration) {
        let mut samples = self.latencies_ms.lock().unwrap_or_else(|e| e.into_inner());
        if samples.len() == LATENCY_SAMPLE_CAP {
            samples.remove(0);
        }
        samples.push(elapsed.as_millis() as u64);
    }

    fn percentile(sorted: &[u64], p: f64) -> u64 {
        if sorted.is_empty() {
            return 0;
        }
        let rank = ((sorted.len() - 1) as f64 * p).round() as usize;
        sorted[rank]
    }

    fn snapshot(&self, stage: &str) -> StageSnapshot {
        let mut samples = self
            .latencies_ms
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        samples.sort_unstable();
        StageSnapshot {
            stage: stage.to_string(),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            p50_ms: Self::percentile(&samples, 0.50),
            p95_ms: Self::percentile(&samples, 0.95),
        }
    }
}

/// Point-in-time view of one stage's counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSnapshot {
    pub stage: String,
    pub dispatched: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub retried: u64,
    pub p50_ms: u64,
    pub p95_ms: u64,
}

impl StageSnapshot {
    /// Success rate over completed jobs, in `[0.0, 1.0]`.
    pub fn success_rate(&self) -> f64 {
        let done = self.succeeded + self.failed;
        if done == 0 {
            return 1.0;
        }
        self.succeeded as f64 / done as f64
    }
}

/// Snapshot across all stages, sorted by stage name.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub stages: Vec<StageSnapshot>,
}

/// Thread-safe metrics registry keyed by stage name.
#[derive(Default)]
pub struct PipelineMetrics {
    stages: DashMap<&'static str, StageCounters>,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job_dispatched(&self, stage: &'static str) {
        self.stages
            .entry(stage)
            .or_default()
            .dispatched
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn job_succeeded(&self, stage: &'static str, elapsed: Duration) {
        let counters = self.stages.entry(stage).or_default();
        counters.succeeded.fetch_add(1, Ordering::Relaxed);
        counters.record_latency(elapsed);
    }

    pub fn job_failed(&self, stage: &'static str, elapsed: Duration) {
        let counters = self.stages.entry(stage).or_default();
        counters.failed.fetch_add(1, Ordering::Relaxed);
        counters.record_latency(elapsed);
    }

    pub fn job_retried(&self, stage: &'static str) {
        self.stages
            .entry(stage)
            .or_default()
            .retried
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot all stages, sorted by name for stable output.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut stages: Vec<StageSnapshot> = self
            .stages
            .iter()
            .map(|entry| entry.value().snapshot(entry.key()))
            .collect();
        stages.sort_by(|a, b| a.stage.cmp(&b.stage));
        MetricsSnapshot { stages }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = PipelineMetrics::new();
        metrics.job_dispatched("scripting");
        metrics.job_dispatched("scripting");
        metrics.job_succeeded("scripting", Duration::from_millis(120));
        metrics.job_failed("scripting", Duration::from_millis(80));
        metrics.job_retried("scripting");

        let snap = metrics.snapshot();
        assert_eq!(snap.stages.len(), 1);
        let s = &snap.stages[0];
        assert_eq!(s.dispatched, 2);
        assert_eq!(s.succeeded, 1);
        assert_eq!(s.failed, 1);
        assert_eq!(s.retried, 1);
        assert!((s.success_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn percentiles_from_samples() {
        let metrics = PipelineMetrics::new();
        for ms in 1..=100u64 {
            metrics.job_succeeded("narrating", Duration::from_millis(ms));
        }
        let snap = metrics.snapshot();
        let s = &snap.stages[0];
        assert!(s.p50_ms >= 45 && s.p50_ms <= 55, "p50 was {}", s.p50_ms);
        assert!(s.p95_ms >= 90 && s.p95_ms <= 100, "p95 was {}", s.p95_ms);
    }

    #[test]
    fn empty_stage_has_full_success_rate() {
        let snap = StageSnapshot {
            stage: "publishing".into(),
            dispatched: 0,
            succeeded: 0,
            failed: 0,
            retried: 0,
            p50_ms: 0,
            p95_ms: 0,
        };
        assert_eq!(snap.success_rate(), 1.0);
    }

    #[test]
    fn latency_sample_is_bounded() {
        let metrics = PipelineMetrics::new();
        for _ in 0..(LATENCY_SAMPLE_CAP + 100) {
            metrics.job_succeeded("assembling", Duration::from_millis(10));
        }
        let counters = metrics.stages.get("assembling").unwrap();
        let len = counters.latencies_ms.lock().unwrap().len();
        assert_eq!(len, LATENCY_SAMPLE_CAP);
    }
}
