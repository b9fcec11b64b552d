//! Supervisor health reporting.

use crate::resilience::BreakerSnapshot;
use crate::telemetry::MetricsSnapshot;

/// Point-in-time view of the whole pipeline, rendered by the `status`
/// command and logged at each daily pass.
#[derive(Debug, Clone, Default)]
pub struct HealthReport {
    /// Jobs queued or executing.
    pub in_flight: usize,
    /// Items by coarse disposition.
    pub items_total: usize,
    pub items_pending_approval: usize,
    pub items_in_progress: usize,
    pub items_published: usize,
    pub items_failed: usize,
    pub items_awaiting_retry: usize,
    /// Per-stage throughput and latency.
    pub metrics: MetricsSnapshot,
    /// Circuit breaker states.
    pub breakers: Vec<BreakerSnapshot>,
}

impl HealthReport {
    /// Multi-line human rendering.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "items: {} total | {} pending approval | {} in progress | {} awaiting retry | {} published | {} failed\n",
            self.items_total,
            self.items_pending_approval,
            self.items_in_progress,
            self.items_awaiting_retry,
            self.items_published,
            self.items_failed,
        ));
        out.push_str(&format!("jobs in flight: {}\n", self.in_flight));
        for stage in &self.metrics.stages {
            out.push_str(&format!(
                "  {:<16} ok {:>5}  failed {:>4}  retried {:>4}  p50 {:>6}ms  p95 {:>6}ms\n",
                stage.stage, stage.succeeded, stage.failed, stage.retried, stage.p50_ms, stage.p95_ms,
            ));
        }
        for breaker in &self.breakers {
            out.push_str(&format!("  breaker {:<24} {:?}\n", breaker.label, breaker.state));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::StageSnapshot;

    #[test]
    fn render_includes_counts_and_stages() {
        let report = HealthReport {
            in_flight: 2,
            items_total: 10,
            items_published: 4,
            items_failed: 1,
            metrics: MetricsSnapshot {
                stages: vec![StageSnapshot {
                    stage: "scripting".into(),
                    dispatched: 5,
                    succeeded: 4,
                    failed: 1,
                    retried: 2,
                    p50_ms: 120,
                    p95_ms: 300,
                }],
            },
            ..Default::default()
        };
        let text = report.render();
        assert!(text.contains("10 total"));
        assert!(text.contains("scripting"));
        assert!(text.contains("p95"));
    }
}
