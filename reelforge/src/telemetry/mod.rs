//! Observability: per-stage metrics and sensitive-data redaction.
//!
//! Structured logging itself is `tracing` (initialized in [`crate::logging`]);
//! this module carries what the log layer cannot: the atomic counters behind
//! health snapshots and the redaction pass applied to anything that might
//! carry a credential.

mod metrics;
mod redact;

pub use metrics::{MetricsSnapshot, PipelineMetrics, StageCounters, StageSnapshot};
pub use redact::{is_sensitive_key, redact_text};
