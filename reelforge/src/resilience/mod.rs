//! Resilient call layer for every outbound interaction.
//!
//! No component talks to an external collaborator directly: all HTTP leaves
//! the process through [`ResilientCaller`], which layers, in order:
//!
//! 1. a per-(service, class) circuit breaker that fails fast when a
//!    collaborator is known-bad,
//! 2. a per-service bulkhead bounding in-flight calls,
//! 3. an overall deadline selected by [`OperationClass`],
//! 4. retries with full-jitter exponential backoff for retryable failures.
//!
//! Failures surface as the closed [`CallError`] taxonomy; nothing upstream
//! ever sees a raw transport error.

mod backoff;
mod breaker;
mod bulkhead;
mod caller;
mod error;
pub(crate) mod http;

pub use backoff::{backoff_delay, backoff_envelope, BACKOFF_BASE, BACKOFF_CAP};
pub use breaker::{BreakerRegistry, BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use bulkhead::{Bulkhead, BulkheadConfig, BulkheadPermit, BulkheadRegistry};
pub use caller::{CallOptions, ResilientCaller, ResilientCallerConfig};
pub use error::{CallError, ErrorKind};
pub use http::{AsyncHttpClient, HttpRequest, HttpResponse, Method, ReqwestHttpClient};

use std::time::Duration;

/// Category of external call, fixing its timeout envelope.
///
/// The two-level timeout is (connection establishment, whole operation);
/// downloads and streams get long overall budgets, health probes stay tight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationClass {
    Health,
    Api,
    Search,
    Generation,
    Download,
    Auth,
    Stream,
}

impl OperationClass {
    /// Connection-establishment timeout for this class.
    pub fn connect_timeout(self) -> Duration {
        match self {
            OperationClass::Health => Duration::from_secs(5),
            OperationClass::Api => Duration::from_secs(10),
            OperationClass::Search => Duration::from_secs(10),
            OperationClass::Generation => Duration::from_secs(15),
            OperationClass::Download => Duration::from_secs(30),
            OperationClass::Auth => Duration::from_secs(15),
            OperationClass::Stream => Duration::from_secs(30),
        }
    }

    /// Overall deadline for a single attempt of this class.
    pub fn overall_timeout(self) -> Duration {
        match self {
            OperationClass::Health => Duration::from_secs(10),
            OperationClass::Api => Duration::from_secs(30),
            OperationClass::Search => Duration::from_secs(45),
            OperationClass::Generation => Duration::from_secs(120),
            OperationClass::Download => Duration::from_secs(300),
            OperationClass::Auth => Duration::from_secs(30),
            OperationClass::Stream => Duration::from_secs(600),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OperationClass::Health => "health",
            OperationClass::Api => "api",
            OperationClass::Search => "search",
            OperationClass::Generation => "generation",
            OperationClass::Download => "download",
            OperationClass::Auth => "auth",
            OperationClass::Stream => "stream",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_envelope_per_class() {
        assert_eq!(OperationClass::Health.connect_timeout(), Duration::from_secs(5));
        assert_eq!(OperationClass::Health.overall_timeout(), Duration::from_secs(10));
        assert_eq!(OperationClass::Generation.overall_timeout(), Duration::from_secs(120));
        assert_eq!(OperationClass::Download.overall_timeout(), Duration::from_secs(300));
        assert_eq!(OperationClass::Stream.overall_timeout(), Duration::from_secs(600));
    }

    #[test]
    fn class_names_are_stable() {
        // These appear in persisted breaker snapshots; renames are breaking.
        assert_eq!(OperationClass::Api.as_str(), "api");
        assert_eq!(OperationClass::Search.as_str(), "search");
        assert_eq!(OperationClass::Auth.as_str(), "auth");
    }
}
