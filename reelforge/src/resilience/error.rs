//! Closed error taxonomy for external calls.
//!
//! Every failure crossing the resilient layer is one of these kinds; the
//! state machine's retry policy and the dashboard's error column key off the
//! kind, never the message.

use crate::validate::ValidationError;
use std::time::Duration;
use thiserror::Error;

/// Failure of a mediated external call.
#[derive(Debug, Clone, Error)]
pub enum CallError {
    /// The class deadline elapsed before the call finished.
    #[error("timed out after {elapsed:?}")]
    Timeout { elapsed: Duration },

    /// Provider returned 429. Carries the provider-honored delay if present.
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    /// Transient failure: 5xx, connection reset, DNS, or similar.
    #[error("service unavailable: {message}")]
    Transient { message: String },

    /// Circuit breaker rejected the call without attempting it.
    #[error("circuit open for {service}")]
    CircuitOpen { service: String },

    /// Non-retryable 4xx from the provider (except 408/429).
    #[error("client error {status}: {message}")]
    Client { status: u16, message: String },

    /// 401/403 or a credential problem before the request was sent.
    #[error("authentication failed: {message}")]
    Auth { message: String },

    /// Payload failed validation before or after the call.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The job owning the call was cancelled.
    #[error("cancelled")]
    Cancelled,

    /// Anything that does not fit the taxonomy; treated as transient with a
    /// bounded attempt count.
    #[error("unexpected failure: {message}")]
    Unexpected { message: String },
}

impl CallError {
    /// Kind tag for classification and dashboard surfacing.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CallError::Timeout { .. } => ErrorKind::Timeout,
            CallError::RateLimited { .. } => ErrorKind::RateLimited,
            CallError::Transient { .. } => ErrorKind::Transient,
            CallError::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            CallError::Client { .. } => ErrorKind::Client,
            CallError::Auth { .. } => ErrorKind::Auth,
            CallError::Validation(_) => ErrorKind::Validation,
            CallError::Cancelled => ErrorKind::Unexpected,
            CallError::Unexpected { .. } => ErrorKind::Unexpected,
        }
    }

    /// Whether the in-call retry loop may try again.
    ///
    /// Circuit-open is deliberately not retryable here: the breaker already
    /// decided the service is down, and the job is requeued after cool-down
    /// by the state machine instead.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CallError::Timeout { .. } | CallError::RateLimited { .. } | CallError::Transient { .. }
        )
    }
}

/// Error kind tags. This is the whole taxonomy; there is no escape hatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    RateLimited,
    Transient,
    CircuitOpen,
    Client,
    Auth,
    Validation,
    Resource,
    Unexpected,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Transient => "transient",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::Client => "client",
            ErrorKind::Auth => "auth",
            ErrorKind::Validation => "validation",
            ErrorKind::Resource => "resource",
            ErrorKind::Unexpected => "unexpected",
        }
    }

    /// Whether the state machine schedules an automatic re-run for this kind.
    ///
    /// `Unexpected` is conditionally retryable (up to the stage's attempt
    /// budget) and `Resource` retries exactly once; both decisions live in
    /// the state machine, which treats `true` here as "eligible".
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::Timeout
                | ErrorKind::RateLimited
                | ErrorKind::Transient
                | ErrorKind::CircuitOpen
                | ErrorKind::Resource
                | ErrorKind::Unexpected
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_one_to_one() {
        assert_eq!(
            CallError::Timeout { elapsed: Duration::from_secs(30) }.kind(),
            ErrorKind::Timeout
        );
        assert_eq!(
            CallError::Client { status: 400, message: "invalid prompt".into() }.kind(),
            ErrorKind::Client
        );
        assert_eq!(
            CallError::Auth { message: "401".into() }.kind(),
            ErrorKind::Auth
        );
    }

    #[test]
    fn retryability_within_a_call() {
        assert!(CallError::Timeout { elapsed: Duration::from_secs(1) }.is_retryable());
        assert!(CallError::RateLimited { retry_after: None }.is_retryable());
        assert!(CallError::Transient { message: "503".into() }.is_retryable());
        assert!(!CallError::CircuitOpen { service: "stock".into() }.is_retryable());
        assert!(!CallError::Client { status: 404, message: String::new() }.is_retryable());
        assert!(!CallError::Auth { message: String::new() }.is_retryable());
        assert!(!CallError::Cancelled.is_retryable());
    }

    #[test]
    fn non_retryable_kinds_fail_the_stage() {
        assert!(!ErrorKind::Client.is_retryable());
        assert!(!ErrorKind::Auth.is_retryable());
        assert!(!ErrorKind::Validation.is_retryable());
        assert!(ErrorKind::CircuitOpen.is_retryable());
    }

    #[test]
    fn kind_labels_match_dashboard_contract() {
        assert_eq!(ErrorKind::RateLimited.as_str(), "rate_limited");
        assert_eq!(ErrorKind::CircuitOpen.as_str(), "circuit_open");
        assert_eq!(ErrorKind::Transient.as_str(), "transient");
    }
}
