//! Pool error types.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::host::ClusterHost;

/// Result type alias for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;

/// Errors surfaced by sub-pools and the registry.
///
/// Each variant is a distinct condition so callers can decide whether to
/// retry, fail over, or give up. Nothing in this crate retries on its own
/// except the host selector (across candidates) and the known-hosts refresh
/// (one retry).
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("pool exhausted for {host} (waited {timeout:?})")]
    PoolExhausted { host: ClusterHost, timeout: Duration },

    #[error("connection unavailable for {host}: {reason}")]
    ConnectionUnavailable { host: ClusterHost, reason: String },

    #[error("invalid host format: {0:?} (expected host:port)")]
    InvalidHostFormat(String),

    #[error("no reachable host among candidates: {}", FailureList(.0))]
    NoReachableHost(Vec<HostFailure>),

    #[error("no available client in any pool")]
    NoAvailableClient,

    #[error("cluster membership query failed: {0}")]
    MembershipQuery(String),

    #[error("client pool is draining, no new clients are handed out")]
    Draining,
}

impl PoolError {
    /// Whether a caller might succeed by retrying later (possibly elsewhere).
    pub fn is_retryable(&self) -> bool {
        !matches!(self, PoolError::InvalidHostFormat(_) | PoolError::Draining)
    }
}

/// A single candidate's failure during a load-balanced borrow.
#[derive(Debug)]
pub struct HostFailure {
    /// The candidate string exactly as the caller supplied it.
    pub candidate: String,
    pub cause: PoolError,
}

struct FailureList<'a>(&'a [HostFailure]);

impl fmt::Display for FailureList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "no candidates given");
        }
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{} ({})", failure.candidate, failure.cause)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_reachable_host_lists_every_cause() {
        let err = PoolError::NoReachableHost(vec![
            HostFailure {
                candidate: "a:1".to_string(),
                cause: PoolError::ConnectionUnavailable {
                    host: ClusterHost::new("a", 1),
                    reason: "connection refused".to_string(),
                },
            },
            HostFailure {
                candidate: "garbage".to_string(),
                cause: PoolError::InvalidHostFormat("garbage".to_string()),
            },
        ]);
        let msg = err.to_string();
        assert!(msg.contains("a:1 (connection unavailable for a:1: connection refused)"));
        assert!(msg.contains("garbage (invalid host format"));
    }

    #[test]
    fn no_reachable_host_without_candidates() {
        let err = PoolError::NoReachableHost(vec![]);
        assert!(err.to_string().contains("no candidates given"));
    }

    #[test]
    fn format_errors_are_not_retryable() {
        assert!(!PoolError::InvalidHostFormat("x".to_string()).is_retryable());
        assert!(!PoolError::Draining.is_retryable());
        assert!(PoolError::NoAvailableClient.is_retryable());
    }
}
