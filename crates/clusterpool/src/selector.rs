//! Candidate ordering and failover for load-balanced borrows.
//!
//! Each call walks the candidate list once, starting at an index chosen by
//! the [`SelectionPolicy`]. Under round-robin the start index comes from an
//! atomic counter, so successive calls spread their first attempt across the
//! list while any single call is fully determined by the counter value.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{info, warn};

use crate::config::SelectionPolicy;
use crate::error::{HostFailure, PoolError, PoolResult};
use crate::host::ClusterHost;

pub struct HostSelector {
    policy: SelectionPolicy,
    counter: AtomicUsize,
}

impl HostSelector {
    pub fn new(policy: SelectionPolicy) -> Self {
        Self {
            policy,
            counter: AtomicUsize::new(0),
        }
    }

    pub fn policy(&self) -> SelectionPolicy {
        self.policy
    }

    /// Indices of `count` candidates in the order one call should try them.
    pub fn order(&self, count: usize) -> Vec<usize> {
        if count == 0 {
            return Vec::new();
        }
        let start = match self.policy {
            SelectionPolicy::InOrder => 0,
            SelectionPolicy::RoundRobin => self.counter.fetch_add(1, Ordering::Relaxed) % count,
        };
        (0..count).map(|i| (start + i) % count).collect()
    }

    /// Current round-robin counter (for diagnostics).
    pub fn current(&self) -> usize {
        self.counter.load(Ordering::Relaxed)
    }

    /// Try `attempt` against each candidate until one succeeds.
    ///
    /// Candidates that do not parse as `host:port` count as failed attempts.
    /// When every candidate fails the error carries each one's cause, in the
    /// order they were tried.
    pub async fn select<S, T, F, Fut>(&self, candidates: &[S], mut attempt: F) -> PoolResult<T>
    where
        S: AsRef<str>,
        F: FnMut(ClusterHost) -> Fut,
        Fut: Future<Output = PoolResult<T>>,
    {
        let mut failures = Vec::new();

        for idx in self.order(candidates.len()) {
            let candidate = candidates[idx].as_ref();
            let result = match ClusterHost::parse(candidate) {
                Ok(host) => attempt(host).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(value) => {
                    if !failures.is_empty() {
                        info!(
                            candidate,
                            failed = failures.len(),
                            "failed over to next candidate host"
                        );
                    }
                    return Ok(value);
                }
                Err(cause) => {
                    warn!(candidate, error = %cause, "candidate host failed");
                    failures.push(HostFailure {
                        candidate: candidate.to_string(),
                        cause,
                    });
                }
            }
        }

        Err(PoolError::NoReachableHost(failures))
    }
}

impl Default for HostSelector {
    fn default() -> Self {
        Self::new(SelectionPolicy::default())
    }
}

impl std::fmt::Debug for HostSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostSelector")
            .field("policy", &self.policy)
            .field("counter", &self.current())
            .finish()
    }
}
