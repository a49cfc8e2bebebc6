//! Pooled client handle.
//!
//! Borrowers receive an `Arc<PooledClient>`. The handle stays valid after the
//! pool has discarded the client, so a caller can still read its error flag
//! once it has been invalidated.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, MutexGuard};

use crate::host::ClusterHost;
use crate::session::ClientSession;

/// Opaque identity of a pooled client, unique for the lifetime of a registry.
///
/// Two handles refer to the same client exactly when their ids are equal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl ClientId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// A session owned by one host's sub-pool.
pub struct PooledClient {
    id: ClientId,
    host: ClusterHost,
    created_at: Instant,
    /// Nanoseconds after `created_at` of the last borrow or release.
    last_used: AtomicU64,
    errored: AtomicBool,
    closed: AtomicBool,
    session: Mutex<Box<dyn ClientSession>>,
}

impl PooledClient {
    pub(crate) fn new(id: ClientId, host: ClusterHost, session: Box<dyn ClientSession>) -> Self {
        Self {
            id,
            host,
            created_at: Instant::now(),
            last_used: AtomicU64::new(0),
            errored: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            session: Mutex::new(session),
        }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn host(&self) -> &ClusterHost {
        &self.host
    }

    /// Address of the host this client is connected to.
    pub fn url(&self) -> &str {
        self.host.address()
    }

    pub fn port(&self) -> u16 {
        self.host.port()
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// When the client was last handed out or returned to its pool.
    pub fn last_used(&self) -> Instant {
        self.created_at + Duration::from_nanos(self.last_used.load(Ordering::Acquire))
    }

    pub(crate) fn touch(&self) {
        let nanos = u64::try_from(self.created_at.elapsed().as_nanos()).unwrap_or(u64::MAX);
        self.last_used.store(nanos, Ordering::Release);
    }

    /// Whether the pool has invalidated this client.
    pub fn has_errors(&self) -> bool {
        self.errored.load(Ordering::Acquire)
    }

    /// Exclusive access to the underlying session for issuing operations.
    pub async fn session(&self) -> MutexGuard<'_, Box<dyn ClientSession>> {
        self.session.lock().await
    }

    pub(crate) fn mark_errored(&self) {
        self.errored.store(true, Ordering::Release);
    }

    /// Health probe for an idle client. A session somebody else is holding
    /// counts as unhealthy, since idle clients must not be in use.
    pub(crate) fn probe(&self) -> bool {
        match self.session.try_lock() {
            Ok(mut session) => session.is_healthy(),
            Err(_) => false,
        }
    }

    pub(crate) async fn describe_ring(&self) -> Result<String, String> {
        self.session.lock().await.describe_ring()
    }

    /// Close the session exactly once.
    ///
    /// If a caller still holds the session guard the close happens on a
    /// background task once the guard is dropped. Close failures are logged
    /// and swallowed.
    pub(crate) fn dispose(self: &Arc<Self>) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        match self.session.try_lock() {
            Ok(mut session) => close_session(self.id, &self.host, session.as_mut()),
            Err(_) => {
                let Ok(runtime) = tokio::runtime::Handle::try_current() else {
                    tracing::warn!(
                        client_id = %self.id,
                        host = %self.host,
                        "session busy and no runtime to defer close, dropping with handle"
                    );
                    return;
                };
                tracing::debug!(
                    client_id = %self.id,
                    host = %self.host,
                    "session busy, deferring close"
                );
                let client = Arc::clone(self);
                runtime.spawn(async move {
                    let mut session = client.session.lock().await;
                    close_session(client.id, &client.host, session.as_mut());
                });
            }
        }
    }
}

fn close_session(id: ClientId, host: &ClusterHost, session: &mut dyn ClientSession) {
    match session.close() {
        Ok(()) => tracing::debug!(client_id = %id, host = %host, "closed session"),
        Err(e) => tracing::warn!(
            client_id = %id,
            host = %host,
            error = %e,
            "failed to close session, ignoring"
        ),
    }
}

// ── Debug impl (cannot auto-derive due to dyn trait behind a lock) ──

impl fmt::Debug for PooledClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledClient")
            .field("id", &self.id)
            .field("host", &self.host)
            .field("errored", &self.has_errors())
            .finish_non_exhaustive()
    }
}
