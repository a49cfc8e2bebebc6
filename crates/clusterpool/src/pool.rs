//! Per-host sub-pool.
//!
//! Every client of a [`HostPool`] is in exactly one of three states:
//!
//! ```text
//!            borrow (reuse)
//!   idle ─────────────────────▶ checked out
//!    ▲  ◀─────────────────────   │
//!    │        release            │ invalidate / invalidate_all
//!    │ invalidate_all / reap     ▼
//!    └───────────────────────▶ quarantined ──▶ session closed
//! ```
//!
//! Capacity is bounded by a semaphore with `max_active` permits. A permit is
//! held by every checked-out client, every open in progress and every idle
//! client out for a health probe; parked idle clients hold none. A new
//! session is only opened when the idle list is empty, so
//! `idle + checked_out + opening + probing <= max_active` holds at all times.
//! Closing the semaphore ends the pool: waiters and later borrows fail with
//! `Draining`.
//!
//! The bookkeeping lock is never held across an await point. The only place
//! a borrow suspends is the semaphore acquire, so a borrow that times out or
//! is cancelled leaves the pool exactly as it found it.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

use crate::client::{ClientId, PooledClient};
use crate::config::{ExhaustedAction, PoolConfig};
use crate::error::{PoolError, PoolResult};
use crate::host::ClusterHost;
use crate::session::SessionFactory;

/// Point-in-time statistics for one sub-pool.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Clients currently checked out.
    pub active: usize,
    /// Clients parked in the idle list.
    pub idle: usize,
    /// Live clients (active + idle).
    pub total: usize,
    /// Borrowers currently waiting for a slot.
    pub blocked: usize,
    /// Borrows that gave up because the pool was exhausted.
    pub wait_count: u64,
    /// Sessions opened over the pool's lifetime.
    pub created: u64,
    /// Clients quarantined over the pool's lifetime.
    pub invalidated: u64,
}

struct IdleClient {
    client: Arc<PooledClient>,
}

struct CheckedOut {
    client: Arc<PooledClient>,
    _permit: OwnedSemaphorePermit,
}

#[derive(Default)]
struct PoolState {
    /// Most recently released at the back; reuse pops from the back.
    idle: VecDeque<IdleClient>,
    checked_out: HashMap<ClientId, CheckedOut>,
    opening: usize,
    /// Idle clients taken out by `health_check_idle`, each holding a slot.
    probing: usize,
    /// Bumped by `invalidate_all`; clients probed across a bump are stale.
    epoch: u64,
}

/// Bounded set of clients for a single [`ClusterHost`].
pub struct HostPool {
    host: ClusterHost,
    config: PoolConfig,
    factory: Arc<dyn SessionFactory>,
    ids: Arc<AtomicU64>,
    slots: Arc<Semaphore>,
    state: Mutex<PoolState>,
    blocked: AtomicUsize,
    wait_count: AtomicU64,
    created: AtomicU64,
    invalidated: AtomicU64,
}

impl HostPool {
    /// Create an empty sub-pool. `ids` allocates client ids and is shared by
    /// every sub-pool of a registry so ids never collide across hosts.
    pub fn new(
        host: ClusterHost,
        config: PoolConfig,
        factory: Arc<dyn SessionFactory>,
        ids: Arc<AtomicU64>,
    ) -> Self {
        let capacity = config.max_active.max(1);
        Self {
            host,
            config,
            factory,
            ids,
            slots: Arc::new(Semaphore::new(capacity)),
            state: Mutex::new(PoolState::default()),
            blocked: AtomicUsize::new(0),
            wait_count: AtomicU64::new(0),
            created: AtomicU64::new(0),
            invalidated: AtomicU64::new(0),
        }
    }

    pub fn host(&self) -> &ClusterHost {
        &self.host
    }

    pub fn capacity(&self) -> usize {
        self.config.max_active.max(1)
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Borrow a client, reusing an idle one when possible.
    ///
    /// Opens a new session only when no idle client exists and the pool is
    /// below capacity. When the pool is full, waits up to `max_wait` for a
    /// slot (or fails at once under [`ExhaustedAction::Fail`]).
    pub async fn borrow(&self) -> PoolResult<Arc<PooledClient>> {
        let deadline = tokio::time::Instant::now() + self.config.max_wait;
        loop {
            let permit = self.acquire_slot(deadline).await?;
            let reused = {
                let mut state = self.lock();
                if self.slots.is_closed() {
                    return Err(PoolError::Draining);
                }
                let taken = Self::take_idle(&mut state, permit);
                if taken.is_err() {
                    state.opening += 1;
                }
                taken
            };
            match reused {
                Ok(client) if self.verify_reused(&client) => return Ok(client),
                Ok(_) => {}
                Err(permit) => return self.open(permit),
            }
        }
    }

    /// Take an idle client without waiting and without opening a session.
    pub fn try_borrow_idle(&self) -> Option<Arc<PooledClient>> {
        loop {
            let permit = Arc::clone(&self.slots).try_acquire_owned().ok()?;
            let client = Self::take_idle(&mut self.lock(), permit).ok()?;
            if self.verify_reused(&client) {
                return Some(client);
            }
        }
    }

    /// Return a checked-out client to the idle list and wake one waiter.
    ///
    /// Releasing a client that is not checked out (already quarantined,
    /// already released, or owned by another pool) is a no-op.
    pub fn release(&self, client: &PooledClient) {
        let mut state = self.lock();
        let Some(CheckedOut { client, _permit: permit }) = state.checked_out.remove(&client.id())
        else {
            tracing::debug!(
                client_id = %client.id(),
                host = %self.host,
                errored = client.has_errors(),
                "release of client that is not checked out, ignoring"
            );
            return;
        };

        if state.idle.len() >= self.config.max_idle {
            drop(state);
            drop(permit);
            tracing::debug!(
                client_id = %client.id(),
                host = %self.host,
                max_idle = self.config.max_idle,
                "idle list full, closing released client"
            );
            client.dispose();
            return;
        }

        client.touch();
        state.idle.push_back(IdleClient { client });
        let idle = state.idle.len();
        drop(state);
        drop(permit);
        tracing::debug!(host = %self.host, idle, "returned client to pool");
    }

    /// Quarantine a client: flag it, drop it from the live sets and close its
    /// session. The caller's handle stays readable.
    pub fn invalidate(&self, client: &Arc<PooledClient>) {
        client.mark_errored();
        let removed = {
            let mut state = self.lock();
            let from_checked_out = state.checked_out.remove(&client.id()).is_some();
            let before = state.idle.len();
            state.idle.retain(|idle| idle.client.id() != client.id());
            from_checked_out || state.idle.len() != before
        };

        if removed {
            self.invalidated.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(client_id = %client.id(), host = %self.host, "invalidated client");
        }
        client.dispose();
    }

    /// Quarantine every live client of this host in one step.
    ///
    /// Returns the number of clients quarantined.
    pub fn invalidate_all(&self) -> usize {
        let (clients, permits) = {
            let mut state = self.lock();
            state.epoch += 1;
            let mut clients = Vec::with_capacity(state.idle.len() + state.checked_out.len());
            let mut permits = Vec::with_capacity(state.checked_out.len());
            for idle in state.idle.drain(..) {
                idle.client.mark_errored();
                clients.push(idle.client);
            }
            for (_, CheckedOut { client, _permit: permit }) in state.checked_out.drain() {
                client.mark_errored();
                clients.push(client);
                permits.push(permit);
            }
            (clients, permits)
        };
        drop(permits);

        for client in &clients {
            client.dispose();
        }
        let count = clients.len();
        self.invalidated.fetch_add(count as u64, Ordering::Relaxed);
        tracing::info!(host = %self.host, invalidated = count, "invalidated all clients for host");
        count
    }

    /// Snapshot of idle and checked-out clients.
    pub fn live_clients(&self) -> Vec<Arc<PooledClient>> {
        let state = self.lock();
        state
            .idle
            .iter()
            .map(|idle| Arc::clone(&idle.client))
            .chain(state.checked_out.values().map(|c| Arc::clone(&c.client)))
            .collect()
    }

    pub fn is_live(&self, id: ClientId) -> bool {
        let state = self.lock();
        state.checked_out.contains_key(&id) || state.idle.iter().any(|idle| idle.client.id() == id)
    }

    /// Whether no slot is free right now.
    pub fn is_exhausted(&self) -> bool {
        let state = self.lock();
        state.idle.is_empty() && self.slots.available_permits() == 0
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.lock();
        let active = state.checked_out.len();
        let idle = state.idle.len();
        PoolStats {
            active,
            idle,
            total: active + idle + state.probing,
            blocked: self.blocked.load(Ordering::Relaxed),
            wait_count: self.wait_count.load(Ordering::Relaxed),
            created: self.created.load(Ordering::Relaxed),
            invalidated: self.invalidated.load(Ordering::Relaxed),
        }
    }

    /// Close idle clients that have sat unused longer than `idle_timeout`.
    pub fn reap_idle(&self) -> usize {
        let idle_timeout = self.config.idle_timeout;
        let reaped: Vec<_> = {
            let mut state = self.lock();
            let (expired, kept): (VecDeque<_>, VecDeque<_>) = state
                .idle
                .drain(..)
                .partition(|idle| idle.client.last_used().elapsed() >= idle_timeout);
            state.idle = kept;
            expired.into_iter().map(|idle| idle.client).collect()
        };

        for client in &reaped {
            client.dispose();
        }
        if !reaped.is_empty() {
            tracing::info!(host = %self.host, reaped = reaped.len(), "reaped idle clients");
        }
        reaped.len()
    }

    /// Probe every idle client and quarantine the ones that fail.
    ///
    /// Clients are taken out of the idle list under the lock, each with a
    /// slot so capacity stays accounted for, and probed with the lock
    /// released. Idle clients beyond the free slots are left for the next
    /// sweep; reuse probes them anyway.
    pub fn health_check_idle(&self) -> usize {
        let (checking, epoch) = {
            let mut state = self.lock();
            let mut checking = Vec::with_capacity(state.idle.len());
            while let Some(idle) = state.idle.pop_front() {
                match Arc::clone(&self.slots).try_acquire_owned() {
                    Ok(permit) => checking.push((idle, permit)),
                    Err(_) => {
                        state.idle.push_front(idle);
                        break;
                    }
                }
            }
            state.probing += checking.len();
            (checking, state.epoch)
        };
        if checking.is_empty() {
            return 0;
        }

        let (healthy, unhealthy): (Vec<_>, Vec<_>) =
            checking.into_iter().partition(|(idle, _)| idle.client.probe());

        let mut stale = Vec::new();
        let mut permits = Vec::with_capacity(healthy.len());
        {
            let mut state = self.lock();
            state.probing -= healthy.len() + unhealthy.len();
            let restore = state.epoch == epoch && !self.slots.is_closed();
            // Probed clients were the oldest; put them back at the front in order.
            for (idle, permit) in healthy.into_iter().rev() {
                if restore {
                    state.idle.push_front(idle);
                } else {
                    stale.push(idle.client);
                }
                permits.push(permit);
            }
        }
        drop(permits);

        let unhealthy: Vec<_> = unhealthy.into_iter().map(|(idle, _)| idle.client).collect();
        for client in unhealthy.iter().chain(&stale) {
            client.mark_errored();
            client.dispose();
        }
        let removed = unhealthy.len() + stale.len();
        if removed > 0 {
            self.invalidated.fetch_add(removed as u64, Ordering::Relaxed);
            tracing::info!(
                host = %self.host,
                unhealthy = unhealthy.len(),
                stale = stale.len(),
                "removed idle clients after health check"
            );
        }
        unhealthy.len()
    }

    /// Stop handing out clients for good. Waiting borrowers fail with
    /// `Draining` and later borrows fail without waiting. Clients already
    /// checked out can still be released or invalidated.
    pub fn close(&self) {
        self.slots.close();
        tracing::debug!(host = %self.host, "closed host pool to new borrows");
    }

    pub fn is_closed(&self) -> bool {
        self.slots.is_closed()
    }

    async fn acquire_slot(&self, deadline: tokio::time::Instant) -> PoolResult<OwnedSemaphorePermit> {
        match Arc::clone(&self.slots).try_acquire_owned() {
            Ok(permit) => return Ok(permit),
            Err(TryAcquireError::Closed) => return Err(PoolError::Draining),
            Err(TryAcquireError::NoPermits) => {}
        }

        if self.config.exhausted_action == ExhaustedAction::Fail {
            return Err(self.exhausted(Duration::ZERO));
        }

        let waited = {
            let _blocked = BlockedGuard::enter(&self.blocked);
            tokio::time::timeout_at(deadline, Arc::clone(&self.slots).acquire_owned()).await
        };
        match waited {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(PoolError::Draining),
            Err(_) => Err(self.exhausted(self.config.max_wait)),
        }
    }

    fn exhausted(&self, timeout: Duration) -> PoolError {
        self.wait_count.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            host = %self.host,
            max_active = self.capacity(),
            timeout = ?timeout,
            "client pool exhausted"
        );
        PoolError::PoolExhausted {
            host: self.host.clone(),
            timeout,
        }
    }

    /// Move the most recently released idle client to checked out, handing
    /// it the permit. Gives the permit back when the idle list is empty.
    fn take_idle(
        state: &mut PoolState,
        permit: OwnedSemaphorePermit,
    ) -> Result<Arc<PooledClient>, OwnedSemaphorePermit> {
        let Some(IdleClient { client }) = state.idle.pop_back() else {
            return Err(permit);
        };
        client.touch();
        state.checked_out.insert(
            client.id(),
            CheckedOut {
                client: Arc::clone(&client),
                _permit: permit,
            },
        );
        Ok(client)
    }

    /// Health-check a freshly reused client; quarantine it on failure.
    fn verify_reused(&self, client: &Arc<PooledClient>) -> bool {
        if !client.has_errors() && client.probe() {
            tracing::debug!(client_id = %client.id(), host = %self.host, "reused idle client");
            return true;
        }
        tracing::debug!(
            client_id = %client.id(),
            host = %self.host,
            "discarding unhealthy idle client"
        );
        self.invalidate(client);
        false
    }

    fn open(&self, permit: OwnedSemaphorePermit) -> PoolResult<Arc<PooledClient>> {
        let id = ClientId::new(self.ids.fetch_add(1, Ordering::Relaxed));
        let opened = self.factory.open(&self.host);

        let mut state = self.lock();
        state.opening -= 1;
        match opened {
            Ok(session) if self.slots.is_closed() => {
                drop(state);
                drop(permit);
                let client = Arc::new(PooledClient::new(id, self.host.clone(), session));
                client.mark_errored();
                client.dispose();
                tracing::debug!(
                    client_id = %id,
                    host = %self.host,
                    "pool closed while opening, discarding client"
                );
                Err(PoolError::Draining)
            }
            Ok(session) => {
                let client = Arc::new(PooledClient::new(id, self.host.clone(), session));
                client.touch();
                state.checked_out.insert(
                    id,
                    CheckedOut {
                        client: Arc::clone(&client),
                        _permit: permit,
                    },
                );
                let total = state.checked_out.len() + state.idle.len();
                drop(state);
                self.created.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(client_id = %id, host = %self.host, total, "opened new client");
                Ok(client)
            }
            Err(reason) => {
                drop(state);
                drop(permit);
                tracing::warn!(host = %self.host, error = %reason, "failed to open session");
                Err(PoolError::ConnectionUnavailable {
                    host: self.host.clone(),
                    reason,
                })
            }
        }
    }
}

/// Counts a borrower as blocked for as long as it waits, including when the
/// waiting future is dropped.
struct BlockedGuard<'a>(&'a AtomicUsize);

impl<'a> BlockedGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter)
    }
}

impl Drop for BlockedGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for HostPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostPool")
            .field("host", &self.host)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
