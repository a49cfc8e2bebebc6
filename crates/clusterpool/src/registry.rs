//! Pool registry mapping each [`ClusterHost`] to its [`HostPool`].
//!
//! # Architecture
//!
//! ```text
//! caller borrow_client(...)
//!   → PoolRegistry
//!     → explicit host / "host:port" → get_pool(host) → HostPool::borrow
//!     → candidate list             → HostSelector::select → HostPool::borrow per candidate
//!     → no argument                → first HostPool with an idle client
//! caller release_client / invalidate_client
//!   → PoolRegistry → owning HostPool (looked up by client.host())
//! ```
//!
//! The host map is read-locked for lookups and write-locked only while a new
//! host is registered. Operations spanning hosts take a snapshot of the
//! registered sub-pools and then visit them one at a time, so no code path
//! ever holds two sub-pool locks.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::client::PooledClient;
use crate::config::PoolConfig;
use crate::error::{PoolError, PoolResult};
use crate::host::ClusterHost;
use crate::known_hosts::KnownHosts;
use crate::pool::{HostPool, PoolStats};
use crate::selector::HostSelector;
use crate::session::SessionFactory;

#[derive(Default)]
struct PoolMap {
    by_host: HashMap<ClusterHost, Arc<HostPool>>,
    /// Registration order; the argument-less borrow scans in this order.
    order: Vec<Arc<HostPool>>,
}

/// Process-wide entry point for borrowing, returning and discarding clients.
pub struct PoolRegistry {
    config: PoolConfig,
    factory: Arc<dyn SessionFactory>,
    ids: Arc<AtomicU64>,
    pools: RwLock<PoolMap>,
    selector: HostSelector,
    known_hosts: KnownHosts,
    draining: AtomicBool,
}

impl PoolRegistry {
    pub fn new(config: PoolConfig, factory: Arc<dyn SessionFactory>) -> Self {
        let known_hosts = KnownHosts::new(&config.known_hosts);
        let selector = HostSelector::new(config.selection);
        Self {
            config,
            factory,
            ids: Arc::new(AtomicU64::new(1)),
            pools: RwLock::new(PoolMap::default()),
            selector,
            known_hosts,
            draining: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Relaxed)
    }

    // ── Sub-pool lookup ─────────────────────────────────────────────

    /// Sub-pool for `host`, registering an empty one on first use.
    ///
    /// Concurrent first calls for the same host all receive the same pool.
    pub fn get_pool(&self, host: &ClusterHost) -> Arc<HostPool> {
        if let Some(pool) = self.find_pool(host) {
            return pool;
        }

        let mut pools = self.pools.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(pool) = pools.by_host.get(host) {
            return Arc::clone(pool);
        }
        let pool = Arc::new(HostPool::new(
            host.clone(),
            self.config.clone(),
            Arc::clone(&self.factory),
            Arc::clone(&self.ids),
        ));
        if self.is_draining() {
            pool.close();
        }
        pools.by_host.insert(host.clone(), Arc::clone(&pool));
        pools.order.push(Arc::clone(&pool));
        let registered = pools.order.len();
        drop(pools);

        info!(
            host = %host,
            max_active = self.config.max_active,
            registered,
            "registered host pool"
        );
        pool
    }

    /// Sub-pool for `host` if one has been registered.
    pub fn find_pool(&self, host: &ClusterHost) -> Option<Arc<HostPool>> {
        self.pools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_host
            .get(host)
            .cloned()
    }

    /// Every registered sub-pool, in registration order.
    pub fn pools(&self) -> Vec<Arc<HostPool>> {
        self.pools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .order
            .clone()
    }

    pub fn pool_hosts(&self) -> Vec<ClusterHost> {
        self.pools().iter().map(|pool| pool.host().clone()).collect()
    }

    // ── Borrow family ───────────────────────────────────────────────

    /// Borrow a client for an explicit host.
    pub async fn borrow_client(&self, address: &str, port: u16) -> PoolResult<Arc<PooledClient>> {
        self.borrow_from(ClusterHost::new(address, port)).await
    }

    /// Borrow a client for a `host:port` string.
    pub async fn borrow_client_url(&self, url_port: &str) -> PoolResult<Arc<PooledClient>> {
        self.borrow_from(ClusterHost::parse(url_port)?).await
    }

    /// Borrow a client from the first reachable candidate.
    pub async fn borrow_lb_client<S: AsRef<str>>(
        &self,
        candidates: &[S],
    ) -> PoolResult<Arc<PooledClient>> {
        self.ensure_accepting()?;
        self.selector
            .select(candidates, |host| {
                let pool = self.get_pool(&host);
                async move { pool.borrow().await }
            })
            .await
    }

    /// Reuse an idle client from any registered host without opening a
    /// session.
    pub fn borrow_existing_client(&self) -> PoolResult<Arc<PooledClient>> {
        self.ensure_accepting()?;
        for pool in self.pools() {
            if let Some(client) = pool.try_borrow_idle() {
                debug!(client_id = %client.id(), host = %pool.host(), "borrowed existing client");
                return Ok(client);
            }
        }
        Err(PoolError::NoAvailableClient)
    }

    async fn borrow_from(&self, host: ClusterHost) -> PoolResult<Arc<PooledClient>> {
        self.ensure_accepting()?;
        self.get_pool(&host).borrow().await
    }

    fn ensure_accepting(&self) -> PoolResult<()> {
        if self.is_draining() {
            return Err(PoolError::Draining);
        }
        Ok(())
    }

    // ── Return family ───────────────────────────────────────────────

    /// Return a client to its host's pool after successful use.
    pub fn release_client(&self, client: &PooledClient) {
        match self.find_pool(client.host()) {
            Some(pool) => pool.release(client),
            None => warn!(
                client_id = %client.id(),
                host = %client.host(),
                "release of client with no registered pool, ignoring"
            ),
        }
    }

    /// Discard a client after a failure on it.
    pub fn invalidate_client(&self, client: &Arc<PooledClient>) {
        match self.find_pool(client.host()) {
            Some(pool) => pool.invalidate(client),
            None => {
                warn!(
                    client_id = %client.id(),
                    host = %client.host(),
                    "invalidating client with no registered pool"
                );
                client.mark_errored();
                client.dispose();
            }
        }
    }

    /// Discard every live client of `client`'s host. The sub-pool itself
    /// stays registered. Returns the number of clients quarantined.
    pub fn invalidate_all_connections_to_host(&self, client: &Arc<PooledClient>) -> usize {
        match self.find_pool(client.host()) {
            Some(pool) => pool.invalidate_all(),
            None => {
                self.invalidate_client(client);
                0
            }
        }
    }

    // ── Known hosts ─────────────────────────────────────────────────

    pub fn known_hosts(&self) -> BTreeSet<String> {
        self.known_hosts.snapshot()
    }

    pub fn known_hosts_tracker(&self) -> &KnownHosts {
        &self.known_hosts
    }

    /// Ask a live client for the current cluster membership and union the
    /// answer into the known-hosts set. Returns the newly discovered
    /// addresses.
    ///
    /// A failed query invalidates the client used and is retried once on
    /// another client.
    pub async fn update_known_hosts(&self) -> PoolResult<Vec<String>> {
        let mut last_error = String::new();

        for attempt in 1..=2 {
            let client = self.borrow_for_refresh().await?;
            match client.describe_ring().await {
                Ok(payload) => {
                    self.release_client(&client);
                    let added = self.known_hosts.merge_ring(&payload)?;
                    info!(
                        host = %client.host(),
                        added = added.len(),
                        known = self.known_hosts.len(),
                        "refreshed known hosts"
                    );
                    return Ok(added);
                }
                Err(e) => {
                    warn!(
                        client_id = %client.id(),
                        host = %client.host(),
                        attempt,
                        error = %e,
                        "cluster membership query failed"
                    );
                    self.invalidate_client(&client);
                    last_error = e;
                }
            }
        }

        Err(PoolError::MembershipQuery(last_error))
    }

    /// Any live client: an idle one if possible, else a fresh borrow from the
    /// registered and known hosts.
    async fn borrow_for_refresh(&self) -> PoolResult<Arc<PooledClient>> {
        match self.borrow_existing_client() {
            Err(PoolError::NoAvailableClient) => {}
            other => return other,
        }

        let mut candidates: Vec<String> = self.pool_hosts().iter().map(ToString::to_string).collect();
        for address in self.known_hosts.snapshot() {
            let host = ClusterHost::parse(&address)
                .unwrap_or_else(|_| ClusterHost::new(&address, self.config.default_port));
            let host = host.to_string();
            if !candidates.contains(&host) {
                candidates.push(host);
            }
        }

        if candidates.is_empty() {
            return Err(PoolError::NoAvailableClient);
        }
        self.borrow_lb_client(&candidates).await
    }

    // ── Statistics and maintenance ──────────────────────────────────

    /// Per-host statistics in registration order.
    pub fn stats(&self) -> Vec<(ClusterHost, PoolStats)> {
        self.pools()
            .iter()
            .map(|pool| (pool.host().clone(), pool.stats()))
            .collect()
    }

    /// Hosts whose sub-pool has no free slot right now.
    pub fn exhausted_pools(&self) -> Vec<ClusterHost> {
        self.pools()
            .iter()
            .filter(|pool| pool.is_exhausted())
            .map(|pool| pool.host().clone())
            .collect()
    }

    pub fn num_active(&self) -> usize {
        self.pools().iter().map(|pool| pool.stats().active).sum()
    }

    pub fn num_idle(&self) -> usize {
        self.pools().iter().map(|pool| pool.stats().idle).sum()
    }

    pub fn num_blocked(&self) -> usize {
        self.pools().iter().map(|pool| pool.stats().blocked).sum()
    }

    /// Reap idle clients past `idle_timeout` on every host.
    pub fn reap_idle(&self) -> usize {
        self.pools().iter().map(|pool| pool.reap_idle()).sum()
    }

    /// Health-check idle clients on every host.
    pub fn health_check_idle(&self) -> usize {
        self.pools().iter().map(|pool| pool.health_check_idle()).sum()
    }

    /// Log per-host statistics at `info` level.
    pub fn log_stats(&self) {
        for (host, stats) in self.stats() {
            info!(
                host = %host,
                active = stats.active,
                idle = stats.idle,
                total = stats.total,
                blocked = stats.blocked,
                wait_count = stats.wait_count,
                created = stats.created,
                invalidated = stats.invalidated,
                "pool statistics"
            );
        }
    }

    /// Stop handing out clients, wait up to `drain_timeout` for checked-out
    /// clients to come back, then close everything.
    ///
    /// Returns the number of clients that were still checked out when the
    /// timeout expired and were force-closed.
    pub async fn drain(&self) -> usize {
        self.draining.store(true, Ordering::Relaxed);
        info!(drain_timeout = ?self.config.drain_timeout, "client pool draining started");
        // Borrowers already waiting on a slot fail from here on.
        for pool in self.pools() {
            pool.close();
        }

        let deadline = tokio::time::Instant::now() + self.config.drain_timeout;
        let poll_interval = Duration::from_millis(50);

        loop {
            let active = self.num_active();
            if active == 0 {
                info!("all checked-out clients returned");
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(remaining = active, "drain timeout expired, force-closing remaining clients");
                break;
            }
            tokio::time::sleep(poll_interval).await;
        }

        let force_closed = self.num_active();
        for pool in self.pools() {
            pool.invalidate_all();
        }
        info!(force_closed, "client pool drain complete");
        force_closed
    }
}

impl std::fmt::Debug for PoolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolRegistry")
            .field("config", &self.config)
            .field("hosts", &self.pool_hosts())
            .field("draining", &self.is_draining())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ClientSession;
    use std::sync::Mutex;

    // ── Mock cluster ────────────────────────────────────────────────

    #[derive(Debug)]
    struct MockSession {
        ring: Result<String, String>,
    }

    impl ClientSession for MockSession {
        fn is_healthy(&mut self) -> bool {
            true
        }

        fn describe_ring(&mut self) -> Result<String, String> {
            self.ring.clone()
        }

        fn close(&mut self) -> Result<(), String> {
            Ok(())
        }
    }

    /// Hosts listed in `up` accept sessions; everything else is refused.
    struct MockCluster {
        up: Vec<ClusterHost>,
        ring: Mutex<Vec<Result<String, String>>>,
        opened: Mutex<Vec<ClusterHost>>,
    }

    impl MockCluster {
        fn new(up: &[(&str, u16)]) -> Self {
            Self {
                up: up.iter().map(|(a, p)| ClusterHost::new(a, *p)).collect(),
                ring: Mutex::new(Vec::new()),
                opened: Mutex::new(Vec::new()),
            }
        }

        /// Queue `describe_ring` answers for the next sessions opened.
        fn with_ring(self, answers: Vec<Result<String, String>>) -> Self {
            *self.ring.lock().unwrap() = answers;
            self
        }

        fn opens(&self) -> usize {
            self.opened.lock().unwrap().len()
        }
    }

    impl SessionFactory for MockCluster {
        fn open(&self, host: &ClusterHost) -> Result<Box<dyn ClientSession>, String> {
            if !self.up.contains(host) {
                return Err("connection refused".to_string());
            }
            self.opened.lock().unwrap().push(host.clone());
            let mut ring = self.ring.lock().unwrap();
            let answer = if ring.is_empty() {
                Ok(r#"["127.0.0.1"]"#.to_string())
            } else {
                ring.remove(0)
            };
            Ok(Box::new(MockSession { ring: answer }))
        }
    }

    fn test_config() -> PoolConfig {
        PoolConfig {
            max_active: 4,
            max_wait: Duration::from_millis(100),
            drain_timeout: Duration::from_millis(100),
            ..PoolConfig::default()
        }
    }

    fn registry_with(cluster: MockCluster, config: PoolConfig) -> (PoolRegistry, Arc<MockCluster>) {
        let cluster = Arc::new(cluster);
        (PoolRegistry::new(config, cluster.clone()), cluster)
    }

    fn local_registry() -> (PoolRegistry, Arc<MockCluster>) {
        registry_with(MockCluster::new(&[("localhost", 9170)]), test_config())
    }

    // ── get_pool ────────────────────────────────────────────────────

    #[test]
    fn get_pool_creates_on_first_access() {
        let (registry, cluster) = local_registry();
        let pool = registry.get_pool(&ClusterHost::new("x", 1));
        assert_eq!(pool.host(), &ClusterHost::new("x", 1));
        assert_eq!(registry.pool_hosts(), vec![ClusterHost::new("x", 1)]);
        assert_eq!(cluster.opens(), 0);
    }

    #[test]
    fn get_pool_is_idempotent() {
        let (registry, _) = local_registry();
        let a = registry.get_pool(&ClusterHost::new("x", 1));
        let b = registry.get_pool(&ClusterHost::new("x", 1));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.pools().len(), 1);
    }

    #[test]
    fn get_pool_concurrent_single_creation() {
        let (registry, _) = local_registry();
        let registry = Arc::new(registry);
        let host = ClusterHost::new("race", 9160);

        let pools: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let host = host.clone();
                std::thread::spawn(move || registry.get_pool(&host))
            })
            .map(|h| h.join().unwrap())
            .collect();

        assert!(pools.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(registry.pools().len(), 1);
    }

    // ── Borrow family ───────────────────────────────────────────────

    #[tokio::test]
    async fn borrow_client_by_host_and_port() {
        let (registry, _) = local_registry();
        let client = registry.borrow_client("localhost", 9170).await.unwrap();
        assert_eq!(client.url(), "localhost");
        assert_eq!(client.port(), 9170);
    }

    #[tokio::test]
    async fn borrow_client_by_url() {
        let (registry, _) = local_registry();
        let client = registry.borrow_client_url("localhost:9170").await.unwrap();
        assert_eq!(client.url(), "localhost");
        assert_eq!(client.port(), 9170);
    }

    #[tokio::test]
    async fn borrow_client_url_rejects_malformed() {
        let (registry, _) = local_registry();
        let err = registry.borrow_client_url("localhost").await.unwrap_err();
        assert!(matches!(err, PoolError::InvalidHostFormat(_)));
        assert!(registry.pools().is_empty());
    }

    #[tokio::test]
    async fn borrow_client_unreachable_host() {
        let (registry, _) = local_registry();
        let err = registry.borrow_client("localhost", 9171).await.unwrap_err();
        assert!(matches!(err, PoolError::ConnectionUnavailable { .. }));
    }

    #[tokio::test]
    async fn borrow_lb_client_finds_reachable_host_in_any_position() {
        let (registry, _) = local_registry();
        for candidates in [
            vec!["localhost:9170"],
            vec!["localhost:9170", "localhost:9171", "localhost:9172"],
            vec!["localhost:9171", "localhost:9170", "localhost:9172"],
            vec!["localhost:9171", "localhost:9172", "localhost:9170"],
        ] {
            for _ in 0..3 {
                let client = registry.borrow_lb_client(&candidates).await.unwrap();
                assert_eq!(client.url(), "localhost");
                assert_eq!(client.port(), 9170);
                registry.release_client(&client);
            }
        }
    }

    #[tokio::test]
    async fn borrow_lb_client_all_unreachable() {
        let (registry, _) = local_registry();
        let err = registry
            .borrow_lb_client(&["localhost:9171", "localhost:9172"])
            .await
            .unwrap_err();
        match err {
            PoolError::NoReachableHost(failures) => {
                let mut tried: Vec<_> = failures.iter().map(|f| f.candidate.as_str()).collect();
                tried.sort_unstable();
                assert_eq!(tried, vec!["localhost:9171", "localhost:9172"]);
            }
            other => panic!("expected NoReachableHost, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn borrow_existing_client_reuses_without_opening() {
        let (registry, cluster) = local_registry();
        let client = registry.borrow_lb_client(&["localhost:9170"]).await.unwrap();
        registry.release_client(&client);
        assert_eq!(cluster.opens(), 1);

        let existing = registry.borrow_existing_client().unwrap();
        assert_eq!(existing.id(), client.id());
        assert_eq!(existing.url(), "localhost");
        assert_eq!(existing.port(), 9170);
        assert_eq!(cluster.opens(), 1);
    }

    #[tokio::test]
    async fn borrow_existing_client_with_nothing_idle() {
        let (registry, _) = local_registry();
        assert!(matches!(
            registry.borrow_existing_client(),
            Err(PoolError::NoAvailableClient)
        ));

        let _held = registry.borrow_client("localhost", 9170).await.unwrap();
        assert!(matches!(
            registry.borrow_existing_client(),
            Err(PoolError::NoAvailableClient)
        ));
    }

    #[tokio::test]
    async fn borrow_existing_client_scans_in_registration_order() {
        let (registry, _) = registry_with(
            MockCluster::new(&[("a", 1), ("b", 2)]),
            test_config(),
        );
        let a = registry.borrow_client("a", 1).await.unwrap();
        let b = registry.borrow_client("b", 2).await.unwrap();
        registry.release_client(&b);
        registry.release_client(&a);

        assert_eq!(registry.borrow_existing_client().unwrap().id(), a.id());
        assert_eq!(registry.borrow_existing_client().unwrap().id(), b.id());
    }

    // ── Release / invalidate routing ────────────────────────────────

    #[tokio::test]
    async fn invalidate_client_then_reuse_other() {
        let (registry, _) = local_registry();
        let host = ClusterHost::new("localhost", 9170);
        let c1 = registry.borrow_client("localhost", 9170).await.unwrap();
        let c2 = registry.borrow_client("localhost", 9170).await.unwrap();
        assert_ne!(c1.id(), c2.id());

        registry.invalidate_client(&c1);
        assert!(c1.has_errors());
        registry.release_client(&c1);

        registry.release_client(&c2);
        assert!(!c2.has_errors());
        let c3 = registry.borrow_client("localhost", 9170).await.unwrap();
        assert_eq!(c3.id(), c2.id());

        let pool = registry.get_pool(&host);
        assert!(!pool.is_live(c1.id()));
        assert!(pool.is_live(c2.id()));
    }

    #[tokio::test]
    async fn invalidate_all_connections_to_host_replaces_everything() {
        let (registry, _) = local_registry();
        let host = ClusterHost::new("localhost", 9170);
        let c1 = registry.borrow_client("localhost", 9170).await.unwrap();
        let c2 = registry.borrow_client("localhost", 9170).await.unwrap();

        assert_eq!(registry.invalidate_all_connections_to_host(&c1), 2);
        assert!(c1.has_errors());
        assert!(c2.has_errors());

        let c3 = registry.borrow_client("localhost", 9170).await.unwrap();
        assert_ne!(c3.id(), c1.id());
        assert_ne!(c3.id(), c2.id());

        let pool = registry.get_pool(&host);
        assert!(!pool.is_live(c1.id()));
        assert!(!pool.is_live(c2.id()));
        assert!(pool.is_live(c3.id()));
        assert_eq!(registry.pool_hosts(), vec![host]);
    }

    #[tokio::test]
    async fn invalidate_all_leaves_other_hosts_alone() {
        let (registry, _) = registry_with(
            MockCluster::new(&[("a", 1), ("b", 2)]),
            test_config(),
        );
        let a = registry.borrow_client("a", 1).await.unwrap();
        let b = registry.borrow_client("b", 2).await.unwrap();
        registry.invalidate_all_connections_to_host(&a);
        assert!(a.has_errors());
        assert!(!b.has_errors());
    }

    // ── Known hosts ─────────────────────────────────────────────────

    #[tokio::test]
    async fn update_known_hosts_unions_ring() {
        let cluster = MockCluster::new(&[("localhost", 9170)])
            .with_ring(vec![Ok(r#"["127.0.0.1", "127.0.0.2"]"#.to_string())]);
        let config = test_config().with_known_hosts(vec!["10.9.9.9".to_string()]);
        let (registry, _) = registry_with(cluster, config);

        let client = registry.borrow_client("localhost", 9170).await.unwrap();
        registry.release_client(&client);

        let added = registry.update_known_hosts().await.unwrap();
        assert_eq!(added, vec!["127.0.0.1", "127.0.0.2"]);
        let known = registry.known_hosts();
        assert!(known.contains("10.9.9.9"));
        assert!(known.contains("127.0.0.1"));
        // The query client went back to its pool.
        assert_eq!(registry.num_active(), 0);
        assert_eq!(registry.num_idle(), 1);
    }

    #[tokio::test]
    async fn update_known_hosts_retries_once_on_another_client() {
        let cluster = MockCluster::new(&[("localhost", 9170)]).with_ring(vec![
            Err("timed out".to_string()),
            Ok(r#"{"0": "127.0.0.1"}"#.to_string()),
        ]);
        let (registry, cluster) = registry_with(cluster, test_config());

        let first = registry.borrow_client("localhost", 9170).await.unwrap();
        registry.release_client(&first);

        registry.update_known_hosts().await.unwrap();
        assert!(first.has_errors());
        assert!(registry.known_hosts().contains("127.0.0.1"));
        assert_eq!(cluster.opens(), 2);
    }

    #[tokio::test]
    async fn update_known_hosts_gives_up_after_retry() {
        let cluster = MockCluster::new(&[("localhost", 9170)]).with_ring(vec![
            Err("timed out".to_string()),
            Err("timed out".to_string()),
        ]);
        let config = test_config().with_known_hosts(vec!["localhost".to_string()]);
        let (registry, _) = registry_with(cluster, PoolConfig { default_port: 9170, ..config });

        let before = registry.known_hosts();
        let err = registry.update_known_hosts().await.unwrap_err();
        assert!(matches!(err, PoolError::MembershipQuery(ref e) if e == "timed out"));
        assert_eq!(registry.known_hosts(), before);
        assert_eq!(registry.num_active(), 0);
    }

    #[tokio::test]
    async fn update_known_hosts_borrows_from_seed_hosts() {
        let cluster = MockCluster::new(&[("127.0.0.1", 9160)]);
        let config = test_config().with_known_hosts(vec!["127.0.0.1".to_string()]);
        let (registry, cluster) = registry_with(cluster, config);

        registry.update_known_hosts().await.unwrap();
        assert_eq!(cluster.opens(), 1);
        assert_eq!(registry.pool_hosts(), vec![ClusterHost::new("127.0.0.1", 9160)]);
        assert_eq!(registry.num_idle(), 1);
    }

    #[test]
    fn forget_through_tracker_shrinks_known_hosts() {
        let config = test_config().with_known_hosts(vec!["10.0.0.1".into(), "10.0.0.2".into()]);
        let (registry, _) = registry_with(MockCluster::new(&[]), config);

        assert!(registry.known_hosts_tracker().forget("10.0.0.1"));
        assert!(!registry.known_hosts_tracker().contains("10.0.0.1"));
        assert_eq!(registry.known_hosts().into_iter().collect::<Vec<_>>(), vec!["10.0.0.2"]);
    }

    #[tokio::test]
    async fn drain_closes_pools_registered_afterwards() {
        let (registry, cluster) = local_registry();
        registry.drain().await;

        let pool = registry.get_pool(&ClusterHost::new("localhost", 9170));
        assert!(pool.is_closed());
        assert!(matches!(pool.borrow().await, Err(PoolError::Draining)));
        assert_eq!(cluster.opens(), 0);
    }

    #[tokio::test]
    async fn update_known_hosts_without_any_host() {
        let (registry, _) = local_registry();
        assert!(matches!(
            registry.update_known_hosts().await,
            Err(PoolError::NoAvailableClient)
        ));
    }

    // ── Statistics / drain ──────────────────────────────────────────

    #[tokio::test]
    async fn exhausted_pools_lists_full_hosts() {
        let config = PoolConfig {
            max_active: 1,
            ..test_config()
        };
        let (registry, _) = registry_with(
            MockCluster::new(&[("a", 1), ("b", 2)]),
            config,
        );
        let _a = registry.borrow_client("a", 1).await.unwrap();
        let b = registry.borrow_client("b", 2).await.unwrap();
        registry.release_client(&b);

        assert_eq!(registry.exhausted_pools(), vec![ClusterHost::new("a", 1)]);
        assert_eq!(registry.num_active(), 1);
        assert_eq!(registry.num_idle(), 1);
        assert_eq!(registry.num_blocked(), 0);
    }

    #[tokio::test]
    async fn drain_rejects_new_borrows_and_closes_idle() {
        let (registry, _) = local_registry();
        let client = registry.borrow_client("localhost", 9170).await.unwrap();
        registry.release_client(&client);

        assert_eq!(registry.drain().await, 0);
        assert!(registry.is_draining());
        assert!(client.has_errors());
        assert_eq!(registry.num_idle(), 0);
        assert!(matches!(
            registry.borrow_client("localhost", 9170).await,
            Err(PoolError::Draining)
        ));
        assert!(matches!(
            registry.borrow_existing_client(),
            Err(PoolError::Draining)
        ));
    }

    #[tokio::test]
    async fn drain_force_closes_after_timeout() {
        let (registry, _) = local_registry();
        let held = registry.borrow_client("localhost", 9170).await.unwrap();
        assert_eq!(registry.drain().await, 1);
        assert!(held.has_errors());
        assert_eq!(registry.num_active(), 0);
    }

    #[tokio::test]
    async fn drain_waits_for_returned_clients() {
        let config = PoolConfig {
            drain_timeout: Duration::from_secs(5),
            ..test_config()
        };
        let (registry, _) = registry_with(MockCluster::new(&[("localhost", 9170)]), config);
        let registry = Arc::new(registry);
        let held = registry.borrow_client("localhost", 9170).await.unwrap();

        let drainer = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.drain().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        registry.release_client(&held);

        assert_eq!(drainer.await.unwrap(), 0);
    }
}
