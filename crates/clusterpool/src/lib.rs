//! clusterpool — client-side connection pooling for a clustered database.
//!
//! Keeps a bounded sub-pool of client sessions per cluster host and layers
//! host selection and membership discovery on top:
//! - **host**: `host:port` identity of a cluster member
//! - **pool**: per-host sub-pool with bounded capacity and blocking borrow
//! - **registry**: host → sub-pool map and the borrow/release/invalidate API
//! - **selector**: failover and round-robin over a candidate host list
//! - **known_hosts**: grow-only set of discovered member addresses
//! - **session**: traits the wire-protocol client plugs in through
//! - **config**: `PoolConfig` and its `[pool]` TOML table
//!
//! # Architecture
//!
//! ```text
//! caller
//!   → PoolRegistry ──── KnownHosts (update_known_hosts → describe_ring)
//!     → HostSelector (candidate list only)
//!     → HostPool per ClusterHost
//!       → Semaphore (max_active slots) + idle list + checked-out map
//!       → SessionFactory::open → Box<dyn ClientSession>
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod host;
pub mod known_hosts;
pub mod pool;
pub mod registry;
pub mod selector;
pub mod session;

pub use client::{ClientId, PooledClient};
pub use config::{ExhaustedAction, PoolConfig, SelectionPolicy};
pub use error::{HostFailure, PoolError, PoolResult};
pub use host::ClusterHost;
pub use known_hosts::KnownHosts;
pub use pool::{HostPool, PoolStats};
pub use registry::PoolRegistry;
pub use selector::HostSelector;
pub use session::{ClientSession, SessionFactory};
