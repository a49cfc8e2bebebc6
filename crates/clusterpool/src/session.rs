//! Session capability consumed by the pool.
//!
//! The pool never speaks the wire protocol. A [`SessionFactory`] opens
//! authenticated sessions to a [`ClusterHost`]; the resulting
//! [`ClientSession`] is opaque apart from the three operations the pool
//! needs for lifecycle management and membership discovery.

use crate::host::ClusterHost;

/// An open session to one cluster member.
pub trait ClientSession: Send + std::fmt::Debug {
    /// Liveness probe. Returns `false` if the session can no longer be used.
    fn is_healthy(&mut self) -> bool;

    /// Query the cluster for its current membership.
    ///
    /// Returns a JSON document: either an array of addresses
    /// (`["10.0.0.1", "10.0.0.2"]`) or a token map whose values are
    /// addresses (`{"0": "10.0.0.1", "85070591730234615865843651857942052864": "10.0.0.2"}`).
    fn describe_ring(&mut self) -> Result<String, String>;

    /// Close the underlying transport.
    fn close(&mut self) -> Result<(), String>;
}

/// Opens sessions. Injected so the pool can be tested without a cluster.
pub trait SessionFactory: Send + Sync {
    fn open(&self, host: &ClusterHost) -> Result<Box<dyn ClientSession>, String>;
}
