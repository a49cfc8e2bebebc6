//! Known-hosts set of discovered cluster member addresses.
//!
//! Seeded from configuration and grown by membership refreshes. Refreshes
//! only ever add; [`KnownHosts::forget`] is the one way to shrink the set.

use std::collections::BTreeSet;
use std::sync::{PoisonError, RwLock};

use serde_json::Value;
use tracing::info;

use crate::error::PoolError;

#[derive(Debug, Default)]
pub struct KnownHosts {
    hosts: RwLock<BTreeSet<String>>,
}

impl KnownHosts {
    pub fn new<I, S>(seed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let hosts = seed
            .into_iter()
            .filter_map(|s| normalize(s.as_ref()))
            .collect();
        Self {
            hosts: RwLock::new(hosts),
        }
    }

    /// Snapshot of every known address, sorted.
    pub fn snapshot(&self) -> BTreeSet<String> {
        self.hosts.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn contains(&self, address: &str) -> bool {
        self.hosts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(address.trim())
    }

    pub fn len(&self) -> usize {
        self.hosts.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Union `addresses` into the set. Returns the addresses that were new.
    pub fn extend<I, S>(&self, addresses: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let candidates: Vec<String> = addresses
            .into_iter()
            .filter_map(|s| normalize(s.as_ref()))
            .collect();

        let mut hosts = self.hosts.write().unwrap_or_else(PoisonError::into_inner);
        let added: Vec<String> = candidates
            .into_iter()
            .filter(|address| hosts.insert(address.clone()))
            .collect();
        drop(hosts);

        for address in &added {
            info!(%address, "discovered cluster host");
        }
        added
    }

    /// Parse a membership payload and union its addresses into the set.
    pub fn merge_ring(&self, payload: &str) -> Result<Vec<String>, PoolError> {
        let addresses = parse_ring(payload)?;
        Ok(self.extend(addresses))
    }

    /// Remove an address explicitly. Returns whether it was present.
    pub fn forget(&self, address: &str) -> bool {
        let removed = self
            .hosts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(address.trim());
        if removed {
            info!(address = %address.trim(), "forgot cluster host");
        }
        removed
    }
}

fn normalize(address: &str) -> Option<String> {
    let address = address.trim();
    (!address.is_empty()).then(|| address.to_string())
}

/// Extract member addresses from a `describe_ring` payload.
///
/// Accepts a JSON array of addresses, or an object mapping tokens to an
/// address or to an array of replica addresses.
pub fn parse_ring(payload: &str) -> Result<Vec<String>, PoolError> {
    let value: Value = serde_json::from_str(payload)
        .map_err(|e| PoolError::MembershipQuery(format!("malformed ring description: {e}")))?;

    let mut addresses = Vec::new();
    match value {
        Value::Array(items) => collect_addresses(&items, &mut addresses)?,
        Value::Object(map) => {
            for (token, endpoint) in map {
                match endpoint {
                    Value::String(address) => addresses.push(address),
                    Value::Array(items) => collect_addresses(&items, &mut addresses)?,
                    other => {
                        return Err(PoolError::MembershipQuery(format!(
                            "unexpected endpoint for token {token}: {other}"
                        )));
                    }
                }
            }
        }
        other => {
            return Err(PoolError::MembershipQuery(format!(
                "expected an array or object, got {other}"
            )));
        }
    }
    Ok(addresses)
}

fn collect_addresses(items: &[Value], out: &mut Vec<String>) -> Result<(), PoolError> {
    for item in items {
        match item {
            Value::String(address) => out.push(address.clone()),
            other => {
                return Err(PoolError::MembershipQuery(format!(
                    "expected an address string, got {other}"
                )));
            }
        }
    }
    Ok(())
}
