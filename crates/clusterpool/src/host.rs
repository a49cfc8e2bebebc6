//! Host identity: the `(address, port)` key of a cluster member.

use std::fmt;
use std::str::FromStr;

use crate::error::PoolError;

/// Identifies one cluster member. Sub-pools are keyed by this value.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClusterHost {
    address: String,
    port: u16,
}

impl ClusterHost {
    pub fn new(address: &str, port: u16) -> Self {
        Self {
            address: address.to_string(),
            port,
        }
    }

    /// Parse a `host:port` string. IPv6 literals must be bracketed
    /// (`[::1]:9160`).
    pub fn parse(url_port: &str) -> Result<Self, PoolError> {
        let invalid = || PoolError::InvalidHostFormat(url_port.to_string());

        let trimmed = url_port.trim();
        let (address, port) = trimmed.rsplit_once(':').ok_or_else(invalid)?;

        let address = match address.strip_prefix('[') {
            Some(inner) => inner.strip_suffix(']').ok_or_else(invalid)?,
            None if address.contains(':') => return Err(invalid()),
            None => address,
        };
        if address.is_empty() || address.contains(char::is_whitespace) {
            return Err(invalid());
        }

        let port: u16 = port.parse().map_err(|_| invalid())?;
        if port == 0 {
            return Err(invalid());
        }

        Ok(Self::new(address, port))
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for ClusterHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.address.contains(':') {
            write!(f, "[{}]:{}", self.address, self.port)
        } else {
            write!(f, "{}:{}", self.address, self.port)
        }
    }
}

impl FromStr for ClusterHost {
    type Err = PoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
