//! Pool configuration and its TOML representation.
//!
//! ```toml
//! [pool]
//! max_active = 20
//! max_wait = "250ms"
//! exhausted_action = "fail"
//! default_port = 9160
//! known_hosts = ["10.0.0.1", "10.0.0.2"]
//! selection = "in-order"
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};

/// What a borrow does when its host's sub-pool has no free slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExhaustedAction {
    /// Wait up to `max_wait` for a slot (default).
    #[default]
    Block,
    /// Fail immediately with `PoolExhausted`.
    Fail,
}

/// Candidate ordering for load-balanced borrows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionPolicy {
    /// Rotate the starting candidate on every call (default).
    #[default]
    RoundRobin,
    /// Always try candidates in the order given.
    InOrder,
}

/// Configuration shared by every per-host sub-pool.
#[derive(Clone, Debug, PartialEq)]
pub struct PoolConfig {
    /// Maximum live (idle + checked out) clients per host (default: 50).
    pub max_active: usize,
    /// Idle clients kept per host; extra releases are closed (default: 5).
    pub max_idle: usize,
    /// How long a blocked borrow waits for a slot (default: 5s).
    pub max_wait: Duration,
    /// Behaviour when a sub-pool is exhausted (default: block).
    pub exhausted_action: ExhaustedAction,
    /// Idle clients older than this are reaped (default: 300s).
    pub idle_timeout: Duration,
    /// Port used when a known-host address carries none (default: 9160).
    pub default_port: u16,
    /// Seed addresses for the known-hosts set.
    pub known_hosts: Vec<String>,
    /// Candidate ordering for load-balanced borrows (default: round-robin).
    pub selection: SelectionPolicy,
    /// How long `drain()` waits for checked-out clients (default: 30s).
    pub drain_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_active: 50,
            max_idle: 5,
            max_wait: Duration::from_secs(5),
            exhausted_action: ExhaustedAction::Block,
            idle_timeout: Duration::from_secs(300),
            default_port: 9160,
            known_hosts: Vec::new(),
            selection: SelectionPolicy::RoundRobin,
            drain_timeout: Duration::from_secs(30),
        }
    }
}

impl PoolConfig {
    /// Load from a TOML file containing a `[pool]` table.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading pool config {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("parsing pool config {}", path.display()))
    }

    /// Parse a TOML document. A missing `[pool]` table yields the defaults.
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let file: ConfigFile = toml::from_str(content)?;
        file.pool.unwrap_or_default().into_config()
    }

    pub fn with_max_active(self, max_active: usize) -> Self {
        Self { max_active, ..self }
    }

    pub fn with_max_wait(self, max_wait: Duration) -> Self {
        Self { max_wait, ..self }
    }

    pub fn with_exhausted_action(self, exhausted_action: ExhaustedAction) -> Self {
        Self {
            exhausted_action,
            ..self
        }
    }

    pub fn with_known_hosts(self, known_hosts: Vec<String>) -> Self {
        Self {
            known_hosts,
            ..self
        }
    }

    pub fn with_selection(self, selection: SelectionPolicy) -> Self {
        Self { selection, ..self }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ConfigFile {
    pool: Option<PoolSection>,
}

/// User-facing `[pool]` table; every field is optional.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PoolSection {
    pub max_active: Option<usize>,
    pub max_idle: Option<usize>,
    pub max_wait: Option<String>,
    pub exhausted_action: Option<ExhaustedAction>,
    pub idle_timeout: Option<String>,
    pub default_port: Option<u16>,
    pub known_hosts: Option<Vec<String>>,
    pub selection: Option<SelectionPolicy>,
    pub drain_timeout: Option<String>,
}

impl PoolSection {
    fn into_config(self) -> anyhow::Result<PoolConfig> {
        let defaults = PoolConfig::default();

        let max_active = self.max_active.unwrap_or(defaults.max_active);
        if max_active == 0 {
            bail!("max_active must be at least 1");
        }

        Ok(PoolConfig {
            max_active,
            max_idle: self.max_idle.unwrap_or(defaults.max_idle),
            max_wait: duration_field("max_wait", self.max_wait, defaults.max_wait)?,
            exhausted_action: self.exhausted_action.unwrap_or(defaults.exhausted_action),
            idle_timeout: duration_field("idle_timeout", self.idle_timeout, defaults.idle_timeout)?,
            default_port: self.default_port.unwrap_or(defaults.default_port),
            known_hosts: self.known_hosts.unwrap_or(defaults.known_hosts),
            selection: self.selection.unwrap_or(defaults.selection),
            drain_timeout: duration_field(
                "drain_timeout",
                self.drain_timeout,
                defaults.drain_timeout,
            )?,
        })
    }
}

fn duration_field(name: &str, value: Option<String>, default: Duration) -> anyhow::Result<Duration> {
    match value {
        None => Ok(default),
        Some(s) => parse_duration(&s).with_context(|| format!("invalid duration for {name}: {s:?}")),
    }
}

/// Parse `"500ms"`, `"5s"`, `"2m"` or a bare number of seconds.
fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok()?.checked_mul(60).map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
