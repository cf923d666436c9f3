//! gremesh.toml configuration parser.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::bail;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    pub mesh: MeshSection,
    pub workers: WorkersConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshSection {
    /// Master switch for GRE tunnel networking.
    pub enabled: bool,
    /// How long an event waits for the global mesh lock.
    pub lock_timeout_ms: u64,
    /// Age after which a PENDING record is assumed lost and re-claimed.
    pub pending_stale_secs: u64,
}

impl Default for MeshSection {
    fn default() -> Self {
        Self {
            enabled: false,
            lock_timeout_ms: 5_000,
            pending_stale_secs: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkersConfig {
    /// Concurrent attach flows.
    pub attach: usize,
    /// Concurrent teardown flows.
    pub cleanup: usize,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            attach: 10,
            cleanup: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/gremesh/tunnels.redb"),
        }
    }
}

impl MeshConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: MeshConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject settings the worker service cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.workers.attach == 0 {
            bail!("workers.attach must be at least 1");
        }
        if self.workers.cleanup == 0 {
            bail!("workers.cleanup must be at least 1");
        }
        if self.mesh.lock_timeout_ms == 0 {
            bail!("mesh.lock_timeout_ms must be positive");
        }
        if self.mesh.pending_stale_secs == 0 {
            bail!("mesh.pending_stale_secs must be positive");
        }
        Ok(())
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.mesh.lock_timeout_ms)
    }

    pub fn pending_stale(&self) -> Duration {
        Duration::from_secs(self.mesh.pending_stale_secs)
    }
}
