//! Persisted tunnel record types.

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use gremesh_core::{HostId, IsolationKey, NetworkId};
use serde::{Deserialize, Serialize};

/// Identifier assigned to a tunnel record by the store.
pub type TunnelId = u64;

/// Outcome of the last creation attempt for a tunnel.
///
/// A missing record means "never attempted".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TunnelState {
    /// A creation command has been (or is about to be) issued. Re-claimed
    /// once older than the stale window, in case its answer was lost.
    Pending,
    /// The agent created the tunnel port.
    Success,
    /// The last attempt failed; the next attach event retries it.
    Failed,
}

impl fmt::Display for TunnelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TunnelState::Pending => "PENDING",
            TunnelState::Success => "SUCCESS",
            TunnelState::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

impl FromStr for TunnelState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(TunnelState::Pending),
            "SUCCESS" => Ok(TunnelState::Success),
            "FAILED" => Ok(TunnelState::Failed),
            other => Err(format!("unknown tunnel state: {other}")),
        }
    }
}

/// The directed `(from, to, network)` triple identifying a tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TunnelKey {
    pub from: HostId,
    pub to: HostId,
    pub network: NetworkId,
}

impl TunnelKey {
    pub fn new(from: HostId, to: HostId, network: NetworkId) -> Self {
        Self { from, to, network }
    }

    /// The same host pair in the opposite direction.
    pub fn reversed(&self) -> Self {
        Self::new(self.to, self.from, self.network)
    }

    /// Build the composite key for the tunnels table.
    pub fn table_key(&self) -> String {
        format!("{}/{}/{}", self.network, self.from, self.to)
    }
}

impl fmt::Display for TunnelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}@{}", self.from, self.to, self.network)
    }
}

/// Prefix covering every record of `network`.
pub(crate) fn network_prefix(network: NetworkId) -> String {
    format!("{network}/")
}

/// Prefix covering every record leaving `from` on `network`.
pub(crate) fn outbound_prefix(from: HostId, network: NetworkId) -> String {
    format!("{network}/{from}/")
}

/// Persisted state of one directed tunnel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelRecord {
    pub id: TunnelId,
    pub from: HostId,
    pub to: HostId,
    pub network_id: NetworkId,
    /// GRE key the tunnel was requested with.
    pub key: IsolationKey,
    pub state: TunnelState,
    /// Bridge port assigned by the agent; empty until established.
    pub port_name: String,
    /// Unix timestamp (seconds) when the record was created.
    pub created_at: u64,
    /// Unix timestamp (seconds) of the last state change.
    pub updated_at: u64,
}

impl TunnelRecord {
    pub fn tunnel_key(&self) -> TunnelKey {
        TunnelKey::new(self.from, self.to, self.network_id)
    }

    /// Whether the planner must (re)issue the creation command at `now`.
    pub fn needs_attempt(&self, now: u64, pending_stale: Duration) -> bool {
        match self.state {
            TunnelState::Success => false,
            TunnelState::Failed => true,
            TunnelState::Pending => now.saturating_sub(self.updated_at) >= pending_stale.as_secs(),
        }
    }
}

/// Current Unix time in seconds, as stored in record timestamps.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
