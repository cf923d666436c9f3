//! Broadcast locators and isolation-key derivation.
//!
//! A tunnel-mode network carries a broadcast URI of the form
//! `vswitch://<key>`, where the host part is the GRE key of the segment.
//! VLAN-mode networks use `vswitch://vlan<vnet>` and carry no GRE key.

use std::fmt;

use thiserror::Error;

use crate::types::{IsolationKey, Network};

/// Scheme used by software-switch broadcast domains.
pub const VSWITCH_SCHEME: &str = "vswitch";

/// Errors deriving an isolation key from a network.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocatorError {
    #[error("network {0} has no broadcast URI")]
    Missing(u64),

    #[error("malformed broadcast URI: {0}")]
    Malformed(String),

    #[error("invalid GRE key parsed from network broadcast URI ({0})")]
    InvalidKey(String),
}

/// A parsed `scheme://host[/…]` broadcast locator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastUri {
    scheme: String,
    host: String,
}

impl BroadcastUri {
    /// Parse a broadcast URI string.
    pub fn parse(raw: &str) -> Result<Self, LocatorError> {
        let (scheme, rest) = raw
            .split_once("://")
            .ok_or_else(|| LocatorError::Malformed(raw.to_string()))?;
        let host = rest.split(['/', ':', '?']).next().unwrap_or_default();
        if scheme.is_empty() || host.is_empty() {
            return Err(LocatorError::Malformed(raw.to_string()));
        }
        Ok(Self {
            scheme: scheme.to_ascii_lowercase(),
            host: host.to_string(),
        })
    }

    /// Locator for a network implemented in GRE tunnel mode.
    pub fn for_tunnel(vnet: IsolationKey) -> Self {
        Self {
            scheme: VSWITCH_SCHEME.to_string(),
            host: vnet.to_string(),
        }
    }

    /// Locator for a network implemented in VLAN mode.
    pub fn for_vlan(vnet: u32) -> Self {
        Self {
            scheme: VSWITCH_SCHEME.to_string(),
            host: format!("vlan{vnet}"),
        }
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// The GRE key encoded in the host part. Only `vswitch` locators carry one.
    pub fn isolation_key(&self) -> Result<IsolationKey, LocatorError> {
        if self.scheme != VSWITCH_SCHEME {
            return Err(LocatorError::Malformed(self.to_string()));
        }
        self.host
            .parse::<IsolationKey>()
            .map_err(|_| LocatorError::InvalidKey(self.to_string()))
    }
}

impl fmt::Display for BroadcastUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.host)
    }
}

/// Derives the isolation key of a network.
pub trait NetworkLocator: Send + Sync {
    fn isolation_key_of(&self, network: &Network) -> Result<IsolationKey, LocatorError>;
}

/// Reads the key out of the network's broadcast URI.
#[derive(Debug, Clone, Copy, Default)]
pub struct BroadcastUriLocator;

impl NetworkLocator for BroadcastUriLocator {
    fn isolation_key_of(&self, network: &Network) -> Result<IsolationKey, LocatorError> {
        let raw = network
            .broadcast_uri
            .as_deref()
            .ok_or(LocatorError::Missing(network.id))?;
        BroadcastUri::parse(raw)?.isolation_key()
    }
}
