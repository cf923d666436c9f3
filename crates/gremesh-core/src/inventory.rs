//! Read-only inventory queries consumed by the orchestrator.
//!
//! Implementations are supplied by the surrounding platform (database
//! views, API clients). Errors are reported as `anyhow::Error` since the
//! orchestrator only logs them.

use std::net::IpAddr;

use crate::types::{HostId, Instance, NetworkId, OwnerId, Router};

/// Queries over VM instances.
pub trait InstanceInventory: Send + Sync {
    /// Live (running, starting, stopping, migrating, unknown) user VMs with a
    /// NIC on `network`, optionally restricted to one host.
    fn list_live_on_network(
        &self,
        network: NetworkId,
        host: Option<HostId>,
    ) -> anyhow::Result<Vec<Instance>>;

    /// User VMs owned by `owner` that are placed on `host`.
    fn list_by_owner_on_host(&self, owner: OwnerId, host: HostId) -> anyhow::Result<Vec<Instance>>;
}

/// Queries over virtual routers.
pub trait RouterInventory: Send + Sync {
    /// Routers serving `network`.
    fn list_by_network(&self, network: NetworkId) -> anyhow::Result<Vec<Router>>;
}

/// Queries over compute hosts.
pub trait HostInventory: Send + Sync {
    /// Private (management) address of a host, used as the GRE endpoint.
    fn private_ip(&self, host: HostId) -> anyhow::Result<IpAddr>;
}
