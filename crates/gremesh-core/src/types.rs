//! Domain types shared across the gremesh crates.
//!
//! These are read-only projections of entities owned by the surrounding
//! inventory services. The orchestrator never mutates them.

use serde::{Deserialize, Serialize};

/// Identifier of a compute host.
pub type HostId = u64;

/// Identifier of a logical (overlay) network.
pub type NetworkId = u64;

/// Identifier of a VM or router instance.
pub type InstanceId = u64;

/// Identifier of the account owning an instance.
pub type OwnerId = u64;

/// GRE key of a logical network segment.
pub type IsolationKey = u32;

/// Kind of instance attached to a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceKind {
    /// A tenant virtual machine.
    User,
    /// A virtual router serving the network.
    DomainRouter,
    /// Console proxies, storage VMs and the like. Never drives the mesh.
    System,
}

impl InstanceKind {
    /// Whether placement of this kind of instance affects the tunnel mesh.
    pub fn drives_mesh(self) -> bool {
        matches!(self, InstanceKind::User | InstanceKind::DomainRouter)
    }
}

/// A VM or router as seen by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub id: InstanceId,
    pub kind: InstanceKind,
    /// Host currently running the instance, if placed.
    pub host_id: Option<HostId>,
    pub owner_id: OwnerId,
}

/// A virtual router attached to a network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Router {
    pub id: InstanceId,
    pub host_id: Option<HostId>,
}

/// A logical network as seen by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub id: NetworkId,
    /// Broadcast locator, e.g. `vswitch://42`.
    pub broadcast_uri: Option<String>,
}

impl Network {
    pub fn new(id: NetworkId, broadcast_uri: impl Into<String>) -> Self {
        Self {
            id,
            broadcast_uri: Some(broadcast_uri.into()),
        }
    }
}
