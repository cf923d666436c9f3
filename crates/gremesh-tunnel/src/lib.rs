//! gremesh-tunnel: GRE tunnel mesh orchestration.
//!
//! Decides which directed GRE tunnels must exist between compute hosts so
//! that every VM and virtual router on one logical network can reach the
//! others, dispatches the bridge/tunnel commands to the hosts' agents, and
//! keeps the tunnel record store in step with the answers.
//!
//! # Architecture
//!
//! ```text
//! MeshService (bounded attach / cleanup pools)
//!   └── TunnelManager (on_attach / on_detach, never fails the caller)
//!       ├── MeshPlanner
//!       │   ├── Instance/Router inventories (live peer hosts)
//!       │   └── TunnelStore + MeshLock (claim missing/failed directions)
//!       ├── NetworkLocator (isolation key)
//!       ├── HostInventory (GRE endpoint addresses)
//!       └── AgentTransport (CreateTunnel, SetupBridge, DestroyBridge, DestroyTunnel)
//! ```
//!
//! # Record lifecycle
//!
//! A direction with no record, or a `Failed` one, is claimed under the mesh
//! lock and becomes `Pending`; the agent's answer moves it to `Success` or
//! `Failed`. Failed directions, and Pending ones whose answer never came
//! back within the stale window, are retried by the next attach event on the
//! network. Teardown deletes records once the agent confirms removal.

pub mod error;
pub mod manager;
pub mod planner;
pub mod service;

#[cfg(test)]
mod scenarios;
#[cfg(test)]
mod testing;

pub use error::{TunnelError, TunnelResult};
pub use manager::{AttachReport, DetachReport, Inventories, TunnelManager};
pub use planner::{AttachPlan, DetachDecision, KeepReason, MeshPlanner};
pub use service::MeshService;
