//! gremesh-core: shared types for the GRE tunnel mesh orchestrator.
//!
//! Holds the identifiers and read-only views of instances, routers, and
//! networks that the orchestrator consumes, the inventory traits through
//! which those views are queried, the broadcast-URI locator that yields a
//! network's isolation key, and the `gremesh.toml` configuration.

pub mod config;
pub mod inventory;
pub mod locator;
pub mod types;

pub use config::MeshConfig;
pub use inventory::{HostInventory, InstanceInventory, RouterInventory};
pub use locator::{BroadcastUri, BroadcastUriLocator, LocatorError, NetworkLocator};
pub use types::*;
