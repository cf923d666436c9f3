//! gremesh-state: durable tunnel record store.
//!
//! Backed by [redb](https://docs.rs/redb). One record exists per directed
//! `(from, to, network)` triple; the triple is the table key, so uniqueness
//! is enforced by the table itself and a second creation attempt returns
//! the stored row instead of inserting a duplicate.
//!
//! # Locking
//!
//! The store also owns the global [`MeshLock`]. Callers hold it while they
//! decide which records to create, so two concurrent events cannot both
//! observe a missing tunnel and both issue a creation command for it.
//!
//! The `TunnelStore` is `Clone` + `Send` + `Sync` (backed by `Arc`) and can
//! be shared across worker threads.

pub mod error;
pub mod lock;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use lock::{MeshLock, MeshLockGuard};
pub use store::TunnelStore;
pub use types::*;
