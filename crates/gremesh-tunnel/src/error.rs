//! Tunnel orchestration error types.

use std::time::Duration;

use gremesh_agent::TransportError;
use gremesh_core::LocatorError;
use gremesh_state::{StateError, TunnelKey};
use thiserror::Error;

/// Errors that abort one attach or detach flow.
///
/// None of these reach the instance lifecycle: the manager logs them at
/// the top of the flow.
#[derive(Debug, Error)]
pub enum TunnelError {
    /// The network's locator carries no usable GRE key.
    #[error("configuration integrity: {0}")]
    InvalidLocator(#[from] LocatorError),

    #[error("mesh lock contended for {0:?}, event abandoned")]
    LockContention(Duration),

    #[error("state store error: {0}")]
    State(StateError),

    #[error("inventory error: {0}")]
    Inventory(#[from] anyhow::Error),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("no tunnel record for {0}")]
    RecordMissing(TunnelKey),
}

impl From<StateError> for TunnelError {
    fn from(e: StateError) -> Self {
        match e {
            StateError::LockTimeout(after) => TunnelError::LockContention(after),
            other => TunnelError::State(other),
        }
    }
}

pub type TunnelResult<T> = Result<T, TunnelError>;
