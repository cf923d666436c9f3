//! Failures of the tunnel record store and the mesh lock.

use std::time::Duration;

use thiserror::Error;

pub type StateResult<T> = Result<T, StateError>;

/// redb failures are flattened to their message; callers only log them.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("cannot open tunnel store: {0}")]
    Open(String),

    #[error("tunnel store transaction failed: {0}")]
    Transaction(String),

    #[error("tunnel table unavailable: {0}")]
    Table(String),

    #[error("reading tunnel records failed: {0}")]
    Read(String),

    #[error("writing tunnel records failed: {0}")]
    Write(String),

    #[error("cannot encode tunnel record: {0}")]
    Serialize(String),

    #[error("corrupt tunnel record: {0}")]
    Deserialize(String),

    /// An update named a record id or triple that is no longer stored.
    #[error("{0} not in tunnel store")]
    NotFound(String),

    /// Another event held the mesh lock for the whole window.
    #[error("mesh lock not acquired within {0:?}")]
    LockTimeout(Duration),
}
