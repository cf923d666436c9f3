//! gremesh-agent: commands sent to per-host networking agents.
//!
//! The orchestrator talks to the agent on each compute host through an
//! [`AgentTransport`]. Delivery is a black box: the transport blocks until
//! the agent answers or fails, and every failure surfaces as a
//! [`TransportError`].
//!
//! Tunnel-creation answers echo the `(from, to, network)` triple of their
//! request so that a response can be matched to its tunnel record without
//! relying on the ordering of a batch.

pub mod protocol;
pub mod transport;

pub use protocol::*;
pub use transport::{AgentTransport, TransportError};
