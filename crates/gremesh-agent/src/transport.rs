//! The seam between the orchestrator and remote agents.

use std::time::Duration;

use gremesh_core::HostId;
use thiserror::Error;

use crate::protocol::{AgentAnswer, AgentCommand};

/// Failures delivering a command or receiving its answer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("host {0} is unreachable")]
    HostUnreachable(HostId),

    #[error("no answer from host {host} within {after:?}")]
    Timeout { host: HostId, after: Duration },

    #[error("agent on host {host} failed: {details}")]
    Agent { host: HostId, details: String },

    #[error("unexpected answer from host {host} to {command}")]
    UnexpectedAnswer { host: HostId, command: &'static str },
}

/// Delivers commands to the agent on a host and waits for the answer.
///
/// Implementations block the calling thread for the round-trip only.
pub trait AgentTransport: Send + Sync {
    fn send(&self, host: HostId, command: AgentCommand) -> Result<AgentAnswer, TransportError>;

    /// Send several commands to one host, stopping at the first delivery error.
    fn send_batch(
        &self,
        host: HostId,
        commands: Vec<AgentCommand>,
    ) -> Result<Vec<AgentAnswer>, TransportError> {
        commands
            .into_iter()
            .map(|command| self.send(host, command))
            .collect()
    }
}
