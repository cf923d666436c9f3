//! Agent commands and answers.

use std::fmt;
use std::net::IpAddr;

use gremesh_core::{HostId, IsolationKey, NetworkId};
use serde::{Deserialize, Serialize};

/// Ask a host to open a GRE port towards a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTunnel {
    /// Address of the far end.
    pub remote_ip: IpAddr,
    pub key: IsolationKey,
    pub from: HostId,
    pub to: HostId,
    pub network: NetworkId,
    /// Address of the host executing the command.
    pub local_ip: IpAddr,
}

/// Ask a host to remove one GRE port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestroyTunnel {
    pub network: NetworkId,
    pub key: IsolationKey,
    pub port_name: String,
}

/// Ask a host to create the network's bridge without any tunnel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupBridge {
    pub key: IsolationKey,
    pub host: HostId,
    pub network: NetworkId,
}

/// Ask a host to remove the network's bridge and every port on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestroyBridge {
    pub network: NetworkId,
    pub key: IsolationKey,
}

/// A command dispatched to a host's agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentCommand {
    CreateTunnel(CreateTunnel),
    DestroyTunnel(DestroyTunnel),
    SetupBridge(SetupBridge),
    DestroyBridge(DestroyBridge),
}

impl AgentCommand {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            AgentCommand::CreateTunnel(_) => "create_tunnel",
            AgentCommand::DestroyTunnel(_) => "destroy_tunnel",
            AgentCommand::SetupBridge(_) => "setup_bridge",
            AgentCommand::DestroyBridge(_) => "destroy_bridge",
        }
    }
}

impl fmt::Display for AgentCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentCommand::CreateTunnel(c) => write!(
                f,
                "create_tunnel(from={}, to={}, network={}, key={}, {} -> {})",
                c.from, c.to, c.network, c.key, c.local_ip, c.remote_ip
            ),
            AgentCommand::DestroyTunnel(c) => write!(
                f,
                "destroy_tunnel(network={}, key={}, port={})",
                c.network, c.key, c.port_name
            ),
            AgentCommand::SetupBridge(c) => write!(
                f,
                "setup_bridge(host={}, network={}, key={})",
                c.host, c.network, c.key
            ),
            AgentCommand::DestroyBridge(c) => {
                write!(f, "destroy_bridge(network={}, key={})", c.network, c.key)
            }
        }
    }
}

/// Outcome reported by an agent for commands without a payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub result: bool,
    pub details: String,
}

impl Answer {
    pub fn success(details: impl Into<String>) -> Self {
        Self {
            result: true,
            details: details.into(),
        }
    }

    pub fn failure(details: impl Into<String>) -> Self {
        Self {
            result: false,
            details: details.into(),
        }
    }
}

/// Outcome of a [`CreateTunnel`] command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTunnelAnswer {
    pub result: bool,
    pub details: String,
    /// Address the agent bound locally.
    pub local_ip: IpAddr,
    /// Address the agent pointed the port at.
    pub remote_ip: IpAddr,
    /// Bridge the port was added to.
    pub bridge: String,
    pub key: IsolationKey,
    /// Port assigned on success, empty otherwise.
    pub port_name: String,
    pub from: HostId,
    pub to: HostId,
    pub network: NetworkId,
}

impl CreateTunnelAnswer {
    /// Answer echoing `cmd` with the given outcome.
    pub fn for_command(cmd: &CreateTunnel, result: bool, port_name: impl Into<String>) -> Self {
        Self {
            result,
            details: String::new(),
            local_ip: cmd.local_ip,
            remote_ip: cmd.remote_ip,
            bridge: format!("gre{}", cmd.key),
            key: cmd.key,
            port_name: port_name.into(),
            from: cmd.from,
            to: cmd.to,
            network: cmd.network,
        }
    }
}

/// An answer returned by an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentAnswer {
    Plain(Answer),
    CreateTunnel(CreateTunnelAnswer),
}

impl AgentAnswer {
    pub fn result(&self) -> bool {
        match self {
            AgentAnswer::Plain(a) => a.result,
            AgentAnswer::CreateTunnel(a) => a.result,
        }
    }

    pub fn details(&self) -> &str {
        match self {
            AgentAnswer::Plain(a) => &a.details,
            AgentAnswer::CreateTunnel(a) => &a.details,
        }
    }
}

impl From<Answer> for AgentAnswer {
    fn from(answer: Answer) -> Self {
        AgentAnswer::Plain(answer)
    }
}

impl From<CreateTunnelAnswer> for AgentAnswer {
    fn from(answer: CreateTunnelAnswer) -> Self {
        AgentAnswer::CreateTunnel(answer)
    }
}
