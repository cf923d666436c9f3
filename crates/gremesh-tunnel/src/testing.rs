//! In-process fakes for the inventory and agent seams.

use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use gremesh_agent::*;
use gremesh_core::*;
use gremesh_state::TunnelStore;

use crate::manager::{Inventories, TunnelManager};

/// Network used by most tests, with GRE key 42.
pub(crate) const NET: NetworkId = 7;
pub(crate) const KEY: IsolationKey = 42;

pub(crate) fn network() -> Network {
    Network::new(NET, "vswitch://42")
}

/// A small cloud: instances, routers, hosts, and their agents.
#[derive(Default)]
pub(crate) struct FakeCloud {
    members: Mutex<Vec<(NetworkId, Instance)>>,
    unreachable: Mutex<BTreeSet<HostId>>,
    refusing: Mutex<BTreeSet<HostId>>,
    unknown_hosts: Mutex<BTreeSet<HostId>>,
    reversed_echo: Mutex<BTreeSet<HostId>>,
    sent: Mutex<Vec<(HostId, AgentCommand)>>,
    send_delay: Mutex<Option<Duration>>,
}

impl FakeCloud {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn add_vm(&self, network: NetworkId, id: InstanceId, host: HostId, owner: OwnerId) -> Instance {
        self.add(network, id, InstanceKind::User, host, owner)
    }

    pub(crate) fn add_router(&self, network: NetworkId, id: InstanceId, host: HostId) -> Instance {
        self.add(network, id, InstanceKind::DomainRouter, host, 0)
    }

    fn add(
        &self,
        network: NetworkId,
        id: InstanceId,
        kind: InstanceKind,
        host: HostId,
        owner: OwnerId,
    ) -> Instance {
        let instance = Instance {
            id,
            kind,
            host_id: Some(host),
            owner_id: owner,
        };
        self.members.lock().unwrap().push((network, instance.clone()));
        instance
    }

    /// Drop an instance from every inventory view.
    pub(crate) fn remove(&self, id: InstanceId) {
        self.members.lock().unwrap().retain(|(_, i)| i.id != id);
    }

    pub(crate) fn set_unreachable(&self, host: HostId) {
        self.unreachable.lock().unwrap().insert(host);
    }

    pub(crate) fn refuse(&self, host: HostId) {
        self.refusing.lock().unwrap().insert(host);
    }

    pub(crate) fn forget_host(&self, host: HostId) {
        self.unknown_hosts.lock().unwrap().insert(host);
    }

    /// The host's agent answers CreateTunnel naming the opposite direction.
    pub(crate) fn reverse_echo(&self, host: HostId) {
        self.reversed_echo.lock().unwrap().insert(host);
    }

    pub(crate) fn heal(&self, host: HostId) {
        self.unreachable.lock().unwrap().remove(&host);
        self.refusing.lock().unwrap().remove(&host);
        self.unknown_hosts.lock().unwrap().remove(&host);
        self.reversed_echo.lock().unwrap().remove(&host);
    }

    pub(crate) fn slow_agents(&self, delay: Duration) {
        *self.send_delay.lock().unwrap() = Some(delay);
    }

    pub(crate) fn sent(&self) -> Vec<(HostId, AgentCommand)> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn take_sent(&self) -> Vec<(HostId, AgentCommand)> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }

    /// `(executing host, from, to)` of every CreateTunnel sent, sorted.
    pub(crate) fn created_tunnels(&self) -> Vec<(HostId, HostId, HostId)> {
        let mut tunnels: Vec<_> = self
            .sent()
            .into_iter()
            .filter_map(|(host, cmd)| match cmd {
                AgentCommand::CreateTunnel(c) => Some((host, c.from, c.to)),
                _ => None,
            })
            .collect();
        tunnels.sort();
        tunnels
    }

    pub(crate) fn inventories(self: &Arc<Self>) -> Inventories {
        Inventories {
            instances: self.clone(),
            routers: self.clone(),
            hosts: self.clone(),
        }
    }

    pub(crate) fn manager(self: &Arc<Self>, store: &TunnelStore) -> TunnelManager {
        TunnelManager::new(
            true,
            Duration::from_secs(2),
            store.clone(),
            self.inventories(),
            self.clone(),
        )
    }
}

pub(crate) fn host_ip(host: HostId) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(10, 0, (host >> 8) as u8, host as u8))
}

impl InstanceInventory for FakeCloud {
    fn list_live_on_network(
        &self,
        network: NetworkId,
        host: Option<HostId>,
    ) -> anyhow::Result<Vec<Instance>> {
        Ok(self
            .members
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, i)| *n == network && i.kind == InstanceKind::User)
            .filter(|(_, i)| host.is_none() || i.host_id == host)
            .map(|(_, i)| i.clone())
            .collect())
    }

    fn list_by_owner_on_host(&self, owner: OwnerId, host: HostId) -> anyhow::Result<Vec<Instance>> {
        Ok(self
            .members
            .lock()
            .unwrap()
            .iter()
            .map(|(_, i)| i)
            .filter(|i| i.kind == InstanceKind::User)
            .filter(|i| i.owner_id == owner && i.host_id == Some(host))
            .cloned()
            .collect())
    }
}

impl RouterInventory for FakeCloud {
    fn list_by_network(&self, network: NetworkId) -> anyhow::Result<Vec<Router>> {
        Ok(self
            .members
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, i)| *n == network && i.kind == InstanceKind::DomainRouter)
            .map(|(_, i)| Router {
                id: i.id,
                host_id: i.host_id,
            })
            .collect())
    }
}

impl HostInventory for FakeCloud {
    fn private_ip(&self, host: HostId) -> anyhow::Result<IpAddr> {
        if self.unknown_hosts.lock().unwrap().contains(&host) {
            return Err(anyhow!("host {host} not found"));
        }
        Ok(host_ip(host))
    }
}

impl AgentTransport for FakeCloud {
    fn send(&self, host: HostId, command: AgentCommand) -> Result<AgentAnswer, TransportError> {
        let delay = *self.send_delay.lock().unwrap();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        self.sent.lock().unwrap().push((host, command.clone()));
        if self.unreachable.lock().unwrap().contains(&host) {
            return Err(TransportError::HostUnreachable(host));
        }
        let ok = !self.refusing.lock().unwrap().contains(&host);
        let answer = match &command {
            AgentCommand::CreateTunnel(cmd) => {
                let port = if ok { format!("t{}-{}", cmd.key, cmd.to) } else { String::new() };
                let mut answer = CreateTunnelAnswer::for_command(cmd, ok, port);
                if self.reversed_echo.lock().unwrap().contains(&host) {
                    std::mem::swap(&mut answer.from, &mut answer.to);
                }
                answer.into()
            }
            _ if ok => Answer::success("done").into(),
            _ => Answer::failure("agent refused").into(),
        };
        Ok(answer)
    }
}
