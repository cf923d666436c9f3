//! Tunnel manager: reacts to VM and router placement and teardown.
//!
//! `on_attach` and `on_detach` are called by the instance lifecycle. They
//! never fail the caller: every error is logged at the top of the flow and
//! the instance proceeds without (part of) its mesh. Within one flow, each
//! host pair is dispatched and recorded independently, so one unreachable
//! peer does not stop the others.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use gremesh_agent::*;
use gremesh_core::*;
use gremesh_state::{TunnelKey, TunnelRecord, TunnelState, TunnelStore};
use tracing::{debug, error, info, warn};

use crate::error::{TunnelError, TunnelResult};
use crate::planner::{AttachPlan, DetachDecision, KeepReason, MeshPlanner};

/// The inventory services the manager queries.
#[derive(Clone)]
pub struct Inventories {
    pub instances: Arc<dyn InstanceInventory>,
    pub routers: Arc<dyn RouterInventory>,
    pub hosts: Arc<dyn HostInventory>,
}

/// What an attach flow did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachReport {
    /// Tunnel networking is switched off.
    Disabled,
    /// The instance kind does not take part in the mesh.
    Ignored(InstanceKind),
    /// No peer exists yet; only the local bridge was requested.
    BridgeOnly { ok: bool },
    /// Creation was requested for every claimed direction.
    Tunnels {
        established: Vec<TunnelKey>,
        failed: Vec<TunnelKey>,
    },
}

/// What a detach flow did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetachReport {
    Disabled,
    Ignored(InstanceKind),
    /// Another tenant still needs the host's bridge.
    Kept(KeepReason),
    TornDown {
        bridge_destroyed: bool,
        tunnels_destroyed: Vec<TunnelKey>,
        tunnels_failed: Vec<TunnelKey>,
    },
}

/// Orchestrates the GRE mesh for VM and router lifecycle events.
pub struct TunnelManager {
    enabled: bool,
    store: TunnelStore,
    planner: MeshPlanner,
    hosts: Arc<dyn HostInventory>,
    locator: Arc<dyn NetworkLocator>,
    transport: Arc<dyn AgentTransport>,
}

impl TunnelManager {
    pub fn new(
        enabled: bool,
        lock_timeout: Duration,
        store: TunnelStore,
        inventories: Inventories,
        transport: Arc<dyn AgentTransport>,
    ) -> Self {
        let planner = MeshPlanner::new(
            inventories.instances,
            inventories.routers,
            store.clone(),
            lock_timeout,
        );
        Self {
            enabled,
            store,
            planner,
            hosts: inventories.hosts,
            locator: Arc::new(BroadcastUriLocator),
            transport,
        }
    }

    /// Build from the `[mesh]` section of a config.
    pub fn from_config(
        config: &MeshConfig,
        store: TunnelStore,
        inventories: Inventories,
        transport: Arc<dyn AgentTransport>,
    ) -> Self {
        Self::new(
            config.mesh.enabled,
            config.lock_timeout(),
            store,
            inventories,
            transport,
        )
        .with_pending_stale(config.pending_stale())
    }

    /// Age after which a PENDING record is re-claimed by the next attach.
    pub fn with_pending_stale(mut self, window: Duration) -> Self {
        self.planner = self.planner.with_pending_stale(window);
        self
    }

    /// Replace the default broadcast-URI locator.
    pub fn with_locator(mut self, locator: Arc<dyn NetworkLocator>) -> Self {
        self.locator = locator;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn store(&self) -> &TunnelStore {
        &self.store
    }

    // ── Attach ─────────────────────────────────────────────────────

    /// Ensure `instance`'s new host is meshed with every peer on `network`.
    pub fn on_attach(&self, instance: &Instance, network: &Network, destination: HostId) {
        match self.try_attach(instance, network, destination) {
            Ok(report) => debug!(
                instance = instance.id,
                network = network.id,
                host = destination,
                ?report,
                "attach handled"
            ),
            Err(e @ TunnelError::InvalidLocator(_)) => error!(
                instance = instance.id,
                network = network.id,
                error = %e,
                "cannot derive GRE key, tunnels not created"
            ),
            Err(e) => warn!(
                instance = instance.id,
                network = network.id,
                host = destination,
                error = %e,
                "tunnel mesh attach failed"
            ),
        }
    }

    /// Attach flow with its outcome, for callers that want it.
    pub fn try_attach(
        &self,
        instance: &Instance,
        network: &Network,
        destination: HostId,
    ) -> TunnelResult<AttachReport> {
        if !self.enabled {
            return Ok(AttachReport::Disabled);
        }
        if !instance.kind.drives_mesh() {
            debug!(instance = instance.id, kind = ?instance.kind, "not a VM or router, skipping");
            return Ok(AttachReport::Ignored(instance.kind));
        }

        let key = self.locator.isolation_key_of(network)?;
        let local_ip = self.hosts.private_ip(destination)?;
        let plan = self.planner.plan_attach(destination, network.id, key)?;

        if plan.is_first_host() {
            let ok = self.setup_bridge(destination, network.id, key);
            return Ok(AttachReport::BridgeOnly { ok });
        }

        Ok(self.dispatch(&plan, local_ip))
    }

    /// Send one CreateTunnel per claimed direction and record each answer.
    fn dispatch(&self, plan: &AttachPlan, local_ip: IpAddr) -> AttachReport {
        let peer_ips: BTreeMap<HostId, Option<IpAddr>> = plan
            .outbound
            .union(&plan.inbound)
            .map(|&peer| (peer, self.peer_ip(peer)))
            .collect();

        let mut established = Vec::new();
        let mut failed = Vec::new();

        for tunnel in plan.tunnels() {
            let outbound = tunnel.from == plan.host;
            let peer = if outbound { tunnel.to } else { tunnel.from };
            let Some(peer_ip) = peer_ips.get(&peer).copied().flatten() else {
                self.mark_failed(&tunnel);
                failed.push(tunnel);
                continue;
            };

            let (executor, cmd) = if outbound {
                (
                    plan.host,
                    CreateTunnel {
                        remote_ip: peer_ip,
                        key: plan.key,
                        from: tunnel.from,
                        to: tunnel.to,
                        network: plan.network,
                        local_ip,
                    },
                )
            } else {
                (
                    peer,
                    CreateTunnel {
                        remote_ip: local_ip,
                        key: plan.key,
                        from: tunnel.from,
                        to: tunnel.to,
                        network: plan.network,
                        local_ip: peer_ip,
                    },
                )
            };

            if self.create_tunnel(executor, cmd) {
                established.push(tunnel);
            } else {
                failed.push(tunnel);
            }
        }

        if !failed.is_empty() {
            warn!(
                host = plan.host,
                network = plan.network,
                established = established.len(),
                failed = failed.len(),
                "some tunnels were not created, will retry on next attach"
            );
        }
        AttachReport::Tunnels { established, failed }
    }

    fn peer_ip(&self, peer: HostId) -> Option<IpAddr> {
        match self.hosts.private_ip(peer) {
            Ok(ip) => Some(ip),
            Err(e) => {
                warn!(host = peer, error = %e, "cannot resolve peer address");
                None
            }
        }
    }

    /// Ask `executor` to create the tunnel; true once the record is `Success`.
    fn create_tunnel(&self, executor: HostId, cmd: CreateTunnel) -> bool {
        let tunnel = TunnelKey::new(cmd.from, cmd.to, cmd.network);
        debug!(host = executor, %tunnel, "asking host to create gre tunnel");

        let outcome = match self.transport.send(executor, AgentCommand::CreateTunnel(cmd)) {
            Ok(AgentAnswer::CreateTunnel(answer)) if echoed(&answer) == tunnel => {
                self.handle_create_answer(&answer)
            }
            Ok(AgentAnswer::CreateTunnel(answer)) => {
                warn!(host = executor, %tunnel, echoed = %echoed(&answer), "answer names another tunnel");
                Err(TunnelError::Transport(TransportError::UnexpectedAnswer {
                    host: executor,
                    command: "create_tunnel",
                }))
            }
            Ok(_) => Err(TunnelError::Transport(TransportError::UnexpectedAnswer {
                host: executor,
                command: "create_tunnel",
            })),
            Err(e) => Err(e.into()),
        };

        match outcome {
            Ok(state) => state == TunnelState::Success,
            Err(e) => {
                warn!(host = executor, %tunnel, error = %e, "create gre tunnel failed");
                self.mark_failed(&tunnel);
                false
            }
        }
    }

    /// Record an agent's answer on the record named by the answer itself.
    fn handle_create_answer(&self, answer: &CreateTunnelAnswer) -> TunnelResult<TunnelState> {
        let tunnel = echoed(answer);
        let record = self
            .store
            .get(&tunnel)?
            .ok_or(TunnelError::RecordMissing(tunnel))?;

        let state = if answer.result {
            info!(
                %tunnel,
                local_ip = %answer.local_ip,
                remote_ip = %answer.remote_ip,
                bridge = %answer.bridge,
                key = answer.key,
                port = %answer.port_name,
                "gre tunnel created"
            );
            self.store
                .update_state(record.id, TunnelState::Success, &answer.port_name)?;
            TunnelState::Success
        } else {
            warn!(
                %tunnel,
                details = %answer.details,
                local_ip = %answer.local_ip,
                remote_ip = %answer.remote_ip,
                key = answer.key,
                "agent failed to create gre tunnel"
            );
            self.store.update_state(record.id, TunnelState::Failed, "")?;
            TunnelState::Failed
        };
        Ok(state)
    }

    fn mark_failed(&self, tunnel: &TunnelKey) {
        let result = self.store.get(tunnel).and_then(|record| match record {
            Some(record) => self
                .store
                .update_state(record.id, TunnelState::Failed, "")
                .map(|_| ()),
            None => Ok(()),
        });
        if let Err(e) = result {
            error!(%tunnel, error = %e, "failed to record tunnel failure");
        }
    }

    fn setup_bridge(&self, host: HostId, network: NetworkId, key: IsolationKey) -> bool {
        debug!(host, network, "asking host to configure bridge");
        let cmd = AgentCommand::SetupBridge(SetupBridge { key, host, network });
        match self.transport.send(host, cmd) {
            Ok(answer) if answer.result() => {
                info!(host, network, key, "bridge configured");
                true
            }
            Ok(answer) => {
                warn!(host, network, details = %answer.details(), "agent failed to configure bridge");
                false
            }
            Err(e) => {
                warn!(host, network, error = %e, "setup bridge failed");
                false
            }
        }
    }

    // ── Detach ─────────────────────────────────────────────────────

    /// Tear down the host's bridge and inbound tunnels if `instance` was its last tenant.
    pub fn on_detach(&self, instance: &Instance, network: &Network) {
        match self.try_detach(instance, network) {
            Ok(report) => debug!(
                instance = instance.id,
                network = network.id,
                ?report,
                "detach handled"
            ),
            Err(e) => warn!(
                instance = instance.id,
                owner = instance.owner_id,
                host = ?instance.host_id,
                network = network.id,
                error = %e,
                "tunnel mesh detach failed"
            ),
        }
    }

    /// Detach flow with its outcome, for callers that want it.
    pub fn try_detach(&self, instance: &Instance, network: &Network) -> TunnelResult<DetachReport> {
        if !self.enabled {
            return Ok(DetachReport::Disabled);
        }
        if !instance.kind.drives_mesh() {
            return Ok(DetachReport::Ignored(instance.kind));
        }

        let host = match self.planner.check_detach(instance, network.id)? {
            DetachDecision::Teardown { host } => host,
            DetachDecision::Keep(reason) => {
                debug!(instance = instance.id, ?reason, "host still in use, keeping bridge");
                return Ok(DetachReport::Kept(reason));
            }
        };

        let key = self.locator.isolation_key_of(network)?;
        let bridge_destroyed = self.destroy_bridge(host, network.id, key);

        let mut tunnels_destroyed = Vec::new();
        let mut tunnels_failed = Vec::new();
        for peer in self.store.list_peers_to(host, network.id)? {
            // Only established tunnels have a port to remove.
            if peer.state != TunnelState::Success {
                continue;
            }
            let tunnel = peer.tunnel_key();
            if self.destroy_tunnel(&peer, key) {
                tunnels_destroyed.push(tunnel);
            } else {
                tunnels_failed.push(tunnel);
            }
        }

        Ok(DetachReport::TornDown {
            bridge_destroyed,
            tunnels_destroyed,
            tunnels_failed,
        })
    }

    /// Destroy `host`'s bridge; on success drop every record leaving `host`.
    fn destroy_bridge(&self, host: HostId, network: NetworkId, key: IsolationKey) -> bool {
        debug!(host, network, "destroying bridge");
        let cmd = AgentCommand::DestroyBridge(DestroyBridge { network, key });
        let answer = match self.transport.send(host, cmd) {
            Ok(answer) => answer,
            Err(e) => {
                warn!(host, network, error = %e, "destroy bridge failed");
                return false;
            }
        };
        if !answer.result() {
            warn!(host, network, details = %answer.details(), "agent failed to destroy bridge");
            return false;
        }

        // Deletes do not take the mesh lock; only the create path needs it.
        match self.store.delete_all_from(host, network) {
            Ok(count) => info!(host, network, records = count, "bridge destroyed"),
            Err(e) => {
                error!(host, network, error = %e, "bridge destroyed, but records not removed");
                self.fail_outbound(host, network);
            }
        }
        true
    }

    /// Mark every record leaving `host` FAILED so the next attach recreates it.
    fn fail_outbound(&self, host: HostId, network: NetworkId) {
        match self.store.list_by_network(network) {
            Ok(records) => records
                .iter()
                .filter(|r| r.from == host)
                .for_each(|r| self.mark_failed(&r.tunnel_key())),
            Err(e) => error!(host, network, error = %e, "cannot list outbound tunnels"),
        }
    }

    /// Ask the peer at the far end of `record` to remove its port.
    fn destroy_tunnel(&self, record: &TunnelRecord, key: IsolationKey) -> bool {
        let tunnel = record.tunnel_key();
        debug!(%tunnel, port = %record.port_name, "destroying tunnel");
        let cmd = AgentCommand::DestroyTunnel(DestroyTunnel {
            network: record.network_id,
            key,
            port_name: record.port_name.clone(),
        });

        match self.transport.send(record.from, cmd) {
            Ok(answer) if answer.result() => {
                match self.store.delete_by_pair(&tunnel) {
                    Ok(_) => info!(%tunnel, "tunnel destroyed"),
                    Err(e) => {
                        error!(%tunnel, error = %e, "tunnel destroyed, but record not removed");
                        self.mark_failed(&tunnel);
                    }
                }
                true
            }
            Ok(answer) => {
                warn!(%tunnel, details = %answer.details(), "agent failed to destroy tunnel");
                false
            }
            Err(e) => {
                warn!(%tunnel, error = %e, "destroy tunnel failed");
                false
            }
        }
    }
}

/// The `(from, to, network)` an answer says it belongs to.
fn echoed(answer: &CreateTunnelAnswer) -> TunnelKey {
    TunnelKey::new(answer.from, answer.to, answer.network)
}
