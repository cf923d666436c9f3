//! Mesh planner: which host pairs need a tunnel, and when a host may leave.
//!
//! Given a host joining a network, the planner collects the other hosts
//! carrying live tenants of that network and claims, under the global mesh
//! lock, every direction between the joining host and a peer that has
//! never been attempted or last failed. Given a host leaving, it decides
//! whether any remaining tenant still needs the host's bridge.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use gremesh_core::*;
use gremesh_state::{TunnelKey, TunnelState, TunnelStore, epoch_secs};
use tracing::{debug, warn};

use crate::error::TunnelResult;

/// Directions claimed for one attach event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachPlan {
    pub host: HostId,
    pub network: NetworkId,
    pub key: IsolationKey,
    /// Hosts other than `host` with live tenants on the network.
    pub peers: BTreeSet<HostId>,
    /// Peers `host` must open a tunnel to.
    pub outbound: BTreeSet<HostId>,
    /// Peers that must open a tunnel to `host`.
    pub inbound: BTreeSet<HostId>,
}

impl AttachPlan {
    /// No other host carries the network yet.
    pub fn is_first_host(&self) -> bool {
        self.peers.is_empty()
    }

    /// Directed tunnels this plan will request, outbound first.
    pub fn tunnels(&self) -> Vec<TunnelKey> {
        let outbound = self
            .outbound
            .iter()
            .map(|&peer| TunnelKey::new(self.host, peer, self.network));
        let inbound = self
            .inbound
            .iter()
            .map(|&peer| TunnelKey::new(peer, self.host, self.network));
        outbound.chain(inbound).collect()
    }
}

/// Why a departing instance leaves its host's bridge in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepReason {
    /// The instance has no host.
    NotPlaced,
    /// Another user VM of the same owner is still on the host.
    UserVmRemains,
    /// A router for the network runs on the host.
    RouterColocated,
}

/// Outcome of the detach eligibility check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetachDecision {
    /// The instance was the last tenant; tear down `host`'s side.
    Teardown { host: HostId },
    Keep(KeepReason),
}

/// Default age after which a PENDING record is re-claimed.
pub const DEFAULT_PENDING_STALE: Duration = Duration::from_secs(300);

pub struct MeshPlanner {
    instances: Arc<dyn InstanceInventory>,
    routers: Arc<dyn RouterInventory>,
    store: TunnelStore,
    lock_timeout: Duration,
    pending_stale: Duration,
}

impl MeshPlanner {
    pub fn new(
        instances: Arc<dyn InstanceInventory>,
        routers: Arc<dyn RouterInventory>,
        store: TunnelStore,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            instances,
            routers,
            store,
            lock_timeout,
            pending_stale: DEFAULT_PENDING_STALE,
        }
    }

    /// Re-claim PENDING records not updated for `window`.
    pub fn with_pending_stale(mut self, window: Duration) -> Self {
        self.pending_stale = window;
        self
    }

    /// Distinct hosts, other than `host`, running a live VM or a router on `network`.
    pub fn live_peers(&self, host: HostId, network: NetworkId) -> TunnelResult<BTreeSet<HostId>> {
        let vms = self.instances.list_live_on_network(network, None)?;
        let routers = self.routers.list_by_network(network)?;

        let peers = vms
            .iter()
            .filter_map(|vm| vm.host_id)
            .chain(routers.iter().filter_map(|r| r.host_id))
            .filter(|&peer| peer != host)
            .collect();
        Ok(peers)
    }

    /// Compute and claim the tunnels needed for `host` to join `network`.
    ///
    /// Claimed directions are left `Pending` in the store; the caller must
    /// dispatch a creation command for each and record the answer.
    pub fn plan_attach(
        &self,
        host: HostId,
        network: NetworkId,
        key: IsolationKey,
    ) -> TunnelResult<AttachPlan> {
        let peers = self.live_peers(host, network)?;
        let mut plan = AttachPlan {
            host,
            network,
            key,
            peers,
            outbound: BTreeSet::new(),
            inbound: BTreeSet::new(),
        };
        if plan.peers.is_empty() {
            debug!(host, network, "first host on network, no peers");
            return Ok(plan);
        }

        let _guard = self.store.acquire_lock(self.lock_timeout)?;
        for &peer in &plan.peers {
            if self.claim(TunnelKey::new(host, peer, network), key)? {
                plan.outbound.insert(peer);
            }
            if self.claim(TunnelKey::new(peer, host, network), key)? {
                plan.inbound.insert(peer);
            }
        }

        debug!(
            host,
            network,
            peers = plan.peers.len(),
            outbound = plan.outbound.len(),
            inbound = plan.inbound.len(),
            "attach planned"
        );
        Ok(plan)
    }

    /// Mark `tunnel` as in flight if it needs an attempt. Caller holds the mesh lock.
    fn claim(&self, tunnel: TunnelKey, key: IsolationKey) -> TunnelResult<bool> {
        match self.store.get(&tunnel)? {
            None => {
                debug!(%tunnel, "attempting to create tunnel");
                self.store.create_or_get(&tunnel, key)?;
            }
            Some(record) if record.needs_attempt(epoch_secs(), self.pending_stale) => {
                if record.state == TunnelState::Pending {
                    warn!(%tunnel, updated_at = record.updated_at, "reclaiming stale pending tunnel");
                } else {
                    debug!(%tunnel, "retrying failed tunnel");
                }
                self.store.update_state(record.id, TunnelState::Pending, "")?;
            }
            Some(_) => return Ok(false),
        }
        Ok(true)
    }

    /// Decide whether `instance` leaving `network` empties its host.
    pub fn check_detach(&self, instance: &Instance, network: NetworkId) -> TunnelResult<DetachDecision> {
        let Some(host) = instance.host_id else {
            return Ok(DetachDecision::Keep(KeepReason::NotPlaced));
        };

        let other_vms = self
            .instances
            .list_by_owner_on_host(instance.owner_id, host)?
            .into_iter()
            .filter(|vm| vm.id != instance.id)
            .count();

        match instance.kind {
            InstanceKind::User => {
                if other_vms > 0 {
                    return Ok(DetachDecision::Keep(KeepReason::UserVmRemains));
                }
                let router_here = self
                    .routers
                    .list_by_network(network)?
                    .iter()
                    .any(|r| r.id != instance.id && r.host_id == Some(host));
                if router_here {
                    return Ok(DetachDecision::Keep(KeepReason::RouterColocated));
                }
            }
            InstanceKind::DomainRouter => {
                if other_vms > 0 {
                    return Ok(DetachDecision::Keep(KeepReason::UserVmRemains));
                }
            }
            InstanceKind::System => {}
        }

        Ok(DetachDecision::Teardown { host })
    }
}
