//! Mesh service: bounded worker pools around the tunnel manager.
//!
//! Placement and teardown events are handed to the service, which runs
//! each one on a blocking worker once a permit from the matching pool is
//! available. Attach and cleanup pools are sized from `[workers]` and live
//! as long as the service.

use std::sync::Arc;

use gremesh_core::config::WorkersConfig;
use gremesh_core::{HostId, Instance, Network};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::manager::TunnelManager;

pub struct MeshService {
    manager: Arc<TunnelManager>,
    /// Permits for concurrent attach flows.
    attach_pool: Arc<Semaphore>,
    /// Permits for concurrent teardown flows.
    cleanup_pool: Arc<Semaphore>,
}

impl MeshService {
    pub fn new(manager: Arc<TunnelManager>, workers: &WorkersConfig) -> Self {
        info!(
            attach = workers.attach,
            cleanup = workers.cleanup,
            "mesh worker pools started"
        );
        Self {
            manager,
            attach_pool: Arc::new(Semaphore::new(workers.attach)),
            cleanup_pool: Arc::new(Semaphore::new(workers.cleanup)),
        }
    }

    pub fn manager(&self) -> &Arc<TunnelManager> {
        &self.manager
    }

    /// Queue an attach event. The returned handle resolves once it has run.
    pub fn submit_attach(
        &self,
        instance: Instance,
        network: Network,
        destination: HostId,
    ) -> JoinHandle<()> {
        let manager = self.manager.clone();
        let pool = self.attach_pool.clone();
        tokio::spawn(async move {
            let Ok(_permit) = pool.acquire_owned().await else {
                warn!(instance = instance.id, network = network.id, "attach pool closed, event dropped");
                return;
            };
            let instance_id = instance.id;
            let worker = tokio::task::spawn_blocking(move || {
                manager.on_attach(&instance, &network, destination)
            });
            if let Err(e) = worker.await {
                error!(instance = instance_id, error = %e, "attach worker aborted");
            }
        })
    }

    /// Queue a detach event. The returned handle resolves once it has run.
    pub fn submit_detach(&self, instance: Instance, network: Network) -> JoinHandle<()> {
        let manager = self.manager.clone();
        let pool = self.cleanup_pool.clone();
        tokio::spawn(async move {
            let Ok(_permit) = pool.acquire_owned().await else {
                warn!(instance = instance.id, network = network.id, "cleanup pool closed, event dropped");
                return;
            };
            let instance_id = instance.id;
            let worker = tokio::task::spawn_blocking(move || manager.on_detach(&instance, &network));
            if let Err(e) = worker.await {
                error!(instance = instance_id, error = %e, "cleanup worker aborted");
            }
        })
    }

    /// Stop accepting events. Flows already running finish normally.
    pub fn shutdown(&self) {
        self.attach_pool.close();
        self.cleanup_pool.close();
        debug!("mesh worker pools closed");
    }

    pub fn is_shut_down(&self) -> bool {
        self.attach_pool.is_closed() && self.cleanup_pool.is_closed()
    }
}
