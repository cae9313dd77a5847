//! Daemon assembly: configuration, startup, and subject registration.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use hive_broker::{Broker, KvStore, subjects};
use hive_core::instance_types::{CpuInfo, InstanceTypeInfo, catalog_for};
use hive_vmm::{RuntimePaths, runtime_dir};
use hive_volumes::{ObjectStore, VolumeStore};

use crate::control::{ModifyHandler, StartHandler, TerminateHandler};
use crate::error::{DaemonError, DaemonResult};
use crate::handlers::spawn_handler;
use crate::launch::RunInstancesHandler;
use crate::monitor::RestartPolicy;
use crate::registry::Instances;
use crate::status::{
    CAPACITY_INTERVAL, DescribeInstancesHandler, DescribeTypesHandler, NodeStatusHandler,
    NodeVmsHandler, node_status,
};
use crate::vm::VirtualMachine;

/// KV bucket holding shared VM records.
const VM_BUCKET: &str = "hive-vms";

/// Per-node daemon parameters.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub node_name: String,
    pub account_id: String,
    pub region: String,
    pub az: String,
    /// Launch slots this node advertises.
    pub max_slots: u32,
    pub restart_policy: RestartPolicy,
}

impl DaemonConfig {
    pub fn new(node_name: &str, account_id: &str, region: &str, az: &str) -> Self {
        Self {
            node_name: node_name.to_string(),
            account_id: account_id.to_string(),
            region: region.to_string(),
            az: az.to_string(),
            max_slots: 8,
            restart_policy: RestartPolicy::default(),
        }
    }
}

/// Detect the host CPU and derive the advertised catalog. Called once at
/// startup, before any subject is subscribed.
pub fn detect_catalog() -> DaemonResult<Vec<InstanceTypeInfo>> {
    let cpu = CpuInfo::detect().map_err(|e| DaemonError::Config(format!("cpu detection: {e}")))?;
    let catalog = catalog_for(&cpu);
    info!(
        vendor = ?cpu.vendor,
        family = cpu.family,
        model = cpu.model,
        generation = ?cpu.generation(),
        types = catalog.len(),
        "host cpu detected"
    );
    Ok(catalog)
}

/// The per-node daemon.
pub struct Daemon {
    pub config: DaemonConfig,
    pub(crate) broker: Broker,
    pub(crate) volumes: Arc<dyn VolumeStore>,
    pub(crate) objects: Arc<dyn ObjectStore>,
    pub(crate) instances: Instances,
    pub(crate) catalog: Vec<InstanceTypeInfo>,
    pub(crate) paths: RuntimePaths,
    pub(crate) kv: KvStore,
    shutdown: watch::Sender<bool>,
}

impl Daemon {
    /// Assemble a daemon. The runtime directory is resolved here, before
    /// any subscription exists; failure is fatal to the process.
    pub async fn new(
        config: DaemonConfig,
        broker: Broker,
        volumes: Arc<dyn VolumeStore>,
        objects: Arc<dyn ObjectStore>,
        catalog: Vec<InstanceTypeInfo>,
    ) -> DaemonResult<Arc<Daemon>> {
        let paths = RuntimePaths::new(runtime_dir()?);
        let kv = broker.kv(VM_BUCKET).await?;
        let (shutdown, _) = watch::channel(false);
        Ok(Arc::new(Daemon {
            config,
            broker,
            volumes,
            objects,
            instances: Instances::new(),
            catalog,
            paths,
            kv,
            shutdown,
        }))
    }

    /// Signal every task to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    pub(crate) fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Persist a VM record to the shared bucket.
    pub(crate) async fn persist_vm(&self, vm: &VirtualMachine) {
        if let Err(e) = self.kv.put_json(&vm.instance_id, vm).await {
            warn!(instance_id = %vm.instance_id, error = %e, "persisting vm record failed");
        }
    }

    /// Remove a VM record from the shared bucket.
    pub(crate) async fn erase_vm(&self, instance_id: &str) {
        if let Err(e) = self.kv.delete(instance_id).await {
            warn!(%instance_id, error = %e, "erasing vm record failed");
        }
    }

    /// Tear down the NBD exports of every attached volume.
    pub(crate) async fn stop_exports(&self, vm: &VirtualMachine) {
        for request in &vm.ebs_requests {
            if request.nbd_uri.is_some() {
                if let Err(e) = self.volumes.stop_export(&request.volume_id).await {
                    warn!(volume_id = %request.volume_id, error = %e, "stopping export failed");
                }
            }
        }
    }

    /// Adopt, subscribe, and serve until shutdown.
    pub async fn run(self: &Arc<Self>) -> DaemonResult<()> {
        crate::adopt::adopt_vms(self).await;

        let mut tasks = Vec::new();
        let shutdown_rx = self.shutdown_rx();

        // Type-scoped launch queues, one per advertised type.
        for type_info in &self.catalog {
            tasks.push(spawn_handler(
                self.broker.clone(),
                Arc::new(RunInstancesHandler {
                    daemon: Arc::clone(self),
                    instance_type: type_info.name.clone(),
                }),
                shutdown_rx.clone(),
            ));
        }

        // Stopped-instance control queues.
        tasks.push(spawn_handler(
            self.broker.clone(),
            Arc::new(StartHandler {
                daemon: Arc::clone(self),
            }),
            shutdown_rx.clone(),
        ));
        tasks.push(spawn_handler(
            self.broker.clone(),
            Arc::new(TerminateHandler {
                daemon: Arc::clone(self),
            }),
            shutdown_rx.clone(),
        ));
        tasks.push(spawn_handler(
            self.broker.clone(),
            Arc::new(ModifyHandler {
                daemon: Arc::clone(self),
            }),
            shutdown_rx.clone(),
        ));

        // Fleet-query fan-out responders.
        tasks.push(spawn_handler(
            self.broker.clone(),
            Arc::new(DescribeInstancesHandler {
                daemon: Arc::clone(self),
            }),
            shutdown_rx.clone(),
        ));
        tasks.push(spawn_handler(
            self.broker.clone(),
            Arc::new(DescribeTypesHandler {
                daemon: Arc::clone(self),
            }),
            shutdown_rx.clone(),
        ));
        tasks.push(spawn_handler(
            self.broker.clone(),
            Arc::new(NodeStatusHandler {
                daemon: Arc::clone(self),
            }),
            shutdown_rx.clone(),
        ));
        tasks.push(spawn_handler(
            self.broker.clone(),
            Arc::new(NodeVmsHandler {
                daemon: Arc::clone(self),
            }),
            shutdown_rx.clone(),
        ));

        // Periodic capacity snapshots.
        {
            let daemon = Arc::clone(self);
            let mut shutdown = shutdown_rx.clone();
            tasks.push(tokio::spawn(async move {
                let mut interval = tokio::time::interval(CAPACITY_INTERVAL);
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            let status = node_status(&daemon).await;
                            if let Ok(payload) = serde_json::to_vec(&status) {
                                let _ = daemon.broker.publish(subjects::NODE_CAPACITY, payload).await;
                            }
                        }
                        _ = shutdown.changed() => break,
                    }
                }
            }));
        }

        info!(
            node = %self.config.node_name,
            types = self.catalog.len(),
            "daemon serving"
        );

        // Park until shutdown, then reap.
        let mut shutdown = shutdown_rx;
        let _ = shutdown.changed().await;
        for task in tasks {
            let _ = task.await;
        }
        info!(node = %self.config.node_name, "daemon stopped");
        Ok(())
    }
}
