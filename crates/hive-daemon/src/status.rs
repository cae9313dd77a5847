//! Fleet-query responders and capacity snapshots.
//!
//! Every daemon answers the Describe* fan-outs and the `hive.node.*`
//! diagnostics subjects, and publishes a periodic capacity snapshot.
//! Stopped VMs are reported by the node that last ran them (their records
//! live in the shared KV bucket), so a fleet query sees them exactly once.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::warn;

use hive_broker::subjects;
use hive_core::ec2::{
    DescribeInstanceTypesOutput, DescribeInstancesOutput, InstanceTypeOffering, Reservation,
};
use hive_core::state::InstanceState;

use crate::handlers::Handler;
use crate::service::Daemon;
use crate::vm::VirtualMachine;

/// Cadence of the fire-and-forget capacity publish.
pub(crate) const CAPACITY_INTERVAL: Duration = Duration::from_secs(30);

/// One node's health/capacity snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct NodeStatus {
    pub node: String,
    pub hostname: String,
    pub running: usize,
    pub stopped: usize,
    pub error: usize,
    pub slots_total: u32,
    pub slots_free: u32,
    pub instance_types: Vec<String>,
}

/// One VM's summary line for diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct VmSummary {
    pub instance_id: String,
    pub instance_type: String,
    pub state: String,
    pub last_node: String,
}

/// Stopped records in shared KV that this node is responsible for
/// reporting.
pub(crate) async fn kv_stopped_owned(daemon: &Daemon) -> Vec<VirtualMachine> {
    let keys = match daemon.kv.keys().await {
        Ok(keys) => keys,
        Err(e) => {
            warn!(error = %e, "listing shared vm records failed");
            return Vec::new();
        }
    };
    let mut records = Vec::new();
    for key in keys {
        match daemon.kv.get_json::<VirtualMachine>(&key).await {
            Ok(Some(vm))
                if vm.status == InstanceState::Stopped
                    && vm.last_node == daemon.config.node_name =>
            {
                records.push(vm)
            }
            Ok(_) => {}
            Err(e) => warn!(%key, error = %e, "reading shared vm record failed"),
        }
    }
    records
}

/// Everything this node reports: live VMs plus its stopped records.
async fn reportable_vms(daemon: &Daemon) -> Vec<VirtualMachine> {
    let mut records = daemon.instances.snapshot().await;
    records.extend(kv_stopped_owned(daemon).await);
    records
}

pub(crate) async fn node_status(daemon: &Daemon) -> NodeStatus {
    let records = reportable_vms(daemon).await;
    let running = records
        .iter()
        .filter(|vm| {
            matches!(
                vm.status,
                InstanceState::Running | InstanceState::Pending | InstanceState::Provisioning
            )
        })
        .count();
    let stopped = records
        .iter()
        .filter(|vm| vm.status == InstanceState::Stopped)
        .count();
    let error = records
        .iter()
        .filter(|vm| vm.status == InstanceState::Error)
        .count();
    let in_use = daemon.instances.len().await as u32;

    NodeStatus {
        node: daemon.config.node_name.clone(),
        hostname: std::env::var("HOSTNAME").unwrap_or_else(|_| daemon.config.node_name.clone()),
        running,
        stopped,
        error,
        slots_total: daemon.config.max_slots,
        slots_free: daemon.config.max_slots.saturating_sub(in_use),
        instance_types: daemon.catalog.iter().map(|t| t.name.clone()).collect(),
    }
}

// ── Fan-out responders ─────────────────────────────────────────────

pub(crate) struct DescribeInstancesHandler {
    pub daemon: Arc<Daemon>,
}

#[async_trait]
impl Handler for DescribeInstancesHandler {
    fn topic(&self) -> String {
        subjects::DESCRIBE_INSTANCES.to_string()
    }

    async fn process(&self, _payload: Bytes) -> Option<Vec<u8>> {
        // Group by reservation; the gateway applies any request filters.
        let mut by_reservation: BTreeMap<String, Reservation> = BTreeMap::new();
        for vm in reportable_vms(&self.daemon).await {
            let entry = by_reservation
                .entry(vm.reservation_id.clone())
                .or_insert_with(|| Reservation {
                    reservation_id: vm.reservation_id.clone(),
                    owner_id: self.daemon.config.account_id.clone(),
                    instances: Vec::new(),
                });
            entry.instances.push(vm.instance_record(&self.daemon.config.az));
        }
        let output = DescribeInstancesOutput {
            reservations: by_reservation.into_values().collect(),
        };
        serde_json::to_vec(&output).ok()
    }
}

pub(crate) struct DescribeTypesHandler {
    pub daemon: Arc<Daemon>,
}

#[async_trait]
impl Handler for DescribeTypesHandler {
    fn topic(&self) -> String {
        subjects::DESCRIBE_INSTANCE_TYPES.to_string()
    }

    async fn process(&self, _payload: Bytes) -> Option<Vec<u8>> {
        let entries = self
            .daemon
            .catalog
            .iter()
            .map(|t| {
                Some(InstanceTypeOffering {
                    instance_type: t.name.clone(),
                    v_cpus: t.vcpu,
                    memory_gib: t.memory_gib,
                    architecture: t.architecture.as_str().to_string(),
                })
            })
            .collect();
        let output = DescribeInstanceTypesOutput {
            instance_types: Some(entries),
        };
        serde_json::to_vec(&output).ok()
    }
}

pub(crate) struct NodeStatusHandler {
    pub daemon: Arc<Daemon>,
}

#[async_trait]
impl Handler for NodeStatusHandler {
    fn topic(&self) -> String {
        subjects::NODE_STATUS.to_string()
    }

    async fn process(&self, _payload: Bytes) -> Option<Vec<u8>> {
        serde_json::to_vec(&node_status(&self.daemon).await).ok()
    }
}

pub(crate) struct NodeVmsHandler {
    pub daemon: Arc<Daemon>,
}

#[async_trait]
impl Handler for NodeVmsHandler {
    fn topic(&self) -> String {
        subjects::NODE_VMS.to_string()
    }

    async fn process(&self, _payload: Bytes) -> Option<Vec<u8>> {
        let summaries: Vec<VmSummary> = reportable_vms(&self.daemon)
            .await
            .into_iter()
            .map(|vm| VmSummary {
                instance_id: vm.instance_id.clone(),
                instance_type: vm.instance_type.clone(),
                state: vm.status.as_str().to_string(),
                last_node: vm.last_node.clone(),
            })
            .collect();
        serde_json::to_vec(&summaries).ok()
    }
}
