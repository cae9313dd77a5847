//! The VM record.
//!
//! One record per VM, owned by exactly one daemon while running. The
//! record serializes to JSON for the shared KV bucket; node-local fields
//! (PID, running flag, metadata address) never travel and are cleared by
//! [`VirtualMachine::reset_node_local_state`] so another node can adopt
//! the VM after a stop.

use serde::{Deserialize, Serialize};
use tracing::error;

use hive_core::control::CommandAttributes;
use hive_core::ec2::RunInstancesInput;
use hive_core::instance_types::Architecture;
use hive_core::state::{InstanceState, is_valid_transition};
use hive_volumes::EbsRequest;

use crate::error::DaemonError;

/// Hypervisor-facing shape of the VM.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VmConfig {
    pub vcpus: u32,
    pub memory_mib: u64,
    pub architecture: Architecture,
    /// Machine type override; `q35`/`virt` by architecture when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine: Option<String>,
}

/// Crash bookkeeping for the auto-restart policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct VmHealth {
    pub crash_count: u32,
    pub restart_count: u32,
    /// Unix seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_crash_time: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_crash_time: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_crash_reason: Option<String>,
}

/// One virtual machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualMachine {
    pub instance_id: String,
    pub instance_type: String,
    pub status: InstanceState,
    pub config: VmConfig,
    /// Attach order defines device enumeration; boot volume first.
    pub ebs_requests: Vec<EbsRequest>,
    /// Latest user intent, from the most recent control command.
    pub attributes: CommandAttributes,
    /// The launch request, kept for describes and restarts.
    pub launch_input: RunInstancesInput,
    pub reservation_id: String,
    /// The node that last ran this VM; adoption keys off it.
    pub last_node: String,
    pub health: VmHealth,
    #[serde(default)]
    pub ebs_optimized: bool,
    /// RFC 3339 launch timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launch_time: Option<String>,

    // Node-local; never persisted.
    #[serde(skip)]
    pub pid: Option<u32>,
    #[serde(skip)]
    pub running: bool,
    #[serde(skip)]
    pub metadata_server_address: Option<String>,
}

impl VirtualMachine {
    /// Move through the state machine.
    ///
    /// The whitelist is the only authority; a rejected transition is a
    /// logged invariant violation and leaves the record untouched.
    pub fn transition(&mut self, to: InstanceState) -> Result<InstanceState, DaemonError> {
        let from = self.status;
        if !is_valid_transition(from, to) {
            error!(
                instance_id = %self.instance_id,
                %from,
                %to,
                "invariant violation: transition rejected"
            );
            return Err(DaemonError::InvalidTransition {
                instance_id: self.instance_id.clone(),
                from,
                to,
            });
        }
        self.status = to;
        Ok(from)
    }

    /// Clear everything tied to this node so another daemon can adopt.
    pub fn reset_node_local_state(&mut self) {
        self.pid = None;
        self.running = false;
        self.metadata_server_address = None;
        for request in &mut self.ebs_requests {
            request.nbd_uri = None;
        }
    }

    /// The boot volume's ID. The launch pipeline guarantees exactly one
    /// boot entry at index 0.
    pub fn root_volume_id(&self) -> Option<&str> {
        self.ebs_requests
            .iter()
            .find(|r| r.boot)
            .map(|r| r.volume_id.as_str())
    }

    /// The EC2 view of this VM.
    pub fn instance_record(&self, az: &str) -> hive_core::ec2::Instance {
        hive_core::ec2::Instance {
            instance_id: self.instance_id.clone(),
            image_id: self.launch_input.image_id.clone(),
            instance_type: self.instance_type.clone(),
            state: self.status.into(),
            key_name: self.launch_input.key_name.clone(),
            private_ip_address: None,
            launch_time: self.launch_time.clone(),
            architecture: Some(self.config.architecture.as_str().to_string()),
            placement: Some(hive_core::ec2::Placement {
                availability_zone: az.to_string(),
            }),
            tags: Vec::new(),
        }
    }
}
