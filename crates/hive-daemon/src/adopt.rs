//! Adoption of shared VM records after a daemon restart.
//!
//! A daemon that comes back up re-reads the shared bucket and takes back
//! VMs it last ran: records still marked `running` lost their hypervisor
//! with the daemon, so they go through the crash path and relaunch;
//! records caught mid-stop are committed to `stopped` for any node to
//! adopt later.

use std::sync::Arc;

use tracing::{info, warn};

use hive_core::state::InstanceState;

use crate::launch::spawn_vm;
use crate::registry::VmHandle;
use crate::service::Daemon;
use crate::vm::VirtualMachine;

pub(crate) async fn adopt_vms(daemon: &Arc<Daemon>) {
    let keys = match daemon.kv.keys().await {
        Ok(keys) => keys,
        Err(e) => {
            warn!(error = %e, "listing shared vm records for adoption failed");
            return;
        }
    };

    for key in keys {
        let vm: VirtualMachine = match daemon.kv.get_json(&key).await {
            Ok(Some(vm)) => vm,
            Ok(None) => continue,
            Err(e) => {
                warn!(%key, error = %e, "reading shared vm record failed");
                continue;
            }
        };
        if vm.last_node != daemon.config.node_name {
            continue;
        }
        match vm.status {
            InstanceState::Running => adopt_running(daemon, vm).await,
            InstanceState::Stopping => commit_interrupted_stop(daemon, vm).await,
            _ => {}
        }
    }
}

/// The hypervisor died with the old daemon; relaunch through the crash
/// path so the restart budget still applies.
async fn adopt_running(daemon: &Arc<Daemon>, mut vm: VirtualMachine) {
    let instance_id = vm.instance_id.clone();
    info!(%instance_id, "adopting vm lost in daemon restart");

    vm.reset_node_local_state();
    vm.health.last_crash_reason = Some("daemon restart".to_string());
    if vm.transition(InstanceState::Error).is_err() {
        return;
    }
    if vm.transition(InstanceState::Pending).is_err() {
        return;
    }
    vm.health.restart_count += 1;

    let handle = VmHandle::new(vm);
    daemon.instances.insert(Arc::clone(&handle)).await;
    if let Err(e) = spawn_vm(daemon, &handle).await {
        warn!(%instance_id, error = %e, "adopted vm failed to relaunch");
        let mut vm = handle.vm.lock().await;
        let _ = vm.transition(InstanceState::Error);
        daemon.persist_vm(&vm).await;
    }
}

/// A stop was in flight when the daemon died; the process is gone, so the
/// stop is complete. Commit it so the record becomes adoptable.
async fn commit_interrupted_stop(daemon: &Arc<Daemon>, mut vm: VirtualMachine) {
    let instance_id = vm.instance_id.clone();
    info!(%instance_id, "committing stop interrupted by daemon restart");
    if vm.transition(InstanceState::Stopped).is_err() {
        return;
    }
    vm.reset_node_local_state();
    daemon.persist_vm(&vm).await;
}
