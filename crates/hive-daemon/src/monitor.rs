//! Hypervisor exit handling: clean stops, terminations, and crash
//! recovery with a restart budget.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::process::Child;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use hive_core::control::CommandAttributes;
use hive_core::state::InstanceState;

use crate::launch::spawn_vm;
use crate::service::Daemon;
use crate::vm::VirtualMachine;

/// Crash auto-restart budget. A VM exceeding `max_restarts` crashes inside
/// `window_secs` is parked in `error`.
#[derive(Debug, Clone, Copy)]
pub struct RestartPolicy {
    pub max_restarts: u32,
    pub window_secs: u64,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_restarts: 3,
            window_secs: 600,
        }
    }
}

/// What a hypervisor exit means for the VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitAction {
    /// User asked for a stop; record survives for adoption.
    Stopped,
    /// User asked for termination; volumes and record go away.
    Terminated,
    /// Nobody asked for anything: the guest died.
    Crashed,
}

/// Classify an exit from the intent attributes and the status the VM held
/// when the process went away.
pub fn classify_exit(attributes: &CommandAttributes, status: InstanceState) -> ExitAction {
    if attributes.terminate_instance || status == InstanceState::ShuttingDown {
        ExitAction::Terminated
    } else if status == InstanceState::Stopping {
        ExitAction::Stopped
    } else if status == InstanceState::Running && !attributes.stop_instance {
        ExitAction::Crashed
    } else {
        ExitAction::Stopped
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Watch a hypervisor process and dispatch its exit.
pub(crate) fn watch_exit(daemon: Arc<Daemon>, instance_id: String, mut child: Child) -> JoinHandle<()> {
    tokio::spawn(async move {
        let reason = match child.wait().await {
            Ok(status) => status.to_string(),
            Err(e) => format!("wait failed: {e}"),
        };
        handle_exit(&daemon, &instance_id, reason).await;
    })
}

async fn handle_exit(daemon: &Arc<Daemon>, instance_id: &str, reason: String) {
    let Some(handle) = daemon.instances.get(instance_id).await else {
        // Already torn down (e.g. terminate raced the exit).
        return;
    };

    let action = {
        let mut vm = handle.vm.lock().await;
        vm.running = false;
        vm.pid = None;
        classify_exit(&vm.attributes, vm.status)
    };

    match action {
        ExitAction::Terminated => {
            info!(%instance_id, %reason, "hypervisor exited; completing termination");
            let vm = {
                let mut vm = handle.vm.lock().await;
                if vm.status == InstanceState::Running {
                    let _ = vm.transition(InstanceState::ShuttingDown);
                }
                if let Err(e) = vm.transition(InstanceState::Terminated) {
                    error!(%instance_id, error = %e, "termination transition rejected");
                }
                vm.clone()
            };
            daemon.stop_exports(&vm).await;
            delete_terminated_volumes(daemon, &vm).await;
            daemon.erase_vm(instance_id).await;
            daemon.instances.remove(instance_id).await;
            handle.release().await;
        }

        ExitAction::Stopped => {
            info!(%instance_id, %reason, "hypervisor exited; committing stop");
            let exports = handle.vm.lock().await.clone();
            daemon.stop_exports(&exports).await;
            {
                let mut vm = handle.vm.lock().await;
                if let Err(e) = vm.transition(InstanceState::Stopped) {
                    error!(%instance_id, error = %e, "stop transition rejected");
                }
                vm.reset_node_local_state();
                daemon.persist_vm(&vm).await;
            }
            // Release node-local ownership; any node may adopt from KV.
            daemon.instances.remove(instance_id).await;
            handle.release().await;
        }

        ExitAction::Crashed => {
            warn!(%instance_id, %reason, "hypervisor crashed");
            handle_crash(daemon, instance_id, &handle, reason).await;
        }
    }
}

async fn handle_crash(
    daemon: &Arc<Daemon>,
    instance_id: &str,
    handle: &Arc<crate::registry::VmHandle>,
    reason: String,
) {
    let policy = daemon.config.restart_policy;
    let now = epoch_secs();

    let over_budget = {
        let mut vm = handle.vm.lock().await;

        // A quiet spell closes the crash window and resets the budget.
        match vm.health.first_crash_time {
            Some(first) if now.saturating_sub(first) > policy.window_secs => {
                vm.health.crash_count = 0;
                vm.health.restart_count = 0;
                vm.health.first_crash_time = Some(now);
            }
            None => vm.health.first_crash_time = Some(now),
            _ => {}
        }
        vm.health.crash_count += 1;
        vm.health.last_crash_time = Some(now);
        vm.health.last_crash_reason = Some(reason);

        if let Err(e) = vm.transition(InstanceState::Error) {
            error!(%instance_id, error = %e, "crash transition rejected");
        }

        let over = vm.health.crash_count > policy.max_restarts;
        if !over {
            vm.health.restart_count += 1;
            let _ = vm.transition(InstanceState::Pending);
        }
        daemon.persist_vm(&vm).await;
        over
    };

    if over_budget {
        error!(
            %instance_id,
            max_restarts = policy.max_restarts,
            window_secs = policy.window_secs,
            "restart budget exhausted; parking in error"
        );
        let vm = handle.vm.lock().await.clone();
        daemon.stop_exports(&vm).await;
        handle.release().await;
        return;
    }

    info!(%instance_id, "restarting crashed guest");
    if let Err(e) = spawn_vm(daemon, handle).await {
        error!(%instance_id, error = %e, "crash restart failed");
        let mut vm = handle.vm.lock().await;
        let _ = vm.transition(InstanceState::Error);
        daemon.persist_vm(&vm).await;
    }
}

/// Drop the volumes a terminated VM owned (and their config blobs), honoring
/// delete-on-termination.
pub(crate) async fn delete_terminated_volumes(daemon: &Arc<Daemon>, vm: &VirtualMachine) {
    for request in &vm.ebs_requests {
        if !request.delete_on_termination {
            continue;
        }
        if let Err(e) = daemon.volumes.delete(&request.volume_id).await {
            warn!(volume_id = %request.volume_id, error = %e, "deleting volume failed");
        }
        let _ = daemon
            .objects
            .delete(&format!("{}/config.json", request.volume_id))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(stop: bool, terminate: bool) -> CommandAttributes {
        CommandAttributes {
            stop_instance: stop,
            terminate_instance: terminate,
            start_instance: false,
        }
    }

    #[test]
    fn user_stop_is_not_a_crash() {
        // Stop command moved the VM to stopping before the exit.
        assert_eq!(
            classify_exit(&attrs(false, false), InstanceState::Stopping),
            ExitAction::Stopped
        );
    }

    #[test]
    fn terminate_flag_wins() {
        assert_eq!(
            classify_exit(&attrs(true, true), InstanceState::ShuttingDown),
            ExitAction::Terminated
        );
        // Even if the status had not moved yet.
        assert_eq!(
            classify_exit(&attrs(true, true), InstanceState::Running),
            ExitAction::Terminated
        );
    }

    #[test]
    fn unexpected_exit_while_running_is_a_crash() {
        assert_eq!(
            classify_exit(&attrs(false, false), InstanceState::Running),
            ExitAction::Crashed
        );
    }

    #[test]
    fn stop_intent_while_running_is_not_a_crash() {
        // StopInstance=true means the user wanted it down.
        assert_eq!(
            classify_exit(&attrs(true, false), InstanceState::Running),
            ExitAction::Stopped
        );
    }

    #[test]
    fn default_policy() {
        let policy = RestartPolicy::default();
        assert_eq!(policy.max_restarts, 3);
        assert_eq!(policy.window_secs, 600);
    }
}
