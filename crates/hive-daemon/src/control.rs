//! Control-command handlers: per-instance point subjects plus the queue
//! fallbacks for stopped instances.
//!
//! External mutations never poke VM state directly; each command is
//! translated into a state-machine transition under the per-VM lock, and
//! only then is the hypervisor told anything.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use tracing::{info, warn};

use hive_broker::subjects;
use hive_core::control::{ControlAck, ControlCommand};
use hive_core::ec2::{
    GetConsoleOutputOutput, ModifyInstanceAttributeInput, ModifyInstanceAttributeOutput,
};
use hive_core::error::generate_error_payload;
use hive_core::state::InstanceState;
use hive_core::{Ec2Error, Ec2ErrorCode};

use crate::handlers::Handler;
use crate::launch::spawn_vm;
use crate::registry::VmHandle;
use crate::service::Daemon;
use crate::vm::VirtualMachine;

/// Console tail returned by GetConsoleOutput.
const CONSOLE_TAIL_BYTES: u64 = 64 * 1024;

fn unknown_instance(instance_id: &str) -> Ec2Error {
    Ec2Error::new(
        Ec2ErrorCode::InvalidParameterValue,
        format!("instance {instance_id:?} is not known here"),
    )
}

fn encode<T: serde::Serialize>(value: &T) -> Vec<u8> {
    serde_json::to_vec(value)
        .unwrap_or_else(|e| generate_error_payload(&Ec2Error::internal(e.to_string())))
}

// ── Point subject: ec2.cmd.<id> ────────────────────────────────────

/// Owner-side control of one running VM.
pub(crate) struct CmdHandler {
    pub daemon: Arc<Daemon>,
    pub instance_id: String,
}

#[async_trait]
impl Handler for CmdHandler {
    fn topic(&self) -> String {
        subjects::cmd(&self.instance_id)
    }

    async fn process(&self, payload: Bytes) -> Option<Vec<u8>> {
        let command: ControlCommand = match serde_json::from_slice(&payload) {
            Ok(command) => command,
            Err(e) => {
                return Some(generate_error_payload(&Ec2Error::new(
                    Ec2ErrorCode::ValidationError,
                    format!("malformed control command: {e}"),
                )));
            }
        };
        match handle_command(&self.daemon, &self.instance_id, command).await {
            Ok(ack) => Some(encode(&ack)),
            Err(err) => Some(generate_error_payload(&err)),
        }
    }
}

async fn handle_command(
    daemon: &Arc<Daemon>,
    instance_id: &str,
    command: ControlCommand,
) -> Result<ControlAck, Ec2Error> {
    let handle = daemon
        .instances
        .get(instance_id)
        .await
        .ok_or_else(|| unknown_instance(instance_id))?;

    match command.execute.as_str() {
        "system_powerdown" => powerdown(daemon, &handle, instance_id, command).await,
        // A start aimed at a VM that is already owned and running.
        "cont" => {
            let vm = handle.vm.lock().await;
            Ok(ControlAck {
                instance_id: instance_id.to_string(),
                current_state: vm.status.as_str().to_string(),
                previous_state: vm.status.as_str().to_string(),
            })
        }
        "query-status" => {
            let state = handle.vm.lock().await.status;
            Ok(ControlAck {
                instance_id: instance_id.to_string(),
                current_state: state.as_str().to_string(),
                previous_state: state.as_str().to_string(),
            })
        }
        other => Err(Ec2Error::new(
            Ec2ErrorCode::InvalidParameterValue,
            format!("unsupported control command {other:?}"),
        )),
    }
}

/// Stop or terminate, depending on the intent attributes.
async fn powerdown(
    daemon: &Arc<Daemon>,
    handle: &Arc<VmHandle>,
    instance_id: &str,
    command: ControlCommand,
) -> Result<ControlAck, Ec2Error> {
    let target = if command.attributes.terminate_instance {
        InstanceState::ShuttingDown
    } else {
        InstanceState::Stopping
    };

    let (previous, current) = {
        let mut vm = handle.vm.lock().await;
        vm.attributes = command.attributes;
        let previous = vm
            .transition(target)
            .map_err(|e| Ec2Error::new(Ec2ErrorCode::InvalidParameterValue, e.to_string()))?;
        daemon.persist_vm(&vm).await;
        (previous, vm.status)
    };

    // ACPI powerdown; the exit watcher completes the transition when the
    // process goes away.
    let mut monitor = handle.monitor.lock().await;
    match monitor.as_mut() {
        Some(qmp) => {
            if let Err(e) = qmp.system_powerdown().await {
                warn!(%instance_id, error = %e, "qmp powerdown failed; guest may need a kill");
            }
        }
        None => warn!(%instance_id, "no monitor connection; waiting on process exit"),
    }

    info!(%instance_id, %previous, current = %current, "powerdown dispatched");
    Ok(ControlAck {
        instance_id: instance_id.to_string(),
        current_state: current.as_str().to_string(),
        previous_state: previous.as_str().to_string(),
    })
}

// ── Point subject: ec2.<id>.GetConsoleOutput ───────────────────────

/// Serves the serial-console capture for one VM.
pub(crate) struct ConsoleHandler {
    pub daemon: Arc<Daemon>,
    pub instance_id: String,
}

#[async_trait]
impl Handler for ConsoleHandler {
    fn topic(&self) -> String {
        subjects::console_output(&self.instance_id)
    }

    async fn process(&self, _payload: Bytes) -> Option<Vec<u8>> {
        let path = self.daemon.paths.console_log(&self.instance_id);
        let output = match read_tail(&path, CONSOLE_TAIL_BYTES).await {
            Ok(bytes) => Some(base64::engine::general_purpose::STANDARD.encode(bytes)),
            Err(e) => {
                warn!(instance_id = %self.instance_id, error = %e, "console log unreadable");
                None
            }
        };
        Some(encode(&GetConsoleOutputOutput {
            instance_id: self.instance_id.clone(),
            output,
            timestamp: Some(chrono::Utc::now().to_rfc3339()),
        }))
    }
}

/// Last `limit` bytes of a file.
async fn read_tail(path: &std::path::Path, limit: u64) -> std::io::Result<Vec<u8>> {
    use tokio::io::{AsyncReadExt, AsyncSeekExt};
    let mut file = tokio::fs::File::open(path).await?;
    let len = file.metadata().await?.len();
    if len > limit {
        file.seek(std::io::SeekFrom::Start(len - limit)).await?;
    }
    let mut buf = Vec::new();
    file.read_to_end(&mut buf).await?;
    Ok(buf)
}

// ── Queue: ec2.start ───────────────────────────────────────────────

/// Adopts and relaunches a stopped instance.
pub(crate) struct StartHandler {
    pub daemon: Arc<Daemon>,
}

#[async_trait]
impl Handler for StartHandler {
    fn topic(&self) -> String {
        subjects::START.to_string()
    }

    fn queue(&self) -> Option<&str> {
        Some(subjects::QUEUE_GROUP)
    }

    async fn process(&self, payload: Bytes) -> Option<Vec<u8>> {
        let command: ControlCommand = match serde_json::from_slice(&payload) {
            Ok(command) => command,
            Err(e) => {
                return Some(generate_error_payload(&Ec2Error::new(
                    Ec2ErrorCode::ValidationError,
                    format!("malformed start command: {e}"),
                )));
            }
        };
        let Some(instance_id) = command.instance_id.clone() else {
            return Some(generate_error_payload(&Ec2Error::new(
                Ec2ErrorCode::MissingParameter,
                "start command without an instance id",
            )));
        };
        match start_stopped(&self.daemon, &instance_id).await {
            Ok(ack) => Some(encode(&ack)),
            Err(err) => Some(generate_error_payload(&err)),
        }
    }
}

async fn start_stopped(daemon: &Arc<Daemon>, instance_id: &str) -> Result<ControlAck, Ec2Error> {
    // Already owned here and running: nothing to do.
    if let Some(handle) = daemon.instances.get(instance_id).await {
        let vm = handle.vm.lock().await;
        return Ok(ControlAck {
            instance_id: instance_id.to_string(),
            current_state: vm.status.as_str().to_string(),
            previous_state: vm.status.as_str().to_string(),
        });
    }

    let mut vm: VirtualMachine = daemon
        .kv
        .get_json(instance_id)
        .await
        .map_err(|e| Ec2Error::internal(e.to_string()))?
        .ok_or_else(|| unknown_instance(instance_id))?;

    if vm.status != InstanceState::Stopped {
        return Err(Ec2Error::new(
            Ec2ErrorCode::InvalidParameterValue,
            format!("instance {instance_id} is {}; start requires stopped", vm.status),
        ));
    }

    // Adopt: the record may have last run anywhere.
    let previous_node = std::mem::replace(&mut vm.last_node, daemon.config.node_name.clone());
    vm.reset_node_local_state();
    vm.attributes = Default::default();

    let handle = VmHandle::new(vm);
    daemon.instances.insert(Arc::clone(&handle)).await;

    if let Err(e) = spawn_vm(daemon, &handle).await {
        daemon.instances.remove(instance_id).await;
        return Err(Ec2Error::internal(e.to_string()));
    }

    let current = handle.vm.lock().await.status;
    info!(%instance_id, %previous_node, "stopped instance adopted and started");
    Ok(ControlAck {
        instance_id: instance_id.to_string(),
        current_state: current.as_str().to_string(),
        previous_state: InstanceState::Stopped.as_str().to_string(),
    })
}

// ── Queue: ec2.terminate ───────────────────────────────────────────

/// Terminates a stopped instance whose owner may be gone.
pub(crate) struct TerminateHandler {
    pub daemon: Arc<Daemon>,
}

#[async_trait]
impl Handler for TerminateHandler {
    fn topic(&self) -> String {
        subjects::TERMINATE.to_string()
    }

    fn queue(&self) -> Option<&str> {
        Some(subjects::QUEUE_GROUP)
    }

    async fn process(&self, payload: Bytes) -> Option<Vec<u8>> {
        let command: ControlCommand = match serde_json::from_slice(&payload) {
            Ok(command) => command,
            Err(e) => {
                return Some(generate_error_payload(&Ec2Error::new(
                    Ec2ErrorCode::ValidationError,
                    format!("malformed terminate command: {e}"),
                )));
            }
        };
        let Some(instance_id) = command.instance_id.clone() else {
            return Some(generate_error_payload(&Ec2Error::new(
                Ec2ErrorCode::MissingParameter,
                "terminate command without an instance id",
            )));
        };
        match terminate_stopped(&self.daemon, &instance_id).await {
            Ok(ack) => Some(encode(&ack)),
            Err(err) => Some(generate_error_payload(&err)),
        }
    }
}

async fn terminate_stopped(
    daemon: &Arc<Daemon>,
    instance_id: &str,
) -> Result<ControlAck, Ec2Error> {
    let vm: VirtualMachine = daemon
        .kv
        .get_json(instance_id)
        .await
        .map_err(|e| Ec2Error::internal(e.to_string()))?
        .ok_or_else(|| unknown_instance(instance_id))?;

    if vm.status != InstanceState::Stopped {
        return Err(Ec2Error::new(
            Ec2ErrorCode::InvalidParameterValue,
            format!(
                "instance {instance_id} is {}; queue terminate requires stopped",
                vm.status
            ),
        ));
    }

    crate::monitor::delete_terminated_volumes(daemon, &vm).await;
    daemon.erase_vm(instance_id).await;

    info!(%instance_id, "stopped instance terminated via queue");
    Ok(ControlAck {
        instance_id: instance_id.to_string(),
        current_state: InstanceState::ShuttingDown.as_str().to_string(),
        previous_state: InstanceState::Stopped.as_str().to_string(),
    })
}

// ── Queue: ec2.ModifyInstanceAttribute ─────────────────────────────

/// Applies attribute changes to stopped instances.
pub(crate) struct ModifyHandler {
    pub daemon: Arc<Daemon>,
}

#[async_trait]
impl Handler for ModifyHandler {
    fn topic(&self) -> String {
        subjects::MODIFY_INSTANCE_ATTRIBUTE.to_string()
    }

    fn queue(&self) -> Option<&str> {
        Some(subjects::QUEUE_GROUP)
    }

    async fn process(&self, payload: Bytes) -> Option<Vec<u8>> {
        let input: ModifyInstanceAttributeInput = match serde_json::from_slice(&payload) {
            Ok(input) => input,
            Err(e) => {
                return Some(generate_error_payload(&Ec2Error::new(
                    Ec2ErrorCode::ValidationError,
                    format!("malformed modify request: {e}"),
                )));
            }
        };
        match modify_attribute(&self.daemon, &input).await {
            Ok(output) => Some(encode(&output)),
            Err(err) => Some(generate_error_payload(&err)),
        }
    }
}

async fn modify_attribute(
    daemon: &Arc<Daemon>,
    input: &ModifyInstanceAttributeInput,
) -> Result<ModifyInstanceAttributeOutput, Ec2Error> {
    let instance_id = &input.instance_id;
    let mut vm: VirtualMachine = daemon
        .kv
        .get_json(instance_id)
        .await
        .map_err(|e| Ec2Error::internal(e.to_string()))?
        .ok_or_else(|| unknown_instance(instance_id))?;

    // Attribute changes only apply to stopped instances.
    if vm.status != InstanceState::Stopped {
        return Err(Ec2Error::new(
            Ec2ErrorCode::InvalidInstanceAttributeValue,
            format!("instance {instance_id} is {}; attributes can only change while stopped", vm.status),
        ));
    }

    if let Some(instance_type) = &input.instance_type {
        if instance_type.value.is_empty() {
            return Err(Ec2Error::new(
                Ec2ErrorCode::InvalidInstanceAttributeValue,
                "InstanceType value must not be empty",
            ));
        }
        vm.instance_type = instance_type.value.clone();
        vm.launch_input.instance_type = instance_type.value.clone();
    }
    if let Some(user_data) = &input.user_data {
        vm.launch_input.user_data = Some(user_data.value.clone());
    }
    if let Some(ebs_optimized) = &input.ebs_optimized {
        vm.ebs_optimized = ebs_optimized.value;
    }

    daemon.persist_vm(&vm).await;
    info!(%instance_id, "instance attributes updated");
    Ok(ModifyInstanceAttributeOutput { r#return: true })
}
