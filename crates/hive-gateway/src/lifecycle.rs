//! Per-instance lifecycle operations.
//!
//! Start/Stop/Terminate are batch calls that never fail wholesale: each ID
//! yields its own state-change record, and a per-ID transport failure is
//! recorded as "no change" while the rest of the batch proceeds.

use tracing::{info, warn};

use hive_broker::subjects;
use hive_core::Ec2Error;
use hive_core::control::{ControlAck, ControlCommand};
use hive_core::ec2::{
    GetConsoleOutputInput, GetConsoleOutputOutput, InstanceIdsInput, InstanceStateChange,
    ModifyInstanceAttributeInput, ModifyInstanceAttributeOutput, StateChangeOutput, WireState,
};
use hive_core::state::InstanceState;

use crate::validate::{
    validate_instance_id, validate_instance_ids, validate_modify_instance_attribute,
};
use crate::{
    CMD_TIMEOUT, CONSOLE_TIMEOUT, Gateway, MODIFY_TIMEOUT, START_FALLBACK_TIMEOUT,
    TERMINATE_FALLBACK_TIMEOUT, to_ec2_error,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LifecycleOp {
    Start,
    Stop,
    Terminate,
}

impl LifecycleOp {
    fn command(&self, instance_id: &str) -> ControlCommand {
        match self {
            LifecycleOp::Start => ControlCommand::start(instance_id),
            LifecycleOp::Stop => ControlCommand::stop(instance_id),
            LifecycleOp::Terminate => ControlCommand::terminate(instance_id),
        }
    }

    /// The state we assume the instance was in when nothing answered.
    fn assumed_state(&self) -> InstanceState {
        match self {
            LifecycleOp::Start => InstanceState::Stopped,
            LifecycleOp::Stop | LifecycleOp::Terminate => InstanceState::Running,
        }
    }
}

/// Turn a daemon-reported state name back into the wire shape.
fn wire_state(name: &str) -> WireState {
    for state in InstanceState::ALL {
        if state.as_str() == name {
            return WireState::from(state);
        }
    }
    WireState {
        code: 0,
        name: name.to_string(),
    }
}

fn ack_change(instance_id: &str, ack: &ControlAck) -> InstanceStateChange {
    InstanceStateChange {
        instance_id: instance_id.to_string(),
        current_state: wire_state(&ack.current_state),
        previous_state: wire_state(&ack.previous_state),
    }
}

fn no_change(instance_id: &str, state: InstanceState) -> InstanceStateChange {
    let state = WireState::from(state);
    InstanceStateChange {
        instance_id: instance_id.to_string(),
        current_state: state.clone(),
        previous_state: state,
    }
}

impl Gateway {
    pub async fn start_instances(
        &self,
        input: &InstanceIdsInput,
    ) -> Result<StateChangeOutput, Ec2Error> {
        self.batch_control(input, LifecycleOp::Start).await
    }

    pub async fn stop_instances(
        &self,
        input: &InstanceIdsInput,
    ) -> Result<StateChangeOutput, Ec2Error> {
        self.batch_control(input, LifecycleOp::Stop).await
    }

    pub async fn terminate_instances(
        &self,
        input: &InstanceIdsInput,
    ) -> Result<StateChangeOutput, Ec2Error> {
        self.batch_control(input, LifecycleOp::Terminate).await
    }

    async fn batch_control(
        &self,
        input: &InstanceIdsInput,
        op: LifecycleOp,
    ) -> Result<StateChangeOutput, Ec2Error> {
        validate_instance_ids(&input.instance_ids)?;

        let mut changes = Vec::with_capacity(input.instance_ids.len());
        for instance_id in &input.instance_ids {
            changes.push(self.control_one(instance_id, op).await);
        }
        Ok(StateChangeOutput {
            instance_state_changes: changes,
        })
    }

    /// Drive one instance; never fails the batch.
    async fn control_one(&self, instance_id: &str, op: LifecycleOp) -> InstanceStateChange {
        let command = op.command(instance_id);
        let subject = subjects::cmd(instance_id);

        match self
            .broker
            .request::<_, ControlAck>(&subject, &command, CMD_TIMEOUT)
            .await
        {
            Ok(ack) => {
                info!(%instance_id, current = %ack.current_state, "control command acknowledged");
                ack_change(instance_id, &ack)
            }
            Err(e) if e.is_no_responders() => match op {
                // The owner is gone; a queue worker can still do it.
                LifecycleOp::Terminate => self.terminate_stopped(instance_id, &command).await,
                LifecycleOp::Start => self.start_stopped(instance_id, &command).await,
                LifecycleOp::Stop => {
                    warn!(%instance_id, "no owner for stop; recording no change");
                    no_change(instance_id, op.assumed_state())
                }
            },
            Err(e) => {
                warn!(%instance_id, error = %e, "control command failed; recording no change");
                no_change(instance_id, op.assumed_state())
            }
        }
    }

    /// Terminate a stopped instance via the fallback queue.
    ///
    /// Success is recorded as stopped → shutting-down: the instance was not
    /// running anywhere, so that is the only transition the fallback can
    /// have made.
    async fn terminate_stopped(
        &self,
        instance_id: &str,
        command: &ControlCommand,
    ) -> InstanceStateChange {
        match self
            .broker
            .request::<_, ControlAck>(subjects::TERMINATE, command, TERMINATE_FALLBACK_TIMEOUT)
            .await
        {
            Ok(_ack) => {
                info!(%instance_id, "stopped instance terminated via fallback queue");
                InstanceStateChange {
                    instance_id: instance_id.to_string(),
                    previous_state: WireState::from(InstanceState::Stopped),
                    current_state: WireState::from(InstanceState::ShuttingDown),
                }
            }
            Err(e) => {
                warn!(%instance_id, error = %e, "terminate fallback failed; recording no change");
                no_change(instance_id, InstanceState::Stopped)
            }
        }
    }

    /// Start a stopped instance on whichever daemon picks it up.
    async fn start_stopped(
        &self,
        instance_id: &str,
        command: &ControlCommand,
    ) -> InstanceStateChange {
        match self
            .broker
            .request::<_, ControlAck>(subjects::START, command, START_FALLBACK_TIMEOUT)
            .await
        {
            Ok(ack) => {
                info!(%instance_id, current = %ack.current_state, "stopped instance adopted");
                ack_change(instance_id, &ack)
            }
            Err(e) => {
                warn!(%instance_id, error = %e, "start fallback failed; recording no change");
                no_change(instance_id, InstanceState::Stopped)
            }
        }
    }

    /// Console output: point request, tight deadline.
    pub async fn get_console_output(
        &self,
        input: &GetConsoleOutputInput,
    ) -> Result<GetConsoleOutputOutput, Ec2Error> {
        validate_instance_id(&input.instance_id)?;
        self.broker
            .request(
                &subjects::console_output(&input.instance_id),
                input,
                CONSOLE_TIMEOUT,
            )
            .await
            .map_err(to_ec2_error)
    }

    /// Attribute changes go to the queue; the owning daemon enforces that
    /// the instance is stopped.
    pub async fn modify_instance_attribute(
        &self,
        input: &ModifyInstanceAttributeInput,
    ) -> Result<ModifyInstanceAttributeOutput, Ec2Error> {
        validate_modify_instance_attribute(input)?;
        self.broker
            .request(subjects::MODIFY_INSTANCE_ATTRIBUTE, input, MODIFY_TIMEOUT)
            .await
            .map_err(to_ec2_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_state_parses_known_names() {
        let s = wire_state("shutting-down");
        assert_eq!(s.code, 32);
        assert_eq!(s.name, "shutting-down");
    }

    #[test]
    fn wire_state_passes_unknown_through() {
        let s = wire_state("warming-up");
        assert_eq!(s.code, 0);
        assert_eq!(s.name, "warming-up");
    }

    #[test]
    fn no_change_repeats_state() {
        let change = no_change("i-a", InstanceState::Stopped);
        assert_eq!(change.current_state, change.previous_state);
        assert_eq!(change.current_state.code, 80);
    }

    #[test]
    fn assumed_states_per_op() {
        assert_eq!(LifecycleOp::Start.assumed_state(), InstanceState::Stopped);
        assert_eq!(LifecycleOp::Stop.assumed_state(), InstanceState::Running);
        assert_eq!(
            LifecycleOp::Terminate.assumed_state(),
            InstanceState::Running
        );
    }

    #[test]
    fn commands_carry_intent() {
        let stop = LifecycleOp::Stop.command("i-a");
        assert!(!stop.attributes.terminate_instance);
        let term = LifecycleOp::Terminate.command("i-a");
        assert!(term.attributes.terminate_instance && term.attributes.stop_instance);
        let start = LifecycleOp::Start.command("i-a");
        assert!(start.attributes.start_instance);
    }
}
