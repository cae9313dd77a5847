//! The control-command envelope sent on per-instance subjects.
//!
//! Stop/terminate/start are delivered to the owning daemon as a
//! QMP-compatible command (`execute`) plus intent attributes telling the
//! daemon what the user wants to happen after the hypervisor exits.

use serde::{Deserialize, Serialize};

/// User-intent flags carried alongside a control command.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub struct CommandAttributes {
    /// The user asked for a stop; the VM record survives for later adoption.
    #[serde(default)]
    pub stop_instance: bool,
    /// The user asked for termination; volumes flagged delete-on-termination
    /// are destroyed and the record is erased.
    #[serde(default)]
    pub terminate_instance: bool,
    /// The user asked a stopped instance to start again.
    #[serde(default)]
    pub start_instance: bool,
}

/// A control command for one instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ControlCommand {
    /// QMP command name (`system_powerdown`, `quit`, `query-status`, …).
    pub execute: String,
    #[serde(default)]
    pub attributes: CommandAttributes,
    /// Target instance, for queued subjects where the subject name does not
    /// already carry it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
}

impl ControlCommand {
    pub fn stop(instance_id: &str) -> Self {
        Self {
            execute: "system_powerdown".to_string(),
            attributes: CommandAttributes {
                stop_instance: false,
                terminate_instance: false,
                start_instance: false,
            },
            instance_id: Some(instance_id.to_string()),
        }
    }

    pub fn terminate(instance_id: &str) -> Self {
        Self {
            execute: "system_powerdown".to_string(),
            attributes: CommandAttributes {
                stop_instance: true,
                terminate_instance: true,
                start_instance: false,
            },
            instance_id: Some(instance_id.to_string()),
        }
    }

    pub fn start(instance_id: &str) -> Self {
        Self {
            execute: "cont".to_string(),
            attributes: CommandAttributes {
                stop_instance: false,
                terminate_instance: false,
                start_instance: true,
            },
            instance_id: Some(instance_id.to_string()),
        }
    }
}

/// Acknowledgement for a control command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct ControlAck {
    pub instance_id: String,
    /// The state the daemon committed as a result of the command.
    pub current_state: String,
    pub previous_state: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_keeps_record() {
        let cmd = ControlCommand::stop("i-abc");
        assert_eq!(cmd.execute, "system_powerdown");
        assert!(!cmd.attributes.stop_instance);
        assert!(!cmd.attributes.terminate_instance);
    }

    #[test]
    fn terminate_sets_both_flags() {
        let cmd = ControlCommand::terminate("i-abc");
        assert!(cmd.attributes.stop_instance);
        assert!(cmd.attributes.terminate_instance);
    }

    #[test]
    fn round_trip() {
        let cmd = ControlCommand::start("i-abc");
        let bytes = serde_json::to_vec(&cmd).unwrap();
        let back: ControlCommand = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, cmd);
        assert_eq!(back.instance_id.as_deref(), Some("i-abc"));
    }
}
