//! The instance lifecycle state machine.
//!
//! `is_valid_transition` is the single authority on which status changes a
//! VM may make. `terminated` is terminal; self-transitions are never valid.

use serde::{Deserialize, Serialize};

/// Lifecycle states of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstanceState {
    Provisioning,
    Pending,
    Running,
    Stopping,
    Stopped,
    ShuttingDown,
    Terminated,
    Error,
}

impl InstanceState {
    pub const ALL: [InstanceState; 8] = [
        InstanceState::Provisioning,
        InstanceState::Pending,
        InstanceState::Running,
        InstanceState::Stopping,
        InstanceState::Stopped,
        InstanceState::ShuttingDown,
        InstanceState::Terminated,
        InstanceState::Error,
    ];

    /// The wire string, matching the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceState::Provisioning => "provisioning",
            InstanceState::Pending => "pending",
            InstanceState::Running => "running",
            InstanceState::Stopping => "stopping",
            InstanceState::Stopped => "stopped",
            InstanceState::ShuttingDown => "shutting-down",
            InstanceState::Terminated => "terminated",
            InstanceState::Error => "error",
        }
    }
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The EC2 numeric code and display name for a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ec2StateCode {
    pub code: i32,
    pub name: &'static str,
}

/// The fixed EC2 code/name mapping. Total over all states.
pub fn ec2_state_code(state: InstanceState) -> Ec2StateCode {
    match state {
        InstanceState::Provisioning | InstanceState::Pending => Ec2StateCode {
            code: 0,
            name: "pending",
        },
        InstanceState::Running => Ec2StateCode {
            code: 16,
            name: "running",
        },
        InstanceState::Stopping => Ec2StateCode {
            code: 64,
            name: "stopping",
        },
        InstanceState::Stopped => Ec2StateCode {
            code: 80,
            name: "stopped",
        },
        InstanceState::ShuttingDown => Ec2StateCode {
            code: 32,
            name: "shutting-down",
        },
        InstanceState::Terminated => Ec2StateCode {
            code: 48,
            name: "terminated",
        },
        InstanceState::Error => Ec2StateCode {
            code: 0,
            name: "error",
        },
    }
}

/// The transition whitelist.
///
/// `terminated` admits no outgoing transitions; every state may fail into
/// `error` except `error` and `terminated` themselves; `error` may recover
/// toward `pending`/`running` or be torn down via `shutting-down`.
pub fn is_valid_transition(from: InstanceState, to: InstanceState) -> bool {
    use InstanceState::*;
    match (from, to) {
        (Provisioning, Running | ShuttingDown | Error) => true,
        (Pending, Running | ShuttingDown | Error) => true,
        (Running, Stopping | ShuttingDown | Error) => true,
        (Stopping, Stopped | ShuttingDown | Error) => true,
        (Stopped, Running | ShuttingDown | Error) => true,
        (ShuttingDown, Terminated | Error) => true,
        (Error, Pending | Running | ShuttingDown) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use InstanceState::*;

    #[test]
    fn code_mapping_is_total_and_named() {
        for state in InstanceState::ALL {
            let code = ec2_state_code(state);
            assert!(!code.name.is_empty(), "{state}");
        }
    }

    #[test]
    fn code_values_match_ec2() {
        assert_eq!(ec2_state_code(Provisioning).code, 0);
        assert_eq!(ec2_state_code(Pending).code, 0);
        assert_eq!(ec2_state_code(Running).code, 16);
        assert_eq!(ec2_state_code(ShuttingDown).code, 32);
        assert_eq!(ec2_state_code(Terminated).code, 48);
        assert_eq!(ec2_state_code(Stopping).code, 64);
        assert_eq!(ec2_state_code(Stopped).code, 80);
        assert_eq!(ec2_state_code(Error).code, 0);
        assert_eq!(ec2_state_code(Error).name, "error");
    }

    #[test]
    fn terminated_is_terminal() {
        for to in InstanceState::ALL {
            assert!(!is_valid_transition(Terminated, to), "terminated -> {to}");
        }
    }

    #[test]
    fn self_transitions_are_invalid() {
        for s in InstanceState::ALL {
            assert!(!is_valid_transition(s, s), "{s} -> {s}");
        }
    }

    #[test]
    fn whitelist_matches_table() {
        // Each row: (from, [allowed targets]).
        let table: &[(InstanceState, &[InstanceState])] = &[
            (Provisioning, &[Running, ShuttingDown, Error]),
            (Pending, &[Running, ShuttingDown, Error]),
            (Running, &[Stopping, ShuttingDown, Error]),
            (Stopping, &[Stopped, ShuttingDown, Error]),
            (Stopped, &[Running, ShuttingDown, Error]),
            (ShuttingDown, &[Terminated, Error]),
            (Error, &[Pending, Running, ShuttingDown]),
            (Terminated, &[]),
        ];
        for (from, allowed) in table {
            for to in InstanceState::ALL {
                assert_eq!(
                    is_valid_transition(*from, to),
                    allowed.contains(&to),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn wire_names_use_kebab_case() {
        let json = serde_json::to_string(&ShuttingDown).unwrap();
        assert_eq!(json, r#""shutting-down""#);
        let back: InstanceState = serde_json::from_str(r#""shutting-down""#).unwrap();
        assert_eq!(back, ShuttingDown);
    }
}
