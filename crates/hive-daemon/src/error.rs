//! Daemon errors.

use thiserror::Error;

use hive_core::state::InstanceState;

pub type DaemonResult<T> = Result<T, DaemonError>;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("instance {instance_id}: transition {from} -> {to} violates the state machine")]
    InvalidTransition {
        instance_id: String,
        from: InstanceState,
        to: InstanceState,
    },

    #[error("unknown instance {0}")]
    UnknownInstance(String),

    #[error("instance {instance_id} is {actual}; operation requires {required}")]
    WrongState {
        instance_id: String,
        actual: InstanceState,
        required: InstanceState,
    },

    #[error(transparent)]
    Broker(#[from] hive_broker::BrokerError),

    #[error(transparent)]
    Volume(#[from] hive_volumes::VolumeError),

    #[error(transparent)]
    Vmm(#[from] hive_vmm::VmmError),

    #[error("config: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
