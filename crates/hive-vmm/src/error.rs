//! Hypervisor-layer errors.

use thiserror::Error;

pub type VmmResult<T> = Result<T, VmmError>;

#[derive(Debug, Error)]
pub enum VmmError {
    #[error("no usable runtime directory: {0}")]
    RuntimeDir(String),

    #[error("pid file {path}: {detail}")]
    PidFile { path: String, detail: String },

    #[error("arm64 firmware missing at {0}")]
    FirmwareMissing(String),

    #[error("spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("monitor socket {path}: {source}")]
    Monitor {
        path: String,
        source: std::io::Error,
    },

    #[error("qmp handshake: {0}")]
    Handshake(String),

    #[error("qmp command {command}: {detail}")]
    Command { command: String, detail: String },

    #[error("qmp command {command} timed out")]
    CommandTimeout { command: String },

    #[error("machine spec: {0}")]
    Spec(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
