//! Volume-layer errors.

use thiserror::Error;

pub type VolumeResult<T> = Result<T, VolumeError>;

#[derive(Debug, Error)]
pub enum VolumeError {
    #[error("volume {0} not found")]
    NotFound(String),

    #[error("volume {0} already exists")]
    AlreadyExists(String),

    #[error("image {0} not found")]
    AmiNotFound(String),

    #[error("key pair {0} not found")]
    KeyPairNotFound(String),

    #[error("volume {volume_id}: {detail}")]
    Store { volume_id: String, detail: String },

    #[error("object {key}: {detail}")]
    Object { key: String, detail: String },

    #[error("nbd export for {volume_id}: {detail}")]
    Export { volume_id: String, detail: String },

    #[error("encode: {0}")]
    Encode(serde_json::Error),

    #[error("decode {key}: {source}")]
    Decode {
        key: String,
        source: serde_json::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
