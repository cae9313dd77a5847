//! Formation errors.

use thiserror::Error;

pub type FormationResult<T> = Result<T, FormationError>;

#[derive(Debug, Error)]
pub enum FormationError {
    #[error("node name {0:?} already registered")]
    DuplicateName(String),

    #[error("bind address {0:?} already registered")]
    DuplicateBindIp(String),

    #[error("node info invalid: {0}")]
    InvalidNode(String),

    #[error("formation incomplete after {timeout_secs}s: {joined} of {expected} nodes joined")]
    Timeout {
        timeout_secs: u64,
        joined: usize,
        expected: usize,
    },

    #[error("certificate generation: {0}")]
    Certificate(String),

    #[error("seed request to {url}: {detail}")]
    Seed { url: String, detail: String },
}
