//! Broker helper errors.

use hive_core::Ec2Error;
use thiserror::Error;

pub type BrokerResult<T> = Result<T, BrokerError>;

/// Errors surfaced to broker callers.
///
/// `NoResponders` and `Timeout` are deliberately distinct: gateways pick a
/// different strategy for each (a vacant subject can be retried elsewhere, a
/// slow responder cannot).
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("connect to broker: {0}")]
    Connect(String),

    #[error("no responders on {subject}")]
    NoResponders { subject: String },

    #[error("request on {subject} timed out after {timeout_ms}ms")]
    Timeout { subject: String, timeout_ms: u64 },

    #[error("request on {subject}: {detail}")]
    Request { subject: String, detail: String },

    #[error("publish on {subject}: {detail}")]
    Publish { subject: String, detail: String },

    #[error("subscribe on {subject}: {detail}")]
    Subscribe { subject: String, detail: String },

    /// The responder returned an error payload.
    #[error(transparent)]
    Api(#[from] Ec2Error),

    #[error("encode request: {0}")]
    Encode(serde_json::Error),

    #[error("decode reply: {0}")]
    Decode(serde_json::Error),

    #[error("kv {bucket}: {detail}")]
    Kv { bucket: String, detail: String },
}

impl BrokerError {
    /// Whether the failure was a vacant subject rather than a slow one.
    pub fn is_no_responders(&self) -> bool {
        matches!(self, BrokerError::NoResponders { .. })
    }
}
