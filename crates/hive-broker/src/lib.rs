//! The broker helper: every inter-component request in Hive goes through
//! here.
//!
//! Four primitives over NATS, matching how the rest of the system thinks
//! about the fabric:
//! - request/reply with an explicit deadline (and no-responders detection)
//! - queue-group subscription (worker pools)
//! - fan-out publish with an ephemeral reply inbox
//! - JetStream KV for shared records
//!
//! Error payloads are detected on every reply: a JSON object with a non-null
//! `Code` becomes a typed [`hive_core::Ec2Error`] instead of a decoded
//! success value.

mod client;
mod error;
mod kv;
pub mod subjects;

pub use client::Broker;
pub use error::{BrokerError, BrokerResult};
pub use kv::KvStore;
