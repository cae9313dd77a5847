//! Core types shared by every Hive component.
//!
//! - Resource-ID minting and the prefix → kind mapping
//! - The stable EC2 error-code catalog and the JSON error-payload envelope
//! - The instance lifecycle state machine
//! - EC2 wire structures (requests, reservations, state changes, tags)
//! - Host CPU detection and the instance-type catalog derived from it
//! - The cluster configuration model (TOML on disk)

pub mod config;
pub mod control;
pub mod ec2;
pub mod error;
pub mod ids;
pub mod instance_types;
pub mod state;

pub use error::{Ec2Error, Ec2ErrorCode, ErrorPayload};
pub use ids::{ResourceKind, generate_resource_id};
pub use state::{Ec2StateCode, InstanceState};
