//! Cluster formation.
//!
//! A single-shot bootstrap: the seed node mints cluster credentials and a
//! CA, serves a small HTTP API, and waits for the expected number of nodes
//! to register. Peers join, poll status, and once formation completes they
//! receive credentials, the CA, and the full node list, from which each
//! derives its local cluster configuration.

mod ca;
mod client;
mod derive;
mod error;
mod server;
mod types;

pub use ca::{CaAuthority, CertKeyPair};
pub use client::{join_with_retry, poll_until_complete};
pub use derive::derive_cluster_config;
pub use error::{FormationError, FormationResult};
pub use server::{FormationConfig, FormationServer, build_router};
pub use types::{Credentials, JoinResponse, NodeInfo, StatusResponse, generate_credentials};
