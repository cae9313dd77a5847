//! Formation wire types and credential minting.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use hive_core::config::Service;

use crate::ca::CertKeyPair;

/// A registering node's self-description.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct NodeInfo {
    pub name: String,
    pub bind_ip: String,
    /// Separate backbone address, when the cluster mesh runs on its own
    /// network.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_ip: Option<String>,
    pub region: String,
    pub az: String,
    pub port: u16,
    /// Empty = the node runs every service.
    #[serde(default)]
    pub services: Vec<Service>,
}

impl NodeInfo {
    /// The addresses this node is reachable on: bind address first, the
    /// backbone address after it when one was registered.
    pub fn addresses(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.bind_ip.as_str()).chain(self.cluster_ip.as_deref())
    }
}

/// Cluster-wide secrets minted once by the seed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
    pub account_id: String,
    pub nats_token: String,
    pub cluster_name: String,
    pub region: String,
}

/// Reply to `POST /formation/join`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct JoinResponse {
    pub success: bool,
    pub message: String,
    pub joined: usize,
    pub expected: usize,
}

/// Reply to `GET /formation/status`. Credential fields appear only once
/// formation is complete.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StatusResponse {
    pub complete: bool,
    pub joined: usize,
    pub expected: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<BTreeMap<String, NodeInfo>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
    #[serde(rename = "CACert", default, skip_serializing_if = "Option::is_none")]
    pub ca_cert: Option<String>,
    #[serde(rename = "CAKey", default, skip_serializing_if = "Option::is_none")]
    pub ca_key: Option<String>,
    /// Per-node server certificates signed by the cluster CA.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_certs: Option<BTreeMap<String, CertKeyPair>>,
}

const ACCESS_KEY_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";
const SECRET_ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

fn random_bytes(len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    getrandom::getrandom(&mut buf).expect("host entropy source failed; cannot mint credentials");
    buf
}

fn random_string(alphabet: &[u8], len: usize) -> String {
    random_bytes(len)
        .into_iter()
        .map(|b| alphabet[b as usize % alphabet.len()] as char)
        .collect()
}

/// Mint the cluster's shared credentials.
pub fn generate_credentials(cluster_name: &str, region: &str) -> Credentials {
    let account_id: String = random_bytes(12)
        .into_iter()
        .map(|b| char::from(b'0' + b % 10))
        .collect();
    Credentials {
        access_key: format!("AKIA{}", random_string(ACCESS_KEY_ALPHABET, 16)),
        secret_key: random_string(SECRET_ALPHABET, 40),
        account_id,
        nats_token: hex::encode(random_bytes(16)),
        cluster_name: cluster_name.to_string(),
        region: region.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_shapes() {
        let creds = generate_credentials("hive", "ap-southeast-2");
        assert_eq!(creds.access_key.len(), 20);
        assert!(creds.access_key.starts_with("AKIA"));
        assert_eq!(creds.secret_key.len(), 40);
        assert_eq!(creds.account_id.len(), 12);
        assert!(creds.account_id.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(creds.nats_token.len(), 32);
    }

    #[test]
    fn credentials_are_random() {
        let a = generate_credentials("hive", "r");
        let b = generate_credentials("hive", "r");
        assert_ne!(a.secret_key, b.secret_key);
        assert_ne!(a.nats_token, b.nats_token);
    }

    #[test]
    fn status_uses_contract_field_names() {
        let status = StatusResponse {
            complete: true,
            joined: 3,
            expected: 3,
            nodes: None,
            credentials: None,
            ca_cert: Some("PEM".to_string()),
            ca_key: Some("PEM".to_string()),
            node_certs: None,
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["Complete"], true);
        assert_eq!(json["CACert"], "PEM");
        assert_eq!(json["CAKey"], "PEM");
    }

    #[test]
    fn incomplete_status_omits_secrets() {
        let status = StatusResponse {
            complete: false,
            joined: 1,
            expected: 3,
            nodes: None,
            credentials: None,
            ca_cert: None,
            ca_key: None,
            node_certs: None,
        };
        let json = serde_json::to_string(&status).unwrap();
        assert!(!json.contains("CACert"));
        assert!(!json.contains("Credentials"));
    }
}
