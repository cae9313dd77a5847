//! Cluster configuration (hive.toml).
//!
//! Every node carries a `ClusterConfig` describing the whole cluster: which
//! services each node runs, how to reach the broker and the object store,
//! and where local data lives. The file is written once by formation and
//! re-committed with a bumped epoch on membership changes.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Services a node may run. An empty list means "all of them".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Service {
    Nats,
    Predastore,
    Viperblock,
    Daemon,
    Awsgw,
    Ui,
}

/// NATS connection details for one node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NatsConfig {
    pub host: String,
    #[serde(default = "default_nats_port")]
    pub port: u16,
    /// Cluster-route port for broker mesh formation.
    #[serde(default = "default_nats_cluster_port")]
    pub cluster_port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

fn default_nats_port() -> u16 {
    4222
}

fn default_nats_cluster_port() -> u16 {
    4248
}

impl NatsConfig {
    /// Client connection URL.
    pub fn url(&self) -> String {
        format!("nats://{}:{}", self.host, self.port)
    }

    /// Cluster-route address (`host:cluster_port`).
    pub fn route(&self) -> String {
        format!("{}:{}", self.host, self.cluster_port)
    }
}

/// S3-compatible object-store connection details.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObjectStoreConfig {
    pub host: String,
    #[serde(default = "default_store_port")]
    pub port: u16,
    pub bucket: String,
    pub region: String,
    #[serde(default)]
    pub access_key: String,
    #[serde(default)]
    pub secret_key: String,
}

fn default_store_port() -> u16 {
    8443
}

impl ObjectStoreConfig {
    pub fn endpoint(&self) -> String {
        format!("https://{}:{}", self.host, self.port)
    }
}

/// One node's entry in the cluster map.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeConfig {
    pub host: String,
    pub region: String,
    pub az: String,
    pub data_dir: String,
    /// Empty = the node runs every service.
    #[serde(default)]
    pub services: Vec<Service>,
    pub nats: NatsConfig,
    pub object_store: ObjectStoreConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wal_dir: Option<String>,
}

impl NodeConfig {
    /// Whether this node runs the given service (empty list = all).
    pub fn runs(&self, service: Service) -> bool {
        self.services.is_empty() || self.services.contains(&service)
    }
}

/// The whole-cluster configuration as seen from one node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterConfig {
    /// Monotonic; bumped on every committed change.
    pub epoch: u64,
    pub version: String,
    /// The node this file belongs to. Must appear in `nodes`.
    pub node_name: String,
    /// The cluster's account ID, minted during formation.
    #[serde(default)]
    pub account_id: String,
    #[serde(default)]
    pub nodes: BTreeMap<String, NodeConfig>,
}

/// Errors loading or validating a cluster config.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("write {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
    #[error("parse {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("encode: {0}")]
    Encode(#[from] toml::ser::Error),
    #[error("node {0:?} missing from its own cluster config")]
    OwnNodeMissing(String),
}

impl ClusterConfig {
    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<ClusterConfig, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: ClusterConfig =
            toml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the config as pretty TOML.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.display().to_string(),
            source,
        })
    }

    /// The invariant every config must hold: our own record is present.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.nodes.contains_key(&self.node_name) {
            return Err(ConfigError::OwnNodeMissing(self.node_name.clone()));
        }
        Ok(())
    }

    /// This node's own record.
    pub fn own_node(&self) -> &NodeConfig {
        &self.nodes[&self.node_name]
    }

    /// Broker cluster routes: `host:cluster_port` for every node running
    /// the broker, sorted by node name for determinism.
    pub fn broker_routes(&self) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|(_, n)| n.runs(Service::Nats))
            .map(|(_, n)| n.nats.route())
            .collect()
    }

    /// Object-store peers with 1-based IDs, in node-name order.
    pub fn storage_peers(&self) -> Vec<(u32, String)> {
        self.nodes
            .iter()
            .filter(|(_, n)| n.runs(Service::Predastore))
            .enumerate()
            .map(|(i, (_, n))| (i as u32 + 1, format!("{}:{}", n.host, n.object_store.port)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(host: &str, services: Vec<Service>) -> NodeConfig {
        NodeConfig {
            host: host.to_string(),
            region: "ap-southeast-2".to_string(),
            az: "ap-southeast-2a".to_string(),
            data_dir: "/var/lib/hive".to_string(),
            services,
            nats: NatsConfig {
                host: host.to_string(),
                port: 4222,
                cluster_port: 4248,
                token: Some("secret".to_string()),
            },
            object_store: ObjectStoreConfig {
                host: host.to_string(),
                port: 8443,
                bucket: "predastore".to_string(),
                region: "ap-southeast-2".to_string(),
                access_key: "AKIA0000000000000000".to_string(),
                secret_key: "secret".to_string(),
            },
            base_dir: None,
            wal_dir: None,
        }
    }

    fn three_node_config() -> ClusterConfig {
        let mut nodes = BTreeMap::new();
        nodes.insert("node1".to_string(), node("10.0.0.1", vec![]));
        nodes.insert("node2".to_string(), node("10.0.0.2", vec![Service::Nats, Service::Daemon]));
        nodes.insert("node3".to_string(), node("10.0.0.3", vec![Service::Daemon]));
        ClusterConfig {
            epoch: 1,
            version: "1".to_string(),
            node_name: "node1".to_string(),
            account_id: "123456789012".to_string(),
            nodes,
        }
    }

    #[test]
    fn round_trips_through_toml() {
        let config = three_node_config();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hive.toml");
        config.save(&path).unwrap();
        let back = ClusterConfig::load(&path).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn validate_requires_own_record() {
        let mut config = three_node_config();
        config.node_name = "node9".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::OwnNodeMissing(_))));
    }

    #[test]
    fn empty_services_means_all() {
        let config = three_node_config();
        assert!(config.nodes["node1"].runs(Service::Predastore));
        assert!(config.nodes["node2"].runs(Service::Nats));
        assert!(!config.nodes["node2"].runs(Service::Predastore));
    }

    #[test]
    fn broker_routes_sorted_and_filtered() {
        let config = three_node_config();
        // node3 does not run nats; node1 runs everything.
        assert_eq!(
            config.broker_routes(),
            vec!["10.0.0.1:4248".to_string(), "10.0.0.2:4248".to_string()]
        );
    }

    #[test]
    fn storage_peers_have_one_based_ids() {
        let config = three_node_config();
        // Only node1 (all services) runs predastore.
        assert_eq!(config.storage_peers(), vec![(1, "10.0.0.1:8443".to_string())]);
    }

    #[test]
    fn services_parse_lowercase() {
        let toml_str = r#"
epoch = 1
version = "1"
node_name = "n1"

[nodes.n1]
host = "10.0.0.1"
region = "us-east-1"
az = "us-east-1a"
data_dir = "/var/lib/hive"
services = ["nats", "daemon", "awsgw"]

[nodes.n1.nats]
host = "10.0.0.1"

[nodes.n1.object_store]
host = "10.0.0.1"
bucket = "predastore"
region = "us-east-1"
"#;
        let config: ClusterConfig = toml::from_str(toml_str).unwrap();
        assert!(config.nodes["n1"].runs(Service::Awsgw));
        assert_eq!(config.nodes["n1"].nats.port, 4222);
        assert_eq!(config.nodes["n1"].nats.cluster_port, 4248);
    }
}
