//! Derive a node's cluster configuration from the completed formation.

use std::collections::BTreeMap;

use hive_core::config::{ClusterConfig, NatsConfig, NodeConfig, ObjectStoreConfig};

use crate::types::{Credentials, NodeInfo};

/// Default object-store bucket name.
const BUCKET: &str = "predastore";

/// Build the `ClusterConfig` one node writes to disk after formation.
///
/// Broker routes and storage peers fall out of the node map: both are
/// derived in node-name order so every node computes the same lists.
pub fn derive_cluster_config(
    node_name: &str,
    nodes: &BTreeMap<String, NodeInfo>,
    credentials: &Credentials,
    data_dir: &str,
) -> ClusterConfig {
    let mut members = BTreeMap::new();
    for (name, info) in nodes {
        // The mesh prefers the backbone address when one was registered.
        let mesh_ip = info.cluster_ip.as_deref().unwrap_or(&info.bind_ip);
        members.insert(
            name.clone(),
            NodeConfig {
                host: info.bind_ip.clone(),
                region: info.region.clone(),
                az: info.az.clone(),
                data_dir: data_dir.to_string(),
                services: info.services.clone(),
                nats: NatsConfig {
                    host: mesh_ip.to_string(),
                    port: 4222,
                    cluster_port: 4248,
                    token: Some(credentials.nats_token.clone()),
                },
                object_store: ObjectStoreConfig {
                    host: info.bind_ip.clone(),
                    port: 8443,
                    bucket: BUCKET.to_string(),
                    region: credentials.region.clone(),
                    access_key: credentials.access_key.clone(),
                    secret_key: credentials.secret_key.clone(),
                },
                base_dir: None,
                wal_dir: None,
            },
        );
    }

    ClusterConfig {
        epoch: 1,
        version: "1".to_string(),
        node_name: node_name.to_string(),
        account_id: credentials.account_id.clone(),
        nodes: members,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::generate_credentials;
    use hive_core::config::Service;

    fn node(name: &str, ip: &str, services: Vec<Service>) -> (String, NodeInfo) {
        (
            name.to_string(),
            NodeInfo {
                name: name.to_string(),
                bind_ip: ip.to_string(),
                cluster_ip: None,
                region: "ap-southeast-2".to_string(),
                az: "ap-southeast-2a".to_string(),
                port: 8443,
                services,
            },
        )
    }

    #[test]
    fn derives_sorted_broker_routes() {
        let credentials = generate_credentials("hive", "ap-southeast-2");
        // Insertion order deliberately scrambled; BTreeMap sorts by name.
        let nodes: BTreeMap<_, _> = [
            node("node3", "10.0.0.3", vec![]),
            node("node1", "10.0.0.1", vec![]),
            node("node2", "10.0.0.2", vec![]),
        ]
        .into_iter()
        .collect();

        let config = derive_cluster_config("node2", &nodes, &credentials, "/var/lib/hive");
        config.validate().unwrap();
        assert_eq!(
            config.broker_routes(),
            vec!["10.0.0.1:4248", "10.0.0.2:4248", "10.0.0.3:4248"]
        );
    }

    #[test]
    fn storage_peers_one_based_in_name_order() {
        let credentials = generate_credentials("hive", "ap-southeast-2");
        let nodes: BTreeMap<_, _> = [
            node("b", "10.0.0.2", vec![Service::Predastore]),
            node("a", "10.0.0.1", vec![Service::Predastore]),
            node("c", "10.0.0.3", vec![Service::Daemon]),
        ]
        .into_iter()
        .collect();

        let config = derive_cluster_config("a", &nodes, &credentials, "/var/lib/hive");
        assert_eq!(
            config.storage_peers(),
            vec![(1, "10.0.0.1:8443".to_string()), (2, "10.0.0.2:8443".to_string())]
        );
    }

    #[test]
    fn cluster_ip_used_for_mesh_only() {
        let credentials = generate_credentials("hive", "ap-southeast-2");
        let (name, mut info) = node("node1", "10.0.0.1", vec![]);
        info.cluster_ip = Some("192.168.0.1".to_string());
        let nodes: BTreeMap<_, _> = [(name, info)].into_iter().collect();

        let config = derive_cluster_config("node1", &nodes, &credentials, "/var/lib/hive");
        let node1 = &config.nodes["node1"];
        assert_eq!(node1.nats.host, "192.168.0.1");
        assert_eq!(node1.host, "10.0.0.1");
        assert_eq!(node1.object_store.host, "10.0.0.1");
    }

    #[test]
    fn credentials_threaded_through() {
        let credentials = generate_credentials("hive", "us-east-1");
        let nodes: BTreeMap<_, _> = [node("node1", "10.0.0.1", vec![])].into_iter().collect();
        let config = derive_cluster_config("node1", &nodes, &credentials, "/data");
        let node1 = &config.nodes["node1"];
        assert_eq!(node1.nats.token.as_deref(), Some(credentials.nats_token.as_str()));
        assert_eq!(node1.object_store.access_key, credentials.access_key);
        assert_eq!(node1.object_store.region, "us-east-1");
        assert_eq!(node1.data_dir, "/data");
    }
}
