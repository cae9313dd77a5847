//! End-to-end formation over real HTTP: a seed server on a loopback port,
//! peers joining and polling through the client, derived configs at the
//! end.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hive_formation::{
    FormationConfig, FormationServer, NodeInfo, build_router, derive_cluster_config,
    join_with_retry, poll_until_complete,
};

fn node(name: &str, ip: &str) -> NodeInfo {
    NodeInfo {
        name: name.to_string(),
        bind_ip: ip.to_string(),
        cluster_ip: None,
        region: "ap-southeast-2".to_string(),
        az: "ap-southeast-2a".to_string(),
        port: 7000,
        services: vec![],
    }
}

async fn start_seed(expected: usize) -> (Arc<FormationServer>, SocketAddr, tokio::task::JoinHandle<()>) {
    let server = Arc::new(
        FormationServer::new(FormationConfig::new(expected, "test", "ap-southeast-2")).unwrap(),
    );
    let router = build_router(Arc::clone(&server));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    (server, addr, handle)
}

#[tokio::test]
async fn three_nodes_form_over_http() {
    let (server, addr, serve_handle) = start_seed(3).await;
    let seed = addr.to_string();

    // The seed registers itself in-process.
    server.join(node("node1", "10.0.0.1")).unwrap();

    // Peers join over the wire.
    for (name, ip) in [("node2", "10.0.0.2"), ("node3", "10.0.0.3")] {
        let response = join_with_retry(&seed, &node(name, ip), 5, Duration::from_millis(50))
            .await
            .unwrap();
        assert!(response.success);
        assert_eq!(response.expected, 3);
    }

    server
        .wait_for_completion(Duration::from_secs(5))
        .await
        .unwrap();

    // A peer polls until the payload is released.
    let status = poll_until_complete(&seed, Duration::from_millis(20), Duration::from_secs(5))
        .await
        .unwrap();
    assert!(status.complete);
    assert_eq!(status.joined, 3);

    let nodes = status.nodes.unwrap();
    assert_eq!(nodes.len(), 3);
    let credentials = status.credentials.unwrap();
    assert!(credentials.access_key.starts_with("AKIA"));
    assert!(status.ca_cert.unwrap().contains("BEGIN CERTIFICATE"));
    assert!(status.ca_key.unwrap().contains("BEGIN PRIVATE KEY"));
    assert_eq!(status.node_certs.unwrap().len(), 3);

    // Every node derives the same broker mesh.
    let config = derive_cluster_config("node2", &nodes, &credentials, "/var/lib/hive");
    config.validate().unwrap();
    assert_eq!(
        config.broker_routes(),
        vec!["10.0.0.1:4248", "10.0.0.2:4248", "10.0.0.3:4248"]
    );
    assert_eq!(config.account_id, credentials.account_id);

    serve_handle.abort();
}

#[tokio::test]
async fn duplicate_join_is_terminal_for_the_client() {
    let (_server, addr, serve_handle) = start_seed(3).await;
    let seed = addr.to_string();

    join_with_retry(&seed, &node("node2", "10.0.0.2"), 5, Duration::from_millis(50))
        .await
        .unwrap();

    // Same name again: a 409 must not be retried into oblivion.
    let err = join_with_retry(&seed, &node("node2", "10.0.0.9"), 5, Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("already registered"));

    serve_handle.abort();
}

#[tokio::test]
async fn status_withholds_payload_until_complete() {
    let (server, addr, serve_handle) = start_seed(2).await;
    server.join(node("node1", "10.0.0.1")).unwrap();

    let url = format!("http://{addr}/formation/status");
    let body: serde_json::Value = reqwest::get(&url).await.unwrap().json().await.unwrap();
    assert_eq!(body["Complete"], false);
    assert_eq!(body["Joined"], 1);
    assert_eq!(body["Expected"], 2);
    assert!(body.get("Credentials").is_none());
    assert!(body.get("CACert").is_none());

    serve_handle.abort();
}

#[tokio::test]
async fn poll_times_out_when_formation_stalls() {
    let (server, addr, serve_handle) = start_seed(3).await;
    server.join(node("node1", "10.0.0.1")).unwrap();

    let err = poll_until_complete(
        &addr.to_string(),
        Duration::from_millis(20),
        Duration::from_millis(200),
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("incomplete"));

    serve_handle.abort();
}
