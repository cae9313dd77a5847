//! The seed node's formation server.
//!
//! Three endpoints, all safe under concurrent access:
//! - `POST /formation/join` — register a node (409 on duplicate name or
//!   bind address)
//! - `GET /formation/status` — progress; credentials, CA and node list are
//!   withheld until formation completes
//! - `GET /formation/health` — liveness
//!
//! The "done" signal fires exactly once, on the registration that brings
//! the joined count up to the expected count.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::ca::{CaAuthority, CertKeyPair};
use crate::error::{FormationError, FormationResult};
use crate::types::{Credentials, JoinResponse, NodeInfo, StatusResponse, generate_credentials};

/// Seed-node parameters.
#[derive(Debug, Clone)]
pub struct FormationConfig {
    /// Number of nodes (seed included) formation waits for.
    pub expected: usize,
    pub cluster_name: String,
    pub region: String,
    /// CA validity, in days.
    pub ca_lifetime_days: u32,
    /// Node-certificate validity, in days.
    pub node_cert_lifetime_days: u32,
}

impl FormationConfig {
    pub fn new(expected: usize, cluster_name: &str, region: &str) -> Self {
        Self {
            expected,
            cluster_name: cluster_name.to_string(),
            region: region.to_string(),
            ca_lifetime_days: 3650,
            node_cert_lifetime_days: 365,
        }
    }
}

struct Inner {
    nodes: BTreeMap<String, NodeInfo>,
    node_certs: BTreeMap<String, CertKeyPair>,
    done: bool,
}

/// Formation state, created once on the seed.
pub struct FormationServer {
    config: FormationConfig,
    credentials: Credentials,
    ca: CaAuthority,
    inner: RwLock<Inner>,
    done_tx: watch::Sender<bool>,
}

impl FormationServer {
    /// Mint credentials and the CA, ready to accept registrations.
    pub fn new(config: FormationConfig) -> FormationResult<FormationServer> {
        let credentials = generate_credentials(&config.cluster_name, &config.region);
        let ca = CaAuthority::mint(
            &config.cluster_name,
            config.ca_lifetime_days,
            config.node_cert_lifetime_days,
        )?;
        let (done_tx, _) = watch::channel(false);
        info!(
            expected = config.expected,
            cluster = %config.cluster_name,
            "formation server initialized"
        );
        Ok(FormationServer {
            config,
            credentials,
            ca,
            inner: RwLock::new(Inner {
                nodes: BTreeMap::new(),
                node_certs: BTreeMap::new(),
                done: false,
            }),
            done_tx,
        })
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Register one node. Fires the done signal exactly once when the
    /// expected count is reached.
    pub fn join(&self, node: NodeInfo) -> FormationResult<JoinResponse> {
        if node.name.is_empty() || node.bind_ip.is_empty() {
            return Err(FormationError::InvalidNode(
                "name and bind ip are required".to_string(),
            ));
        }

        // Sign outside the lock; cheap enough and keeps the section short.
        let cert = self.ca.issue_node_cert(&node)?;

        let mut inner = self.inner.write().unwrap();
        if inner.nodes.contains_key(&node.name) {
            return Err(FormationError::DuplicateName(node.name));
        }
        if inner.nodes.values().any(|n| n.bind_ip == node.bind_ip) {
            return Err(FormationError::DuplicateBindIp(node.bind_ip));
        }

        info!(name = %node.name, bind_ip = %node.bind_ip, "node registered");
        inner.node_certs.insert(node.name.clone(), cert);
        inner.nodes.insert(node.name.clone(), node);

        let joined = inner.nodes.len();
        if joined >= self.config.expected && !inner.done {
            inner.done = true;
            // Receivers may not exist yet; the flag above is authoritative.
            let _ = self.done_tx.send(true);
            info!(joined, "formation complete");
        }

        Ok(JoinResponse {
            success: true,
            message: format!("registered {joined} of {}", self.config.expected),
            joined,
            expected: self.config.expected,
        })
    }

    /// Current status; secrets released only after completion.
    pub fn status(&self) -> StatusResponse {
        let inner = self.inner.read().unwrap();
        if !inner.done {
            return StatusResponse {
                complete: false,
                joined: inner.nodes.len(),
                expected: self.config.expected,
                nodes: None,
                credentials: None,
                ca_cert: None,
                ca_key: None,
                node_certs: None,
            };
        }
        StatusResponse {
            complete: true,
            joined: inner.nodes.len(),
            expected: self.config.expected,
            nodes: Some(inner.nodes.clone()),
            credentials: Some(self.credentials.clone()),
            ca_cert: Some(self.ca.cert_pem().to_string()),
            ca_key: Some(self.ca.key_pem().to_string()),
            node_certs: Some(inner.node_certs.clone()),
        }
    }

    /// Block until all expected nodes have joined, or time out with a
    /// descriptive error.
    pub async fn wait_for_completion(&self, timeout: Duration) -> FormationResult<()> {
        let mut rx = self.done_tx.subscribe();
        if *rx.borrow() || self.inner.read().unwrap().done {
            return Ok(());
        }
        match tokio::time::timeout(timeout, rx.changed()).await {
            Ok(_) => Ok(()),
            Err(_) => {
                let joined = self.inner.read().unwrap().nodes.len();
                warn!(joined, expected = self.config.expected, "formation timed out");
                Err(FormationError::Timeout {
                    timeout_secs: timeout.as_secs(),
                    joined,
                    expected: self.config.expected,
                })
            }
        }
    }
}

/// Build the formation router.
pub fn build_router(server: Arc<FormationServer>) -> axum::Router {
    axum::Router::new()
        .route("/formation/join", post(handle_join))
        .route("/formation/status", get(handle_status))
        .route("/formation/health", get(|| async { "ok" }))
        .with_state(server)
}

async fn handle_join(
    State(server): State<Arc<FormationServer>>,
    Json(node): Json<NodeInfo>,
) -> impl IntoResponse {
    match server.join(node) {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err @ (FormationError::DuplicateName(_) | FormationError::DuplicateBindIp(_))) => {
            let inner_status = server.status();
            (
                StatusCode::CONFLICT,
                Json(JoinResponse {
                    success: false,
                    message: err.to_string(),
                    joined: inner_status.joined,
                    expected: inner_status.expected,
                }),
            )
                .into_response()
        }
        Err(err) => {
            let inner_status = server.status();
            (
                StatusCode::BAD_REQUEST,
                Json(JoinResponse {
                    success: false,
                    message: err.to_string(),
                    joined: inner_status.joined,
                    expected: inner_status.expected,
                }),
            )
                .into_response()
        }
    }
}

async fn handle_status(State(server): State<Arc<FormationServer>>) -> impl IntoResponse {
    Json(server.status())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hive_core::config::Service;

    fn server(expected: usize) -> FormationServer {
        FormationServer::new(FormationConfig::new(expected, "test", "ap-southeast-2")).unwrap()
    }

    fn node(name: &str, ip: &str) -> NodeInfo {
        NodeInfo {
            name: name.to_string(),
            bind_ip: ip.to_string(),
            cluster_ip: None,
            region: "ap-southeast-2".to_string(),
            az: "ap-southeast-2a".to_string(),
            port: 8443,
            services: vec![],
        }
    }

    #[test]
    fn three_of_three_flow() {
        let server = server(3);

        let r1 = server.join(node("node1", "10.0.0.1")).unwrap();
        assert_eq!(r1.joined, 1);
        assert!(!server.status().complete);
        // Secrets withheld before completion.
        assert!(server.status().credentials.is_none());
        assert!(server.status().ca_cert.is_none());

        server.join(node("node2", "10.0.0.2")).unwrap();
        let r3 = server.join(node("node3", "10.0.0.3")).unwrap();
        assert_eq!(r3.joined, 3);

        let status = server.status();
        assert!(status.complete);
        let nodes = status.nodes.unwrap();
        assert_eq!(nodes.len(), 3);
        let creds = status.credentials.unwrap();
        assert!(creds.access_key.starts_with("AKIA"));
        assert!(status.ca_cert.unwrap().contains("BEGIN CERTIFICATE"));
        assert!(status.ca_key.unwrap().contains("BEGIN PRIVATE KEY"));
        assert_eq!(status.node_certs.unwrap().len(), 3);
    }

    #[test]
    fn duplicate_name_rejected() {
        let server = server(3);
        server.join(node("node1", "10.0.0.1")).unwrap();
        let err = server.join(node("node1", "10.0.0.2")).unwrap_err();
        assert!(matches!(err, FormationError::DuplicateName(_)));
    }

    #[test]
    fn duplicate_bind_ip_rejected() {
        let server = server(3);
        server.join(node("node1", "10.0.0.1")).unwrap();
        let err = server.join(node("node2", "10.0.0.1")).unwrap_err();
        assert!(matches!(err, FormationError::DuplicateBindIp(_)));
    }

    #[tokio::test]
    async fn wait_for_completion_succeeds_once_joined() {
        let server = Arc::new(server(2));
        let waiter = Arc::clone(&server);
        let handle =
            tokio::spawn(async move { waiter.wait_for_completion(Duration::from_secs(5)).await });

        server.join(node("node1", "10.0.0.1")).unwrap();
        server.join(node("node2", "10.0.0.2")).unwrap();

        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn wait_for_completion_times_out_with_counts() {
        let server = server(3);
        server.join(node("node1", "10.0.0.1")).unwrap();
        let err = server
            .wait_for_completion(Duration::from_millis(50))
            .await
            .unwrap_err();
        match err {
            FormationError::Timeout {
                joined, expected, ..
            } => {
                assert_eq!(joined, 1);
                assert_eq!(expected, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn wait_after_completion_returns_immediately() {
        let server = server(1);
        server.join(node("node1", "10.0.0.1")).unwrap();
        server
            .wait_for_completion(Duration::from_millis(10))
            .await
            .unwrap();
    }

    #[test]
    fn late_join_after_completion_does_not_refire_done() {
        let server = server(2);
        server.join(node("node1", "10.0.0.1")).unwrap();
        server.join(node("node2", "10.0.0.2")).unwrap();
        assert!(server.status().complete);

        // A straggler past the expected count still registers, and the
        // payload stays released.
        let response = server.join(node("node3", "10.0.0.3")).unwrap();
        assert_eq!(response.joined, 3);
        let status = server.status();
        assert!(status.complete);
        assert_eq!(status.joined, 3);
        assert!(status.credentials.is_some());
    }

    #[test]
    fn services_subset_preserved() {
        let server = server(1);
        let mut n = node("node1", "10.0.0.1");
        n.services = vec![Service::Nats, Service::Daemon];
        server.join(n).unwrap();
        let status = server.status();
        assert_eq!(
            status.nodes.unwrap()["node1"].services,
            vec![Service::Nats, Service::Daemon]
        );
    }

    mod http {
        use super::*;
        use axum::body::Body;
        use axum::http::Request;
        use tower::util::ServiceExt;

        async fn body_json(response: axum::response::Response) -> serde_json::Value {
            let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
                .await
                .unwrap();
            serde_json::from_slice(&bytes).unwrap()
        }

        #[tokio::test]
        async fn join_and_status_over_http() {
            let router = build_router(Arc::new(server(1)));

            let join = Request::builder()
                .method("POST")
                .uri("/formation/join")
                .header("content-type", "application/json")
                .body(Body::from(
                    serde_json::to_vec(&node("node1", "10.0.0.1")).unwrap(),
                ))
                .unwrap();
            let response = router.clone().oneshot(join).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let json = body_json(response).await;
            assert_eq!(json["Success"], true);

            let status = Request::builder()
                .uri("/formation/status")
                .body(Body::empty())
                .unwrap();
            let response = router.oneshot(status).await.unwrap();
            let json = body_json(response).await;
            assert_eq!(json["Complete"], true);
            assert!(json["Credentials"]["AccessKey"].as_str().unwrap().starts_with("AKIA"));
        }

        #[tokio::test]
        async fn duplicate_join_is_conflict() {
            let router = build_router(Arc::new(server(3)));
            for expected_status in [StatusCode::OK, StatusCode::CONFLICT] {
                let join = Request::builder()
                    .method("POST")
                    .uri("/formation/join")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::to_vec(&node("node1", "10.0.0.1")).unwrap(),
                    ))
                    .unwrap();
                let response = router.clone().oneshot(join).await.unwrap();
                assert_eq!(response.status(), expected_status);
            }
        }

        #[tokio::test]
        async fn health_endpoint() {
            let router = build_router(Arc::new(server(1)));
            let response = router
                .oneshot(Request::builder().uri("/formation/health").body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }
}
