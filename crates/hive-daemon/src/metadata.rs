//! The per-VM metadata endpoint.
//!
//! Each running VM gets a small HTTP server on a loopback ephemeral port
//! (its address lands in the VM record's `MetadataServerAddress`), serving
//! the instance-identity paths cloud-init and guest tooling expect. The
//! server's lifetime is the VM's ownership: it is torn down with the other
//! node-local handles.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use base64::Engine;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::vm::VirtualMachine;

/// The identity document one metadata server serves.
#[derive(Debug, Clone)]
pub(crate) struct MetadataDoc {
    pub instance_id: String,
    pub instance_type: String,
    pub image_id: String,
    pub reservation_id: String,
    pub hostname: String,
    pub az: String,
    /// Decoded user data, if the launch carried any.
    pub user_data: Option<Vec<u8>>,
}

impl MetadataDoc {
    pub fn from_vm(vm: &VirtualMachine, az: &str) -> MetadataDoc {
        let suffix = vm
            .root_volume_id()
            .and_then(|id| id.strip_prefix("vol-"))
            .unwrap_or("unknown");
        let user_data = vm.launch_input.user_data.as_ref().map(|encoded| {
            base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .unwrap_or_else(|_| encoded.clone().into_bytes())
        });
        MetadataDoc {
            instance_id: vm.instance_id.clone(),
            instance_type: vm.instance_type.clone(),
            image_id: vm.launch_input.image_id.clone(),
            reservation_id: vm.reservation_id.clone(),
            hostname: format!("hive-vm-{suffix}"),
            az: az.to_string(),
            user_data,
        }
    }
}

/// Categories under /latest/meta-data/.
const META_DATA_INDEX: &str = "ami-id\nhostname\ninstance-id\ninstance-type\n\
local-hostname\nplacement/\nreservation-id\n";

fn router(doc: Arc<MetadataDoc>) -> Router {
    Router::new()
        .route("/latest/meta-data/", get(index))
        .route("/latest/meta-data/ami-id", get(ami_id))
        .route("/latest/meta-data/hostname", get(hostname))
        .route("/latest/meta-data/local-hostname", get(hostname))
        .route("/latest/meta-data/instance-id", get(instance_id))
        .route("/latest/meta-data/instance-type", get(instance_type))
        .route("/latest/meta-data/reservation-id", get(reservation_id))
        .route("/latest/meta-data/placement/availability-zone", get(az))
        .route("/latest/user-data", get(user_data))
        .with_state(doc)
}

async fn index() -> &'static str {
    META_DATA_INDEX
}

async fn ami_id(State(doc): State<Arc<MetadataDoc>>) -> String {
    doc.image_id.clone()
}

async fn hostname(State(doc): State<Arc<MetadataDoc>>) -> String {
    doc.hostname.clone()
}

async fn instance_id(State(doc): State<Arc<MetadataDoc>>) -> String {
    doc.instance_id.clone()
}

async fn instance_type(State(doc): State<Arc<MetadataDoc>>) -> String {
    doc.instance_type.clone()
}

async fn reservation_id(State(doc): State<Arc<MetadataDoc>>) -> String {
    doc.reservation_id.clone()
}

async fn az(State(doc): State<Arc<MetadataDoc>>) -> String {
    doc.az.clone()
}

async fn user_data(State(doc): State<Arc<MetadataDoc>>) -> impl IntoResponse {
    match &doc.user_data {
        Some(bytes) => (StatusCode::OK, bytes.clone()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Bind a loopback server for this document. Returns the bound address and
/// the serving task (abort to stop).
pub(crate) async fn spawn_metadata_server(
    doc: MetadataDoc,
) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
    let instance_id = doc.instance_id.clone();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let app = router(Arc::new(doc));

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            warn!(%instance_id, error = %e, "metadata server exited");
        }
    });
    debug!(%addr, "metadata server bound");
    Ok((addr, handle))
}
