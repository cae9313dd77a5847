//! Formation modes — single-shot cluster bootstrap.
//!
//! The seed serves the formation API, registers itself, waits for the
//! expected node count, writes its derived config and exits. A joiner
//! registers with the seed, polls status until complete, and writes its
//! own derived config.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use hive_formation::{
    FormationConfig, FormationServer, NodeInfo, derive_cluster_config, join_with_retry,
    poll_until_complete,
};

use crate::{FormationCommand, parse_services};

/// Grace period after completion so late pollers still get the payload.
const LINGER: Duration = Duration::from_secs(10);

const JOIN_BACKOFF: Duration = Duration::from_secs(2);
const POLL_INTERVAL: Duration = Duration::from_secs(2);

pub async fn run(command: FormationCommand) -> anyhow::Result<()> {
    match command {
        FormationCommand::Seed {
            listen,
            expected,
            cluster_name,
            region,
            az,
            name,
            bind_ip,
            services,
            data_dir,
            output,
            timeout,
        } => {
            seed(
                listen,
                expected,
                &cluster_name,
                &region,
                &az,
                &name,
                &bind_ip,
                &services,
                &data_dir,
                &output,
                Duration::from_secs(timeout),
            )
            .await
        }
        FormationCommand::Join {
            seed,
            name,
            bind_ip,
            cluster_ip,
            region,
            az,
            port,
            services,
            data_dir,
            output,
            timeout,
        } => {
            let node = NodeInfo {
                name,
                bind_ip,
                cluster_ip,
                region,
                az,
                port,
                services: parse_services(&services)?,
            };
            join(&seed, node, &data_dir, &output, Duration::from_secs(timeout)).await
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn seed(
    listen: std::net::SocketAddr,
    expected: usize,
    cluster_name: &str,
    region: &str,
    az: &str,
    name: &str,
    bind_ip: &str,
    services: &[String],
    data_dir: &str,
    output: &Path,
    timeout: Duration,
) -> anyhow::Result<()> {
    let server = Arc::new(FormationServer::new(FormationConfig::new(
        expected,
        cluster_name,
        region,
    ))?);

    let router = hive_formation::build_router(Arc::clone(&server));
    // Binding the formation server must succeed or bootstrap cannot happen.
    let listener = tokio::net::TcpListener::bind(listen).await?;
    info!(%listen, expected, "formation server listening");
    let serve_handle = tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });

    // The seed is a member too.
    server.join(NodeInfo {
        name: name.to_string(),
        bind_ip: bind_ip.to_string(),
        cluster_ip: None,
        region: region.to_string(),
        az: az.to_string(),
        port: listen.port(),
        services: parse_services(services)?,
    })?;

    server.wait_for_completion(timeout).await?;

    let status = server.status();
    let nodes = status.nodes.expect("complete status carries nodes");
    let credentials = status.credentials.expect("complete status carries credentials");
    let config = derive_cluster_config(name, &nodes, &credentials, data_dir);
    config.save(output)?;
    info!(path = %output.display(), nodes = nodes.len(), "cluster config written");

    write_ca_material(data_dir, status.ca_cert.as_deref(), status.ca_key.as_deref())?;

    // Let the remaining pollers pick up the payload before exiting.
    tokio::time::sleep(LINGER).await;
    serve_handle.abort();
    info!("formation complete; seed exiting");
    Ok(())
}

async fn join(
    seed: &str,
    node: NodeInfo,
    data_dir: &str,
    output: &Path,
    timeout: Duration,
) -> anyhow::Result<()> {
    let attempts = (timeout.as_secs() / JOIN_BACKOFF.as_secs()).max(1) as u32;
    join_with_retry(seed, &node, attempts, JOIN_BACKOFF).await?;

    let status = poll_until_complete(seed, POLL_INTERVAL, timeout).await?;
    let nodes = status.nodes.expect("complete status carries nodes");
    let credentials = status.credentials.expect("complete status carries credentials");

    let config = derive_cluster_config(&node.name, &nodes, &credentials, data_dir);
    config.save(output)?;
    info!(path = %output.display(), nodes = nodes.len(), "cluster config written");

    write_ca_material(data_dir, status.ca_cert.as_deref(), status.ca_key.as_deref())?;
    info!("formation complete; node configured");
    Ok(())
}

/// Persist the distributed CA material under the data directory.
fn write_ca_material(data_dir: &str, cert: Option<&str>, key: Option<&str>) -> anyhow::Result<()> {
    let dir = Path::new(data_dir).join("tls");
    std::fs::create_dir_all(&dir)?;
    if let Some(cert) = cert {
        std::fs::write(dir.join("ca.pem"), cert)?;
    }
    if let Some(key) = key {
        std::fs::write(dir.join("ca.key"), key)?;
    }
    info!(path = %dir.display(), "cluster CA material written");
    Ok(())
}
