//! Gateway mode — the EC2-compatible front door.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use tracing::info;

use hive_broker::Broker;
use hive_core::config::{ClusterConfig, Service};
use hive_gateway::Gateway;

pub async fn run(config_path: &Path, listen: SocketAddr) -> anyhow::Result<()> {
    info!("Hive gateway starting");

    let config = ClusterConfig::load(config_path)?;
    let own = config.own_node();

    let broker = Broker::connect(&own.nats.url(), own.nats.token.as_deref()).await?;

    // Fan-out early exit stops once every daemon node has answered.
    let expected_nodes = config
        .nodes
        .values()
        .filter(|n| n.runs(Service::Daemon))
        .count();

    let gateway = Arc::new(Gateway::new(broker, expected_nodes));
    let router = hive_gateway::build_router(gateway);

    info!(%listen, expected_nodes, "gateway serving");
    let listener = tokio::net::TcpListener::bind(listen).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install CTRL+C handler");
            info!("shutdown signal received");
        })
        .await?;

    info!("Hive gateway stopped");
    Ok(())
}
