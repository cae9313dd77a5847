//! Daemon mode — the per-node VM service plus the tag service.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use hive_broker::Broker;
use hive_core::config::ClusterConfig;
use hive_daemon::{Daemon, DaemonConfig};
use hive_tags::TagsService;
use hive_volumes::{FsVolumeStore, ObjectStore, S3ObjectStore, VolumeStore};

pub async fn run(config_path: &Path) -> anyhow::Result<()> {
    info!("Hive daemon starting");

    let config = ClusterConfig::load(config_path)?;
    let own = config.own_node().clone();

    // ── Fabric ─────────────────────────────────────────────────
    let broker = Broker::connect(&own.nats.url(), own.nats.token.as_deref()).await?;

    // ── Storage ────────────────────────────────────────────────
    let objects: Arc<dyn ObjectStore> = Arc::new(S3ObjectStore::new(
        &own.object_store.endpoint(),
        &own.object_store.region,
        &own.object_store.bucket,
        &own.object_store.access_key,
        &own.object_store.secret_key,
    ));
    let volume_dir = Path::new(&own.data_dir).join("volumes");
    let volumes: Arc<dyn VolumeStore> = Arc::new(FsVolumeStore::new(&volume_dir)?);
    info!(path = %volume_dir.display(), "volume backend ready");

    // ── Daemon ─────────────────────────────────────────────────
    let catalog = hive_daemon::detect_catalog()?;
    // An arm64 node that cannot boot arm64 guests is misconfigured; refuse
    // to start rather than fail every launch.
    if let Some(arch) = catalog.first().map(|t| t.architecture) {
        hive_vmm::verify_firmware(arch)?;
    }
    let daemon_config = DaemonConfig::new(
        &config.node_name,
        &config.account_id,
        &own.region,
        &own.az,
    );
    let daemon = Daemon::new(
        daemon_config,
        broker.clone(),
        Arc::clone(&volumes),
        Arc::clone(&objects),
        catalog,
    )
    .await?;

    // ── Tag service (queue-grouped; any daemon may answer) ─────
    let (tags_shutdown_tx, tags_shutdown_rx) = watch::channel(false);
    let tags = Arc::new(TagsService::new(Arc::clone(&objects)));
    let tags_handle = {
        let broker = broker.clone();
        tokio::spawn(async move { hive_tags::serve(broker, tags, tags_shutdown_rx).await })
    };

    // ── Shutdown on Ctrl-C ─────────────────────────────────────
    {
        let daemon = Arc::clone(&daemon);
        tokio::spawn(async move {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install CTRL+C handler");
            info!("shutdown signal received");
            daemon.shutdown();
            let _ = tags_shutdown_tx.send(true);
        });
    }

    daemon.run().await?;
    let _ = tags_handle.await;

    info!("Hive daemon stopped");
    Ok(())
}
