//! hived — the Hive control-plane binary.
//!
//! One binary, one subcommand per role:
//! - `daemon` — the per-node VM daemon (plus the tag service)
//! - `gateway` — the EC2-compatible front door
//! - `formation seed` / `formation join` — one-shot cluster bootstrap
//!
//! # Usage
//!
//! ```text
//! hived formation seed --expected 3 --name node1 --bind-ip 10.0.0.1
//! hived daemon --config /etc/hive/hive.toml
//! hived gateway --config /etc/hive/hive.toml --listen 0.0.0.0:8444
//! ```

mod daemon_mode;
mod formation_mode;
mod gateway_mode;

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "hived", about = "Hive control plane daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the per-node VM daemon.
    Daemon {
        /// Cluster config written by formation.
        #[arg(long, default_value = "/etc/hive/hive.toml")]
        config: PathBuf,
    },
    /// Run the EC2 gateway.
    Gateway {
        #[arg(long, default_value = "/etc/hive/hive.toml")]
        config: PathBuf,
        /// Address for the EC2 HTTP surface.
        #[arg(long, default_value = "0.0.0.0:8444")]
        listen: SocketAddr,
    },
    /// Cluster bootstrap.
    Formation {
        #[command(subcommand)]
        command: FormationCommand,
    },
}

#[derive(Subcommand)]
enum FormationCommand {
    /// Run the seed node: serve the formation API, wait for peers.
    Seed {
        /// Address for the formation HTTP server.
        #[arg(long, default_value = "0.0.0.0:7000")]
        listen: SocketAddr,
        /// Total number of nodes, this one included.
        #[arg(long)]
        expected: usize,
        #[arg(long, default_value = "hive")]
        cluster_name: String,
        #[arg(long, default_value = "ap-southeast-2")]
        region: String,
        #[arg(long, default_value = "ap-southeast-2a")]
        az: String,
        /// This node's name.
        #[arg(long)]
        name: String,
        /// This node's address as peers reach it.
        #[arg(long)]
        bind_ip: String,
        /// Services this node runs (empty = all).
        #[arg(long, value_delimiter = ',')]
        services: Vec<String>,
        #[arg(long, default_value = "/var/lib/hive")]
        data_dir: String,
        /// Where to write the derived cluster config.
        #[arg(long, default_value = "hive.toml")]
        output: PathBuf,
        /// Seconds to wait for all nodes.
        #[arg(long, default_value = "600")]
        timeout: u64,
    },
    /// Join an existing formation.
    Join {
        /// The seed's formation address, host:port.
        #[arg(long)]
        seed: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        bind_ip: String,
        /// Separate backbone address, if any.
        #[arg(long)]
        cluster_ip: Option<String>,
        #[arg(long, default_value = "ap-southeast-2")]
        region: String,
        #[arg(long, default_value = "ap-southeast-2a")]
        az: String,
        #[arg(long, default_value = "7000")]
        port: u16,
        #[arg(long, value_delimiter = ',')]
        services: Vec<String>,
        #[arg(long, default_value = "/var/lib/hive")]
        data_dir: String,
        #[arg(long, default_value = "hive.toml")]
        output: PathBuf,
        #[arg(long, default_value = "600")]
        timeout: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,hived=debug,hive=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Daemon { config } => daemon_mode::run(&config).await,
        Command::Gateway { config, listen } => gateway_mode::run(&config, listen).await,
        Command::Formation { command } => formation_mode::run(command).await,
    }
}

/// Parse `--services` values into the typed set.
pub(crate) fn parse_services(names: &[String]) -> anyhow::Result<Vec<hive_core::config::Service>> {
    use hive_core::config::Service;
    names
        .iter()
        .filter(|s| !s.is_empty())
        .map(|name| match name.as_str() {
            "nats" => Ok(Service::Nats),
            "predastore" => Ok(Service::Predastore),
            "viperblock" => Ok(Service::Viperblock),
            "daemon" => Ok(Service::Daemon),
            "awsgw" => Ok(Service::Awsgw),
            "ui" => Ok(Service::Ui),
            other => Err(anyhow::anyhow!("unknown service {other:?}")),
        })
        .collect()
}
