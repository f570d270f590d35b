#![forbid(unsafe_code)]

use clap::Parser;
use emberchain::config::load_config;
use emberchain::discovery::DiscoveryServer;
use emberchain::node::Node;

#[derive(Parser)]
#[command(name = "ember-node", about = "Run an Emberchain ledger node or bootnode")]
struct Cli {
    /// Path to config.toml
    #[arg(long)]
    config: Option<String>,

    /// Override the TCP gossip port
    #[arg(long)]
    tcp_port: Option<u16>,

    /// Override the UDP discovery port
    #[arg(long)]
    udp_port: Option<u16>,

    /// Override the HTTP API port
    #[arg(long)]
    api_port: Option<u16>,

    /// Override the database path
    #[arg(long)]
    db_path: Option<String>,

    /// Override the bootstrap node's UDP address
    #[arg(long)]
    bootstrap: Option<String>,

    /// Run as a discovery-only bootstrap node
    #[arg(long)]
    bootnode: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(port) = cli.tcp_port {
        config.network.tcp_port = port;
    }
    if let Some(port) = cli.udp_port {
        config.network.udp_port = port;
    }
    if let Some(port) = cli.api_port {
        config.network.api_port = port;
    }
    if let Some(path) = cli.db_path {
        config.database.path = path;
    }
    if let Some(addr) = cli.bootstrap {
        config.network.bootstrap_addr = addr;
    }

    if cli.bootnode {
        let _ = tracing_subscriber::fmt::try_init();
        let server = DiscoveryServer::bind(config.network.udp_port, None).await?;
        server.run().await;
        return Ok(());
    }

    let node = Node::init(config)?;
    node.start().await?;
    Ok(())
}
