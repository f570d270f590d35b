//! Node startup and task wiring
//!
//! `init` builds the stateful pieces (store, ledger, mempool, chain) and
//! `start` spawns the concurrent surface: engine loops draining the
//! mediator, the TCP gossip listener, the UDP discovery responder and
//! client, the periodic block producer and the RPC facade. Bind failures
//! are fatal at startup; after that, a failure handling one message or
//! peer never takes a loop down.

use crate::account::Ledger;
use crate::chain::{run_engine, run_producer, Chain};
use crate::config::Config;
use crate::discovery::{self, DiscoveryServer};
use crate::error::ChainError;
use crate::mediator::Mediator;
use crate::mempool::Mempool;
use crate::p2p::{self, PeerRegistry};
use crate::store::{SqliteStore, Store};
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct Node {
    pub config: Config,
    pub chain: Arc<Chain>,
    pub mempool: Arc<Mempool>,
    pub registry: Arc<PeerRegistry>,
    pub node_account: String,
}

impl Node {
    pub fn init(config: Config) -> Result<Self, ChainError> {
        let _ = tracing_subscriber::fmt::try_init();
        info!("starting emberchain node");

        // Ensure the data directory (parent of the DB path) exists.
        let db_path = std::path::Path::new(&config.database.path);
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        // Storage is load-bearing: failing to open it is fatal.
        let store: Arc<dyn Store> = Arc::new(SqliteStore::open(&config.database.path)?);

        let ledger = Ledger::new(store.clone());
        let node_account = ledger.init_node_account()?;

        let mempool = Arc::new(Mempool::new());
        let chain = Arc::new(Chain::new(
            store,
            mempool.clone(),
            node_account.clone(),
            config.chain.txs_per_block,
            config.chain.max_txs_per_block,
        ));
        chain.init_genesis()?;

        Ok(Node {
            config,
            chain,
            mempool,
            registry: Arc::new(PeerRegistry::new()),
            node_account,
        })
    }

    pub async fn start(self) -> Result<(), ChainError> {
        let (mediator, receivers) = Mediator::new();

        // Engine loops: one consumer per inbound mediator channel. The RPC
        // lane additionally acknowledges accepted submissions.
        tokio::spawn(run_engine(
            self.chain.clone(),
            receivers.p2p_to_ledger,
            mediator.ledger_to_p2p.clone(),
            None,
        ));
        tokio::spawn(run_engine(
            self.chain.clone(),
            receivers.rpc_to_ledger,
            mediator.ledger_to_p2p.clone(),
            Some(mediator.ledger_to_rpc.clone()),
        ));

        // Outbound gossip.
        tokio::spawn(p2p::run_broadcast(
            receivers.ledger_to_p2p,
            self.registry.clone(),
        ));

        #[cfg(feature = "api")]
        tokio::spawn(crate::rpc::run_ack_drain(receivers.ledger_to_rpc));
        #[cfg(not(feature = "api"))]
        tokio::spawn(async move {
            let mut acks = receivers.ledger_to_rpc;
            while acks.recv().await.is_some() {}
        });

        // Ensure the gossip port is available before going concurrent.
        let tcp_port = self.config.network.tcp_port;
        std::net::TcpListener::bind(("127.0.0.1", tcp_port))
            .map_err(|e| ChainError::NetworkError(format!("TCP port {} unavailable: {}", tcp_port, e)))?;
        let registry = self.registry.clone();
        let to_ledger = mediator.p2p_to_ledger.clone();
        tokio::spawn(async move {
            if let Err(e) = p2p::run_tcp_server(tcp_port, registry, to_ledger).await {
                warn!(error = %e, "TCP server failed");
            }
        });

        // UDP discovery responder, advertising our TCP endpoint.
        let tcp_addr = format!("127.0.0.1:{}", tcp_port);
        let responder =
            DiscoveryServer::bind(self.config.network.udp_port, Some(tcp_addr)).await?;
        let our_udp = responder.local_addr()?.to_string();
        tokio::spawn(responder.run());

        // Discovery client: learn neighbors from the bootstrap node, then
        // resolve and dial each one. A failed candidate is skipped.
        let bootstrap = self.config.network.bootstrap_addr.clone();
        let registry = self.registry.clone();
        let to_ledger = mediator.p2p_to_ledger.clone();
        tokio::spawn(async move {
            match discovery::request_neighbors(&bootstrap, &our_udp).await {
                Ok(neighbors) => {
                    info!(count = neighbors.len(), "discovery complete");
                    for neighbor in neighbors {
                        match discovery::request_tcp_endpoint(&neighbor).await {
                            Ok(tcp) => {
                                if let Err(e) =
                                    p2p::connect_peer(&tcp, &registry, &to_ledger).await
                                {
                                    warn!(peer = %tcp, error = %e, "dial failed");
                                }
                            }
                            Err(e) => {
                                warn!(peer = %neighbor, error = %e, "handshake failed, skipping candidate")
                            }
                        }
                    }
                }
                Err(e) => warn!(error = %e, "bootstrap discovery failed"),
            }
        });

        // Periodic block producer, feeding the engine like a peer would.
        tokio::spawn(run_producer(
            self.chain.clone(),
            Duration::from_secs(self.config.chain.block_interval_secs),
            mediator.p2p_to_ledger.clone(),
        ));

        #[cfg(feature = "api")]
        {
            let api_port = self.config.network.api_port;
            std::net::TcpListener::bind(("127.0.0.1", api_port)).map_err(|e| {
                ChainError::NetworkError(format!("API port {} unavailable: {}", api_port, e))
            })?;
            let ctx = Arc::new(crate::rpc::RpcContext {
                chain: self.chain.clone(),
                submit: mediator.rpc_to_ledger.clone(),
            });
            tokio::spawn(async move {
                if let Err(e) = crate::rpc::run_rpc_server(ctx, api_port).await {
                    warn!(error = %e, "RPC server failed");
                }
            });
        }

        info!(account = %self.node_account, "node started");

        // Main loop - health logging
        loop {
            match self.chain.last_block() {
                Ok(block) => info!(
                    height = block.number,
                    pending = self.mempool.pending_len(),
                    peers = self.registry.peer_count().await,
                    "node running"
                ),
                Err(e) => warn!(error = %e, "health check failed"),
            }
            tokio::time::sleep(Duration::from_secs(10)).await;
        }
    }
}
