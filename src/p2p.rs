//! TCP gossip between peers
//!
//! One read task per connection forwards decoded frames into the
//! P2P→Ledger channel; a single broadcast task drains Ledger→P2P and fans
//! frames out to every connected peer. A failure on one peer drops that
//! peer only.

use crate::error::ChainError;
use crate::mediator::{FrameReceiver, FrameSender};
use crate::protocol::WireFrame;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Write halves of every live peer connection, keyed by remote address.
#[derive(Default)]
pub struct PeerRegistry {
    peers: Mutex<HashMap<String, OwnedWriteHalf>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.lock().await.len()
    }

    async fn add(&self, addr: String, writer: OwnedWriteHalf) {
        self.peers.lock().await.insert(addr, writer);
    }

    async fn remove(&self, addr: &str) {
        self.peers.lock().await.remove(addr);
    }

    /// Writes one frame to every peer, dropping peers whose socket fails.
    pub async fn broadcast(&self, frame: &WireFrame) {
        let bytes = frame.encode();
        let mut peers = self.peers.lock().await;
        let mut dead = Vec::new();

        for (addr, writer) in peers.iter_mut() {
            if let Err(e) = writer.write_all(&bytes).await {
                warn!(peer = %addr, error = %e, "dropping peer on write failure");
                dead.push(addr.clone());
            }
        }
        for addr in dead {
            peers.remove(&addr);
        }
    }
}

/// Wires up a fresh connection: registers the write half and spawns the
/// per-peer read loop on the read half.
pub async fn register_peer(
    stream: TcpStream,
    registry: &Arc<PeerRegistry>,
    to_ledger: &FrameSender,
) {
    let addr = match stream.peer_addr() {
        Ok(addr) => addr.to_string(),
        Err(e) => {
            warn!(error = %e, "rejecting peer without address");
            return;
        }
    };

    let (read_half, write_half) = stream.into_split();
    registry.add(addr.clone(), write_half).await;
    tokio::spawn(read_loop(
        read_half,
        addr,
        registry.clone(),
        to_ledger.clone(),
    ));
}

async fn read_loop(
    read_half: OwnedReadHalf,
    addr: String,
    registry: Arc<PeerRegistry>,
    to_ledger: FrameSender,
) {
    let mut lines = BufReader::new(read_half).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim_end();
                if line.is_empty() {
                    continue;
                }
                match WireFrame::decode(line) {
                    // Blocking on a full channel is the backpressure path.
                    Ok(frame) => {
                        if to_ledger.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(peer = %addr, error = %e, "undecodable frame"),
                }
            }
            Ok(None) => {
                info!(peer = %addr, "peer disconnected");
                break;
            }
            Err(e) => {
                warn!(peer = %addr, error = %e, "peer read failed");
                break;
            }
        }
    }
    registry.remove(&addr).await;
}

/// Accept loop for inbound peers. Binding failure is fatal; a failed
/// accept is not.
pub async fn run_tcp_server(
    port: u16,
    registry: Arc<PeerRegistry>,
    to_ledger: FrameSender,
) -> Result<(), ChainError> {
    let listener = TcpListener::bind(("127.0.0.1", port))
        .await
        .map_err(|e| ChainError::NetworkError(format!("TCP port {} unavailable: {}", port, e)))?;
    info!(port, "TCP gossip listener started");

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!(peer = %addr, "peer connected");
                register_peer(stream, &registry, &to_ledger).await;
            }
            Err(e) => warn!(error = %e, "accept failed"),
        }
    }
}

/// Dials a peer's TCP endpoint learned through discovery.
pub async fn connect_peer(
    addr: &str,
    registry: &Arc<PeerRegistry>,
    to_ledger: &FrameSender,
) -> Result<(), ChainError> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| ChainError::NetworkError(format!("failed to connect to {}: {}", addr, e)))?;
    info!(peer = %addr, "connected to peer");
    register_peer(stream, registry, to_ledger).await;
    Ok(())
}

/// Drains Ledger→P2P and fans every frame out to the connected peers.
pub async fn run_broadcast(mut outbound: FrameReceiver, registry: Arc<PeerRegistry>) {
    while let Some(frame) = outbound.recv().await {
        registry.broadcast(&frame).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    async fn connected_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr);
        let server = async { listener.accept().await.map(|(s, _)| s) };
        let (client, server) = tokio::join!(client, server);
        (client.unwrap(), server.unwrap())
    }

    #[tokio::test]
    async fn test_inbound_frames_reach_the_ledger_channel() {
        let registry = Arc::new(PeerRegistry::new());
        let (to_ledger, mut from_p2p) = mpsc::channel(8);

        let (mut client, server) = connected_pair().await;
        register_peer(server, &registry, &to_ledger).await;
        assert_eq!(registry.peer_count().await, 1);

        let frame = WireFrame::Transaction(r#"{"from":"0xaa"}"#.to_string());
        client.write_all(&frame.encode()).await.unwrap();

        let received = from_p2p.recv().await.unwrap();
        assert_eq!(received, frame);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_peer() {
        let registry = Arc::new(PeerRegistry::new());
        let (to_ledger, _from_p2p) = mpsc::channel(8);

        let (client_a, server_a) = connected_pair().await;
        let (client_b, server_b) = connected_pair().await;
        register_peer(server_a, &registry, &to_ledger).await;
        register_peer(server_b, &registry, &to_ledger).await;

        let frame = WireFrame::Block(r#"{"number":2}"#.to_string());
        registry.broadcast(&frame).await;

        for client in [client_a, client_b] {
            let mut lines = BufReader::new(client).lines();
            let line = lines.next_line().await.unwrap().unwrap();
            assert_eq!(WireFrame::decode(&line).unwrap(), frame);
        }
    }

    #[tokio::test]
    async fn test_disconnected_peer_is_removed() {
        let registry = Arc::new(PeerRegistry::new());
        let (to_ledger, _from_p2p) = mpsc::channel(8);

        let (client, server) = connected_pair().await;
        register_peer(server, &registry, &to_ledger).await;
        assert_eq!(registry.peer_count().await, 1);

        drop(client);
        // Let the read loop observe EOF and clean up.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(registry.peer_count().await, 0);
    }

    #[tokio::test]
    async fn test_garbage_line_does_not_kill_the_read_loop() {
        let registry = Arc::new(PeerRegistry::new());
        let (to_ledger, mut from_p2p) = mpsc::channel(8);

        let (mut client, server) = connected_pair().await;
        register_peer(server, &registry, &to_ledger).await;

        client.write_all(b"\x7fnot a frame\n").await.unwrap();
        let frame = WireFrame::Transaction("{}".to_string());
        client.write_all(&frame.encode()).await.unwrap();

        // The bad line is skipped, the good one still arrives.
        assert_eq!(from_p2p.recv().await.unwrap(), frame);
    }
}
