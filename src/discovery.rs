//! UDP node discovery
//!
//! A fixed-step handshake over raw datagrams. Against the bootstrap node:
//! Ping → Pong → FindNode → Neighbors. Against each discovered neighbor:
//! Ping → Pong → ENRRequest → ENRResponse, which yields the peer's TCP
//! service address. Every read step has a fixed timeout; a timed-out
//! candidate is skipped, never retried in a loop.

use crate::error::ChainError;
use crate::protocol::DiscoveryMessage;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{info, warn};

/// Per-step read timeout of the discovery handshake.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

const DATAGRAM_BUF: usize = 1024;

/// The discovery responder. Full nodes answer Ping and ENRRequest; with the
/// bootnode role it also serves FindNode, accumulating requesters into the
/// neighbor table it hands out.
pub struct DiscoveryServer {
    socket: UdpSocket,
    /// Our TCP gossip address, advertised through ENRResponse. Absent on a
    /// pure bootnode.
    tcp_addr: Option<String>,
    neighbors: Mutex<Vec<String>>,
}

impl DiscoveryServer {
    pub async fn bind(port: u16, tcp_addr: Option<String>) -> Result<Self, ChainError> {
        let socket = UdpSocket::bind(("127.0.0.1", port))
            .await
            .map_err(|e| ChainError::NetworkError(format!("UDP port {} unavailable: {}", port, e)))?;
        Ok(DiscoveryServer {
            socket,
            tcp_addr,
            neighbors: Mutex::new(Vec::new()),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ChainError> {
        self.socket.local_addr().map_err(ChainError::from)
    }

    /// Serves discovery datagrams forever. A bad datagram or failed send
    /// affects that one exchange only.
    pub async fn run(self) {
        match self.local_addr() {
            Ok(addr) => info!(%addr, "UDP discovery listener started"),
            Err(_) => info!("UDP discovery listener started"),
        }

        let mut buf = [0u8; DATAGRAM_BUF];
        loop {
            let (len, peer) = match self.socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    warn!(error = %e, "discovery receive failed");
                    continue;
                }
            };

            let message = match DiscoveryMessage::decode(&buf[..len]) {
                Ok(message) => message,
                Err(e) => {
                    warn!(%peer, error = %e, "undecodable discovery datagram");
                    continue;
                }
            };

            if let Some(reply) = self.respond(message, &peer) {
                if let Err(e) = self.socket.send_to(&reply.encode(), peer).await {
                    warn!(%peer, error = %e, "discovery reply failed");
                }
            }
        }
    }

    fn respond(&self, message: DiscoveryMessage, peer: &SocketAddr) -> Option<DiscoveryMessage> {
        match message {
            DiscoveryMessage::Ping => {
                info!(%peer, "ping received");
                Some(DiscoveryMessage::Pong)
            }
            DiscoveryMessage::FindNode(requester) => {
                let mut neighbors = self.neighbors.lock();
                let known: Vec<String> = neighbors
                    .iter()
                    .filter(|addr| **addr != requester)
                    .cloned()
                    .collect();
                if !neighbors.contains(&requester) {
                    neighbors.push(requester);
                }
                info!(%peer, count = known.len(), "neighbors served");
                Some(DiscoveryMessage::Neighbors(known))
            }
            DiscoveryMessage::EnrRequest => self
                .tcp_addr
                .clone()
                .map(DiscoveryMessage::EnrResponse),
            // Responses are client-side messages; a server ignores them.
            _ => None,
        }
    }
}

async fn recv_step(socket: &UdpSocket) -> Result<DiscoveryMessage, ChainError> {
    let mut buf = [0u8; DATAGRAM_BUF];
    let len = timeout(HANDSHAKE_TIMEOUT, socket.recv(&mut buf))
        .await
        .map_err(|_| ChainError::NetworkError("discovery step timed out".to_string()))??;
    DiscoveryMessage::decode(&buf[..len])
}

async fn dial(target: &str) -> Result<UdpSocket, ChainError> {
    let socket = UdpSocket::bind("127.0.0.1:0").await?;
    socket
        .connect(target)
        .await
        .map_err(|e| ChainError::NetworkError(format!("cannot reach {}: {}", target, e)))?;
    Ok(socket)
}

/// Asks the bootstrap node for known peers: Ping → Pong → FindNode →
/// Neighbors, registering `our_udp` along the way.
pub async fn request_neighbors(
    bootstrap: &str,
    our_udp: &str,
) -> Result<Vec<String>, ChainError> {
    let socket = dial(bootstrap).await?;

    socket.send(&DiscoveryMessage::Ping.encode()).await?;
    match recv_step(&socket).await? {
        DiscoveryMessage::Pong => {}
        other => {
            return Err(ChainError::NetworkError(format!(
                "expected Pong from bootstrap, got {:?}",
                other
            )))
        }
    }

    socket
        .send(&DiscoveryMessage::FindNode(our_udp.to_string()).encode())
        .await?;
    match recv_step(&socket).await? {
        DiscoveryMessage::Neighbors(addrs) => Ok(addrs),
        other => Err(ChainError::NetworkError(format!(
            "expected Neighbors from bootstrap, got {:?}",
            other
        ))),
    }
}

/// Resolves a neighbor's TCP gossip address: Ping → Pong → ENRRequest →
/// ENRResponse.
pub async fn request_tcp_endpoint(peer_udp: &str) -> Result<String, ChainError> {
    let socket = dial(peer_udp).await?;

    socket.send(&DiscoveryMessage::Ping.encode()).await?;
    match recv_step(&socket).await? {
        DiscoveryMessage::Pong => {}
        other => {
            return Err(ChainError::NetworkError(format!(
                "expected Pong from {}, got {:?}",
                peer_udp, other
            )))
        }
    }

    socket.send(&DiscoveryMessage::EnrRequest.encode()).await?;
    match recv_step(&socket).await? {
        DiscoveryMessage::EnrResponse(tcp_addr) => Ok(tcp_addr),
        other => Err(ChainError::NetworkError(format!(
            "expected ENRResponse from {}, got {:?}",
            peer_udp, other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn spawn_server(tcp_addr: Option<String>) -> String {
        let server = DiscoveryServer::bind(0, tcp_addr).await.unwrap();
        let addr = server.local_addr().unwrap().to_string();
        tokio::spawn(server.run());
        addr
    }

    #[tokio::test]
    async fn test_bootnode_accumulates_neighbors() {
        let bootnode = spawn_server(None).await;

        // First joiner sees an empty network.
        let first = request_neighbors(&bootnode, "127.0.0.1:7002").await.unwrap();
        assert!(first.is_empty());

        // Second joiner learns about the first.
        let second = request_neighbors(&bootnode, "127.0.0.1:7102").await.unwrap();
        assert_eq!(second, vec!["127.0.0.1:7002".to_string()]);

        // Re-joining does not duplicate the entry.
        let again = request_neighbors(&bootnode, "127.0.0.1:7102").await.unwrap();
        assert_eq!(again, vec!["127.0.0.1:7002".to_string()]);
    }

    #[tokio::test]
    async fn test_enr_exchange_yields_tcp_endpoint() {
        let peer = spawn_server(Some("127.0.0.1:7001".to_string())).await;
        let tcp = request_tcp_endpoint(&peer).await.unwrap();
        assert_eq!(tcp, "127.0.0.1:7001");
    }

    #[tokio::test]
    async fn test_handshake_times_out_against_silent_peer() {
        // A bound socket that never answers.
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = silent.local_addr().unwrap().to_string();

        let start = std::time::Instant::now();
        let result = request_tcp_endpoint(&target).await;
        assert!(matches!(result, Err(ChainError::NetworkError(_))));
        assert!(start.elapsed() >= HANDSHAKE_TIMEOUT);
    }
}
