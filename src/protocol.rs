//! Wire protocol constants and codecs
//!
//! TCP gossip uses newline-terminated text frames whose first byte is a
//! protocol tag; the remainder is a JSON payload. UDP discovery uses raw
//! fixed-layout datagrams whose first byte is the message type.

use crate::error::ChainError;

// P2P gossip tags
pub const TAG_TRANSACTION: u8 = 0x01;
pub const TAG_BLOCK: u8 = 0x02;

// Node discovery message types
pub const DISC_PING: u8 = 0x01;
pub const DISC_PONG: u8 = 0x02;
pub const DISC_FIND_NODE: u8 = 0x03;
pub const DISC_NEIGHBORS: u8 = 0x04;
pub const DISC_ENR_REQUEST: u8 = 0x05;
pub const DISC_ENR_RESPONSE: u8 = 0x06;

/// One gossip frame: a tagged JSON payload. Also the message type carried
/// on the mediator channels between the network and the ledger engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    /// JSON-encoded `RawTransaction`.
    Transaction(String),
    /// JSON-encoded `Block`.
    Block(String),
}

impl WireFrame {
    pub fn tag(&self) -> u8 {
        match self {
            WireFrame::Transaction(_) => TAG_TRANSACTION,
            WireFrame::Block(_) => TAG_BLOCK,
        }
    }

    pub fn payload(&self) -> &str {
        match self {
            WireFrame::Transaction(payload) | WireFrame::Block(payload) => payload,
        }
    }

    /// Frame bytes including the terminating newline.
    pub fn encode(&self) -> Vec<u8> {
        let payload = self.payload().as_bytes();
        let mut out = Vec::with_capacity(payload.len() + 2);
        out.push(self.tag());
        out.extend_from_slice(payload);
        out.push(b'\n');
        out
    }

    /// Decodes one frame line (newline already stripped).
    pub fn decode(line: &str) -> Result<Self, ChainError> {
        let bytes = line.as_bytes();
        if bytes.is_empty() {
            return Err(ChainError::CodecError("empty frame".to_string()));
        }
        // Both known tags are single-byte chars, so slicing past them is safe.
        match bytes[0] {
            TAG_TRANSACTION => Ok(WireFrame::Transaction(line[1..].to_string())),
            TAG_BLOCK => Ok(WireFrame::Block(line[1..].to_string())),
            tag => Err(ChainError::CodecError(format!(
                "unknown protocol tag: {:#04x}",
                tag
            ))),
        }
    }
}

/// One discovery datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryMessage {
    Ping,
    Pong,
    /// Payload: the requester's UDP address.
    FindNode(String),
    /// Payload: comma-separated UDP addresses of known nodes.
    Neighbors(Vec<String>),
    EnrRequest,
    /// Payload: the responder's TCP service address.
    EnrResponse(String),
}

impl DiscoveryMessage {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            DiscoveryMessage::Ping => vec![DISC_PING],
            DiscoveryMessage::Pong => vec![DISC_PONG],
            DiscoveryMessage::FindNode(addr) => {
                let mut out = vec![DISC_FIND_NODE];
                out.extend_from_slice(addr.as_bytes());
                out
            }
            DiscoveryMessage::Neighbors(addrs) => {
                let mut out = vec![DISC_NEIGHBORS];
                out.extend_from_slice(addrs.join(",").as_bytes());
                out
            }
            DiscoveryMessage::EnrRequest => vec![DISC_ENR_REQUEST],
            DiscoveryMessage::EnrResponse(addr) => {
                let mut out = vec![DISC_ENR_RESPONSE];
                out.extend_from_slice(addr.as_bytes());
                out
            }
        }
    }

    pub fn decode(datagram: &[u8]) -> Result<Self, ChainError> {
        let Some((&kind, payload)) = datagram.split_first() else {
            return Err(ChainError::CodecError("empty datagram".to_string()));
        };
        let text = || {
            String::from_utf8(payload.to_vec())
                .map_err(|e| ChainError::CodecError(format!("non-utf8 payload: {}", e)))
        };

        match kind {
            DISC_PING => Ok(DiscoveryMessage::Ping),
            DISC_PONG => Ok(DiscoveryMessage::Pong),
            DISC_FIND_NODE => Ok(DiscoveryMessage::FindNode(text()?)),
            DISC_NEIGHBORS => {
                let list = text()?;
                let addrs = list
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect();
                Ok(DiscoveryMessage::Neighbors(addrs))
            }
            DISC_ENR_REQUEST => Ok(DiscoveryMessage::EnrRequest),
            DISC_ENR_RESPONSE => Ok(DiscoveryMessage::EnrResponse(text()?)),
            other => Err(ChainError::CodecError(format!(
                "unknown discovery message type: {:#04x}",
                other
            ))),
        }
    }
}
