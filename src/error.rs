//! Error types for Emberchain

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    MissingField,
    InvalidValue,
    InvalidAddress(String),
    RecoveryError(String),
    SignatureMismatch,
    UnknownSender(String),
    UnknownAccount(String),
    InsufficientFunds { address: String, balance: String },
    NonceTooLow { expected: u64, got: u64 },
    DuplicateNonce { address: String, nonce: u64 },
    HashMismatch { expected: String, got: String },
    ParentMismatch { expected: String, got: String },
    MerkleMismatch { expected: String, got: String },
    InvalidTransaction(String),
    InvalidBlock(String),
    DatabaseError(String),
    NetworkError(String),
    CryptoError(String),
    CodecError(String),
    IoError(String),
}

impl fmt::Display for ChainError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ChainError::MissingField => {
                write!(f, "missing required fields: 'from', 'to', 'value', 'signature'")
            }
            ChainError::InvalidValue => write!(f, "invalid value: must be a positive integer"),
            ChainError::InvalidAddress(addr) => write!(f, "invalid address format: {}", addr),
            ChainError::RecoveryError(msg) => {
                write!(f, "failed to recover public key: {}", msg)
            }
            ChainError::SignatureMismatch => {
                write!(f, "recovered address does not match sender")
            }
            ChainError::UnknownSender(addr) => {
                write!(f, "sender account does not exist: {}", addr)
            }
            ChainError::UnknownAccount(addr) => write!(f, "no such account: {}", addr),
            ChainError::InsufficientFunds { address, balance } => {
                write!(f, "insufficient funds for {}: available balance is {}", address, balance)
            }
            ChainError::NonceTooLow { expected, got } => {
                write!(f, "nonce too low: expected at least {}, got {}", expected, got)
            }
            ChainError::DuplicateNonce { address, nonce } => {
                write!(f, "duplicate transaction: nonce {} for {} already pooled", nonce, address)
            }
            ChainError::HashMismatch { expected, got } => {
                write!(f, "invalid block hash: expected {}, got {}", expected, got)
            }
            ChainError::ParentMismatch { expected, got } => {
                write!(f, "invalid parent hash: last block is {}, got {}", expected, got)
            }
            ChainError::MerkleMismatch { expected, got } => {
                write!(f, "invalid merkle root: expected {}, got {}", expected, got)
            }
            ChainError::InvalidTransaction(msg) => write!(f, "invalid transaction: {}", msg),
            ChainError::InvalidBlock(msg) => write!(f, "invalid block: {}", msg),
            ChainError::DatabaseError(msg) => write!(f, "database error: {}", msg),
            ChainError::NetworkError(msg) => write!(f, "network error: {}", msg),
            ChainError::CryptoError(msg) => write!(f, "cryptographic error: {}", msg),
            ChainError::CodecError(msg) => write!(f, "codec error: {}", msg),
            ChainError::IoError(msg) => write!(f, "IO error: {}", msg),
        }
    }
}

impl std::error::Error for ChainError {}

impl From<std::io::Error> for ChainError {
    fn from(err: std::io::Error) -> Self {
        ChainError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for ChainError {
    fn from(err: serde_json::Error) -> Self {
        ChainError::CodecError(err.to_string())
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, ChainError>;
