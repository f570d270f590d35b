//! Cryptographic primitives for Emberchain

use crate::error::ChainError;
use once_cell::sync::Lazy;
use rand::rngs::OsRng;
use secp256k1::{
    ecdsa::{RecoverableSignature, RecoveryId},
    All, Message, PublicKey, Secp256k1, SecretKey,
};
use sha2::{Digest, Sha256};

/// A thread-safe, lazily initialized Secp256k1 context.
/// This prevents repeated, unnecessary context creation.
static SECP256K1_CONTEXT: Lazy<Secp256k1<All>> = Lazy::new(Secp256k1::new);

/// Length of an uncompressed public key (0x04 marker + two 32-byte coordinates).
pub const UNCOMPRESSED_PUBKEY_SIZE: usize = 65;

/// Length of a recoverable signature on the wire (r || s || recovery id).
pub const RECOVERABLE_SIGNATURE_SIZE: usize = 65;

/// Computes the 256-bit digest used everywhere in the protocol.
pub fn hash256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Digest as a bare lowercase hex string (no 0x prefix).
pub fn hash256_hex(data: &[u8]) -> String {
    hex::encode(hash256(data))
}

/// Checks the textual address form: `0x` followed by exactly 40 hex digits.
pub fn is_valid_address(address: &str) -> bool {
    let Some(body) = address.strip_prefix("0x") else {
        return false;
    };
    body.len() == 40 && body.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Derives the account address from a 65-byte uncompressed public key:
/// the low 20 bytes of the digest over the 64 coordinate bytes.
pub fn public_key_to_address(pubkey: &[u8]) -> Result<String, ChainError> {
    if pubkey.len() != UNCOMPRESSED_PUBKEY_SIZE {
        return Err(ChainError::CryptoError(format!(
            "public key must be {} bytes, got {}",
            UNCOMPRESSED_PUBKEY_SIZE,
            pubkey.len()
        )));
    }
    if pubkey[0] != 0x04 {
        return Err(ChainError::CryptoError(format!(
            "public key must start with 0x04 for uncompressed keys, got {:#04x}",
            pubkey[0]
        )));
    }

    let digest = hash256(&pubkey[1..]);
    Ok(format!("0x{}", hex::encode(&digest[digest.len() - 20..])))
}

#[derive(Debug, Clone)]
pub struct KeyPair {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
}

impl KeyPair {
    /// Generates a new random KeyPair using the OS random number generator.
    pub fn generate() -> Self {
        let secret_key = SecretKey::new(&mut OsRng);
        let public_key = PublicKey::from_secret_key(&SECP256K1_CONTEXT, &secret_key);
        KeyPair {
            secret_key,
            public_key,
        }
    }

    /// Creates a KeyPair from raw secret key bytes.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, ChainError> {
        let secret_key = SecretKey::from_slice(bytes)
            .map_err(|e| ChainError::CryptoError(format!("invalid secret key bytes: {}", e)))?;
        let public_key = PublicKey::from_secret_key(&SECP256K1_CONTEXT, &secret_key);
        Ok(KeyPair {
            secret_key,
            public_key,
        })
    }

    /// Creates a KeyPair from a hex-encoded secret key.
    pub fn from_secret_hex(hex_str: &str) -> Result<Self, ChainError> {
        let bytes = hex::decode(hex_str)
            .map_err(|e| ChainError::CryptoError(format!("invalid secret key hex: {}", e)))?;
        Self::from_secret_bytes(&bytes)
    }

    /// Secret key as a bare hex string.
    pub fn secret_hex(&self) -> String {
        hex::encode(self.secret_key.secret_bytes())
    }

    /// The account address derived from this key's uncompressed public key.
    pub fn address(&self) -> String {
        let pubkey_bytes: [u8; UNCOMPRESSED_PUBKEY_SIZE] = self.public_key.serialize_uncompressed();
        // Serialization always yields a well-formed 0x04-prefixed key.
        public_key_to_address(&pubkey_bytes).unwrap_or_else(|_| String::from("0x"))
    }

    /// Signs a 32-byte message hash, returning the 65-byte recoverable
    /// signature (r || s || recovery id) used on the wire.
    pub fn sign_recoverable(
        &self,
        message_hash: &[u8; 32],
    ) -> Result<[u8; RECOVERABLE_SIGNATURE_SIZE], ChainError> {
        let message = Message::from_digest_slice(message_hash)
            .map_err(|e| ChainError::CryptoError(format!("failed to create message: {}", e)))?;

        let signature = SECP256K1_CONTEXT.sign_ecdsa_recoverable(&message, &self.secret_key);
        let (recovery_id, compact) = signature.serialize_compact();

        let mut out = [0u8; RECOVERABLE_SIGNATURE_SIZE];
        out[..64].copy_from_slice(&compact);
        out[64] = recovery_id.to_i32() as u8;
        Ok(out)
    }
}

/// Recovers the uncompressed public key from a message hash and a 65-byte
/// recoverable signature.
pub fn recover_public_key(
    message_hash: &[u8; 32],
    signature: &[u8],
) -> Result<[u8; UNCOMPRESSED_PUBKEY_SIZE], ChainError> {
    if signature.len() != RECOVERABLE_SIGNATURE_SIZE {
        return Err(ChainError::RecoveryError(format!(
            "signature must be {} bytes, got {}",
            RECOVERABLE_SIGNATURE_SIZE,
            signature.len()
        )));
    }

    let recovery_id = RecoveryId::from_i32(signature[64] as i32)
        .map_err(|e| ChainError::RecoveryError(format!("invalid recovery id: {}", e)))?;
    let recoverable = RecoverableSignature::from_compact(&signature[..64], recovery_id)
        .map_err(|e| ChainError::RecoveryError(format!("invalid signature encoding: {}", e)))?;

    let message = Message::from_digest_slice(message_hash)
        .map_err(|e| ChainError::RecoveryError(format!("failed to create message: {}", e)))?;

    let public_key = SECP256K1_CONTEXT
        .recover_ecdsa(&message, &recoverable)
        .map_err(|e| ChainError::RecoveryError(e.to_string()))?;

    Ok(public_key.serialize_uncompressed())
}
