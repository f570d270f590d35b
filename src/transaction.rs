//! Signed value-transfer transactions
//!
//! Wire form and the stateless half of the pipeline: field validation, the
//! exact signing-message bytes, signature recovery and the canonical hash.
//! State-dependent checks live on the chain engine.

use crate::crypto::{
    self, hash256, is_valid_address, public_key_to_address, recover_public_key, KeyPair,
};
use crate::error::ChainError;
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

/// The signed, wire-transmitted transfer. Serialized as JSON behind the
/// 0x01 protocol tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTransaction {
    pub from: String,
    pub to: String,
    #[serde(with = "crate::account::decimal_string")]
    pub value: BigUint,
    pub nonce: u64,
    pub signature: String,
}

/// A raw transaction plus its derived hash. Immutable once constructed;
/// owned by exactly one container (a mempool slot or a block's list).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub hash: String,
    pub from: String,
    pub to: String,
    #[serde(with = "crate::account::decimal_string")]
    pub value: BigUint,
    pub nonce: u64,
    pub signature: String,
}

/// The byte sequence that gets hashed and signed: the four fields
/// concatenated with no delimiters, value and nonce in decimal. This is a
/// protocol-compatibility detail and must not change.
pub fn signing_message(from: &str, to: &str, value: &BigUint, nonce: u64) -> Vec<u8> {
    format!("{}{}{}{}", from, to, value, nonce).into_bytes()
}

/// Field-level validation: presence, value positivity, address shape.
pub fn validate_fields(raw: &RawTransaction) -> Result<(), ChainError> {
    if raw.from.is_empty() || raw.to.is_empty() || raw.signature.is_empty() {
        return Err(ChainError::MissingField);
    }
    if raw.value == BigUint::ZERO {
        return Err(ChainError::InvalidValue);
    }
    if !is_valid_address(&raw.from) {
        return Err(ChainError::InvalidAddress(raw.from.clone()));
    }
    if !is_valid_address(&raw.to) {
        return Err(ChainError::InvalidAddress(raw.to.clone()));
    }
    Ok(())
}

/// Recovers the signer from `(message_hash, signature)` and compares the
/// derived address against the claimed sender, ignoring hex case.
pub fn verify_signature(
    message_hash: &[u8; 32],
    signature_hex: &str,
    claimed_from: &str,
) -> Result<(), ChainError> {
    let signature = hex::decode(signature_hex)
        .map_err(|e| ChainError::RecoveryError(format!("invalid signature hex: {}", e)))?;

    let pubkey = recover_public_key(message_hash, &signature)?;
    let recovered = public_key_to_address(&pubkey)?;

    if recovered.eq_ignore_ascii_case(claimed_from) {
        Ok(())
    } else {
        Err(ChainError::SignatureMismatch)
    }
}

impl RawTransaction {
    pub fn new(from: String, to: String, value: BigUint, nonce: u64, signature: String) -> Self {
        RawTransaction {
            from,
            to,
            value,
            nonce,
            signature,
        }
    }

    /// Builds and signs a transfer with the given key. The sender address is
    /// derived from the key.
    pub fn signed(keypair: &KeyPair, to: &str, value: BigUint, nonce: u64) -> Result<Self, ChainError> {
        let from = keypair.address();
        let message_hash = hash256(&signing_message(&from, to, &value, nonce));
        let signature = keypair.sign_recoverable(&message_hash)?;
        Ok(RawTransaction {
            from,
            to: to.to_string(),
            value,
            nonce,
            signature: hex::encode(signature),
        })
    }

    /// Hash of this transaction's signing message, the thing the signature
    /// actually covers.
    pub fn message_hash(&self) -> [u8; 32] {
        hash256(&signing_message(&self.from, &self.to, &self.value, self.nonce))
    }

    /// Canonical wire bytes, also the preimage of the transaction hash.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, ChainError> {
        Ok(serde_json::to_vec(self)?)
    }
}

impl Transaction {
    /// Seals a raw transaction: hashes the canonical encoding and returns the
    /// immutable transaction together with the bytes used for retransmission.
    pub fn from_raw(raw: RawTransaction) -> Result<(Self, Vec<u8>), ChainError> {
        let bytes = raw.canonical_bytes()?;
        let hash = format!("0x{}", crypto::hash256_hex(&bytes));

        let tx = Transaction {
            hash,
            from: raw.from,
            to: raw.to,
            value: raw.value,
            nonce: raw.nonce,
            signature: raw.signature,
        };
        Ok((tx, bytes))
    }

    /// The raw wire form, minus the derived hash.
    pub fn to_raw(&self) -> RawTransaction {
        RawTransaction {
            from: self.from.clone(),
            to: self.to.clone(),
            value: self.value.clone(),
            nonce: self.nonce,
            signature: self.signature.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_address(tail: u8) -> String {
        format!("0x{:040x}", tail)
    }

    fn unsigned_raw(nonce: u64) -> RawTransaction {
        RawTransaction::new(
            dummy_address(1),
            dummy_address(2),
            BigUint::from(10u32),
            nonce,
            "00".repeat(65),
        )
    }

    #[test]
    fn test_signing_message_exact_bytes() {
        let message = signing_message(
            "0xaa",
            "0xbb",
            &BigUint::from(1234u32),
            7,
        );
        assert_eq!(message, b"0xaa0xbb12347");
    }

    #[test]
    fn test_validate_fields_rejects_empty_and_zero() {
        let mut raw = unsigned_raw(1);
        raw.from = String::new();
        assert_eq!(validate_fields(&raw), Err(ChainError::MissingField));

        let mut raw = unsigned_raw(1);
        raw.signature = String::new();
        assert_eq!(validate_fields(&raw), Err(ChainError::MissingField));

        let mut raw = unsigned_raw(1);
        raw.value = BigUint::ZERO;
        assert_eq!(validate_fields(&raw), Err(ChainError::InvalidValue));

        let mut raw = unsigned_raw(1);
        raw.to = "0x123".to_string();
        assert!(matches!(
            validate_fields(&raw),
            Err(ChainError::InvalidAddress(_))
        ));

        assert!(validate_fields(&unsigned_raw(1)).is_ok());
    }

    #[test]
    fn test_sign_and_verify() {
        let keypair = KeyPair::generate();
        let raw =
            RawTransaction::signed(&keypair, &dummy_address(9), BigUint::from(50u32), 1).unwrap();

        assert!(verify_signature(&raw.message_hash(), &raw.signature, &raw.from).is_ok());

        // Case-insensitive comparison against the claimed sender.
        let upper = raw.from.to_uppercase().replace("0X", "0x");
        assert!(verify_signature(&raw.message_hash(), &raw.signature, &upper).is_ok());

        // A different claimed sender must not verify.
        let result = verify_signature(&raw.message_hash(), &raw.signature, &dummy_address(3));
        assert_eq!(result, Err(ChainError::SignatureMismatch));
    }

    #[test]
    fn test_verify_rejects_malformed_signature() {
        let raw = unsigned_raw(1);

        let result = verify_signature(&raw.message_hash(), "zz", &raw.from);
        assert!(matches!(result, Err(ChainError::RecoveryError(_))));

        let result = verify_signature(&raw.message_hash(), "0011", &raw.from);
        assert!(matches!(result, Err(ChainError::RecoveryError(_))));
    }

    #[test]
    fn test_hash_round_trip() {
        let keypair = KeyPair::generate();
        let raw =
            RawTransaction::signed(&keypair, &dummy_address(4), BigUint::from(77u32), 3).unwrap();

        let (tx, bytes) = Transaction::from_raw(raw).unwrap();
        assert!(tx.hash.starts_with("0x"));
        assert_eq!(tx.hash.len(), 66);

        // Re-parsing the serialized form and re-hashing yields the same hash.
        let reparsed: RawTransaction = serde_json::from_slice(&bytes).unwrap();
        let (tx2, _) = Transaction::from_raw(reparsed).unwrap();
        assert_eq!(tx.hash, tx2.hash);
    }

    #[test]
    fn test_to_raw_preserves_fields() {
        let keypair = KeyPair::generate();
        let raw =
            RawTransaction::signed(&keypair, &dummy_address(4), BigUint::from(8u32), 2).unwrap();
        let (tx, _) = Transaction::from_raw(raw.clone()).unwrap();
        assert_eq!(tx.to_raw(), raw);
    }
}
