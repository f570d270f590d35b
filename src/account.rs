//! Account state and balance/nonce bookkeeping
//!
//! Accounts are stored as JSON under `account:<address>` keys. The `Ledger`
//! reads and writes single accounts; `BlockState` collects every mutation
//! belonging to one block so the engine can commit them in a single atomic
//! store batch.

use crate::crypto::KeyPair;
use crate::error::ChainError;
use crate::store::{account_key, Batch, Store, NODE_ACCOUNT_KEY};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Serde adapter encoding a `BigUint` as a decimal string. Peers built on
/// bignum-as-number JSON are still accepted: deserialization takes either a
/// string or a non-negative integer literal.
pub(crate) mod decimal_string {
    use num_bigint::BigUint;
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(value: &BigUint, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    struct DecimalVisitor;

    impl<'de> Visitor<'de> for DecimalVisitor {
        type Value = BigUint;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a decimal string or a non-negative integer")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<BigUint, E> {
            v.parse::<BigUint>()
                .map_err(|_| E::custom(format!("not a decimal integer: {}", v)))
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<BigUint, E> {
            Ok(BigUint::from(v))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<BigUint, E> {
            u64::try_from(v)
                .map(BigUint::from)
                .map_err(|_| E::custom("integer must be non-negative"))
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BigUint, D::Error> {
        deserializer.deserialize_any(DecimalVisitor)
    }
}

/// Balance and replay counter of one address. Never deleted once created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    #[serde(rename = "Balance", with = "decimal_string")]
    pub balance: BigUint,
    #[serde(rename = "Nonce")]
    pub nonce: u64,
}

impl Account {
    pub fn with_balance(balance: BigUint) -> Self {
        Account { balance, nonce: 0 }
    }
}

/// Account bookkeeping over the byte store.
#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn Store>,
}

impl Ledger {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Ledger { store }
    }

    pub fn get(&self, address: &str) -> Result<Account, ChainError> {
        match self.store.get(&account_key(address))? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Err(ChainError::UnknownAccount(address.to_string())),
        }
    }

    pub fn contains(&self, address: &str) -> Result<bool, ChainError> {
        Ok(self.store.get(&account_key(address))?.is_some())
    }

    pub fn put(&self, address: &str, account: &Account) -> Result<(), ChainError> {
        self.store
            .put(&account_key(address), &serde_json::to_vec(account)?)
    }

    /// Creates a zero-balance, zero-nonce account if the address is unknown.
    pub fn ensure(&self, address: &str) -> Result<(), ChainError> {
        if !self.contains(address)? {
            self.put(address, &Account::default())?;
        }
        Ok(())
    }

    /// Loads this node's own account address, creating identity and account
    /// on first start. Both writes go through one batch.
    pub fn init_node_account(&self) -> Result<String, ChainError> {
        if let Some(bytes) = self.store.get(NODE_ACCOUNT_KEY)? {
            let address = String::from_utf8(bytes)
                .map_err(|e| ChainError::DatabaseError(format!("corrupt node account: {}", e)))?;
            info!(address, "node account loaded");
            return Ok(address);
        }

        let keypair = KeyPair::generate();
        let address = keypair.address();

        let mut batch = Batch::new();
        batch.put(NODE_ACCOUNT_KEY.to_vec(), address.as_bytes().to_vec());
        batch.put(
            account_key(&address),
            serde_json::to_vec(&Account::default())?,
        );
        self.store.write_batch(batch)?;

        info!(address, "node account created");
        Ok(address)
    }

    /// Begins collecting the mutations of one block.
    pub fn begin_block(&self) -> BlockState<'_> {
        BlockState {
            ledger: self,
            touched: HashMap::new(),
        }
    }
}

/// Working set of every account touched while applying one block. Nothing
/// here reaches the store until [`BlockState::stage`] serializes it into
/// the block's batch.
pub struct BlockState<'a> {
    ledger: &'a Ledger,
    touched: HashMap<String, Account>,
}

impl BlockState<'_> {
    fn load(&mut self, address: &str) -> Result<&mut Account, ChainError> {
        match self.touched.entry(address.to_string()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let account = self.ledger.get(address)?;
                Ok(entry.insert(account))
            }
        }
    }

    fn load_or_create(&mut self, address: &str) -> Result<&mut Account, ChainError> {
        match self.touched.entry(address.to_string()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let account = match self.ledger.get(address) {
                    Ok(account) => account,
                    Err(ChainError::UnknownAccount(_)) => Account::default(),
                    Err(e) => return Err(e),
                };
                Ok(entry.insert(account))
            }
        }
    }

    /// Debits `from`, credits `to` (creating it if absent) and increments the
    /// sender nonce. Balance sufficiency is the caller's check; an unsigned
    /// balance cannot go negative, so a skipped check surfaces as an error
    /// here instead of corrupting state.
    pub fn apply(&mut self, from: &str, to: &str, value: &BigUint) -> Result<(), ChainError> {
        let sender = self.load(from)?;
        if sender.balance < *value {
            return Err(ChainError::InsufficientFunds {
                address: from.to_string(),
                balance: sender.balance.to_string(),
            });
        }
        sender.balance -= value;
        sender.nonce += 1;

        let recipient = self.load_or_create(to)?;
        recipient.balance += value;
        Ok(())
    }

    /// Credits an amount, creating the account if absent. Used for the
    /// miner reward.
    pub fn credit(&mut self, address: &str, amount: &BigUint) -> Result<(), ChainError> {
        let account = self.load_or_create(address)?;
        account.balance += amount;
        Ok(())
    }

    /// Serializes every touched account into the block's batch.
    pub fn stage(self, batch: &mut Batch) -> Result<(), ChainError> {
        for (address, account) in &self.touched {
            batch.put(account_key(address), serde_json::to_vec(account)?);
        }
        Ok(())
    }
}
