//! Keyed byte storage for accounts and blocks
//!
//! The ledger engine only sees `Store`: get/put by byte key plus an atomic
//! multi-key batch write. The SQLite backend is the production choice; the
//! in-memory backend backs tests.

use crate::error::ChainError;
use parking_lot::Mutex as PlMutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::sync::Mutex;

/// Key of the pointer to the most recently applied block.
pub const LAST_BLOCK_KEY: &[u8] = b"lastblock";

/// Key of this node's own account address.
pub const NODE_ACCOUNT_KEY: &[u8] = b"nodeAccount";

/// Storage key for an account record.
pub fn account_key(address: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(8 + address.len());
    key.extend_from_slice(b"account:");
    key.extend_from_slice(address.as_bytes());
    key
}

/// Storage key for a block record (the block hash, verbatim).
pub fn block_key(hash: &str) -> Vec<u8> {
    hash.as_bytes().to_vec()
}

/// A set of writes committed together. Either every entry becomes visible
/// or none does.
#[derive(Debug, Default)]
pub struct Batch {
    ops: Vec<(Vec<u8>, Vec<u8>)>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.ops.push((key, value));
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Abstraction over the node's persistent key/value storage.
pub trait Store: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, ChainError>;
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), ChainError>;
    /// Commits every entry of the batch atomically.
    fn write_batch(&self, batch: Batch) -> Result<(), ChainError>;
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &str) -> Result<Self, ChainError> {
        let conn = Connection::open(path)
            .map_err(|e| ChainError::DatabaseError(format!("failed to open database: {}", e)))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (
                key BLOB PRIMARY KEY,
                value BLOB NOT NULL
            )",
            [],
        )
        .map_err(|e| ChainError::DatabaseError(format!("failed to create kv table: {}", e)))?;

        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, ChainError> {
        self.conn
            .lock()
            .map_err(|_| ChainError::DatabaseError("mutex poisoned".to_string()))
    }
}

impl Store for SqliteStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, ChainError> {
        let conn = self.lock()?;
        conn.query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
            row.get(0)
        })
        .optional()
        .map_err(|e| ChainError::DatabaseError(format!("failed to read key: {}", e)))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), ChainError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
            params![key, value],
        )
        .map_err(|e| ChainError::DatabaseError(format!("failed to write key: {}", e)))?;
        Ok(())
    }

    fn write_batch(&self, batch: Batch) -> Result<(), ChainError> {
        let conn = self.lock()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| ChainError::DatabaseError(format!("failed to start transaction: {}", e)))?;

        for (key, value) in &batch.ops {
            tx.execute(
                "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
                params![key, value],
            )
            .map_err(|e| ChainError::DatabaseError(format!("failed to write batch entry: {}", e)))?;
        }

        tx.commit()
            .map_err(|e| ChainError::DatabaseError(format!("failed to commit batch: {}", e)))
    }
}

/// Volatile backend with the same semantics. The whole map is one mutex,
/// so a batch is trivially atomic.
#[derive(Default)]
pub struct MemoryStore {
    map: PlMutex<HashMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, ChainError> {
        Ok(self.map.lock().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), ChainError> {
        self.map.lock().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn write_batch(&self, batch: Batch) -> Result<(), ChainError> {
        let mut map = self.map.lock();
        for (key, value) in batch.ops {
            map.insert(key, value);
        }
        Ok(())
    }
}
