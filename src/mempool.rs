//! Transaction mempool
//!
//! Admitted transfers wait here, partitioned per account: `pending` holds
//! the unbroken nonce chain extending the ledger's confirmed nonce, `future`
//! holds everything past a gap. A `(account, nonce)` pair lives in at most
//! one partition. Both maps sit behind a single mutex; every operation is a
//! short critical section with no I/O under the lock.

use crate::error::ChainError;
use crate::transaction::Transaction;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};

type AccountQueue = BTreeMap<u64, Transaction>;

#[derive(Default)]
struct PoolInner {
    pending: HashMap<String, AccountQueue>,
    future: HashMap<String, AccountQueue>,
}

impl PoolInner {
    /// Highest nonce reachable from the ledger nonce through contiguous
    /// pending entries for this account.
    fn highest_pending_nonce(&self, account: &str, current_nonce: u64) -> u64 {
        let mut highest = current_nonce;
        if let Some(queue) = self.pending.get(account) {
            while queue.contains_key(&(highest + 1)) {
                highest += 1;
            }
        }
        highest
    }
}

#[derive(Default)]
pub struct Mempool {
    inner: Mutex<PoolInner>,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admits a transaction, routing it to pending when it extends the
    /// account's contiguous chain and to future when it leaves a gap.
    /// `current_nonce` is the sender's confirmed ledger nonce.
    pub fn add(&self, tx: Transaction, current_nonce: u64) -> Result<(), ChainError> {
        let mut inner = self.inner.lock();

        let already_pooled = inner
            .pending
            .get(&tx.from)
            .is_some_and(|q| q.contains_key(&tx.nonce))
            || inner
                .future
                .get(&tx.from)
                .is_some_and(|q| q.contains_key(&tx.nonce));
        if already_pooled {
            return Err(ChainError::DuplicateNonce {
                address: tx.from.clone(),
                nonce: tx.nonce,
            });
        }

        let highest = inner.highest_pending_nonce(&tx.from, current_nonce);
        if tx.nonce == highest + 1 {
            inner
                .pending
                .entry(tx.from.clone())
                .or_default()
                .insert(tx.nonce, tx);
        } else if tx.nonce > highest {
            inner
                .future
                .entry(tx.from.clone())
                .or_default()
                .insert(tx.nonce, tx);
        } else {
            return Err(ChainError::NonceTooLow {
                expected: highest + 1,
                got: tx.nonce,
            });
        }
        Ok(())
    }

    /// Accounts that currently have future entries, for the pre-production
    /// promotion sweep.
    pub fn accounts_with_future(&self) -> Vec<String> {
        self.inner.lock().future.keys().cloned().collect()
    }

    /// Promotes contiguous future entries of one account into pending,
    /// stopping at the first gap.
    pub fn sync_future_to_pending(&self, account: &str, current_nonce: u64) {
        let mut inner = self.inner.lock();

        let mut next = inner.highest_pending_nonce(account, current_nonce) + 1;
        loop {
            let Some(tx) = inner
                .future
                .get_mut(account)
                .and_then(|q| q.remove(&next))
            else {
                break;
            };
            inner
                .pending
                .entry(account.to_string())
                .or_default()
                .insert(next, tx);
            next += 1;
        }

        if inner.future.get(account).is_some_and(|q| q.is_empty()) {
            inner.future.remove(account);
        }
    }

    /// Drains up to `max` pending transactions, round-robin across accounts:
    /// each pass takes the lowest-nonce entry from every account still in
    /// rotation, so no single account can monopolize a block. Iteration
    /// order over accounts is whatever the map yields; only the per-account
    /// nonce order is guaranteed.
    pub fn extract_for_block(&self, max: usize) -> Vec<Transaction> {
        let mut inner = self.inner.lock();
        let mut extracted = Vec::new();

        let accounts: Vec<String> = inner.pending.keys().cloned().collect();

        'outer: loop {
            let mut progressed = false;
            for account in &accounts {
                if extracted.len() >= max {
                    break 'outer;
                }
                let Some(queue) = inner.pending.get_mut(account) else {
                    continue;
                };
                let Some((_, tx)) = queue.pop_first() else {
                    continue;
                };
                if queue.is_empty() {
                    inner.pending.remove(account);
                }
                extracted.push(tx);
                progressed = true;
            }
            if !progressed {
                break;
            }
        }

        extracted
    }

    /// Removes every `(from, nonce)` pair of an applied block from both
    /// partitions. Extracted transactions are already gone from pending;
    /// blocks received from peers may name transactions this node never
    /// pooled, so absence is not an error.
    pub fn clean_after_block(&self, txs: &[Transaction]) {
        let mut inner = self.inner.lock();
        for tx in txs {
            if let Some(queue) = inner.pending.get_mut(&tx.from) {
                queue.remove(&tx.nonce);
                if queue.is_empty() {
                    inner.pending.remove(&tx.from);
                }
            }
            if let Some(queue) = inner.future.get_mut(&tx.from) {
                queue.remove(&tx.nonce);
                if queue.is_empty() {
                    inner.future.remove(&tx.from);
                }
            }
        }
    }

    /// Total number of pending transactions across all accounts.
    pub fn pending_len(&self) -> usize {
        self.inner.lock().pending.values().map(|q| q.len()).sum()
    }

    pub fn future_len(&self) -> usize {
        self.inner.lock().future.values().map(|q| q.len()).sum()
    }

    #[cfg(test)]
    fn pending_nonces(&self, account: &str) -> Vec<u64> {
        self.inner
            .lock()
            .pending
            .get(account)
            .map(|q| q.keys().copied().collect())
            .unwrap_or_default()
    }

    #[cfg(test)]
    fn future_nonces(&self, account: &str) -> Vec<u64> {
        self.inner
            .lock()
            .future
            .get(account)
            .map(|q| q.keys().copied().collect())
            .unwrap_or_default()
    }
}
