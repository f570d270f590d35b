//! The ledger engine
//!
//! Owns the write path: transaction admission (fields → signature →
//! account state → mempool), block production off the mempool, and the
//! validate-then-apply path shared by locally produced and peer-received
//! blocks. All mutations belonging to one block are committed in a single
//! atomic store batch.

use crate::account::Ledger;
use crate::block::Block;
use crate::error::ChainError;
use crate::mediator::{FrameReceiver, FrameSender};
use crate::mempool::Mempool;
use crate::protocol::WireFrame;
use crate::store::{block_key, Batch, Store, LAST_BLOCK_KEY};
use crate::transaction::{validate_fields, verify_signature, RawTransaction, Transaction};
use num_bigint::BigUint;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Fixed reward credited to the miner of every applied block.
pub const MINER_REWARD: u64 = 1000;

pub struct Chain {
    store: Arc<dyn Store>,
    ledger: Ledger,
    mempool: Arc<Mempool>,
    node_account: String,
    /// Minimum pending count before a production tick assembles a block.
    txs_per_block: usize,
    /// Upper bound on transactions extracted into one block.
    max_txs_per_block: usize,
}

impl Chain {
    pub fn new(
        store: Arc<dyn Store>,
        mempool: Arc<Mempool>,
        node_account: String,
        txs_per_block: usize,
        max_txs_per_block: usize,
    ) -> Self {
        let ledger = Ledger::new(store.clone());
        Chain {
            store,
            ledger,
            mempool,
            node_account,
            txs_per_block,
            max_txs_per_block,
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn mempool(&self) -> &Mempool {
        &self.mempool
    }

    /// Persists the genesis block on first start. Idempotent.
    pub fn init_genesis(&self) -> Result<(), ChainError> {
        if self.store.get(LAST_BLOCK_KEY)?.is_some() {
            return Ok(());
        }
        let genesis = Block::genesis();
        let json = serde_json::to_vec(&genesis)?;

        let mut batch = Batch::new();
        batch.put(block_key(&genesis.hash), json.clone());
        batch.put(LAST_BLOCK_KEY.to_vec(), json);
        self.store.write_batch(batch)?;

        info!(hash = %genesis.hash, "genesis block initialized");
        Ok(())
    }

    /// The most recently applied block.
    pub fn last_block(&self) -> Result<Block, ChainError> {
        let bytes = self
            .store
            .get(LAST_BLOCK_KEY)?
            .ok_or_else(|| ChainError::DatabaseError("no last block stored".to_string()))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn block_by_hash(&self, hash: &str) -> Result<Option<Block>, ChainError> {
        match self.store.get(&block_key(hash))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Account-state checks for one transfer. The nonce check is loose:
    /// any `nonce >= account.nonce` passes; exact sequencing is enforced by
    /// the mempool alone. The destination account is created if absent.
    pub fn check_account_state(&self, raw: &RawTransaction) -> Result<(), ChainError> {
        let sender = match self.ledger.get(&raw.from) {
            Ok(account) => account,
            Err(ChainError::UnknownAccount(_)) => {
                return Err(ChainError::UnknownSender(raw.from.clone()))
            }
            Err(e) => return Err(e),
        };

        if sender.balance < raw.value {
            return Err(ChainError::InsufficientFunds {
                address: raw.from.clone(),
                balance: sender.balance.to_string(),
            });
        }
        if sender.nonce > raw.nonce {
            return Err(ChainError::NonceTooLow {
                expected: sender.nonce,
                got: raw.nonce,
            });
        }

        self.ledger.ensure(&raw.to)
    }

    /// The single admission path for transactions, whether peer-received or
    /// RPC-submitted: fields → signature → account state → mempool. Returns
    /// the sealed transaction and its serialized form for rebroadcast.
    pub fn process_incoming(&self, payload: &str) -> Result<(Transaction, String), ChainError> {
        let raw: RawTransaction = serde_json::from_str(payload)?;

        validate_fields(&raw)?;
        verify_signature(&raw.message_hash(), &raw.signature, &raw.from)?;
        self.check_account_state(&raw)?;

        let current_nonce = self.ledger.get(&raw.from)?.nonce;
        let (tx, bytes) = Transaction::from_raw(raw)?;
        let serialized = String::from_utf8(bytes)
            .map_err(|e| ChainError::CodecError(format!("non-utf8 transaction: {}", e)))?;

        self.mempool.add(tx.clone(), current_nonce)?;
        info!(hash = %tx.hash, from = %tx.from, nonce = tx.nonce, "transaction admitted");
        Ok((tx, serialized))
    }

    /// Re-validation used for transactions carried inside a block: the same
    /// three checks as admission, without touching the mempool.
    fn check_block_transaction(&self, tx: &Transaction) -> Result<(), ChainError> {
        let raw = tx.to_raw();
        validate_fields(&raw)?;
        verify_signature(&raw.message_hash(), &raw.signature, &raw.from)?;
        self.check_account_state(&raw)
    }

    /// One production tick: promote matured future entries, then assemble a
    /// block if enough transactions are pending. Returns `None` when the
    /// threshold is not met.
    pub fn produce_block(&self) -> Result<Option<Block>, ChainError> {
        for account in self.mempool.accounts_with_future() {
            let nonce = match self.ledger.get(&account) {
                Ok(acc) => acc.nonce,
                Err(ChainError::UnknownAccount(_)) => 0,
                Err(e) => return Err(e),
            };
            self.mempool.sync_future_to_pending(&account, nonce);
        }

        if self.mempool.pending_len() < self.txs_per_block {
            return Ok(None);
        }

        let transactions = self.mempool.extract_for_block(self.max_txs_per_block);
        if transactions.is_empty() {
            return Ok(None);
        }

        let last = self.last_block()?;
        let timestamp = chrono::Utc::now().timestamp() as u64;
        let block = Block::assemble(
            last.number + 1,
            last.hash,
            timestamp,
            transactions,
            self.node_account.clone(),
        )?;

        info!(number = block.number, txs = block.transactions.len(), "block produced");
        Ok(Some(block))
    }

    /// Structural and per-transaction validation of a received block, in
    /// fixed order: hash, parent linkage, Merkle root, transactions. Any
    /// failure rejects the block as a whole.
    pub fn validate_block(&self, block: &Block) -> Result<(), ChainError> {
        let expected_hash = block.expected_hash();
        if block.hash != expected_hash {
            return Err(ChainError::HashMismatch {
                expected: expected_hash,
                got: block.hash.clone(),
            });
        }

        let last = self.last_block()?;
        if block.parent_hash != last.hash {
            return Err(ChainError::ParentMismatch {
                expected: last.hash,
                got: block.parent_hash.clone(),
            });
        }

        let expected_root = block.expected_merkle_root()?;
        if block.merkle_root != expected_root {
            return Err(ChainError::MerkleMismatch {
                expected: expected_root,
                got: block.merkle_root.clone(),
            });
        }

        for tx in &block.transactions {
            self.check_block_transaction(tx)
                .map_err(|e| ChainError::InvalidTransaction(format!("{}: {}", tx.hash, e)))?;
        }

        Ok(())
    }

    /// Applies a validated block: miner reward plus every transfer, staged
    /// into one batch together with the block record and the last-block
    /// pointer, committed atomically. Only then is the mempool cleaned.
    pub fn apply_block(&self, block: &Block) -> Result<(), ChainError> {
        let mut state = self.ledger.begin_block();
        state.credit(&block.miner, &BigUint::from(MINER_REWARD))?;

        for tx in &block.transactions {
            state
                .apply(&tx.from, &tx.to, &tx.value)
                .map_err(|e| ChainError::InvalidTransaction(format!("{}: {}", tx.hash, e)))?;
        }

        let block_json = serde_json::to_vec(block)?;
        let mut batch = Batch::new();
        batch.put(block_key(&block.hash), block_json.clone());
        batch.put(LAST_BLOCK_KEY.to_vec(), block_json);
        state.stage(&mut batch)?;
        self.store.write_batch(batch)?;

        self.mempool.clean_after_block(&block.transactions);

        info!(
            number = block.number,
            hash = %block.hash,
            txs = block.transactions.len(),
            miner = %block.miner,
            "block applied"
        );
        Ok(())
    }

    /// Full receipt path for a block, local or peer-sourced.
    pub fn process_block(&self, block: &Block) -> Result<(), ChainError> {
        self.validate_block(block)?;
        self.apply_block(block)
    }

    /// Routes one mediator frame. Returns the frame to rebroadcast to peers
    /// when the message was accepted.
    pub fn handle_frame(&self, frame: &WireFrame) -> Option<WireFrame> {
        match frame {
            WireFrame::Transaction(payload) => match self.process_incoming(payload) {
                Ok((_, serialized)) => Some(WireFrame::Transaction(serialized)),
                Err(e) => {
                    warn!(error = %e, "transaction rejected");
                    None
                }
            },
            WireFrame::Block(payload) => {
                let block: Block = match serde_json::from_str(payload) {
                    Ok(block) => block,
                    Err(e) => {
                        warn!(error = %e, "unparseable block");
                        return None;
                    }
                };
                match self.process_block(&block) {
                    Ok(()) => Some(WireFrame::Block(payload.clone())),
                    Err(e) => {
                        warn!(number = block.number, error = %e, "block rejected");
                        None
                    }
                }
            }
        }
    }
}

/// Drains one inbound mediator channel into the engine. Accepted messages
/// are rebroadcast through Ledger→P2P; when `acks` is set (the RPC lane),
/// they are also acknowledged back to the submitter. A failing message
/// never stops the loop.
pub async fn run_engine(
    chain: Arc<Chain>,
    mut inbound: FrameReceiver,
    outbound: FrameSender,
    acks: Option<FrameSender>,
) {
    while let Some(frame) = inbound.recv().await {
        let Some(rebroadcast) = chain.handle_frame(&frame) else {
            continue;
        };
        if let Some(acks) = &acks {
            if acks.send(rebroadcast.clone()).await.is_err() {
                warn!("ack channel closed");
            }
        }
        if outbound.send(rebroadcast).await.is_err() {
            warn!("broadcast channel closed, stopping engine loop");
            break;
        }
    }
}

/// The periodic block producer. Each tick assembles at most one block and
/// feeds it through the same engine path a peer-received block takes.
pub async fn run_producer(chain: Arc<Chain>, interval: Duration, to_engine: FrameSender) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        match chain.produce_block() {
            Ok(Some(block)) => {
                let payload = match serde_json::to_string(&block) {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(error = %e, "failed to encode produced block");
                        continue;
                    }
                };
                if to_engine.send(WireFrame::Block(payload)).await.is_err() {
                    warn!("engine channel closed, stopping producer");
                    break;
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "block production failed"),
        }
    }
}
