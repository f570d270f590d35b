//! Integration tests for the mediator-routed engine loop

use emberchain::account::Account;
use emberchain::chain::{run_engine, Chain};
use emberchain::crypto::KeyPair;
use emberchain::mediator::Mediator;
use emberchain::mempool::Mempool;
use emberchain::protocol::WireFrame;
use emberchain::store::{MemoryStore, Store};
use emberchain::transaction::RawTransaction;
use num_bigint::BigUint;
use std::sync::Arc;
use std::time::Duration;

const MINER: &str = "0x00000000000000000000000000000000000000ff";
const DEST: &str = "0x00000000000000000000000000000000000000b2";

fn memory_chain(threshold: usize) -> Arc<Chain> {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let chain = Chain::new(
        store,
        Arc::new(Mempool::new()),
        MINER.to_string(),
        threshold,
        10,
    );
    chain.init_genesis().unwrap();
    Arc::new(chain)
}

#[tokio::test]
async fn test_engine_routes_transactions_and_blocks() {
    let chain = memory_chain(2);
    let alice = KeyPair::generate();
    chain
        .ledger()
        .put(&alice.address(), &Account::with_balance(BigUint::from(100u32)))
        .unwrap();

    let (mediator, mut receivers) = Mediator::new();
    tokio::spawn(run_engine(
        chain.clone(),
        receivers.p2p_to_ledger,
        mediator.ledger_to_p2p.clone(),
        None,
    ));

    // A valid peer transaction is admitted and rebroadcast.
    let raw = RawTransaction::signed(&alice, DEST, BigUint::from(10u32), 1).unwrap();
    let payload = serde_json::to_string(&raw).unwrap();
    mediator
        .p2p_to_ledger
        .send(WireFrame::Transaction(payload))
        .await
        .unwrap();

    let rebroadcast = receivers.ledger_to_p2p.recv().await.unwrap();
    let WireFrame::Transaction(forwarded) = rebroadcast else {
        panic!("expected a transaction frame");
    };
    let forwarded_raw: RawTransaction = serde_json::from_str(&forwarded).unwrap();
    assert_eq!(forwarded_raw, raw);
    assert_eq!(chain.mempool().pending_len(), 1);

    // A garbled transaction is logged and dropped, not rebroadcast.
    mediator
        .p2p_to_ledger
        .send(WireFrame::Transaction("not json".to_string()))
        .await
        .unwrap();

    // Second valid transfer, then a produced block fed through the same
    // engine path a peer-received block takes.
    let raw2 = RawTransaction::signed(&alice, DEST, BigUint::from(10u32), 2).unwrap();
    mediator
        .p2p_to_ledger
        .send(WireFrame::Transaction(serde_json::to_string(&raw2).unwrap()))
        .await
        .unwrap();
    let second = receivers.ledger_to_p2p.recv().await.unwrap();
    assert!(matches!(second, WireFrame::Transaction(_)));

    let block = chain.produce_block().unwrap().expect("threshold met");
    mediator
        .p2p_to_ledger
        .send(WireFrame::Block(serde_json::to_string(&block).unwrap()))
        .await
        .unwrap();

    let applied = receivers.ledger_to_p2p.recv().await.unwrap();
    assert!(matches!(applied, WireFrame::Block(_)));
    assert_eq!(chain.last_block().unwrap().number, 2);
    assert_eq!(
        chain.ledger().get(DEST).unwrap().balance,
        BigUint::from(20u32)
    );

    // The bad frame never produced a rebroadcast.
    assert!(tokio::time::timeout(
        Duration::from_millis(100),
        receivers.ledger_to_p2p.recv()
    )
    .await
    .is_err());
}

#[tokio::test]
async fn test_rpc_lane_acknowledges_accepted_submissions() {
    let chain = memory_chain(5);
    let alice = KeyPair::generate();
    chain
        .ledger()
        .put(&alice.address(), &Account::with_balance(BigUint::from(100u32)))
        .unwrap();

    let (mediator, mut receivers) = Mediator::new();
    tokio::spawn(run_engine(
        chain.clone(),
        receivers.rpc_to_ledger,
        mediator.ledger_to_p2p.clone(),
        Some(mediator.ledger_to_rpc.clone()),
    ));

    let raw = RawTransaction::signed(&alice, DEST, BigUint::from(5u32), 1).unwrap();
    mediator
        .rpc_to_ledger
        .send(WireFrame::Transaction(serde_json::to_string(&raw).unwrap()))
        .await
        .unwrap();

    // The accepted submission is both acknowledged and gossiped.
    let ack = receivers.ledger_to_rpc.recv().await.unwrap();
    assert!(matches!(ack, WireFrame::Transaction(_)));
    let gossip = receivers.ledger_to_p2p.recv().await.unwrap();
    assert!(matches!(gossip, WireFrame::Transaction(_)));
}
