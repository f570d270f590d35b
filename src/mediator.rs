//! The internal message bus
//!
//! Four fixed, bounded channels connect the network, the ledger engine and
//! the RPC facade: P2P→Ledger, Ledger→P2P, RPC→Ledger and Ledger→RPC.
//! They are created exactly once at startup; senders are cloned into the
//! producing tasks and each receiver is handed to its single consumer task.
//! A full channel blocks the producer — deliberate backpressure, not an
//! error.

use crate::protocol::WireFrame;
use tokio::sync::mpsc;

/// Capacity of each mediator channel.
pub const CHANNEL_CAPACITY: usize = 100;

pub type FrameSender = mpsc::Sender<WireFrame>;
pub type FrameReceiver = mpsc::Receiver<WireFrame>;

/// Sending half of the bus. Cheap to clone; every task gets one.
#[derive(Clone)]
pub struct Mediator {
    pub p2p_to_ledger: FrameSender,
    pub ledger_to_p2p: FrameSender,
    pub rpc_to_ledger: FrameSender,
    pub ledger_to_rpc: FrameSender,
}

/// Receiving half of the bus. Each field is consumed by exactly one
/// long-lived task at startup.
pub struct MediatorReceivers {
    pub p2p_to_ledger: FrameReceiver,
    pub ledger_to_p2p: FrameReceiver,
    pub rpc_to_ledger: FrameReceiver,
    pub ledger_to_rpc: FrameReceiver,
}

impl Mediator {
    pub fn new() -> (Mediator, MediatorReceivers) {
        let (p2p_to_ledger_tx, p2p_to_ledger_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (ledger_to_p2p_tx, ledger_to_p2p_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (rpc_to_ledger_tx, rpc_to_ledger_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (ledger_to_rpc_tx, ledger_to_rpc_rx) = mpsc::channel(CHANNEL_CAPACITY);

        (
            Mediator {
                p2p_to_ledger: p2p_to_ledger_tx,
                ledger_to_p2p: ledger_to_p2p_tx,
                rpc_to_ledger: rpc_to_ledger_tx,
                ledger_to_rpc: ledger_to_rpc_tx,
            },
            MediatorReceivers {
                p2p_to_ledger: p2p_to_ledger_rx,
                ledger_to_p2p: ledger_to_p2p_rx,
                rpc_to_ledger: rpc_to_ledger_rx,
                ledger_to_rpc: ledger_to_rpc_rx,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channels_are_fifo() {
        let (mediator, mut receivers) = Mediator::new();

        for i in 0..3 {
            mediator
                .p2p_to_ledger
                .send(WireFrame::Transaction(format!("tx-{}", i)))
                .await
                .unwrap();
        }

        for i in 0..3 {
            let frame = receivers.p2p_to_ledger.recv().await.unwrap();
            assert_eq!(frame, WireFrame::Transaction(format!("tx-{}", i)));
        }
    }

    #[tokio::test]
    async fn test_channels_are_bounded() {
        let (mediator, _receivers) = Mediator::new();

        for i in 0..CHANNEL_CAPACITY {
            mediator
                .ledger_to_p2p
                .try_send(WireFrame::Block(format!("b-{}", i)))
                .unwrap();
        }

        // The 101st enqueue must block (here: fail the non-blocking probe).
        let overflow = mediator
            .ledger_to_p2p
            .try_send(WireFrame::Block("overflow".to_string()));
        assert!(overflow.is_err());
    }

    #[tokio::test]
    async fn test_channels_are_independent() {
        let (mediator, mut receivers) = Mediator::new();

        mediator
            .rpc_to_ledger
            .send(WireFrame::Transaction("rpc".to_string()))
            .await
            .unwrap();

        // Nothing crosses channels.
        assert!(receivers.p2p_to_ledger.try_recv().is_err());
        assert_eq!(
            receivers.rpc_to_ledger.recv().await.unwrap(),
            WireFrame::Transaction("rpc".to_string())
        );
    }
}
