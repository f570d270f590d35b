//! HTTP/JSON facade for external callers
//!
//! Read-only account and block queries go straight to the ledger; signed
//! transaction submissions are framed and pushed onto the RPC→Ledger
//! channel, taking exactly the admission path a peer-received transaction
//! takes.

use crate::chain::Chain;
use crate::crypto::{hash256_hex, is_valid_address};
use crate::error::ChainError;
use crate::mediator::{FrameReceiver, FrameSender};
use crate::protocol::WireFrame;
use crate::transaction::RawTransaction;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

pub struct RpcContext {
    pub chain: Arc<Chain>,
    /// Sender half of RPC→Ledger.
    pub submit: FrameSender,
}

#[derive(Debug, Serialize)]
pub struct AccountReply {
    pub address: String,
    pub balance: String,
    pub nonce: u64,
}

#[derive(Debug, Serialize)]
pub struct SubmitReply {
    #[serde(rename = "txHash")]
    pub tx_hash: String,
}

#[derive(Debug, Serialize)]
pub struct NewAccountReply {
    pub address: String,
    #[serde(rename = "privateKey")]
    pub private_key: String,
}

type HandlerError = (StatusCode, String);

fn internal(e: impl std::fmt::Display) -> HandlerError {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

pub fn build_router(ctx: Arc<RpcContext>) -> Router {
    Router::new()
        .route("/api/account", post(new_account))
        .route("/api/account/:address", get(get_account))
        .route("/api/block/latest", get(get_latest_block))
        .route("/api/block/height", get(get_height))
        .route("/api/transaction", post(submit_transaction))
        .with_state(ctx)
}

async fn get_account(
    State(ctx): State<Arc<RpcContext>>,
    Path(address): Path<String>,
) -> Result<Json<AccountReply>, HandlerError> {
    if !is_valid_address(&address) {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("invalid address format: {}", address),
        ));
    }

    match ctx.chain.ledger().get(&address) {
        Ok(account) => Ok(Json(AccountReply {
            address,
            balance: account.balance.to_string(),
            nonce: account.nonce,
        })),
        Err(ChainError::UnknownAccount(_)) => {
            Err((StatusCode::NOT_FOUND, format!("no such account: {}", address)))
        }
        Err(e) => Err(internal(e)),
    }
}

/// Generates a fresh keypair and registers its zero account. The secret
/// key is returned to the caller and kept nowhere else.
async fn new_account(
    State(ctx): State<Arc<RpcContext>>,
) -> Result<Json<NewAccountReply>, HandlerError> {
    let keypair = crate::crypto::KeyPair::generate();
    let address = keypair.address();
    ctx.chain.ledger().ensure(&address).map_err(internal)?;

    Ok(Json(NewAccountReply {
        address,
        private_key: keypair.secret_hex(),
    }))
}

async fn get_latest_block(
    State(ctx): State<Arc<RpcContext>>,
) -> Result<Json<crate::block::Block>, HandlerError> {
    ctx.chain.last_block().map(Json).map_err(internal)
}

async fn get_height(State(ctx): State<Arc<RpcContext>>) -> Result<Json<u64>, HandlerError> {
    ctx.chain
        .last_block()
        .map(|block| Json(block.number))
        .map_err(internal)
}

/// Accepts a signed transaction and hands it to the ledger engine. The
/// returned hash is computed up front from the canonical encoding; the
/// engine validates asynchronously and drops rejects.
async fn submit_transaction(
    State(ctx): State<Arc<RpcContext>>,
    Json(raw): Json<RawTransaction>,
) -> Result<Json<SubmitReply>, HandlerError> {
    let bytes = raw.canonical_bytes().map_err(internal)?;
    let tx_hash = format!("0x{}", hash256_hex(&bytes));
    let payload = String::from_utf8(bytes).map_err(internal)?;

    ctx.submit
        .send(WireFrame::Transaction(payload))
        .await
        .map_err(|_| {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "ledger engine unavailable".to_string(),
            )
        })?;

    Ok(Json(SubmitReply { tx_hash }))
}

pub async fn run_rpc_server(ctx: Arc<RpcContext>, port: u16) -> Result<(), ChainError> {
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
        .await
        .map_err(|e| ChainError::NetworkError(format!("API port {} unavailable: {}", port, e)))?;
    info!(port, "RPC server started");

    axum::serve(listener, build_router(ctx))
        .await
        .map_err(|e| ChainError::NetworkError(e.to_string()))
}

/// Drains Ledger→RPC so admission acknowledgements can never back the
/// engine up against a bounded channel.
pub async fn run_ack_drain(mut acks: FrameReceiver) {
    while let Some(frame) = acks.recv().await {
        debug!(tag = frame.tag(), "rpc acknowledgement");
    }
}
