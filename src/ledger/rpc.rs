//! Ethereum JSON-RPC ledger
//!
//! Transactions are signed by the node (`eth_sendTransaction`), so no key
//! material passes through this process.

use super::{decode_revert_reason, Ledger, LedgerError};
use crate::error::OrchestrationError;
use crate::models::{TxReceipt, TxRequest};
use alloy_json_rpc::ErrorPayload;
use alloy_primitives::{Address, Bytes, TxHash, TxKind};
use alloy_rpc_client::{ClientBuilder, ReqwestClient};
use alloy_rpc_types_eth::{
    BlockNumberOrTag, TransactionInput, TransactionReceipt, TransactionRequest,
};
use alloy_transport::{RpcError, TransportErrorKind};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, trace};

pub struct JsonRpcLedger {
    client: ReqwestClient,
    sender: Address,
    poll_interval: Duration,
}

impl JsonRpcLedger {
    pub fn new(
        url: impl Into<String>,
        sender: Address,
        poll_interval: Duration,
    ) -> crate::Result<Self> {
        let url = url.into();
        let endpoint = url
            .parse()
            .map_err(|e| OrchestrationError::Config(format!("invalid RPC URL {}: {}", url, e)))?;

        let http = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client: ClientBuilder::default().http_with_client(http, endpoint),
            sender,
            poll_interval,
        })
    }

    /// Like [`JsonRpcLedger::new`], but signs with the node's first unlocked
    /// account when no sender is given.
    pub async fn connect(
        url: impl Into<String>,
        sender: Option<Address>,
        poll_interval: Duration,
    ) -> crate::Result<Self> {
        let mut ledger = Self::new(url, Address::ZERO, poll_interval)?;

        ledger.sender = match sender {
            Some(sender) => sender,
            None => {
                let accounts = ledger.accounts().await.map_err(|e| {
                    OrchestrationError::QueryFailed(format!("eth_accounts: {}", e))
                })?;
                let first = accounts.first().copied().ok_or_else(|| {
                    OrchestrationError::Config(
                        "no sender configured and the node exposes no accounts".to_string(),
                    )
                })?;
                debug!(sender = %first, "Using node's first account as sender");
                first
            }
        };

        Ok(ledger)
    }

    pub async fn accounts(&self) -> Result<Vec<Address>, LedgerError> {
        trace!(method = "eth_accounts", "JSON-RPC request");
        self.client
            .request_noparams("eth_accounts")
            .await
            .map_err(|e| classify_rpc_error("eth_accounts", e))
    }

    /// Replay a mined, failed transaction to recover its revert reason.
    async fn replay_revert(&self, hash: TxHash, block: Option<u64>) -> Option<String> {
        // The mined transaction is read back as the call request that replays it.
        let mined: Option<TransactionRequest> = self
            .client
            .request("eth_getTransactionByHash", (hash,))
            .await
            .ok()?;
        let mined = mined?;

        let replay = TransactionRequest {
            from: mined.from,
            to: mined.to,
            input: mined.input,
            ..Default::default()
        };
        let block = block
            .map(BlockNumberOrTag::Number)
            .unwrap_or(BlockNumberOrTag::Latest);

        let result: Result<Bytes, _> = self.client.request("eth_call", (replay, block)).await;
        match result.map_err(|e| classify_rpc_error("eth_call", e)) {
            Err(LedgerError::Reverted { reason, .. }) => reason,
            _ => None,
        }
    }
}

fn classify_rpc_error(method: &str, error: RpcError<TransportErrorKind>) -> LedgerError {
    match error {
        RpcError::ErrorResp(payload) => classify_error_payload(&payload),
        RpcError::Transport(TransportErrorKind::HttpError(http))
            if http.status == 429 || http.status >= 500 =>
        {
            LedgerError::Transport(format!("{} returned HTTP {}", method, http.status))
        }
        RpcError::Transport(TransportErrorKind::HttpError(http)) => LedgerError::Rejected(
            format!("{} returned HTTP {}: {}", method, http.status, http.body),
        ),
        RpcError::Transport(kind) => {
            LedgerError::Transport(format!("{} failed: {}", method, kind))
        }
        RpcError::NullResp => LedgerError::Transport(format!("{} returned null", method)),
        other => LedgerError::Decode(format!("{} response: {}", method, other)),
    }
}

fn classify_error_payload(payload: &ErrorPayload) -> LedgerError {
    let revert_data = match payload.try_data_as::<Value>() {
        Some(Ok(Value::String(s))) => Some(s),
        Some(Ok(Value::Object(map))) => map
            .get("data")
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
    .and_then(|s| hex::decode(s.trim_start_matches("0x")).ok());

    if let Some(data) = revert_data {
        return LedgerError::Reverted {
            hash: None,
            reason: decode_revert_reason(&data),
        };
    }

    // Geth and Hardhat report reverts as code 3 or with a textual marker.
    if payload.code == 3 || payload.message.contains("revert") {
        return LedgerError::Reverted {
            hash: None,
            reason: Some(payload.message.to_string()),
        };
    }

    LedgerError::Rejected(format!("{} (code {})", payload.message, payload.code))
}

#[async_trait]
impl Ledger for JsonRpcLedger {
    fn sender(&self) -> Address {
        self.sender
    }

    async fn submit_transaction(&self, tx: TxRequest) -> Result<TxHash, LedgerError> {
        let request = TransactionRequest {
            from: Some(tx.from),
            to: Some(TxKind::Call(tx.to)),
            input: TransactionInput::new(tx.data),
            ..Default::default()
        };

        trace!(method = "eth_sendTransaction", to = %tx.to, "JSON-RPC request");
        self.client
            .request("eth_sendTransaction", (request,))
            .await
            .map_err(|e| classify_rpc_error("eth_sendTransaction", e))
    }

    async fn wait_for_inclusion(&self, hash: TxHash) -> Result<TxReceipt, LedgerError> {
        loop {
            let polled: Result<Option<TransactionReceipt>, _> = self
                .client
                .request("eth_getTransactionReceipt", (hash,))
                .await;

            let polled = polled.map_err(|e| classify_rpc_error("eth_getTransactionReceipt", e));
            let receipt = match polled {
                Ok(receipt) => receipt,
                // Polling is a read; a dropped request is simply retried next tick.
                Err(LedgerError::Transport(e)) => {
                    debug!(%hash, error = %e, "Receipt poll failed");
                    None
                }
                Err(e) => return Err(e),
            };

            if let Some(receipt) = receipt {
                let block_number = receipt.block_number;

                if !receipt.status() {
                    let reason = self.replay_revert(hash, block_number).await;
                    return Err(LedgerError::Reverted {
                        hash: Some(receipt.transaction_hash),
                        reason,
                    });
                }

                return Ok(TxReceipt {
                    hash: receipt.transaction_hash,
                    success: true,
                    block_number,
                });
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, LedgerError> {
        let request = TransactionRequest {
            to: Some(TxKind::Call(to)),
            input: TransactionInput::new(data),
            ..Default::default()
        };

        trace!(method = "eth_call", %to, "JSON-RPC request");
        self.client
            .request("eth_call", (request, BlockNumberOrTag::Latest))
            .await
            .map_err(|e| classify_rpc_error("eth_call", e))
    }
}
