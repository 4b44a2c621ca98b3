//! Ledger boundary
//!
//! The orchestrator only needs three things from a ledger: submit a signed
//! transaction, wait for it to be included, and run a read-only call.
//! Everything behind this trait (transport, signing, nonces) is external.

use crate::models::{TxReceipt, TxRequest};
use alloy_primitives::{Address, Bytes, TxHash};
use alloy_sol_types::{Panic, Revert, SolError};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

pub mod memory;
pub mod rpc;

pub use memory::{InMemoryLedger, ScriptedOutcome};
pub use rpc::JsonRpcLedger;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Network or node failure; safe to retry for reads only.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The ledger refused the transaction before execution (gas, nonce, signer).
    #[error("submission rejected: {0}")]
    Rejected(String),

    /// The contract call reverted, either at submission or once mined.
    #[error("reverted: {}", crate::error::revert_text(.reason))]
    Reverted {
        hash: Option<TxHash>,
        reason: Option<String>,
    },

    #[error("inclusion of {hash} not observed within {waited:?}")]
    Timeout { hash: TxHash, waited: Duration },

    #[error("malformed ledger response: {0}")]
    Decode(String),
}

impl LedgerError {
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::Transport(_))
    }
}

/// Trait for a distributed ledger reachable by the orchestrator
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Account that signs submitted transactions.
    fn sender(&self) -> Address;

    /// Broadcast a transaction and return its hash without waiting.
    async fn submit_transaction(&self, tx: TxRequest) -> Result<TxHash, LedgerError>;

    /// Resolve once the transaction is included. May wait indefinitely;
    /// callers bound the wait.
    async fn wait_for_inclusion(&self, hash: TxHash) -> Result<TxReceipt, LedgerError>;

    /// Execute a read-only call against the latest state.
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, LedgerError>;
}

/// Submit `tx` and block until it is included or `bound` elapses.
///
/// A receipt with `success == false` is reported as `Reverted`. Elapsing the
/// bound does not cancel the broadcast transaction.
pub async fn submit_and_wait(
    ledger: &dyn Ledger,
    tx: TxRequest,
    bound: Duration,
) -> Result<TxReceipt, LedgerError> {
    let to = tx.to;
    let hash = ledger.submit_transaction(tx).await?;
    info!(%hash, %to, "Transaction broadcast");

    let receipt = match tokio::time::timeout(bound, ledger.wait_for_inclusion(hash)).await {
        Ok(result) => result?,
        Err(_) => {
            warn!(%hash, waited = ?bound, "Inclusion not observed before bound");
            return Err(LedgerError::Timeout {
                hash,
                waited: bound,
            });
        }
    };

    if !receipt.success {
        warn!(%hash, block = ?receipt.block_number, "Transaction reverted");
        return Err(LedgerError::Reverted {
            hash: Some(hash),
            reason: None,
        });
    }

    debug!(%hash, block = ?receipt.block_number, "Transaction included");
    Ok(receipt)
}

/// Decode an ABI `Error(string)` or `Panic(uint256)` revert payload.
pub fn decode_revert_reason(data: &[u8]) -> Option<String> {
    if data.is_empty() {
        return None;
    }
    if let Ok(revert) = Revert::abi_decode(data) {
        return Some(revert.reason);
    }
    if let Ok(panic) = Panic::abi_decode(data) {
        return Some(panic.to_string());
    }
    alloy_sol_types::decode_revert_reason(data)
}
