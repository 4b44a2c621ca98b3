//! Verifier contract client
//!
//! Marshals the attestation parameters verbatim and reports the receipt.
//! Whether the claim is economically correct is decided on-chain only.

use crate::contracts::encode_verify;
use crate::error::OrchestrationError;
use crate::ledger::{submit_and_wait, Ledger, LedgerError};
use crate::models::{TxReceipt, TxRequest, VerificationRequest};
use crate::Result;
use alloy_primitives::Address;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub struct VerificationClient {
    ledger: Arc<dyn Ledger>,
    verifier: Address,
    inclusion_timeout: Duration,
}

impl VerificationClient {
    pub fn new(ledger: Arc<dyn Ledger>, verifier: Address, inclusion_timeout: Duration) -> Self {
        Self {
            ledger,
            verifier,
            inclusion_timeout,
        }
    }

    pub fn verifier(&self) -> Address {
        self.verifier
    }

    /// Submit one attestation. Claims are not idempotent, so a failure is
    /// returned to the caller instead of being retried.
    pub async fn verify(&self, req: &VerificationRequest) -> Result<TxReceipt> {
        info!(
            verifier = %self.verifier,
            pool = %req.pool,
            amount_a = %req.amount_a,
            amount_b = %req.amount_b,
            amount_in = %req.amount_in,
            author = %req.author,
            "Submitting verification"
        );

        let tx = TxRequest {
            from: self.ledger.sender(),
            to: self.verifier,
            data: encode_verify(req),
        };

        let receipt = submit_and_wait(self.ledger.as_ref(), tx, self.inclusion_timeout)
            .await
            .map_err(verification_error)?;

        info!(hash = %receipt.hash, "Verification included");
        Ok(receipt)
    }
}

fn verification_error(error: LedgerError) -> OrchestrationError {
    match error {
        LedgerError::Reverted { reason, .. } => OrchestrationError::VerificationRejected { reason },
        LedgerError::Rejected(message) => OrchestrationError::VerificationRejected {
            reason: Some(message),
        },
        LedgerError::Timeout { hash, waited } => {
            OrchestrationError::InclusionTimeout { hash, waited }
        }
        other => OrchestrationError::Ledger(other),
    }
}

//
// ================= Tests =================
//
