//! Spend authorization management
//!
//! Reads the current allowance first and only submits an approval when it
//! falls short. Approvals set the exact required amount, never an unlimited one.

use crate::balances::BalanceInspector;
use crate::contracts::encode_approve;
use crate::error::OrchestrationError;
use crate::ledger::{submit_and_wait, Ledger, LedgerError};
use crate::models::{AllowanceRecord, Amount, TokenRef, TxReceipt, TxRequest};
use crate::Result;
use alloy_primitives::Address;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowanceOutcome {
    /// Existing allowance already covered the requirement; nothing submitted.
    AlreadySufficient(AllowanceRecord),
    /// An approval transaction was included.
    Approved {
        record: AllowanceRecord,
        receipt: TxReceipt,
    },
}

impl AllowanceOutcome {
    pub fn receipt(&self) -> Option<&TxReceipt> {
        match self {
            AllowanceOutcome::AlreadySufficient(_) => None,
            AllowanceOutcome::Approved { receipt, .. } => Some(receipt),
        }
    }

    pub fn record(&self) -> &AllowanceRecord {
        match self {
            AllowanceOutcome::AlreadySufficient(record) => record,
            AllowanceOutcome::Approved { record, .. } => record,
        }
    }
}

pub struct AllowanceManager {
    ledger: Arc<dyn Ledger>,
    inspector: BalanceInspector,
    inclusion_timeout: Duration,
}

impl AllowanceManager {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        inspector: BalanceInspector,
        inclusion_timeout: Duration,
    ) -> Self {
        Self {
            ledger,
            inspector,
            inclusion_timeout,
        }
    }

    /// Make sure `spender` may move at least `required` of `token` for `owner`.
    pub async fn ensure_allowance(
        &self,
        owner: Address,
        token: &TokenRef,
        spender: Address,
        required: Amount,
    ) -> Result<AllowanceOutcome> {
        if owner != self.ledger.sender() {
            return Err(OrchestrationError::InvalidRequest(format!(
                "owner {} is not the signing account {}",
                owner,
                self.ledger.sender()
            )));
        }

        let current = self.inspector.get_allowance(owner, spender, token).await?;
        if current >= required {
            info!(
                token = %token.address,
                %spender,
                current = %current,
                required = %required,
                "Allowance already sufficient, skipping approval"
            );
            return Ok(AllowanceOutcome::AlreadySufficient(AllowanceRecord {
                owner,
                spender,
                token: token.address,
                amount: current,
            }));
        }

        info!(
            token = %token.address,
            %spender,
            current = %current,
            required = %required,
            "Submitting approval"
        );

        let tx = TxRequest {
            from: owner,
            to: token.address,
            data: encode_approve(spender, required),
        };

        let receipt = submit_and_wait(self.ledger.as_ref(), tx, self.inclusion_timeout)
            .await
            .map_err(|e| approval_error(token.address, e))?;

        info!(token = %token.address, hash = %receipt.hash, "Approval included");

        Ok(AllowanceOutcome::Approved {
            record: AllowanceRecord {
                owner,
                spender,
                token: token.address,
                amount: required,
            },
            receipt,
        })
    }
}

fn approval_error(token: Address, error: LedgerError) -> OrchestrationError {
    match error {
        LedgerError::Reverted { reason, .. } => OrchestrationError::ApprovalRejected { token, reason },
        LedgerError::Rejected(message) => OrchestrationError::ApprovalRejected {
            token,
            reason: Some(message),
        },
        LedgerError::Timeout { hash, waited } => {
            OrchestrationError::ApprovalTimeout { token, hash, waited }
        }
        other => OrchestrationError::Ledger(other),
    }
}
