//! Guarded two-asset deposits
//!
//! Requests are checked locally before anything is broadcast. The pool
//! contract enforces the minimum amounts; this side refuses requests that are
//! inconsistent or already past their deadline. A rejected deposit is never
//! resubmitted here.

use crate::contracts::encode_add_liquidity;
use crate::error::OrchestrationError;
use crate::ledger::{submit_and_wait, Ledger, LedgerError};
use crate::models::{LiquidityRequest, PoolRef, TxReceipt, TxRequest};
use crate::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub struct LiquidityProvisioner {
    ledger: Arc<dyn Ledger>,
    inclusion_timeout: Duration,
}

impl LiquidityProvisioner {
    pub fn new(ledger: Arc<dyn Ledger>, inclusion_timeout: Duration) -> Self {
        Self {
            ledger,
            inclusion_timeout,
        }
    }

    /// Submit `req` to `pool`. Both token allowances must already be in place.
    pub async fn add_liquidity(&self, pool: &PoolRef, req: &LiquidityRequest) -> Result<TxReceipt> {
        pool.validate()?;
        req.validate_at(unix_now())?;

        info!(
            pool = %pool.address,
            amount_a_desired = %req.amount_a_desired,
            amount_b_desired = %req.amount_b_desired,
            amount_a_min = %req.amount_a_min,
            amount_b_min = %req.amount_b_min,
            recipient = %req.recipient,
            deadline = req.deadline,
            "Submitting liquidity deposit"
        );

        let tx = TxRequest {
            from: self.ledger.sender(),
            to: pool.address,
            data: encode_add_liquidity(req),
        };

        let receipt = submit_and_wait(self.ledger.as_ref(), tx, self.inclusion_timeout)
            .await
            .map_err(deposit_error)?;

        info!(pool = %pool.address, hash = %receipt.hash, "Liquidity deposit included");
        Ok(receipt)
    }
}

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    Utc::now().timestamp().max(0) as u64
}

fn deposit_error(error: LedgerError) -> OrchestrationError {
    match error {
        LedgerError::Reverted { reason, .. } => OrchestrationError::LiquidityRejected { reason },
        LedgerError::Rejected(message) => OrchestrationError::LiquidityRejected {
            reason: Some(message),
        },
        LedgerError::Timeout { hash, waited } => {
            OrchestrationError::InclusionTimeout { hash, waited }
        }
        other => OrchestrationError::Ledger(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::ISimpleSwap;
    use crate::ledger::{InMemoryLedger, ScriptedOutcome};
    use crate::models::TokenRef;
    use alloy_primitives::{Address, U256};
    use alloy_sol_types::SolCall;

    fn pool() -> PoolRef {
        PoolRef::new(
            Address::repeat_byte(0x50),
            TokenRef::new(Address::repeat_byte(0x0a), 18),
            TokenRef::new(Address::repeat_byte(0x0b), 18),
        )
        .unwrap()
    }

    fn request(a_min: u64, b_min: u64, deadline: u64) -> LiquidityRequest {
        LiquidityRequest {
            amount_a_desired: U256::from(100),
            amount_b_desired: U256::from(200),
            amount_a_min: U256::from(a_min),
            amount_b_min: U256::from(b_min),
            recipient: Address::repeat_byte(0x01),
            deadline,
        }
    }

    async fn funded_ledger() -> Arc<InMemoryLedger> {
        let owner = Address::repeat_byte(0x01);
        let pool = pool();
        let ledger = Arc::new(InMemoryLedger::new(owner));
        ledger.add_pool(pool).await;
        for token in pool.tokens() {
            ledger.set_balance(token.address, owner, U256::from(1_000)).await;
            ledger
                .set_allowance(token.address, owner, pool.address, U256::from(1_000))
                .await;
        }
        ledger
    }

    #[tokio::test]
    async fn test_min_above_desired_is_never_submitted() {
        let ledger = funded_ledger().await;
        let provisioner = LiquidityProvisioner::new(ledger.clone(), Duration::from_secs(30));
        let deadline = unix_now() + 600;

        for req in [request(101, 180, deadline), request(90, 201, deadline)] {
            let result = provisioner.add_liquidity(&pool(), &req).await;
            assert!(matches!(result, Err(OrchestrationError::InvalidRequest(_))));
        }
        assert!(ledger.submitted().await.is_empty());
    }

    #[tokio::test]
    async fn test_past_deadline_is_never_submitted() {
        let ledger = funded_ledger().await;
        let provisioner = LiquidityProvisioner::new(ledger.clone(), Duration::from_secs(30));

        for deadline in [0, unix_now().saturating_sub(1)] {
            let result = provisioner
                .add_liquidity(&pool(), &request(90, 180, deadline))
                .await;
            assert!(matches!(result, Err(OrchestrationError::InvalidRequest(_))));
        }
        assert!(ledger.submitted().await.is_empty());
    }

    #[tokio::test]
    async fn test_deposit_submits_exact_parameters() {
        let ledger = funded_ledger().await;
        let provisioner = LiquidityProvisioner::new(ledger.clone(), Duration::from_secs(30));
        let req = request(90, 180, unix_now() + 600);

        let receipt = provisioner.add_liquidity(&pool(), &req).await.unwrap();
        assert!(receipt.success);

        let submitted = ledger.submitted().await;
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].to, pool().address);

        let call = ISimpleSwap::addLiquidityCall::abi_decode(&submitted[0].data).unwrap();
        assert_eq!(call.amountADesired, req.amount_a_desired);
        assert_eq!(call.amountBDesired, req.amount_b_desired);
        assert_eq!(call.amountAMin, req.amount_a_min);
        assert_eq!(call.amountBMin, req.amount_b_min);
        assert_eq!(call.to, req.recipient);
        assert_eq!(call.deadline, U256::from(req.deadline));
    }

    #[tokio::test]
    async fn test_pool_revert_is_not_retried() {
        let ledger = funded_ledger().await;
        ledger
            .script(ScriptedOutcome::Revert(Some(
                "SimpleSwap: INSUFFICIENT_A_AMOUNT".to_string(),
            )))
            .await;
        let provisioner = LiquidityProvisioner::new(ledger.clone(), Duration::from_secs(30));

        let result = provisioner
            .add_liquidity(&pool(), &request(90, 180, unix_now() + 600))
            .await;

        match result {
            Err(OrchestrationError::LiquidityRejected { reason }) => {
                assert_eq!(reason.as_deref(), Some("SimpleSwap: INSUFFICIENT_A_AMOUNT"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(ledger.submitted().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_inclusion_is_a_timeout_not_a_rejection() {
        let ledger = funded_ledger().await;
        ledger.script(ScriptedOutcome::NeverIncluded).await;
        let provisioner = LiquidityProvisioner::new(ledger, Duration::from_secs(30));

        let result = provisioner
            .add_liquidity(&pool(), &request(90, 180, unix_now() + 600))
            .await;

        assert!(matches!(
            result,
            Err(OrchestrationError::InclusionTimeout { .. })
        ));
    }
}
