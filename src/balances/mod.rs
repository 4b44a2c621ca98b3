//! Read-only balance and allowance queries
//!
//! Reads are idempotent, so transport failures are retried with exponential
//! backoff. Independent reads are issued concurrently.

use crate::contracts::{decode_amount, encode_allowance, encode_balance_of};
use crate::error::OrchestrationError;
use crate::ledger::{Ledger, LedgerError};
use crate::models::{Amount, PoolRef, TokenRef};
use crate::Result;
use alloy_primitives::{Address, Bytes};
use backoff::{exponential::ExponentialBackoffBuilder, future::retry_notify, ExponentialBackoff};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry behaviour for idempotent reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadRetry {
    /// Retries after the first attempt (default: 3)
    pub max_retries: usize,
    /// Initial backoff delay (default: 100ms)
    pub initial_backoff: Duration,
    /// Maximum backoff delay (default: 2s)
    pub max_backoff: Duration,
}

impl Default for ReadRetry {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl ReadRetry {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delays double from `initial_backoff` up to `max_backoff`. The retry
    /// count, not elapsed time, ends the sequence.
    pub fn policy(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_backoff)
            .with_multiplier(2.0)
            .with_randomization_factor(0.0)
            .with_max_interval(self.max_backoff)
            .with_max_elapsed_time(None)
            .build()
    }
}

/// Token and LP balances of one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionReport {
    pub account: Address,
    pub token_a: Amount,
    pub token_b: Amount,
    pub lp: Amount,
}

#[derive(Clone)]
pub struct BalanceInspector {
    ledger: Arc<dyn Ledger>,
    retry: ReadRetry,
}

impl BalanceInspector {
    pub fn new(ledger: Arc<dyn Ledger>, retry: ReadRetry) -> Self {
        Self { ledger, retry }
    }

    /// Balance of every token in `tokens` held by `account`.
    pub async fn get_balances(
        &self,
        account: Address,
        tokens: &[TokenRef],
    ) -> Result<BTreeMap<Address, Amount>> {
        let reads = tokens.iter().map(|token| async move {
            let amount = self.balance_of(token.address, account).await?;
            Ok::<_, OrchestrationError>((token.address, amount))
        });

        Ok(try_join_all(reads).await?.into_iter().collect())
    }

    /// Allowance `owner` has granted `spender` on `token`.
    pub async fn get_allowance(
        &self,
        owner: Address,
        spender: Address,
        token: &TokenRef,
    ) -> Result<Amount> {
        self.read_amount(token.address, encode_allowance(owner, spender))
            .await
    }

    /// LP token balance of `account` in `pool`.
    pub async fn get_lp_balance(&self, pool: &PoolRef, account: Address) -> Result<Amount> {
        self.balance_of(pool.address, account).await
    }

    /// Token pair and LP balances of `account`, read concurrently.
    pub async fn position(&self, pool: &PoolRef, account: Address) -> Result<PositionReport> {
        let (token_a, token_b, lp) = tokio::try_join!(
            self.balance_of(pool.token_a.address, account),
            self.balance_of(pool.token_b.address, account),
            self.get_lp_balance(pool, account),
        )?;

        Ok(PositionReport {
            account,
            token_a,
            token_b,
            lp,
        })
    }

    async fn balance_of(&self, contract: Address, account: Address) -> Result<Amount> {
        self.read_amount(contract, encode_balance_of(account)).await
    }

    async fn read_amount(&self, contract: Address, data: Bytes) -> Result<Amount> {
        let raw = self.call_with_retry(contract, data).await?;
        decode_amount(&raw).map_err(|e| {
            OrchestrationError::QueryFailed(format!("undecodable result from {}: {}", contract, e))
        })
    }

    async fn call_with_retry(&self, contract: Address, data: Bytes) -> Result<Bytes> {
        let max_retries = self.retry.max_retries;
        let mut attempt = 0;

        let read = || {
            let retry = attempt;
            attempt += 1;
            let call = self.ledger.call(contract, data.clone());
            async move {
                call.await.map_err(|e| {
                    if e.is_transient() && retry < max_retries {
                        backoff::Error::transient(e)
                    } else {
                        debug!(%contract, attempt = retry, error = %e, "Read failed");
                        backoff::Error::permanent(e)
                    }
                })
            }
        };

        retry_notify(self.retry.policy(), read, |e: LedgerError, delay: Duration| {
            warn!(%contract, ?delay, error = %e, "Read failed, retrying");
        })
        .await
        .map_err(|e| query_failed(contract, e))
    }
}

fn query_failed(contract: Address, error: LedgerError) -> OrchestrationError {
    OrchestrationError::QueryFailed(format!("call to {} failed: {}", contract, error))
}
