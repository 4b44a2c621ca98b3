//! Core data models for the liquidity orchestrator

use crate::error::OrchestrationError;
use crate::Result;
use alloy_primitives::utils::{format_units, parse_units, ParseUnits};
use alloy_primitives::{Address, Bytes, TxHash, U256};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Token amounts are raw integer units, scaled by the token's decimals.
pub type Amount = U256;

//
// ================= Contracts =================
//

/// A fungible-token contract.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TokenRef {
    pub address: Address,
    pub decimals: u8,
}

impl TokenRef {
    pub fn new(address: Address, decimals: u8) -> Self {
        Self { address, decimals }
    }

    /// Scale a decimal string such as "12.5" into raw units.
    pub fn parse_amount(&self, amount: &str) -> Result<Amount> {
        parse_amount(amount, self.decimals)
    }

    pub fn format_amount(&self, amount: Amount) -> String {
        format_amount(amount, self.decimals)
    }
}

/// The liquidity pool contract and its token pair.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PoolRef {
    pub address: Address,
    pub token_a: TokenRef,
    pub token_b: TokenRef,
}

impl PoolRef {
    pub fn new(address: Address, token_a: TokenRef, token_b: TokenRef) -> Result<Self> {
        let pool = Self {
            address,
            token_a,
            token_b,
        };
        pool.validate()?;
        Ok(pool)
    }

    pub fn validate(&self) -> Result<()> {
        if self.token_a.address == self.token_b.address {
            return Err(OrchestrationError::InvalidRequest(format!(
                "pool {} must reference two distinct tokens, got {} twice",
                self.address, self.token_a.address
            )));
        }
        Ok(())
    }

    pub fn tokens(&self) -> [TokenRef; 2] {
        [self.token_a, self.token_b]
    }
}

//
// ================= Allowance =================
//

/// Snapshot of a spend authorization, re-read on every check.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct AllowanceRecord {
    pub owner: Address,
    pub spender: Address,
    pub token: Address,
    pub amount: Amount,
}

//
// ================= Liquidity =================
//

/// Desired and minimum amounts for a two-asset deposit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct LiquidityAmounts {
    pub amount_a_desired: Amount,
    pub amount_b_desired: Amount,
    pub amount_a_min: Amount,
    pub amount_b_min: Amount,
}

/// A guarded deposit. Consumed by exactly one `addLiquidity` submission.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct LiquidityRequest {
    pub amount_a_desired: Amount,
    pub amount_b_desired: Amount,
    pub amount_a_min: Amount,
    pub amount_b_min: Amount,
    pub recipient: Address,
    /// Unix time in seconds.
    pub deadline: u64,
}

impl LiquidityRequest {
    /// Build a request whose deadline is `now + window`.
    pub fn with_deadline_window(
        amounts: LiquidityAmounts,
        recipient: Address,
        now: u64,
        window: Duration,
    ) -> Self {
        Self {
            amount_a_desired: amounts.amount_a_desired,
            amount_b_desired: amounts.amount_b_desired,
            amount_a_min: amounts.amount_a_min,
            amount_b_min: amounts.amount_b_min,
            recipient,
            deadline: now.saturating_add(window.as_secs()),
        }
    }

    /// Check the slippage floors and deadline against `now` (unix seconds).
    pub fn validate_at(&self, now: u64) -> Result<()> {
        if self.amount_a_min > self.amount_a_desired {
            return Err(OrchestrationError::InvalidRequest(format!(
                "amountAMin ({}) exceeds amountADesired ({})",
                self.amount_a_min, self.amount_a_desired
            )));
        }
        if self.amount_b_min > self.amount_b_desired {
            return Err(OrchestrationError::InvalidRequest(format!(
                "amountBMin ({}) exceeds amountBDesired ({})",
                self.amount_b_min, self.amount_b_desired
            )));
        }
        if self.deadline <= now {
            return Err(OrchestrationError::InvalidRequest(format!(
                "deadline {} is not after current time {}",
                self.deadline, now
            )));
        }
        Ok(())
    }
}

//
// ================= Verification =================
//

/// One-shot attestation input for the verifier contract.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerificationRequest {
    pub pool: Address,
    pub token_a: Address,
    pub token_b: Address,
    pub amount_a: Amount,
    pub amount_b: Amount,
    pub amount_in: Amount,
    pub author: String,
}

//
// ================= Ledger I/O =================
//

/// A state-changing call to be signed by `from`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TxRequest {
    pub from: Address,
    pub to: Address,
    pub data: Bytes,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TxReceipt {
    pub hash: TxHash,
    pub success: bool,
    pub block_number: Option<u64>,
}

impl fmt::Display for TxReceipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.block_number {
            Some(block) => write!(f, "{} (block {})", self.hash, block),
            None => write!(f, "{}", self.hash),
        }
    }
}

//
// ================= Units =================
//

pub fn parse_amount(amount: &str, decimals: u8) -> Result<Amount> {
    match parse_units(amount.trim(), decimals) {
        Ok(ParseUnits::U256(value)) => Ok(value),
        Ok(ParseUnits::I256(_)) => Err(OrchestrationError::InvalidRequest(format!(
            "amount must not be negative: {}",
            amount
        ))),
        Err(e) => Err(OrchestrationError::InvalidRequest(format!(
            "invalid amount '{}': {}",
            amount, e
        ))),
    }
}

pub fn format_amount(amount: Amount, decimals: u8) -> String {
    format_units(amount, decimals).unwrap_or_else(|_| amount.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    fn request(a_min: u64, b_min: u64, deadline: u64) -> LiquidityRequest {
        LiquidityRequest {
            amount_a_desired: U256::from(100),
            amount_b_desired: U256::from(200),
            amount_a_min: U256::from(a_min),
            amount_b_min: U256::from(b_min),
            recipient: Address::ZERO,
            deadline,
        }
    }

    #[test]
    fn test_liquidity_request_validation() {
        assert!(request(90, 180, 1_600).validate_at(1_000).is_ok());
        assert!(request(100, 200, 1_001).validate_at(1_000).is_ok());

        assert!(matches!(
            request(101, 180, 1_600).validate_at(1_000),
            Err(OrchestrationError::InvalidRequest(_))
        ));
        assert!(matches!(
            request(90, 201, 1_600).validate_at(1_000),
            Err(OrchestrationError::InvalidRequest(_))
        ));
        assert!(matches!(
            request(90, 180, 1_000).validate_at(1_000),
            Err(OrchestrationError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_deadline_window() {
        let amounts = LiquidityAmounts {
            amount_a_desired: U256::from(1),
            amount_b_desired: U256::from(1),
            amount_a_min: U256::ZERO,
            amount_b_min: U256::ZERO,
        };
        let req = LiquidityRequest::with_deadline_window(
            amounts,
            Address::ZERO,
            1_700_000_000,
            Duration::from_secs(600),
        );
        assert_eq!(req.deadline, 1_700_000_600);
    }

    #[test]
    fn test_pool_rejects_identical_tokens() {
        let token = TokenRef::new(address!("035d020fFe37b89fB88A9d3eC0bDBc028Dff7848"), 18);
        let pool = PoolRef::new(
            address!("4AB791880D51CD6A8db850fB14EbB736eCaC12a6"),
            token,
            token,
        );
        assert!(pool.is_err());
    }

    #[test]
    fn test_amount_units() {
        let token = TokenRef::new(Address::ZERO, 18);
        let raw = token.parse_amount("100").unwrap();
        assert_eq!(raw, U256::from(100u64) * U256::from(10u64).pow(U256::from(18u64)));
        assert_eq!(token.parse_amount("0.5").unwrap(), U256::from(500_000_000_000_000_000u64));
        assert!(token.parse_amount("abc").is_err());
        assert!(token.parse_amount("-1").is_err());

        let six = TokenRef::new(Address::ZERO, 6);
        assert!(six.format_amount(U256::from(1_500_000u64)).starts_with("1.5"));
    }
}
