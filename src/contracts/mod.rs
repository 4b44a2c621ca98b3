//! Contract surfaces consumed by the orchestrator
//!
//! Only calldata encoding and return decoding live here. Pricing, accounting
//! and verification rules belong to the deployed contracts.

use crate::models::{Amount, LiquidityRequest, VerificationRequest};
use alloy_primitives::{Address, Bytes};
use alloy_sol_types::{sol, SolCall};

sol! {
    interface IERC20 {
        function approve(address spender, uint256 amount) external returns (bool);
        function allowance(address owner, address spender) external view returns (uint256);
        function balanceOf(address account) external view returns (uint256);
    }

    interface ISimpleSwap {
        function addLiquidity(
            uint256 amountADesired,
            uint256 amountBDesired,
            uint256 amountAMin,
            uint256 amountBMin,
            address to,
            uint256 deadline
        ) external returns (uint256 amountA, uint256 amountB, uint256 liquidity);
        function balanceOf(address account) external view returns (uint256);
    }

    interface IVerifier {
        function verify(
            address swapContract,
            address tokenA,
            address tokenB,
            uint256 amountA,
            uint256 amountB,
            uint256 amountIn,
            string author
        ) external;
    }
}

/// Encode approve(address,uint256) call
pub fn encode_approve(spender: Address, amount: Amount) -> Bytes {
    IERC20::approveCall { spender, amount }.abi_encode().into()
}

/// Encode allowance(address,address) call
pub fn encode_allowance(owner: Address, spender: Address) -> Bytes {
    IERC20::allowanceCall { owner, spender }.abi_encode().into()
}

/// Encode balanceOf(address) call; the pool's LP token shares the selector.
pub fn encode_balance_of(account: Address) -> Bytes {
    IERC20::balanceOfCall { account }.abi_encode().into()
}

/// Encode addLiquidity with the request's exact six parameters
pub fn encode_add_liquidity(req: &LiquidityRequest) -> Bytes {
    ISimpleSwap::addLiquidityCall {
        amountADesired: req.amount_a_desired,
        amountBDesired: req.amount_b_desired,
        amountAMin: req.amount_a_min,
        amountBMin: req.amount_b_min,
        to: req.recipient,
        deadline: Amount::from(req.deadline),
    }
    .abi_encode()
    .into()
}

/// Encode verify(...) with the request's literal parameters
pub fn encode_verify(req: &VerificationRequest) -> Bytes {
    IVerifier::verifyCall {
        swapContract: req.pool,
        tokenA: req.token_a,
        tokenB: req.token_b,
        amountA: req.amount_a,
        amountB: req.amount_b,
        amountIn: req.amount_in,
        author: req.author.clone(),
    }
    .abi_encode()
    .into()
}

/// Decode a uint256 return value (balanceOf, allowance)
pub fn decode_amount(data: &[u8]) -> Result<Amount, alloy_sol_types::Error> {
    IERC20::balanceOfCall::abi_decode_returns(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::U256;

    #[test]
    fn test_approve_selector() {
        let data = encode_approve(Address::ZERO, U256::from(1));
        // keccak("approve(address,uint256)")[..4]
        assert_eq!(&data[..4], &[0x09, 0x5e, 0xa7, 0xb3]);
        assert_eq!(data.len(), 4 + 64);
    }

    #[test]
    fn test_add_liquidity_carries_exact_parameters() {
        let req = LiquidityRequest {
            amount_a_desired: U256::from(100),
            amount_b_desired: U256::from(200),
            amount_a_min: U256::from(90),
            amount_b_min: U256::from(180),
            recipient: Address::repeat_byte(0x11),
            deadline: 1_700_000_600,
        };
        let data = encode_add_liquidity(&req);
        let decoded = ISimpleSwap::addLiquidityCall::abi_decode(&data).unwrap();

        assert_eq!(decoded.amountADesired, U256::from(100));
        assert_eq!(decoded.amountBDesired, U256::from(200));
        assert_eq!(decoded.amountAMin, U256::from(90));
        assert_eq!(decoded.amountBMin, U256::from(180));
        assert_eq!(decoded.to, Address::repeat_byte(0x11));
        assert_eq!(decoded.deadline, U256::from(1_700_000_600u64));
    }

    #[test]
    fn test_decode_amount() {
        let val = U256::from(255);
        assert_eq!(decode_amount(&val.to_be_bytes::<32>()).unwrap(), val);
        assert!(decode_amount(&[0u8; 3]).is_err());
    }
}
