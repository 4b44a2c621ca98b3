//! In-memory ledger for development and tests
//!
//! Executes the token, pool and verifier surfaces the orchestrator consumes,
//! records every submitted transaction, and lets callers script reverts,
//! rejected submissions and transactions that never get included.

use super::{Ledger, LedgerError};
use crate::contracts::{ISimpleSwap, IVerifier, IERC20};
use crate::models::{Amount, PoolRef, TxReceipt, TxRequest};
use alloy_primitives::{keccak256, Address, Bytes, TxHash, U256};
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use tokio::sync::Mutex;

/// How the next submitted transaction should behave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedOutcome {
    /// Run the call against the in-memory contracts.
    Execute,
    /// Mine the transaction as reverted without touching state.
    Revert(Option<String>),
    /// Broadcast succeeds but inclusion is never observed.
    NeverIncluded,
    /// The ledger refuses the submission outright.
    RejectSubmission(String),
}

#[derive(Debug, Clone)]
enum Inclusion {
    Included(TxReceipt),
    Reverted(Option<String>),
    Pending,
}

#[derive(Default)]
struct LedgerState {
    block: u64,
    nonce: u64,
    // (token, owner, spender)
    allowances: HashMap<(Address, Address, Address), Amount>,
    // (token or pool, account)
    balances: HashMap<(Address, Address), Amount>,
    pools: HashMap<Address, PoolRef>,
    verifiers: HashSet<Address>,
    submitted: Vec<TxRequest>,
    inclusions: HashMap<TxHash, Inclusion>,
    scripts: VecDeque<ScriptedOutcome>,
    failing_reads: usize,
    reads: usize,
}

pub struct InMemoryLedger {
    sender: Address,
    state: Mutex<LedgerState>,
}

impl InMemoryLedger {
    pub fn new(sender: Address) -> Self {
        Self {
            sender,
            state: Mutex::new(LedgerState::default()),
        }
    }

    /// Deploy a pool contract at `pool.address`.
    pub async fn add_pool(&self, pool: PoolRef) {
        self.state.lock().await.pools.insert(pool.address, pool);
    }

    /// Deploy a verifier contract at `address`.
    pub async fn add_verifier(&self, address: Address) {
        self.state.lock().await.verifiers.insert(address);
    }

    pub async fn set_balance(&self, token: Address, account: Address, amount: Amount) {
        self.state
            .lock()
            .await
            .balances
            .insert((token, account), amount);
    }

    pub async fn set_allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
        amount: Amount,
    ) {
        self.state
            .lock()
            .await
            .allowances
            .insert((token, owner, spender), amount);
    }

    /// Queue an outcome for the next submitted transaction.
    pub async fn script(&self, outcome: ScriptedOutcome) {
        self.state.lock().await.scripts.push_back(outcome);
    }

    /// Make the next `count` read calls fail with a transport error.
    pub async fn fail_next_reads(&self, count: usize) {
        self.state.lock().await.failing_reads = count;
    }

    pub async fn submitted(&self) -> Vec<TxRequest> {
        self.state.lock().await.submitted.clone()
    }

    /// Number of read calls served, failed ones included.
    pub async fn read_count(&self) -> usize {
        self.state.lock().await.reads
    }

    pub async fn allowance(&self, token: Address, owner: Address, spender: Address) -> Amount {
        self.state
            .lock()
            .await
            .allowances
            .get(&(token, owner, spender))
            .copied()
            .unwrap_or_default()
    }

    pub async fn balance(&self, token: Address, account: Address) -> Amount {
        self.state
            .lock()
            .await
            .balances
            .get(&(token, account))
            .copied()
            .unwrap_or_default()
    }
}

impl LedgerState {
    fn balance(&self, token: Address, account: Address) -> Amount {
        self.balances
            .get(&(token, account))
            .copied()
            .unwrap_or_default()
    }

    fn allowance(&self, token: Address, owner: Address, spender: Address) -> Amount {
        self.allowances
            .get(&(token, owner, spender))
            .copied()
            .unwrap_or_default()
    }

    fn credit(&mut self, token: Address, account: Address, amount: Amount) {
        let entry = self.balances.entry((token, account)).or_default();
        *entry = entry.saturating_add(amount);
    }

    fn debit(&mut self, token: Address, account: Address, amount: Amount) {
        let entry = self.balances.entry((token, account)).or_default();
        *entry = entry.saturating_sub(amount);
    }

    /// Run a transaction; `Err` carries the revert reason.
    fn execute(&mut self, tx: &TxRequest) -> Result<(), Option<String>> {
        let selector = tx.data.get(..4).ok_or(None)?;

        if selector == IERC20::approveCall::SELECTOR {
            let call = IERC20::approveCall::abi_decode(&tx.data).map_err(|_| None)?;
            self.allowances
                .insert((tx.to, tx.from, call.spender), call.amount);
            return Ok(());
        }

        if selector == ISimpleSwap::addLiquidityCall::SELECTOR {
            let pool = *self.pools.get(&tx.to).ok_or(None)?;
            let call = ISimpleSwap::addLiquidityCall::abi_decode(&tx.data).map_err(|_| None)?;
            return self.add_liquidity(&pool, tx.from, call);
        }

        if selector == IVerifier::verifyCall::SELECTOR && self.verifiers.contains(&tx.to) {
            IVerifier::verifyCall::abi_decode(&tx.data).map_err(|_| None)?;
            return Ok(());
        }

        Err(None)
    }

    fn add_liquidity(
        &mut self,
        pool: &PoolRef,
        from: Address,
        call: ISimpleSwap::addLiquidityCall,
    ) -> Result<(), Option<String>> {
        let now = U256::from(chrono::Utc::now().timestamp().max(0) as u64);
        if call.deadline < now {
            return Err(Some("SimpleSwap: EXPIRED".to_string()));
        }
        // No pricing: the desired amounts are taken in full.
        let (amount_a, amount_b) = (call.amountADesired, call.amountBDesired);
        if amount_a < call.amountAMin || amount_b < call.amountBMin {
            return Err(Some("SimpleSwap: INSUFFICIENT_AMOUNT".to_string()));
        }

        for (token, amount) in [(pool.token_a.address, amount_a), (pool.token_b.address, amount_b)] {
            if self.allowance(token, from, pool.address) < amount {
                return Err(Some("ERC20: insufficient allowance".to_string()));
            }
            if self.balance(token, from) < amount {
                return Err(Some("ERC20: transfer amount exceeds balance".to_string()));
            }
        }

        for (token, amount) in [(pool.token_a.address, amount_a), (pool.token_b.address, amount_b)] {
            let allowance = self.allowance(token, from, pool.address);
            self.allowances
                .insert((token, from, pool.address), allowance - amount);
            self.debit(token, from, amount);
            self.credit(token, pool.address, amount);
        }

        self.credit(pool.address, call.to, amount_a.min(amount_b));
        Ok(())
    }

    fn read(&self, to: Address, data: &[u8]) -> Result<Bytes, LedgerError> {
        let selector = data
            .get(..4)
            .ok_or_else(|| LedgerError::Decode("calldata shorter than a selector".into()))?;

        let value = if selector == IERC20::allowanceCall::SELECTOR {
            let call = IERC20::allowanceCall::abi_decode(data)
                .map_err(|e| LedgerError::Decode(e.to_string()))?;
            self.allowance(to, call.owner, call.spender)
        } else if selector == IERC20::balanceOfCall::SELECTOR {
            let call = IERC20::balanceOfCall::abi_decode(data)
                .map_err(|e| LedgerError::Decode(e.to_string()))?;
            self.balance(to, call.account)
        } else {
            return Err(LedgerError::Reverted {
                hash: None,
                reason: None,
            });
        };

        Ok(Bytes::from(value.to_be_bytes::<32>()))
    }
}

#[async_trait]
impl Ledger for InMemoryLedger {
    fn sender(&self) -> Address {
        self.sender
    }

    async fn submit_transaction(&self, tx: TxRequest) -> Result<TxHash, LedgerError> {
        let mut state = self.state.lock().await;
        let outcome = state.scripts.pop_front().unwrap_or(ScriptedOutcome::Execute);

        state.nonce += 1;
        let mut preimage = state.nonce.to_be_bytes().to_vec();
        preimage.extend_from_slice(&tx.data);
        let hash = keccak256(&preimage);

        let inclusion = match outcome {
            ScriptedOutcome::RejectSubmission(message) => {
                return Err(LedgerError::Rejected(message));
            }
            ScriptedOutcome::NeverIncluded => Inclusion::Pending,
            ScriptedOutcome::Revert(reason) => {
                state.block += 1;
                Inclusion::Reverted(reason)
            }
            ScriptedOutcome::Execute => {
                state.block += 1;
                match state.execute(&tx) {
                    Ok(()) => Inclusion::Included(TxReceipt {
                        hash,
                        success: true,
                        block_number: Some(state.block),
                    }),
                    Err(reason) => Inclusion::Reverted(reason),
                }
            }
        };

        state.submitted.push(tx);
        state.inclusions.insert(hash, inclusion);
        Ok(hash)
    }

    async fn wait_for_inclusion(&self, hash: TxHash) -> Result<TxReceipt, LedgerError> {
        let inclusion = self.state.lock().await.inclusions.get(&hash).cloned();

        match inclusion {
            Some(Inclusion::Included(receipt)) => Ok(receipt),
            Some(Inclusion::Reverted(reason)) => Err(LedgerError::Reverted {
                hash: Some(hash),
                reason,
            }),
            Some(Inclusion::Pending) => std::future::pending().await,
            None => Err(LedgerError::Decode(format!("unknown transaction {}", hash))),
        }
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, LedgerError> {
        let mut state = self.state.lock().await;
        state.reads += 1;

        if state.failing_reads > 0 {
            state.failing_reads -= 1;
            return Err(LedgerError::Transport("connection reset by peer".to_string()));
        }

        state.read(to, &data)
    }
}
