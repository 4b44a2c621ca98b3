//! Liquidity Orchestrator
//!
//! Client-side driver for a two-token liquidity pool:
//! - Grants the pool exactly the spend authorization a deposit needs
//! - Submits guarded deposits with slippage minimums and a deadline
//! - Attests completed deposits with an external verifier contract
//! - Reads balances, allowances and pool holdings
//! - Records every run in an auditable trail
//!
//! WORKFLOW:
//! APPROVE(A) → APPROVE(B) → DEPOSIT → VERIFY → DONE

pub mod allowance;
pub mod audit;
pub mod balances;
pub mod config;
pub mod contracts;
pub mod error;
pub mod ledger;
pub mod liquidity;
pub mod models;
pub mod verification;
pub mod workflow;

pub use error::{OrchestrationError, Result};

// Re-export common types
pub use config::{DeploymentConfig, PartialConfig};
pub use ledger::{InMemoryLedger, JsonRpcLedger, Ledger, LedgerError};
pub use models::*;
pub use workflow::{Attestation, WorkflowOrchestrator, WorkflowReport, WorkflowState, WorkflowStep};
