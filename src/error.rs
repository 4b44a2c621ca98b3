//! Error types for the liquidity orchestrator

use crate::ledger::LedgerError;
use crate::workflow::WorkflowStep;
use alloy_primitives::{Address, TxHash};
use std::time::Duration;
use thiserror::Error;

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

#[derive(Error, Debug)]
pub enum OrchestrationError {
    // =============================
    // Local precondition failures
    // =============================

    /// Never reaches the ledger.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid workflow transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    // =============================
    // Contract reverts
    // =============================

    #[error("Approval of {token} rejected: {}", revert_text(.reason))]
    ApprovalRejected {
        token: Address,
        reason: Option<String>,
    },

    #[error("Liquidity deposit rejected: {}", revert_text(.reason))]
    LiquidityRejected { reason: Option<String> },

    #[error("Verification rejected: {}", revert_text(.reason))]
    VerificationRejected { reason: Option<String> },

    // =============================
    // Ambiguous outcomes
    // =============================

    #[error("Approval of {token} not included within {waited:?} (tx {hash} may still land)")]
    ApprovalTimeout {
        token: Address,
        hash: TxHash,
        waited: Duration,
    },

    #[error("Transaction {hash} not included within {waited:?} (it may still land)")]
    InclusionTimeout { hash: TxHash, waited: Duration },

    // =============================
    // Transport
    // =============================

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Ledger error: {0}")]
    Ledger(LedgerError),

    #[error("Workflow halted at {step}: {source}")]
    WorkflowHalted {
        step: WorkflowStep,
        #[source]
        source: Box<OrchestrationError>,
    },

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl OrchestrationError {
    /// The error of the step that stopped a workflow, or `self` otherwise.
    pub fn root_cause(&self) -> &OrchestrationError {
        match self {
            OrchestrationError::WorkflowHalted { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Step at which a workflow halted, if this error came out of one.
    pub fn failed_step(&self) -> Option<WorkflowStep> {
        match self {
            OrchestrationError::WorkflowHalted { step, .. } => Some(*step),
            _ => None,
        }
    }

    /// True when the outcome is unknown because inclusion was never observed.
    pub fn is_ambiguous(&self) -> bool {
        matches!(
            self.root_cause(),
            OrchestrationError::ApprovalTimeout { .. } | OrchestrationError::InclusionTimeout { .. }
        )
    }
}

/// Human-readable revert reason, "opaque revert" when none could be decoded.
pub fn revert_text(reason: &Option<String>) -> &str {
    reason.as_deref().unwrap_or("opaque revert")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_cause_unwraps_halted_workflow() {
        let err = OrchestrationError::WorkflowHalted {
            step: WorkflowStep::Deposit,
            source: Box::new(OrchestrationError::InclusionTimeout {
                hash: TxHash::ZERO,
                waited: Duration::from_secs(1),
            }),
        };

        assert_eq!(err.failed_step(), Some(WorkflowStep::Deposit));
        assert!(matches!(
            err.root_cause(),
            OrchestrationError::InclusionTimeout { .. }
        ));
        assert!(err.is_ambiguous());
    }

    #[test]
    fn test_opaque_revert_message() {
        let err = OrchestrationError::LiquidityRejected { reason: None };
        assert_eq!(err.to_string(), "Liquidity deposit rejected: opaque revert");

        let err = OrchestrationError::VerificationRejected {
            reason: Some("amountOut mismatch".to_string()),
        };
        assert_eq!(err.to_string(), "Verification rejected: amountOut mismatch");
    }
}
