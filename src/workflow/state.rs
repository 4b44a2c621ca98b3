//! Workflow state machine
//!
//! NotStarted → Approving(A) → Approving(B) → Depositing → Verifying → Done,
//! with Failed reachable from any non-terminal state. Steps may be skipped
//! but never revisited.

use crate::error::OrchestrationError;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStep {
    ApproveTokenA,
    ApproveTokenB,
    Deposit,
    Verify,
}

impl fmt::Display for WorkflowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkflowStep::ApproveTokenA => "approve-token-a",
            WorkflowStep::ApproveTokenB => "approve-token-b",
            WorkflowStep::Deposit => "deposit",
            WorkflowStep::Verify => "verify",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
    ApproveTokens,
    ProvisionLiquidity,
    ProvisionAndVerify,
    Verify,
}

impl fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkflowKind::ApproveTokens => "approve-tokens",
            WorkflowKind::ProvisionLiquidity => "provision-liquidity",
            WorkflowKind::ProvisionAndVerify => "provision-and-verify",
            WorkflowKind::Verify => "verify",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum WorkflowState {
    NotStarted,
    Approving { step: WorkflowStep },
    Depositing,
    Verifying,
    Done,
    Failed { step: WorkflowStep, reason: String },
}

impl WorkflowState {
    fn for_step(step: WorkflowStep) -> Self {
        match step {
            WorkflowStep::ApproveTokenA | WorkflowStep::ApproveTokenB => {
                WorkflowState::Approving { step }
            }
            WorkflowStep::Deposit => WorkflowState::Depositing,
            WorkflowStep::Verify => WorkflowState::Verifying,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            WorkflowState::NotStarted => 0,
            WorkflowState::Approving {
                step: WorkflowStep::ApproveTokenA,
            } => 1,
            WorkflowState::Approving { .. } => 2,
            WorkflowState::Depositing => 3,
            WorkflowState::Verifying => 4,
            WorkflowState::Done | WorkflowState::Failed { .. } => 5,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowState::Done | WorkflowState::Failed { .. })
    }

    /// Step currently in progress, if any.
    pub fn current_step(&self) -> Option<WorkflowStep> {
        match self {
            WorkflowState::Approving { step } => Some(*step),
            WorkflowState::Depositing => Some(WorkflowStep::Deposit),
            WorkflowState::Verifying => Some(WorkflowStep::Verify),
            _ => None,
        }
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowState::NotStarted => write!(f, "not-started"),
            WorkflowState::Approving { step } => write!(f, "approving ({})", step),
            WorkflowState::Depositing => write!(f, "depositing"),
            WorkflowState::Verifying => write!(f, "verifying"),
            WorkflowState::Done => write!(f, "done"),
            WorkflowState::Failed { step, reason } => write!(f, "failed at {}: {}", step, reason),
        }
    }
}

/// Forward-only holder of a workflow's state plus a trace of every transition.
#[derive(Debug, Clone)]
pub struct WorkflowMachine {
    state: WorkflowState,
    trace: Vec<String>,
}

impl WorkflowMachine {
    pub fn new() -> Self {
        Self {
            state: WorkflowState::NotStarted,
            trace: Vec::new(),
        }
    }

    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    pub fn trace(&self) -> &[String] {
        &self.trace
    }

    pub fn note(&mut self, line: impl Into<String>) {
        self.trace.push(line.into());
    }

    pub fn enter(&mut self, step: WorkflowStep) -> Result<()> {
        self.transition(WorkflowState::for_step(step))
    }

    pub fn complete(&mut self) -> Result<()> {
        self.transition(WorkflowState::Done)
    }

    pub fn fail(&mut self, step: WorkflowStep, reason: impl Into<String>) -> Result<()> {
        self.transition(WorkflowState::Failed {
            step,
            reason: reason.into(),
        })
    }

    fn transition(&mut self, next: WorkflowState) -> Result<()> {
        let allowed = !self.state.is_terminal()
            && (next.rank() > self.state.rank() || next.is_terminal());

        if !allowed {
            return Err(OrchestrationError::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }

        self.trace.push(format!("{} -> {}", self.state, next));
        self.state = next;
        Ok(())
    }
}

impl Default for WorkflowMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_forward_path() {
        let mut machine = WorkflowMachine::new();
        machine.enter(WorkflowStep::ApproveTokenA).unwrap();
        machine.enter(WorkflowStep::ApproveTokenB).unwrap();
        machine.enter(WorkflowStep::Deposit).unwrap();
        machine.enter(WorkflowStep::Verify).unwrap();
        machine.complete().unwrap();

        assert_eq!(machine.state(), &WorkflowState::Done);
        assert_eq!(machine.trace().len(), 5);
    }

    #[test]
    fn test_steps_can_be_skipped_but_not_revisited() {
        let mut machine = WorkflowMachine::new();
        machine.enter(WorkflowStep::Deposit).unwrap();

        assert!(machine.enter(WorkflowStep::ApproveTokenB).is_err());
        assert!(machine.enter(WorkflowStep::Deposit).is_err());
        assert_eq!(machine.state(), &WorkflowState::Depositing);
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut machine = WorkflowMachine::new();
        machine.enter(WorkflowStep::ApproveTokenA).unwrap();
        machine
            .fail(WorkflowStep::ApproveTokenA, "approval reverted")
            .unwrap();

        assert!(machine.enter(WorkflowStep::ApproveTokenB).is_err());
        assert!(machine.complete().is_err());
        assert!(machine.fail(WorkflowStep::Deposit, "again").is_err());
        assert!(matches!(
            machine.state(),
            WorkflowState::Failed {
                step: WorkflowStep::ApproveTokenA,
                ..
            }
        ));
    }

    #[test]
    fn test_current_step() {
        assert_eq!(WorkflowState::NotStarted.current_step(), None);
        assert_eq!(
            WorkflowState::Depositing.current_step(),
            Some(WorkflowStep::Deposit)
        );
    }
}
