//! Workflow orchestrator
//!
//! APPROVE → DEPOSIT → VERIFY
//!
//! Each mutating step is submitted and its inclusion awaited before the next
//! one starts. The first failure halts the run; nothing is compensated or
//! retried, and partial progress stays on the ledger for the operator.

pub mod state;

pub use state::{WorkflowKind, WorkflowMachine, WorkflowState, WorkflowStep};

use crate::allowance::{AllowanceManager, AllowanceOutcome};
use crate::audit::{AuditLog, WorkflowRecord};
use crate::balances::{BalanceInspector, PositionReport};
use crate::config::DeploymentConfig;
use crate::error::OrchestrationError;
use crate::ledger::Ledger;
use crate::liquidity::{unix_now, LiquidityProvisioner};
use crate::models::{
    Amount, LiquidityAmounts, LiquidityRequest, PoolRef, TxReceipt, VerificationRequest,
};
use crate::verification::VerificationClient;
use crate::Result;
use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Result of one step. `receipt` is `None` when the step needed no transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub step: WorkflowStep,
    pub receipt: Option<TxReceipt>,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowReport {
    pub workflow_id: Uuid,
    pub kind: WorkflowKind,
    pub state: WorkflowState,
    pub steps: Vec<StepOutcome>,
    pub trace: Vec<String>,
}

impl WorkflowReport {
    pub fn receipt_for(&self, step: WorkflowStep) -> Option<&TxReceipt> {
        self.steps
            .iter()
            .find(|outcome| outcome.step == step)
            .and_then(|outcome| outcome.receipt.as_ref())
    }

    /// Transactions this run actually submitted, in order.
    pub fn receipts(&self) -> impl Iterator<Item = &TxReceipt> {
        self.steps.iter().filter_map(|outcome| outcome.receipt.as_ref())
    }
}

/// Attestation inputs that are not derived from the deposit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attestation {
    pub amount_in: Amount,
    pub author: String,
}

/// Signer balances plus the allowances granted to the pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowanceReport {
    pub position: PositionReport,
    pub spender: Address,
    pub allowance_a: Amount,
    pub allowance_b: Amount,
}

/// Bookkeeping for one run: state machine, step outcomes, timing.
struct WorkflowRun {
    workflow_id: Uuid,
    kind: WorkflowKind,
    params: serde_json::Value,
    machine: WorkflowMachine,
    steps: Vec<StepOutcome>,
    started_at: DateTime<Utc>,
    clock: Instant,
}

impl WorkflowRun {
    fn start(kind: WorkflowKind, params: serde_json::Value) -> Self {
        let workflow_id = Uuid::new_v4();
        info!(%workflow_id, %kind, "Workflow: starting");

        let mut machine = WorkflowMachine::new();
        machine.note(format!("INPUT: {} requested", kind));

        Self {
            workflow_id,
            kind,
            params,
            machine,
            steps: Vec::new(),
            started_at: Utc::now(),
            clock: Instant::now(),
        }
    }

    /// Enter `step`, await `action`, and halt the run if it fails.
    async fn step<T, F>(&mut self, step: WorkflowStep, action: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.machine.enter(step)?;
        debug!(workflow_id = %self.workflow_id, %step, "Step started");

        match action.await {
            Ok(value) => Ok(value),
            Err(e) => Err(self.halt(step, e)),
        }
    }

    fn halt(&mut self, step: WorkflowStep, error: OrchestrationError) -> OrchestrationError {
        warn!(
            workflow_id = %self.workflow_id,
            %step,
            error = %error,
            "Halting workflow due to step failure"
        );
        if let Err(e) = self.machine.fail(step, error.to_string()) {
            debug!(error = %e, "Workflow already terminal");
        }
        OrchestrationError::WorkflowHalted {
            step,
            source: Box::new(error),
        }
    }

    fn record_step(&mut self, step: WorkflowStep, receipt: Option<TxReceipt>, detail: String) {
        self.machine.note(format!("{}: {}", step, detail));
        self.steps.push(StepOutcome {
            step,
            receipt,
            detail,
        });
    }

    fn record_allowance(&mut self, step: WorkflowStep, outcome: &AllowanceOutcome) {
        let detail = match outcome {
            AllowanceOutcome::AlreadySufficient(record) => format!(
                "allowance {} on {} already sufficient",
                record.amount, record.token
            ),
            AllowanceOutcome::Approved { record, receipt } => format!(
                "approved {} on {} in {}",
                record.amount, record.token, receipt
            ),
        };
        self.record_step(step, outcome.receipt().copied(), detail);
    }
}

/// Main orchestrator that composes the ledger-backed components
pub struct WorkflowOrchestrator {
    ledger: Arc<dyn Ledger>,
    pool: PoolRef,
    deadline_window: Duration,
    inspector: BalanceInspector,
    allowances: AllowanceManager,
    provisioner: LiquidityProvisioner,
    verification: Option<VerificationClient>,
    audit_log: AuditLog,
}

impl WorkflowOrchestrator {
    pub fn new(ledger: Arc<dyn Ledger>, config: &DeploymentConfig) -> Self {
        let inspector = BalanceInspector::new(ledger.clone(), config.read_retry);
        let allowances =
            AllowanceManager::new(ledger.clone(), inspector.clone(), config.inclusion_timeout);
        let provisioner = LiquidityProvisioner::new(ledger.clone(), config.inclusion_timeout);
        let verification = config.verifier.map(|verifier| {
            VerificationClient::new(ledger.clone(), verifier, config.inclusion_timeout)
        });

        Self {
            ledger,
            pool: config.pool,
            deadline_window: config.deadline_window,
            inspector,
            allowances,
            provisioner,
            verification,
            audit_log: AuditLog::new(),
        }
    }

    pub fn pool(&self) -> &PoolRef {
        &self.pool
    }

    pub fn signer(&self) -> Address {
        self.ledger.sender()
    }

    pub fn inspector(&self) -> &BalanceInspector {
        &self.inspector
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit_log
    }

    // =============================
    // Mutating workflows
    // =============================

    /// Approve the pool to spend `amount_a` of token A, then `amount_b` of token B.
    pub async fn approve_tokens(&self, amount_a: Amount, amount_b: Amount) -> Result<WorkflowReport> {
        let mut run = WorkflowRun::start(
            WorkflowKind::ApproveTokens,
            json!({
                "pool": self.pool,
                "amount_a": amount_a,
                "amount_b": amount_b,
            }),
        );

        let result = self.approve_steps(&mut run, amount_a, amount_b).await;
        self.finish(run, result).await
    }

    /// Approve both tokens for the desired amounts, then deposit.
    pub async fn provision_liquidity(
        &self,
        amounts: LiquidityAmounts,
        recipient: Address,
    ) -> Result<WorkflowReport> {
        let mut run = WorkflowRun::start(
            WorkflowKind::ProvisionLiquidity,
            json!({
                "pool": self.pool,
                "amounts": amounts,
                "recipient": recipient,
                "deadline_window_secs": self.deadline_window.as_secs(),
            }),
        );

        let result = self.provision_steps(&mut run, amounts, recipient).await;
        self.finish(run, result).await
    }

    /// Approve, deposit, then attest the deposit with the verifier contract.
    pub async fn provision_and_verify(
        &self,
        amounts: LiquidityAmounts,
        recipient: Address,
        attestation: Attestation,
    ) -> Result<WorkflowReport> {
        let verifier = self.verifier_client()?;
        let mut run = WorkflowRun::start(
            WorkflowKind::ProvisionAndVerify,
            json!({
                "pool": self.pool,
                "amounts": amounts,
                "recipient": recipient,
                "deadline_window_secs": self.deadline_window.as_secs(),
                "verifier": verifier.verifier(),
                "attestation": attestation,
            }),
        );

        let result = async {
            self.provision_steps(&mut run, amounts, recipient).await?;
            let req = VerificationRequest {
                pool: self.pool.address,
                token_a: self.pool.token_a.address,
                token_b: self.pool.token_b.address,
                amount_a: amounts.amount_a_desired,
                amount_b: amounts.amount_b_desired,
                amount_in: attestation.amount_in,
                author: attestation.author,
            };
            self.verify_step(&mut run, verifier, &req).await
        }
        .await;

        self.finish(run, result).await
    }

    /// Submit a single attestation.
    pub async fn verify(&self, req: VerificationRequest) -> Result<WorkflowReport> {
        let verifier = self.verifier_client()?;
        let mut run = WorkflowRun::start(
            WorkflowKind::Verify,
            json!({
                "verifier": verifier.verifier(),
                "request": req,
            }),
        );

        let result = self.verify_step(&mut run, verifier, &req).await;
        self.finish(run, result).await
    }

    async fn approve_steps(
        &self,
        run: &mut WorkflowRun,
        amount_a: Amount,
        amount_b: Amount,
    ) -> Result<()> {
        let owner = self.ledger.sender();

        let outcome = run
            .step(
                WorkflowStep::ApproveTokenA,
                self.allowances
                    .ensure_allowance(owner, &self.pool.token_a, self.pool.address, amount_a),
            )
            .await?;
        run.record_allowance(WorkflowStep::ApproveTokenA, &outcome);

        let outcome = run
            .step(
                WorkflowStep::ApproveTokenB,
                self.allowances
                    .ensure_allowance(owner, &self.pool.token_b, self.pool.address, amount_b),
            )
            .await?;
        run.record_allowance(WorkflowStep::ApproveTokenB, &outcome);

        Ok(())
    }

    async fn provision_steps(
        &self,
        run: &mut WorkflowRun,
        amounts: LiquidityAmounts,
        recipient: Address,
    ) -> Result<()> {
        // Inconsistent amounts must fail before any approval is broadcast.
        let preflight =
            LiquidityRequest::with_deadline_window(amounts, recipient, unix_now(), self.deadline_window);
        if let Err(e) = preflight.validate_at(unix_now()) {
            return Err(run.halt(WorkflowStep::Deposit, e));
        }

        self.approve_steps(run, amounts.amount_a_desired, amounts.amount_b_desired)
            .await?;

        // Deadline is fixed immediately before submission.
        let req =
            LiquidityRequest::with_deadline_window(amounts, recipient, unix_now(), self.deadline_window);
        let receipt = run
            .step(
                WorkflowStep::Deposit,
                self.provisioner.add_liquidity(&self.pool, &req),
            )
            .await?;
        run.record_step(
            WorkflowStep::Deposit,
            Some(receipt),
            format!("deposited into {} in {}", self.pool.address, receipt),
        );

        Ok(())
    }

    async fn verify_step(
        &self,
        run: &mut WorkflowRun,
        verifier: &VerificationClient,
        req: &VerificationRequest,
    ) -> Result<()> {
        let receipt = run.step(WorkflowStep::Verify, verifier.verify(req)).await?;
        run.record_step(
            WorkflowStep::Verify,
            Some(receipt),
            format!("attested by {} in {}", req.author, receipt),
        );
        Ok(())
    }

    fn verifier_client(&self) -> Result<&VerificationClient> {
        self.verification.as_ref().ok_or_else(|| {
            OrchestrationError::Config("no verifier contract configured".to_string())
        })
    }

    async fn finish(&self, mut run: WorkflowRun, result: Result<()>) -> Result<WorkflowReport> {
        if result.is_ok() {
            run.machine.complete()?;
            run.machine.note("COMPLETE: all steps included");
            info!(
                workflow_id = %run.workflow_id,
                kind = %run.kind,
                transactions = run.steps.iter().filter(|s| s.receipt.is_some()).count(),
                "Workflow completed"
            );
        }

        let record = WorkflowRecord {
            workflow_id: run.workflow_id,
            kind: run.kind,
            params: run.params.clone(),
            final_state: run.machine.state().clone(),
            steps: run.steps.clone(),
            trace: run.machine.trace().to_vec(),
            error: result.as_ref().err().map(|e| e.to_string()),
            started_at: run.started_at,
            finished_at: Utc::now(),
            execution_time_ms: run.clock.elapsed().as_millis() as u64,
            seal: String::new(),
        }
        .sealed();
        self.audit_log.append(record).await;

        result?;

        Ok(WorkflowReport {
            workflow_id: run.workflow_id,
            kind: run.kind,
            state: run.machine.state().clone(),
            steps: run.steps,
            trace: run.machine.trace().to_vec(),
        })
    }

    // =============================
    // Read-only reports
    // =============================

    /// Token A, token B and LP balances of `account`.
    pub async fn position(&self, account: Address) -> Result<PositionReport> {
        self.inspector.position(&self.pool, account).await
    }

    /// Balances of `owner` and the allowances it has granted the pool.
    pub async fn allowance_report(&self, owner: Address) -> Result<AllowanceReport> {
        let (position, allowance_a, allowance_b) = tokio::try_join!(
            self.inspector.position(&self.pool, owner),
            self.inspector
                .get_allowance(owner, self.pool.address, &self.pool.token_a),
            self.inspector
                .get_allowance(owner, self.pool.address, &self.pool.token_b),
        )?;

        Ok(AllowanceReport {
            position,
            spender: self.pool.address,
            allowance_a,
            allowance_b,
        })
    }

    /// Token balances held by the pool contract itself.
    pub async fn pool_reserves(&self) -> Result<BTreeMap<Address, Amount>> {
        self.inspector
            .get_balances(self.pool.address, &self.pool.tokens())
            .await
    }
}
