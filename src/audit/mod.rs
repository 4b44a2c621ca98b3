//! Run journal
//!
//! Every workflow run, successful or halted, is appended here with the
//! receipts it produced. Each entry is sealed with a SHA-256 digest over its
//! inputs and outcome, so an edited entry no longer matches its seal.

use crate::workflow::{StepOutcome, WorkflowKind, WorkflowState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Write;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRecord {
    pub workflow_id: Uuid,
    pub kind: WorkflowKind,
    pub params: serde_json::Value,
    pub final_state: WorkflowState,
    pub steps: Vec<StepOutcome>,
    pub trace: Vec<String>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub execution_time_ms: u64,
    /// Hex SHA-256 over kind, params, final state and steps.
    pub seal: String,
}

/// The parts of a record covered by its seal.
#[derive(Serialize)]
struct Sealed<'a> {
    kind: WorkflowKind,
    params: &'a serde_json::Value,
    final_state: &'a WorkflowState,
    steps: &'a [StepOutcome],
}

impl WorkflowRecord {
    pub fn compute_seal(&self) -> String {
        digest(&Sealed {
            kind: self.kind,
            params: &self.params,
            final_state: &self.final_state,
            steps: &self.steps,
        })
    }

    /// Replace the seal with one over the current contents.
    pub fn sealed(mut self) -> Self {
        self.seal = self.compute_seal();
        self
    }

    pub fn is_intact(&self) -> bool {
        self.seal == self.compute_seal()
    }
}

/// Append-only, in insertion order.
#[derive(Default)]
pub struct AuditLog {
    runs: RwLock<Vec<WorkflowRecord>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn append(&self, record: WorkflowRecord) -> Uuid {
        let workflow_id = record.workflow_id;
        self.runs.write().await.push(record);
        workflow_id
    }

    pub async fn get(&self, workflow_id: Uuid) -> Option<WorkflowRecord> {
        self.runs
            .read()
            .await
            .iter()
            .find(|run| run.workflow_id == workflow_id)
            .cloned()
    }

    /// Most recently appended run.
    pub async fn latest(&self) -> Option<WorkflowRecord> {
        self.runs.read().await.last().cloned()
    }

    pub async fn ids(&self) -> Vec<Uuid> {
        self.runs
            .read()
            .await
            .iter()
            .map(|run| run.workflow_id)
            .collect()
    }

    /// False for an unknown id as well as for an entry that fails its seal.
    pub async fn verify_integrity(&self, workflow_id: Uuid) -> bool {
        self.runs
            .read()
            .await
            .iter()
            .find(|run| run.workflow_id == workflow_id)
            .is_some_and(WorkflowRecord::is_intact)
    }
}

fn digest<T: Serialize>(value: &T) -> String {
    let mut hasher = Sha256::new();
    // Writing into the hasher cannot fail and every sealed field serializes.
    if serde_json::to_writer(DigestWriter(&mut hasher), value).is_err() {
        return String::new();
    }
    hex::encode(hasher.finalize())
}

struct DigestWriter<'a>(&'a mut Sha256);

impl Write for DigestWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
