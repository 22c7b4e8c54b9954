// ── Batch outcome model ──

use chrono::{DateTime, Utc};
use serde::Serialize;
use strum::Display;
use uuid::Uuid;

use super::target::{Category, Target};
use crate::error::CoreError;

/// Per-target execution state. Leaves `Pending` exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OutcomeStatus {
    Pending,
    Succeeded,
    Failed,
}

impl OutcomeStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutcomeRecord {
    pub target: Target,
    pub status: OutcomeStatus,
    pub message: String,
}

impl OutcomeRecord {
    pub fn pending(target: Target) -> Self {
        Self {
            target,
            status: OutcomeStatus::Pending,
            message: String::new(),
        }
    }

    /// Move out of `Pending`. Returns `false` (and changes nothing) when the
    /// record is already terminal or `status` is `Pending`.
    pub(crate) fn settle(&mut self, status: OutcomeStatus, message: String) -> bool {
        if self.status.is_terminal() || !status.is_terminal() {
            return false;
        }
        self.status = status;
        self.message = message;
        true
    }
}

/// Aggregate verdict for a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FinalStatus {
    Success,
    SuccessWithIgnoredFailures,
    Failed,
}

impl FinalStatus {
    /// The partial-failure law.
    pub fn compute(failure_count: usize, ignore_partial_failures: bool) -> Self {
        if failure_count == 0 {
            Self::Success
        } else if ignore_partial_failures {
            Self::SuccessWithIgnoredFailures
        } else {
            Self::Failed
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub batch_id: Uuid,
    pub records: Vec<OutcomeRecord>,
    pub success_count: usize,
    pub failure_count: usize,
    pub final_status: FinalStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl BatchOutcome {
    pub fn failed_records(&self) -> impl Iterator<Item = &OutcomeRecord> {
        self.records
            .iter()
            .filter(|r| r.status == OutcomeStatus::Failed)
    }

    pub fn succeeded_records(&self) -> impl Iterator<Item = &OutcomeRecord> {
        self.records
            .iter()
            .filter(|r| r.status == OutcomeStatus::Succeeded)
    }

    pub fn is_failed(&self) -> bool {
        self.final_status == FinalStatus::Failed
    }

    /// Turn a `Failed` verdict into an error listing every failed target.
    pub fn into_result(self) -> Result<Self, CoreError> {
        if !self.is_failed() {
            return Ok(self);
        }
        Err(CoreError::BatchFailed {
            failed: self.failure_count,
            total: self.records.len(),
            failures: self
                .failed_records()
                .map(|r| format!("{}: {}", r.target, r.message))
                .collect(),
        })
    }
}

// ── Progress events ──────────────────────────────────────────────

/// Emitted once per `Pending -> Succeeded | Failed` transition.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub batch_id: Uuid,
    pub target_id: String,
    pub category: Category,
    pub status: OutcomeStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Emitted once when every record is terminal.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub batch_id: Uuid,
    pub total: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub final_status: FinalStatus,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BatchEvent {
    Progress(ProgressEvent),
    Summary(BatchSummary),
}
