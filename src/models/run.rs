//! Payroll runs and their lifecycle.
//!
//! ```text
//! calculating ──► generated ──► approved ──► applied ──► paid
//!      │              ▲
//!      └──► generated_with_errors (review)
//!
//! any state before applied ──► cancelled
//! ```
//!
//! Applied and paid runs are finalized: their results can no longer be
//! recalculated.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult, ErrorKind};

use super::{PayPeriod, ResultTotals, SnapshotBundle};

/// Lifecycle state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Employees are being calculated.
    Calculating,
    /// Every employee calculated.
    Generated,
    /// Some employees failed; needs review before approval.
    GeneratedWithErrors,
    /// Approved for application.
    Approved,
    /// Applied: accumulations and loan balances are final.
    Applied,
    /// Paid out.
    Paid,
    /// Abandoned.
    Cancelled,
}

impl RunStatus {
    /// Returns true once the run can no longer change.
    pub fn is_finalized(self) -> bool {
        matches!(self, RunStatus::Applied | RunStatus::Paid)
    }

    /// Returns true if results may still be recalculated.
    pub fn allows_recalculation(self) -> bool {
        matches!(
            self,
            RunStatus::Generated | RunStatus::GeneratedWithErrors | RunStatus::Approved
        )
    }

    fn can_become(self, next: RunStatus) -> bool {
        use RunStatus::*;
        match (self, next) {
            (Calculating, Generated | GeneratedWithErrors) => true,
            (GeneratedWithErrors, Generated) => true,
            (Generated | GeneratedWithErrors | Approved, Calculating) => true,
            (Generated, Approved) => true,
            (Approved, Generated) => true,
            (Approved, Applied) => true,
            (Applied, Paid) => true,
            (Calculating | Generated | GeneratedWithErrors | Approved, Cancelled) => true,
            _ => false,
        }
    }
}

/// An employee that could not be calculated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmployeeFailure {
    /// The employee.
    pub employee_id: String,
    /// The error message.
    pub error: String,
    /// The error category.
    pub kind: ErrorKind,
}

/// Counts of a run's employees by outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Employees in scope.
    pub total: usize,
    /// Employees with a result.
    pub succeeded: usize,
    /// Employees with a recorded failure.
    pub failed: usize,
}

impl RunSummary {
    /// Employees not processed yet.
    pub fn pending(&self) -> usize {
        self.total.saturating_sub(self.succeeded + self.failed)
    }
}

/// One payroll run of a planilla for a period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayrollRun {
    /// Unique run identifier.
    pub id: Uuid,
    /// The job that owns the run lock.
    pub job_id: Uuid,
    /// The planilla.
    pub planilla_id: String,
    /// The period.
    pub period: PayPeriod,
    /// The date every result is calculated as of.
    pub calculation_date: NaiveDate,
    /// Lifecycle state.
    pub status: RunStatus,
    /// Employees in scope when the run was prepared.
    pub employee_count: usize,
    /// Current result id per employee.
    #[serde(default)]
    pub results: BTreeMap<String, Uuid>,
    /// Failures per employee.
    #[serde(default)]
    pub failures: BTreeMap<String, EmployeeFailure>,
    /// Sum of current results' totals.
    #[serde(default)]
    pub totals: ResultTotals,
    /// What the run consulted.
    pub snapshot: SnapshotBundle,
    /// When the run was created.
    pub created_at: DateTime<Utc>,
    /// When the run last changed.
    pub updated_at: DateTime<Utc>,
}

impl PayrollRun {
    /// Counts employees by outcome.
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            total: self.employee_count,
            succeeded: self.results.len(),
            failed: self.failures.len(),
        }
    }

    /// Moves the run to `next`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidState`] for a transition the lifecycle
    /// does not allow.
    pub fn transition(&mut self, next: RunStatus) -> EngineResult<()> {
        if !self.status.can_become(next) {
            return Err(EngineError::invalid_state(
                format!("run {}", self.id),
                format!("cannot move from {:?} to {:?}", self.status, next),
            ));
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Fails with [`EngineError::InvalidState`] unless results may still be
    /// recalculated.
    pub fn ensure_recalculable(&self) -> EngineResult<()> {
        if self.status.allows_recalculation() {
            Ok(())
        } else {
            Err(EngineError::invalid_state(
                format!("run {}", self.id),
                format!("results of a {:?} run cannot be recalculated", self.status),
            ))
        }
    }
}
