//! Persistence contracts consumed by the engine.
//!
//! The engine never talks to a database directly. Everything it reads
//! (planillas, employees, novelties, accumulations, loans, rates) and
//! everything it writes (runs, results, accumulation contributions, loan
//! installments) goes through [`PayrollRepository`].
//!
//! [`InMemoryRepository`] implements the contract in memory. Tests,
//! benchmarks and embedding applications without a database use it.

mod memory;

pub use memory::InMemoryRepository;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::EngineResult;
use crate::models::{
    AccumulationDelta, AccumulationRecord, CalculationResult, Employee, EmployeeFailure,
    LoanBalance, LoanInstallment, Novelty, PayPeriod, PayrollRun, Planilla, SnapshotBundle,
};

/// Everything written when one employee's calculation is committed.
///
/// Implementations must write the whole commit atomically: the result, its
/// accumulation contribution, its provisional loan installments and the
/// run's snapshot additions land together or not at all.
#[derive(Debug, Clone)]
pub struct EmployeeCommit {
    /// The new current result for the employee in its run.
    pub result: CalculationResult,
    /// Fiscal year the accumulation contribution belongs to.
    pub fiscal_year: i32,
    /// What the result adds to the employee's year to date.
    pub delta: AccumulationDelta,
    /// Loan installments deducted, provisional until the run is applied.
    pub installments: Vec<LoanInstallment>,
    /// What the calculation consulted, merged into the run's bundle.
    pub snapshot: SnapshotBundle,
}

/// Storage used by the payroll engine.
pub trait PayrollRepository: Send + Sync {
    /// Looks up a planilla.
    fn get_planilla(&self, planilla_id: &str) -> EngineResult<Planilla>;

    /// Active employees of a planilla, ordered by id.
    fn get_active_employees(&self, planilla_id: &str) -> EngineResult<Vec<Employee>>;

    /// Looks up an employee.
    fn get_employee(&self, employee_id: &str) -> EngineResult<Employee>;

    /// Novelties of an employee dated within `[start, end]`.
    fn get_period_novelties(
        &self,
        employee_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> EngineResult<Vec<Novelty>>;

    /// The employee's year-to-date record; an empty record if none exists.
    fn get_accumulation(&self, employee_id: &str, fiscal_year: i32)
    -> EngineResult<AccumulationRecord>;

    /// Outstanding loans and advances of an employee.
    fn get_loan_balances(&self, employee_id: &str) -> EngineResult<Vec<LoanBalance>>;

    /// Units of base currency per unit of `currency` in force on `date`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::RateNotFound`](crate::error::EngineError::RateNotFound)
    /// when no rate is known on or before `date`.
    fn get_exchange_rate(&self, currency: &str, date: NaiveDate) -> EngineResult<Decimal>;

    /// Inserts or replaces a run.
    fn save_run(&self, run: &PayrollRun) -> EngineResult<()>;

    /// Looks up a run.
    fn get_run(&self, run_id: Uuid) -> EngineResult<PayrollRun>;

    /// The run created by a job, if any.
    fn find_run_by_job(&self, job_id: Uuid) -> EngineResult<Option<PayrollRun>>;

    /// Runs of a planilla whose period shares a day with `period`.
    fn find_overlapping_runs(
        &self,
        planilla_id: &str,
        period: &PayPeriod,
    ) -> EngineResult<Vec<PayrollRun>>;

    /// Looks up a result by id, current or replaced.
    fn get_result(&self, result_id: Uuid) -> EngineResult<CalculationResult>;

    /// Current results of a run, ordered by employee id.
    fn current_results(&self, run_id: Uuid) -> EngineResult<Vec<CalculationResult>>;

    /// Writes one employee's calculation. See [`EmployeeCommit`].
    fn commit_employee(&self, commit: EmployeeCommit) -> EngineResult<()>;

    /// Records that an employee could not be calculated in a run.
    fn record_failure(&self, run_id: Uuid, failure: EmployeeFailure) -> EngineResult<()>;

    /// Installments recorded by a run.
    fn get_installments(&self, run_id: Uuid) -> EngineResult<Vec<LoanInstallment>>;

    /// Reduces loan balances by the run's unsettled installments and marks
    /// them settled. Returns how many were settled; calling it again settles
    /// nothing.
    fn settle_loans(&self, run_id: Uuid) -> EngineResult<usize>;

    /// Drops a cancelled run's provisional installments and accumulation
    /// contributions.
    fn discard_run(&self, run_id: Uuid) -> EngineResult<()>;
}
