//! In-memory [`PayrollRepository`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use tracing::debug;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::models::{
    AccumulationRecord, CalculationResult, Employee, EmployeeFailure, LoanBalance,
    LoanInstallment, Novelty, PayPeriod, PayrollRun, Planilla,
};

use super::{EmployeeCommit, PayrollRepository};

#[derive(Debug, Default)]
struct RepositoryState {
    planillas: BTreeMap<String, Planilla>,
    employees: BTreeMap<String, Employee>,
    members: BTreeMap<String, BTreeSet<String>>,
    novelties: BTreeMap<String, Vec<Novelty>>,
    accumulations: BTreeMap<(String, i32), AccumulationRecord>,
    loans: BTreeMap<String, Vec<LoanBalance>>,
    rates: BTreeMap<String, BTreeMap<NaiveDate, Decimal>>,
    runs: BTreeMap<Uuid, PayrollRun>,
    results: BTreeMap<Uuid, CalculationResult>,
    installments: BTreeMap<(String, Uuid), LoanInstallment>,
}

/// A repository held in memory behind a single mutex.
///
/// Every trait method takes the lock once, so an [`EmployeeCommit`] is
/// atomic.
///
/// # Example
///
/// ```
/// use payroll_engine::models::{PayFrequency, Planilla};
/// use payroll_engine::repository::{InMemoryRepository, PayrollRepository};
///
/// let repository = InMemoryRepository::new();
/// repository.insert_planilla(Planilla {
///     id: "pl_main".to_string(),
///     name: "Main".to_string(),
///     active: true,
///     currency: "USD".to_string(),
///     frequency: PayFrequency::Monthly,
///     perceptions: vec![],
///     deductions: vec![],
///     benefits: vec![],
/// }).unwrap();
///
/// assert_eq!(repository.get_planilla("pl_main").unwrap().currency, "USD");
/// assert!(repository.get_planilla("pl_other").is_err());
/// ```
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    state: Mutex<RepositoryState>,
}

impl InMemoryRepository {
    /// Creates an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> EngineResult<MutexGuard<'_, RepositoryState>> {
        self.state.lock().map_err(|_| EngineError::CalculationError {
            message: "repository lock poisoned".to_string(),
        })
    }

    /// Inserts or replaces a planilla.
    pub fn insert_planilla(&self, planilla: Planilla) -> EngineResult<()> {
        self.lock()?.planillas.insert(planilla.id.clone(), planilla);
        Ok(())
    }

    /// Inserts or replaces an employee and adds them to a planilla.
    pub fn insert_employee(&self, planilla_id: &str, employee: Employee) -> EngineResult<()> {
        let mut state = self.lock()?;
        state
            .members
            .entry(planilla_id.to_string())
            .or_default()
            .insert(employee.id.clone());
        state.employees.insert(employee.id.clone(), employee);
        Ok(())
    }

    /// Replaces an existing employee record.
    pub fn update_employee(&self, employee: Employee) -> EngineResult<()> {
        let mut state = self.lock()?;
        let slot = state
            .employees
            .get_mut(&employee.id)
            .ok_or_else(|| EngineError::not_found("Employee", &employee.id))?;
        *slot = employee;
        Ok(())
    }

    /// Records a novelty for an employee.
    pub fn add_novelty(&self, employee_id: &str, novelty: Novelty) -> EngineResult<()> {
        self.lock()?
            .novelties
            .entry(employee_id.to_string())
            .or_default()
            .push(novelty);
        Ok(())
    }

    /// Sets the rate of `currency` in force from `effective` onwards.
    pub fn set_exchange_rate(
        &self,
        currency: &str,
        effective: NaiveDate,
        rate: Decimal,
    ) -> EngineResult<()> {
        self.lock()?
            .rates
            .entry(currency.to_string())
            .or_default()
            .insert(effective, rate);
        Ok(())
    }

    /// Adds or replaces a loan of an employee.
    pub fn add_loan(&self, employee_id: &str, loan: LoanBalance) -> EngineResult<()> {
        let mut state = self.lock()?;
        let loans = state.loans.entry(employee_id.to_string()).or_default();
        loans.retain(|existing| existing.loan_id != loan.loan_id);
        loans.push(loan);
        Ok(())
    }

    /// Seeds a year-to-date record.
    pub fn set_accumulation(&self, record: AccumulationRecord) -> EngineResult<()> {
        self.lock()?
            .accumulations
            .insert((record.employee_id.clone(), record.fiscal_year), record);
        Ok(())
    }
}

impl PayrollRepository for InMemoryRepository {
    fn get_planilla(&self, planilla_id: &str) -> EngineResult<Planilla> {
        self.lock()?
            .planillas
            .get(planilla_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("Planilla", planilla_id))
    }

    fn get_active_employees(&self, planilla_id: &str) -> EngineResult<Vec<Employee>> {
        let state = self.lock()?;
        let Some(members) = state.members.get(planilla_id) else {
            return Ok(Vec::new());
        };
        Ok(members
            .iter()
            .filter_map(|id| state.employees.get(id))
            .filter(|employee| employee.active)
            .cloned()
            .collect())
    }

    fn get_employee(&self, employee_id: &str) -> EngineResult<Employee> {
        self.lock()?
            .employees
            .get(employee_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("Employee", employee_id))
    }

    fn get_period_novelties(
        &self,
        employee_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> EngineResult<Vec<Novelty>> {
        let state = self.lock()?;
        Ok(state
            .novelties
            .get(employee_id)
            .map(|novelties| {
                novelties
                    .iter()
                    .filter(|n| n.date >= start && n.date <= end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn get_accumulation(
        &self,
        employee_id: &str,
        fiscal_year: i32,
    ) -> EngineResult<AccumulationRecord> {
        let state = self.lock()?;
        Ok(state
            .accumulations
            .get(&(employee_id.to_string(), fiscal_year))
            .cloned()
            .unwrap_or_else(|| AccumulationRecord::new(employee_id, fiscal_year)))
    }

    fn get_loan_balances(&self, employee_id: &str) -> EngineResult<Vec<LoanBalance>> {
        Ok(self
            .lock()?
            .loans
            .get(employee_id)
            .cloned()
            .unwrap_or_default())
    }

    fn get_exchange_rate(&self, currency: &str, date: NaiveDate) -> EngineResult<Decimal> {
        let state = self.lock()?;
        state
            .rates
            .get(currency)
            .and_then(|by_date| by_date.range(..=date).next_back())
            .map(|(_, rate)| *rate)
            .ok_or_else(|| EngineError::RateNotFound {
                currency: currency.to_string(),
                date,
            })
    }

    fn save_run(&self, run: &PayrollRun) -> EngineResult<()> {
        self.lock()?.runs.insert(run.id, run.clone());
        Ok(())
    }

    fn get_run(&self, run_id: Uuid) -> EngineResult<PayrollRun> {
        self.lock()?
            .runs
            .get(&run_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("Run", run_id))
    }

    fn find_run_by_job(&self, job_id: Uuid) -> EngineResult<Option<PayrollRun>> {
        Ok(self
            .lock()?
            .runs
            .values()
            .find(|run| run.job_id == job_id)
            .cloned())
    }

    fn find_overlapping_runs(
        &self,
        planilla_id: &str,
        period: &PayPeriod,
    ) -> EngineResult<Vec<PayrollRun>> {
        Ok(self
            .lock()?
            .runs
            .values()
            .filter(|run| run.planilla_id == planilla_id && run.period.overlaps(period))
            .cloned()
            .collect())
    }

    fn get_result(&self, result_id: Uuid) -> EngineResult<CalculationResult> {
        self.lock()?
            .results
            .get(&result_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("Result", result_id))
    }

    fn current_results(&self, run_id: Uuid) -> EngineResult<Vec<CalculationResult>> {
        let state = self.lock()?;
        let run = state
            .runs
            .get(&run_id)
            .ok_or_else(|| EngineError::not_found("Run", run_id))?;
        Ok(run
            .results
            .values()
            .filter_map(|id| state.results.get(id))
            .cloned()
            .collect())
    }

    fn commit_employee(&self, commit: EmployeeCommit) -> EngineResult<()> {
        let mut state = self.lock()?;
        let EmployeeCommit {
            result,
            fiscal_year,
            delta,
            installments,
            snapshot,
        } = commit;
        let run_id = result.run_id;
        let employee_id = result.employee_id.clone();

        let run = state
            .runs
            .get_mut(&run_id)
            .ok_or_else(|| EngineError::not_found("Run", run_id))?;
        run.results.insert(employee_id.clone(), result.id);
        run.failures.remove(&employee_id);
        run.snapshot.merge(&snapshot);
        run.updated_at = Utc::now();

        state
            .accumulations
            .entry((employee_id.clone(), fiscal_year))
            .or_insert_with(|| AccumulationRecord::new(&employee_id, fiscal_year))
            .apply(run_id, delta);

        state
            .installments
            .retain(|(_, run), entry| !(*run == run_id && entry.employee_id == employee_id));
        for installment in installments {
            state
                .installments
                .insert((installment.loan_id.clone(), run_id), installment);
        }

        debug!(run_id = %run_id, employee_id = %employee_id, result_id = %result.id, "Employee committed");
        state.results.insert(result.id, result);
        Ok(())
    }

    fn record_failure(&self, run_id: Uuid, failure: EmployeeFailure) -> EngineResult<()> {
        let mut state = self.lock()?;
        let run = state
            .runs
            .get_mut(&run_id)
            .ok_or_else(|| EngineError::not_found("Run", run_id))?;
        run.failures.insert(failure.employee_id.clone(), failure);
        run.updated_at = Utc::now();
        Ok(())
    }

    fn get_installments(&self, run_id: Uuid) -> EngineResult<Vec<LoanInstallment>> {
        Ok(self
            .lock()?
            .installments
            .values()
            .filter(|installment| installment.run_id == run_id)
            .cloned()
            .collect())
    }

    fn settle_loans(&self, run_id: Uuid) -> EngineResult<usize> {
        let mut state = self.lock()?;
        let RepositoryState {
            installments,
            loans,
            ..
        } = &mut *state;

        let mut settled = 0;
        for installment in installments
            .values_mut()
            .filter(|i| i.run_id == run_id && !i.settled)
        {
            if let Some(loan) = loans
                .get_mut(&installment.employee_id)
                .and_then(|loans| loans.iter_mut().find(|l| l.loan_id == installment.loan_id))
            {
                loan.balance = (loan.balance - installment.amount).max(Decimal::ZERO);
            }
            installment.settled = true;
            settled += 1;
        }
        Ok(settled)
    }

    fn discard_run(&self, run_id: Uuid) -> EngineResult<()> {
        let mut state = self.lock()?;
        state
            .installments
            .retain(|(_, run), entry| *run != run_id || entry.settled);
        for record in state.accumulations.values_mut() {
            record.revert(run_id);
        }
        Ok(())
    }
}
