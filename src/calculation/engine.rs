//! The payroll engine: run preparation, per-employee calculation and the
//! run lifecycle.
//!
//! A run goes through three phases:
//!
//! 1. [`PayrollEngine::prepare_run`] validates the planilla, period and
//!    currencies, takes the run lock and persists the run. Any failure here
//!    is structural and nothing is calculated.
//! 2. [`PayrollEngine::process_employee`] calculates and commits one
//!    employee. Failures are recorded against the employee and the run
//!    carries on.
//! 3. [`PayrollEngine::finalize_run`] sums the results, moves the run to
//!    `generated` or `generated_with_errors` and releases the lock.
//!
//! [`PayrollEngine::run_payroll`] does all three synchronously. The batch
//! queue drives the same phases from background tasks.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::batch::{RunKey, RunLocks};
use crate::config::{EngineConfig, EngineSettings};
use crate::error::{EngineError, EngineResult};
use crate::models::{
    AuditTrace, CalculationOrigin, CalculationResult, ConceptCatalog, ConceptKind, Employee,
    EmployeeFailure, PayPeriod, PayrollRun, Planilla, ResultTotals, RunStatus, totals_by_code,
};
use crate::repository::{EmployeeCommit, PayrollRepository};
use crate::rules::RuleCatalog;

use super::accumulation::AccumulationTracker;
use super::base_pay::calculate_base_pay;
use super::concepts::ConceptPass;
use super::context::{CanonicalContext, ContextSeed};
use super::snapshot::SnapshotRecorder;

/// Version stamped on every result.
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// What happened to one employee of a run.
#[derive(Debug, Clone)]
pub enum EmployeeOutcome {
    /// The result was committed.
    Calculated(CalculationResult),
    /// The failure was recorded on the run.
    Failed(EmployeeFailure),
}

impl EmployeeOutcome {
    /// Returns true if the employee could not be calculated.
    pub fn is_failed(&self) -> bool {
        matches!(self, EmployeeOutcome::Failed(_))
    }
}

/// Calculates payroll runs.
///
/// The engine is `Send + Sync`; share it behind an [`Arc`].
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use payroll_engine::calculation::PayrollEngine;
/// use payroll_engine::config::ConfigLoader;
/// use payroll_engine::models::PayPeriod;
/// use payroll_engine::repository::InMemoryRepository;
/// use chrono::NaiveDate;
///
/// let config = ConfigLoader::load("./config/default").unwrap();
/// let engine = PayrollEngine::new(config.config(), Arc::new(InMemoryRepository::new()));
///
/// let period = PayPeriod::new(
///     NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
///     NaiveDate::from_ymd_opt(2025, 1, 31).unwrap(),
/// );
/// let run = engine.run_payroll("pl_main", &period).unwrap();
/// println!("{:?}: net {}", run.status, run.totals.net);
/// ```
pub struct PayrollEngine {
    settings: EngineSettings,
    concepts: ConceptCatalog,
    catalog: Arc<dyn RuleCatalog>,
    repository: Arc<dyn PayrollRepository>,
    locks: RunLocks,
}

impl PayrollEngine {
    /// Creates an engine from loaded configuration.
    pub fn new(config: &EngineConfig, repository: Arc<dyn PayrollRepository>) -> Self {
        Self::with_catalog(
            config.settings().clone(),
            config.concepts().clone(),
            config.catalog(),
            repository,
        )
    }

    /// Creates an engine over any rule catalog.
    pub fn with_catalog(
        settings: EngineSettings,
        concepts: ConceptCatalog,
        catalog: Arc<dyn RuleCatalog>,
        repository: Arc<dyn PayrollRepository>,
    ) -> Self {
        Self {
            settings,
            concepts,
            catalog,
            repository,
            locks: RunLocks::new(),
        }
    }

    /// The live engine settings.
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// The repository.
    pub fn repository(&self) -> &dyn PayrollRepository {
        self.repository.as_ref()
    }

    /// The run locks.
    pub fn locks(&self) -> &RunLocks {
        &self.locks
    }

    /// Validates and persists a run, taking its lock for `job_id`.
    ///
    /// A job that already owns a run gets that run back, so a redelivered
    /// job resumes where it stopped.
    ///
    /// # Errors
    ///
    /// Structural errors: unknown or inactive planilla, missing currency,
    /// unknown concept codes, malformed or overlapping period, no active
    /// employees, an unresolvable exchange rate, or a lock held by another
    /// job ([`EngineError::RunConflict`]).
    pub fn prepare_run(
        &self,
        planilla_id: &str,
        period: &PayPeriod,
        job_id: Uuid,
    ) -> EngineResult<PayrollRun> {
        if let Some(run) = self.repository.find_run_by_job(job_id)? {
            if run.status == RunStatus::Calculating {
                self.locks
                    .acquire(&RunKey::new(&run.planilla_id, &run.period), job_id)?;
            }
            info!(
                run_id = %run.id,
                job_id = %job_id,
                status = ?run.status,
                "Resuming run for redelivered job"
            );
            return Ok(run);
        }

        let planilla = self.validate_planilla(planilla_id)?;
        if !period.is_well_formed() {
            return Err(EngineError::structural(
                "period",
                format!("start {} is after end {}", period.start_date, period.end_date),
            ));
        }

        let key = RunKey::new(planilla_id, period);
        self.locks.acquire(&key, job_id)?;
        self.create_run(&planilla, period, job_id).inspect_err(|_| {
            self.locks.release(&key, job_id);
        })
    }

    fn validate_planilla(&self, planilla_id: &str) -> EngineResult<Planilla> {
        let planilla = self.repository.get_planilla(planilla_id).map_err(|e| match e {
            EngineError::NotFound { .. } => {
                EngineError::structural("planilla", format!("'{}' does not exist", planilla_id))
            }
            other => other,
        })?;

        if !planilla.active {
            return Err(EngineError::structural(
                "planilla",
                format!("'{}' is inactive", planilla.id),
            ));
        }
        if planilla.currency.trim().is_empty() {
            return Err(EngineError::structural(
                "planilla",
                format!("'{}' has no currency", planilla.id),
            ));
        }

        for (kind, codes) in [
            (ConceptKind::Perception, &planilla.perceptions),
            (ConceptKind::Deduction, &planilla.deductions),
            (ConceptKind::Benefit, &planilla.benefits),
        ] {
            let missing = self.concepts.missing(kind, codes);
            if !missing.is_empty() {
                return Err(EngineError::structural(
                    "planilla",
                    format!(
                        "'{}' references unknown {:?} concepts: {}",
                        planilla.id,
                        kind,
                        missing.join(", ")
                    ),
                ));
            }
        }
        Ok(planilla)
    }

    fn create_run(
        &self,
        planilla: &Planilla,
        period: &PayPeriod,
        job_id: Uuid,
    ) -> EngineResult<PayrollRun> {
        if let Some(existing) = self
            .repository
            .find_overlapping_runs(&planilla.id, period)?
            .into_iter()
            .find(|run| run.status != RunStatus::Cancelled)
        {
            return Err(EngineError::structural(
                "period",
                format!(
                    "overlaps run {} ({} to {})",
                    existing.id, existing.period.start_date, existing.period.end_date
                ),
            ));
        }

        let employees = self.repository.get_active_employees(&planilla.id)?;
        if employees.is_empty() {
            return Err(EngineError::structural(
                "planilla",
                format!("'{}' has no active employees", planilla.id),
            ));
        }

        let calculation_date = period.calculation_date();
        let repository = self.repository.as_ref();
        let mut recorder = SnapshotRecorder::new(calculation_date, &self.settings, None);
        let planilla_rate = recorder.exchange_rate(&planilla.currency, repository)?;
        if planilla_rate.is_zero() {
            return Err(EngineError::structural(
                "currency",
                format!("exchange rate for {} is zero", planilla.currency),
            ));
        }
        for employee in &employees {
            recorder.exchange_rate(&employee.currency, repository)?;
        }

        let now = Utc::now();
        let run = PayrollRun {
            id: Uuid::new_v4(),
            job_id,
            planilla_id: planilla.id.clone(),
            period: period.clone(),
            calculation_date,
            status: RunStatus::Calculating,
            employee_count: employees.len(),
            results: BTreeMap::new(),
            failures: BTreeMap::new(),
            totals: ResultTotals::default(),
            snapshot: recorder.finish(),
            created_at: now,
            updated_at: now,
        };
        self.repository.save_run(&run)?;

        info!(
            run_id = %run.id,
            job_id = %job_id,
            planilla_id = %planilla.id,
            employees = run.employee_count,
            calculation_date = %calculation_date,
            "Payroll run prepared"
        );
        Ok(run)
    }

    /// Active employees of the run's planilla that have no result yet.
    pub fn pending_employees(&self, run_id: Uuid) -> EngineResult<Vec<Employee>> {
        let run = self.repository.get_run(run_id)?;
        Ok(self
            .repository
            .get_active_employees(&run.planilla_id)?
            .into_iter()
            .filter(|employee| !run.results.contains_key(&employee.id))
            .collect())
    }

    /// Calculates and commits one employee of a run.
    ///
    /// A calculation failure is recorded on the run and returned as
    /// [`EmployeeOutcome::Failed`].
    ///
    /// # Errors
    ///
    /// Only repository failures are returned as errors.
    pub fn process_employee(
        &self,
        run: &PayrollRun,
        employee: &Employee,
    ) -> EngineResult<EmployeeOutcome> {
        let planilla = self.repository.get_planilla(&run.planilla_id)?;
        let calculated = self.calculate(
            run,
            &planilla,
            employee,
            run.calculation_date,
            CalculationOrigin::FirstCalculation,
            None,
        );

        match calculated {
            Ok(commit) => {
                let result = commit.result.clone();
                self.repository.commit_employee(commit)?;
                info!(
                    run_id = %run.id,
                    employee_id = %employee.id,
                    net = %result.totals.net,
                    duration_us = result.audit_trace.duration_us,
                    "Employee calculated"
                );
                Ok(EmployeeOutcome::Calculated(result))
            }
            Err(error) => {
                warn!(
                    run_id = %run.id,
                    employee_id = %employee.id,
                    error = %error,
                    "Employee calculation failed"
                );
                let failure = EmployeeFailure {
                    employee_id: employee.id.clone(),
                    error: error.to_string(),
                    kind: error.kind(),
                };
                self.repository.record_failure(run.id, failure.clone())?;
                Ok(EmployeeOutcome::Failed(failure))
            }
        }
    }

    /// Calculates one employee without committing.
    pub(crate) fn calculate(
        &self,
        run: &PayrollRun,
        planilla: &Planilla,
        employee: &Employee,
        calculation_date: NaiveDate,
        origin: CalculationOrigin,
        recalculated_from: Option<Uuid>,
    ) -> EngineResult<EmployeeCommit> {
        let started = Instant::now();
        if !employee.active {
            return Err(EngineError::InvalidEmployee {
                employee_id: employee.id.clone(),
                message: "employee is inactive".to_string(),
            });
        }
        if !employee.is_employed_during(&run.period) {
            return Err(EngineError::InvalidEmployee {
                employee_id: employee.id.clone(),
                message: format!(
                    "not employed between {} and {}",
                    run.period.start_date, run.period.end_date
                ),
            });
        }

        let repository = self.repository.as_ref();
        let mut recorder = SnapshotRecorder::new(calculation_date, &self.settings, Some(&run.snapshot));
        let settings = recorder.settings().clone();

        let salary_rate = recorder.exchange_rate(&employee.currency, repository)?;
        let planilla_rate = recorder.exchange_rate(&planilla.currency, repository)?;
        let exchange_rate = salary_rate.checked_div(planilla_rate).ok_or_else(|| {
            EngineError::structural(
                "currency",
                format!("exchange rate for {} is zero", planilla.currency),
            )
        })?;

        let mut novelties = totals_by_code(&repository.get_period_novelties(
            &employee.id,
            run.period.start_date,
            run.period.end_date,
        )?);
        for code in &settings.novelty_codes {
            novelties.entry(code.clone()).or_insert(Decimal::ZERO);
        }
        let absences = novelties
            .get(&settings.absence_code)
            .copied()
            .unwrap_or(Decimal::ZERO);

        let base = calculate_base_pay(
            employee,
            &run.period,
            planilla.frequency,
            &settings,
            absences,
            exchange_rate,
            1,
        )?;

        let tracker = AccumulationTracker::new(repository, &settings);
        let fiscal_year = tracker.fiscal_year(calculation_date);
        let ytd = tracker.year_to_date(&employee.id, calculation_date, &run.period, run.id)?;
        let config_values = recorder.config_values();
        let context = CanonicalContext::seed(&ContextSeed {
            employee,
            period: &run.period,
            calculation_date,
            base: &base,
            ytd: &ytd,
            novelties: &novelties,
            config_values: &config_values,
        });
        let loans = repository.get_loan_balances(&employee.id)?;

        let mut pass = ConceptPass::new(
            self.catalog.as_ref(),
            recorder,
            context,
            &base,
            run.id,
            &employee.id,
        );
        pass.apply_perceptions(
            &self
                .concepts
                .resolve(ConceptKind::Perception, &planilla.perceptions),
        )?;
        pass.apply_deductions(
            &self
                .concepts
                .resolve(ConceptKind::Deduction, &planilla.deductions),
            &loans,
        )?;
        pass.apply_benefits(&self.concepts.resolve(ConceptKind::Benefit, &planilla.benefits))?;
        let outcome = pass.finish()?;

        let duration_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);
        debug!(
            run_id = %run.id,
            employee_id = %employee.id,
            lines = outcome.lines.len(),
            warnings = outcome.warnings.len(),
            duration_us = duration_us,
            "Concepts applied"
        );

        let delta = AccumulationTracker::delta(&outcome.totals, &run.period);
        let result = CalculationResult {
            id: Uuid::new_v4(),
            run_id: run.id,
            employee_id: employee.id.clone(),
            planilla_id: planilla.id.clone(),
            period: run.period.clone(),
            calculation_date,
            origin,
            recalculated_from,
            days_worked: base.days_worked,
            lines: outcome.lines,
            totals: outcome.totals,
            audit_trace: AuditTrace {
                steps: outcome.steps,
                warnings: outcome.warnings,
                duration_us,
            },
            calculated_at: Utc::now(),
            engine_version: ENGINE_VERSION.to_string(),
        };

        Ok(EmployeeCommit {
            result,
            fiscal_year,
            delta,
            installments: outcome.installments,
            snapshot: outcome.snapshot,
        })
    }

    /// Sum of the totals of a run's current results.
    pub(crate) fn sum_totals(&self, run_id: Uuid) -> EngineResult<ResultTotals> {
        let mut totals = ResultTotals::default();
        for result in self.repository.current_results(run_id)? {
            totals.add(&result.totals)?;
        }
        Ok(totals)
    }

    /// Closes the calculating phase of a run and releases its lock.
    ///
    /// The run becomes `generated`, or `generated_with_errors` if any
    /// employee failed. A run that is no longer calculating is returned
    /// unchanged.
    pub fn finalize_run(&self, run_id: Uuid) -> EngineResult<PayrollRun> {
        let mut run = self.repository.get_run(run_id)?;
        if run.status != RunStatus::Calculating {
            return Ok(run);
        }

        run.totals = self.sum_totals(run_id)?;
        let next = if run.failures.is_empty() {
            RunStatus::Generated
        } else {
            RunStatus::GeneratedWithErrors
        };
        run.transition(next)?;
        self.repository.save_run(&run)?;
        self.locks
            .release(&RunKey::new(&run.planilla_id, &run.period), run.job_id);

        let summary = run.summary();
        info!(
            run_id = %run.id,
            job_id = %run.job_id,
            status = ?run.status,
            succeeded = summary.succeeded,
            failed = summary.failed,
            gross = %run.totals.gross,
            net = %run.totals.net,
            "Payroll run generated"
        );
        Ok(run)
    }

    /// Runs a planilla for a period synchronously under a new job id.
    pub fn run_payroll(&self, planilla_id: &str, period: &PayPeriod) -> EngineResult<PayrollRun> {
        self.run_job(planilla_id, period, Uuid::new_v4())
    }

    /// Runs a planilla for a period synchronously under `job_id`. Calling it
    /// again with the same job id resumes the run.
    pub fn run_job(
        &self,
        planilla_id: &str,
        period: &PayPeriod,
        job_id: Uuid,
    ) -> EngineResult<PayrollRun> {
        let started = Instant::now();
        let run = self.prepare_run(planilla_id, period, job_id)?;
        if run.status != RunStatus::Calculating {
            return Ok(run);
        }

        for employee in self.pending_employees(run.id)? {
            self.process_employee(&run, &employee)?;
        }
        let run = self.finalize_run(run.id)?;
        debug!(
            run_id = %run.id,
            duration_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX),
            "Synchronous run finished"
        );
        Ok(run)
    }

    /// Accepts the failures of a `generated_with_errors` run so it can be
    /// approved.
    pub fn review_run(&self, run_id: Uuid) -> EngineResult<PayrollRun> {
        self.move_run(run_id, RunStatus::Generated)
    }

    /// Approves a generated run.
    pub fn approve_run(&self, run_id: Uuid) -> EngineResult<PayrollRun> {
        self.move_run(run_id, RunStatus::Approved)
    }

    /// Applies an approved run: loan installments are settled against the
    /// balances and every rule version the run used becomes referenced.
    pub fn apply_run(&self, run_id: Uuid) -> EngineResult<PayrollRun> {
        let mut run = self.repository.get_run(run_id)?;
        run.transition(RunStatus::Applied)?;

        let settled = self.repository.settle_loans(run_id)?;
        for rule in run.snapshot.formulas.values() {
            self.catalog.mark_referenced(&rule.code, rule.version)?;
        }
        self.repository.save_run(&run)?;

        info!(
            run_id = %run.id,
            installments = settled,
            rules = run.snapshot.formulas.len(),
            "Payroll run applied"
        );
        Ok(run)
    }

    /// Marks an applied run as paid.
    pub fn mark_paid(&self, run_id: Uuid) -> EngineResult<PayrollRun> {
        self.move_run(run_id, RunStatus::Paid)
    }

    /// Cancels a run that is not finalized, discarding its provisional
    /// accumulations and loan installments.
    pub fn cancel_run(&self, run_id: Uuid) -> EngineResult<PayrollRun> {
        let mut run = self.repository.get_run(run_id)?;
        run.transition(RunStatus::Cancelled)?;
        self.repository.discard_run(run_id)?;
        self.repository.save_run(&run)?;
        self.locks
            .release(&RunKey::new(&run.planilla_id, &run.period), run.job_id);
        info!(run_id = %run.id, job_id = %run.job_id, "Payroll run cancelled");
        Ok(run)
    }

    fn move_run(&self, run_id: Uuid, next: RunStatus) -> EngineResult<PayrollRun> {
        let mut run = self.repository.get_run(run_id)?;
        let previous = run.status;
        run.transition(next)?;
        self.repository.save_run(&run)?;
        info!(run_id = %run.id, from = ?previous, to = ?next, "Payroll run status changed");
        Ok(run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigLoader;
    use crate::error::ErrorKind;
    use crate::models::{
        ConceptDefinition, ConceptMode, LoanBalance, LoanKind, PayFrequency, SalaryBasis,
    };
    use crate::repository::InMemoryRepository;
    use std::str::FromStr;

    /// Helper function to create Decimal values from strings
    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn january() -> PayPeriod {
        PayPeriod::new(date(2025, 1, 1), date(2025, 1, 31))
    }

    fn employee(id: &str, salary: &str) -> Employee {
        Employee {
            id: id.to_string(),
            name: id.to_string(),
            active: true,
            hire_date: date(2020, 1, 1),
            termination_date: None,
            birth_date: None,
            salary: dec(salary),
            salary_basis: SalaryBasis::Prorated,
            currency: "USD".to_string(),
            attributes: Default::default(),
        }
    }

    fn planilla() -> Planilla {
        Planilla {
            id: "pl_main".to_string(),
            name: "Main".to_string(),
            active: true,
            currency: "USD".to_string(),
            frequency: PayFrequency::Monthly,
            perceptions: vec!["BONUS10".to_string()],
            deductions: vec!["PENSION".to_string(), "INCOME_TAX".to_string()],
            benefits: vec!["EMPLOYER_SS".to_string()],
        }
    }

    fn setup() -> (PayrollEngine, Arc<InMemoryRepository>) {
        let config =
            ConfigLoader::load(concat!(env!("CARGO_MANIFEST_DIR"), "/config/default")).unwrap();
        let repository = Arc::new(InMemoryRepository::new());
        repository.insert_planilla(planilla()).unwrap();
        repository
            .insert_employee("pl_main", employee("emp_001", "10000"))
            .unwrap();
        let engine = PayrollEngine::new(config.config(), repository.clone());
        (engine, repository)
    }

    /// EN-001: the reference employee nets 9,445.5 and the run is generated
    #[test]
    fn test_en_001_reference_run() {
        let (engine, repository) = setup();
        let run = engine.run_payroll("pl_main", &january()).unwrap();

        assert_eq!(run.status, RunStatus::Generated);
        assert_eq!(run.totals.net, dec("9445.5"));
        assert_eq!(run.totals.total_benefits, dec("1100"));
        assert_eq!(run.totals.employer_cost, dec("12100"));

        let results = repository.current_results(run.id).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].engine_version, ENGINE_VERSION);
        assert!(engine.locks().holder(&RunKey::new("pl_main", &january())).is_none());
    }

    /// EN-002: one employee's failure does not stop the others
    #[test]
    fn test_en_002_employee_failure_is_isolated() {
        let (engine, repository) = setup();
        let mut broken = employee("emp_002", "8000");
        broken.currency = "USD".to_string();
        broken.hire_date = date(2025, 2, 1);
        repository.insert_employee("pl_main", broken).unwrap();

        let run = engine.run_payroll("pl_main", &january()).unwrap();
        assert_eq!(run.status, RunStatus::GeneratedWithErrors);
        assert_eq!(run.results.len(), 1);
        assert_eq!(run.failures["emp_002"].kind, ErrorKind::PerEmployee);

        assert!(engine.approve_run(run.id).is_err());
        engine.review_run(run.id).unwrap();
        assert_eq!(engine.approve_run(run.id).unwrap().status, RunStatus::Approved);
    }

    /// EN-003: structural problems abort before any employee is touched
    #[test]
    fn test_en_003_structural_errors_abort() {
        let (engine, repository) = setup();

        let backwards = PayPeriod::new(date(2025, 1, 31), date(2025, 1, 1));
        assert!(engine.run_payroll("pl_main", &backwards).unwrap_err().is_structural());
        assert!(engine.run_payroll("pl_missing", &january()).unwrap_err().is_structural());

        let mut foreign = employee("emp_003", "500");
        foreign.currency = "EUR".to_string();
        repository.insert_employee("pl_main", foreign).unwrap();
        let err = engine.run_payroll("pl_main", &january()).unwrap_err();
        assert!(matches!(err, EngineError::RateNotFound { .. }));
        assert!(engine.locks().holder(&RunKey::new("pl_main", &january())).is_none());
    }

    /// EN-004: a second run over an overlapping period is rejected
    #[test]
    fn test_en_004_overlapping_period_rejected() {
        let (engine, _) = setup();
        engine.run_payroll("pl_main", &january()).unwrap();
        let overlapping = PayPeriod::new(date(2025, 1, 15), date(2025, 2, 14));
        let err = engine.run_payroll("pl_main", &overlapping).unwrap_err();
        assert!(err.is_structural());
    }

    /// EN-005: another job is locked out while the first is calculating
    #[test]
    fn test_en_005_lock_conflict() {
        let (engine, _) = setup();
        let first = Uuid::new_v4();
        engine.prepare_run("pl_main", &january(), first).unwrap();

        let err = engine
            .prepare_run("pl_main", &january(), Uuid::new_v4())
            .unwrap_err();
        assert!(matches!(err, EngineError::RunConflict { held_by, .. } if held_by == first));

        let resumed = engine.prepare_run("pl_main", &january(), first).unwrap();
        assert_eq!(resumed.status, RunStatus::Calculating);
    }

    /// EN-006: applying settles loans and freezes consulted rule versions
    #[test]
    fn test_en_006_apply_settles_loans() {
        let (engine, repository) = setup();
        repository
            .add_loan(
                "emp_001",
                LoanBalance {
                    loan_id: "ln_1".to_string(),
                    code: "LOAN".to_string(),
                    kind: LoanKind::Loan,
                    installment: dec("300"),
                    balance: dec("1000"),
                    priority: 5,
                    mandatory: false,
                },
            )
            .unwrap();

        let run = engine.run_payroll("pl_main", &january()).unwrap();
        assert_eq!(run.totals.net, dec("9145.5"));
        engine.approve_run(run.id).unwrap();
        let applied = engine.apply_run(run.id).unwrap();
        assert_eq!(applied.status, RunStatus::Applied);

        let balance = repository.get_loan_balances("emp_001").unwrap()[0].balance;
        assert_eq!(balance, dec("700"));
        assert!(engine.apply_run(run.id).is_err());
        assert_eq!(engine.mark_paid(run.id).unwrap().status, RunStatus::Paid);
    }

    /// EN-007: cancelling discards provisional data and frees the period
    #[test]
    fn test_en_007_cancel_discards_run() {
        let (engine, repository) = setup();
        let run = engine.run_payroll("pl_main", &january()).unwrap();
        engine.cancel_run(run.id).unwrap();

        let record = repository.get_accumulation("emp_001", 2025).unwrap();
        assert_eq!(record.periods_processed, 0);

        let rerun = engine.run_payroll("pl_main", &january()).unwrap();
        assert_eq!(rerun.status, RunStatus::Generated);
    }

    /// EN-008: an amount that overflows fails the employee, not the run
    #[test]
    fn test_en_008_overflow_fails_only_the_employee() {
        let config =
            ConfigLoader::load(concat!(env!("CARGO_MANIFEST_DIR"), "/config/default")).unwrap();
        let mut concepts = config.concepts().clone();
        concepts.perceptions.push(ConceptDefinition {
            code: "WINDFALL".to_string(),
            name: "Windfall".to_string(),
            mode: ConceptMode::Fixed {
                amount: dec("79228162514264337593543950000"),
            },
            priority: 0,
            mandatory: false,
            pre_tax: false,
            withholding: false,
            active: true,
        });
        let repository = Arc::new(InMemoryRepository::new());
        let mut planilla = planilla();
        planilla.perceptions = vec!["WINDFALL".to_string()];
        repository.insert_planilla(planilla).unwrap();
        repository
            .insert_employee("pl_main", employee("emp_001", "10000"))
            .unwrap();
        let engine = PayrollEngine::with_catalog(
            config.settings().clone(),
            concepts,
            config.catalog(),
            repository.clone(),
        );

        let run = engine.run_payroll("pl_main", &january()).unwrap();
        assert_eq!(run.status, RunStatus::GeneratedWithErrors);
        assert!(run.results.is_empty());
        let failure = &run.failures["emp_001"];
        assert_eq!(failure.kind, ErrorKind::PerEmployee);
        assert!(failure.error.contains("WINDFALL"));
        assert_eq!(
            repository.get_accumulation("emp_001", 2025).unwrap().periods_processed,
            0
        );
        assert!(engine.locks().holder(&RunKey::new("pl_main", &january())).is_none());
    }

    #[test]
    fn test_unknown_concept_code_is_structural() {
        let (engine, repository) = setup();
        let mut planilla = planilla();
        planilla.deductions.push("NOT_A_CONCEPT".to_string());
        repository.insert_planilla(planilla).unwrap();
        let err = engine.run_payroll("pl_main", &january()).unwrap_err();
        assert!(err.to_string().contains("NOT_A_CONCEPT"));
    }

    #[test]
    fn test_absences_reduce_base_pay() {
        let (engine, repository) = setup();
        repository
            .add_novelty(
                "emp_001",
                crate::models::Novelty {
                    code: "days_absent".to_string(),
                    amount: dec("3"),
                    date: date(2025, 1, 10),
                },
            )
            .unwrap();
        let run = engine.run_payroll("pl_main", &january()).unwrap();
        assert_eq!(run.totals.base_pay, dec("9000"));
    }

    #[test]
    fn test_configured_novelty_codes_default_to_zero() {
        let (engine, repository) = setup();
        let mut planilla = planilla();
        planilla.perceptions.push("COMMISSION".to_string());
        repository.insert_planilla(planilla).unwrap();

        let run = engine.run_payroll("pl_main", &january()).unwrap();
        assert_eq!(run.status, RunStatus::Generated);
        let result = &repository.current_results(run.id).unwrap()[0];
        assert_eq!(result.line("COMMISSION").unwrap().amount, Decimal::ZERO);
        assert_eq!(result.totals.gross, dec("11000"));
    }
}
