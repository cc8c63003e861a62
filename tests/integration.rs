//! Integration tests for the payroll engine, run against `config/default`.
//!
//! This test suite covers:
//! - The reference scenario (bonus, pension, progressive income tax)
//! - Year-to-date accumulation across periods
//! - Deduction ordering, loans and insufficient balance
//! - Recalculation and run lifecycle
//! - Rule-driven concepts with novelties and configured values
//! - Rule versioning across periods
//! - The batch queue
//! - Catalog validation of unsafe formulas

use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use payroll_engine::batch::{BatchJob, BatchQueue, JobState};
use payroll_engine::calculation::{INSUFFICIENT_BALANCE, NEGATIVE_NET, PayrollEngine};
use payroll_engine::config::{ConfigLoader, RuleFile};
use payroll_engine::error::{EngineError, ErrorKind};
use payroll_engine::models::{
    CalculationOrigin, CalculationResult, Employee, LineKind, LineStatus, LoanBalance, LoanKind,
    Novelty, PayFrequency, PayPeriod, Planilla, RunStatus, SalaryBasis, SkipReason,
};
use payroll_engine::repository::{InMemoryRepository, PayrollRepository};
use payroll_engine::rules::{CalculationRule, RuleStatus};

// =============================================================================
// Test Helpers
// =============================================================================

fn load_config() -> ConfigLoader {
    ConfigLoader::load("./config/default").expect("Failed to load config")
}

fn decimal(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn january() -> PayPeriod {
    PayPeriod::new(date(2025, 1, 1), date(2025, 1, 31))
}

fn february() -> PayPeriod {
    PayPeriod::new(date(2025, 2, 1), date(2025, 2, 28))
}

/// Assert two decimals are equal ignoring trailing zeros
fn assert_decimal_eq(actual: Decimal, expected: &str, context: &str) {
    assert_eq!(
        actual.normalize(),
        decimal(expected).normalize(),
        "{}: expected {}, got {}",
        context,
        expected,
        actual
    );
}

fn create_planilla(perceptions: &[&str], deductions: &[&str], benefits: &[&str]) -> Planilla {
    let codes = |list: &[&str]| list.iter().map(|c| c.to_string()).collect::<Vec<_>>();
    Planilla {
        id: "pl_main".to_string(),
        name: "Main payroll".to_string(),
        active: true,
        currency: "USD".to_string(),
        frequency: PayFrequency::Monthly,
        perceptions: codes(perceptions),
        deductions: codes(deductions),
        benefits: codes(benefits),
    }
}

fn create_employee(id: &str, salary: &str) -> Employee {
    Employee {
        id: id.to_string(),
        name: format!("Employee {}", id),
        active: true,
        hire_date: date(2020, 1, 1),
        termination_date: None,
        birth_date: None,
        salary: decimal(salary),
        salary_basis: SalaryBasis::Prorated,
        currency: "USD".to_string(),
        attributes: Default::default(),
    }
}

fn create_loan(id: &str, installment: &str, mandatory: bool) -> LoanBalance {
    LoanBalance {
        loan_id: id.to_string(),
        code: "LOAN".to_string(),
        kind: LoanKind::Loan,
        installment: decimal(installment),
        balance: decimal("5000"),
        priority: 5,
        mandatory,
    }
}

/// Builds an engine over a fresh repository holding `planilla` and
/// `employees`.
fn create_engine(
    config: &ConfigLoader,
    planilla: Planilla,
    employees: Vec<Employee>,
) -> (Arc<PayrollEngine>, Arc<InMemoryRepository>) {
    let repository = Arc::new(InMemoryRepository::new());
    let planilla_id = planilla.id.clone();
    repository.insert_planilla(planilla).unwrap();
    for employee in employees {
        repository.insert_employee(&planilla_id, employee).unwrap();
    }
    let engine = Arc::new(PayrollEngine::new(config.config(), repository.clone()));
    (engine, repository)
}

fn reference_engine() -> (Arc<PayrollEngine>, Arc<InMemoryRepository>) {
    create_engine(
        &load_config(),
        create_planilla(&["BONUS10"], &["PENSION", "INCOME_TAX"], &["EMPLOYER_SS"]),
        vec![create_employee("emp_001", "10000")],
    )
}

fn only_result(repository: &InMemoryRepository, run_id: Uuid) -> CalculationResult {
    let mut results = repository.current_results(run_id).unwrap();
    assert_eq!(results.len(), 1, "expected exactly one result");
    results.remove(0)
}

/// Parses a rule in the layout of the files under `config/default/rules`.
fn rule_from_yaml(yaml: &str) -> CalculationRule {
    serde_yaml::from_str::<RuleFile>(yaml)
        .expect("rule yaml should parse")
        .into()
}

// =============================================================================
// SECTION 1: Reference Scenario - 4 tests
// =============================================================================

#[test]
fn test_reference_scenario_totals() {
    let (engine, repository) = reference_engine();
    let run = engine.run_payroll("pl_main", &january()).unwrap();
    assert_eq!(run.status, RunStatus::Generated);

    let result = only_result(&repository, run.id);
    assert_decimal_eq(result.totals.base_pay, "10000", "base pay");
    assert_decimal_eq(result.totals.gross, "11000", "gross");
    assert_decimal_eq(result.totals.pre_tax_deductions, "770", "pre-tax deductions");
    assert_decimal_eq(result.totals.tax_withheld, "784.50", "income tax");
    assert_decimal_eq(result.totals.total_deductions, "1554.50", "total deductions");
    assert_decimal_eq(result.totals.net, "9445.50", "net");
    assert_decimal_eq(result.totals.total_benefits, "1100", "benefits");
    assert_decimal_eq(result.totals.employer_cost, "12100", "employer cost");
    assert_eq!(result.origin, CalculationOrigin::FirstCalculation);
}

#[test]
fn test_reference_scenario_lines_in_order() {
    let (engine, repository) = reference_engine();
    let run = engine.run_payroll("pl_main", &january()).unwrap();
    let result = only_result(&repository, run.id);

    let codes: Vec<&str> = result.lines.iter().map(|l| l.code.as_str()).collect();
    assert_eq!(codes, vec!["BONUS10", "PENSION", "INCOME_TAX", "EMPLOYER_SS"]);

    let tax = result.line("INCOME_TAX").unwrap();
    assert_eq!(tax.kind, LineKind::Deduction);
    assert_eq!(tax.status, LineStatus::Applied);
    assert_eq!(tax.source, "rule INCOME_TAX@1");
    assert!(result.lines.iter().all(|l| l.is_applied()));
}

#[test]
fn test_reference_scenario_audit_trace() {
    let (engine, repository) = reference_engine();
    let run = engine.run_payroll("pl_main", &january()).unwrap();
    let result = only_result(&repository, run.id);
    let steps = &result.audit_trace.steps;

    assert_eq!(steps.first().unwrap().rule_id, "base_pay");
    assert_eq!(steps.last().unwrap().rule_id, "totals");
    assert!(steps.iter().any(|s| s.rule_id == "INCOME_TAX@1"));

    let numbers: Vec<u32> = steps.iter().map(|s| s.step_number).collect();
    let expected: Vec<u32> = (1..=steps.len() as u32).collect();
    assert_eq!(numbers, expected);
    assert!(result.audit_trace.warnings.is_empty());
}

#[test]
fn test_reference_scenario_snapshot() {
    let (engine, repository) = reference_engine();
    let run = engine.run_payroll("pl_main", &january()).unwrap();
    let run = repository.get_run(run.id).unwrap();

    assert!(run.snapshot.formulas.contains_key("INCOME_TAX@1"));
    assert!(run.snapshot.concepts.contains_key("PENSION"));
    assert_eq!(run.snapshot.settings.base_currency, "USD");
    assert_decimal_eq(run.totals.net, "9445.50", "run net");
    assert_eq!(run.summary().succeeded, 1);
}

// =============================================================================
// SECTION 2: Accumulation - 3 tests
// =============================================================================

#[test]
fn test_accumulation_across_periods() {
    let (engine, repository) = create_engine(
        &load_config(),
        create_planilla(&[], &["PENSION"], &[]),
        vec![create_employee("emp_001", "10000")],
    );
    engine.run_payroll("pl_main", &january()).unwrap();
    engine.run_payroll("pl_main", &february()).unwrap();

    let record = repository.get_accumulation("emp_001", 2025).unwrap();
    assert_decimal_eq(record.accrued_gross, "20000", "accrued gross");
    assert_decimal_eq(record.accrued_pre_tax, "1400", "accrued pre-tax");
    assert_eq!(record.periods_processed, 2);
}

#[test]
fn test_cancelled_run_reverts_accumulation() {
    let (engine, repository) = reference_engine();
    let january_run = engine.run_payroll("pl_main", &january()).unwrap();
    let february_run = engine.run_payroll("pl_main", &february()).unwrap();
    engine.cancel_run(february_run.id).unwrap();

    let record = repository.get_accumulation("emp_001", 2025).unwrap();
    assert_eq!(record.periods_processed, 1);
    assert_decimal_eq(record.accrued_gross, "11000", "accrued gross");
    assert_eq!(
        repository.get_run(january_run.id).unwrap().status,
        RunStatus::Generated
    );
}

#[test]
fn test_recalculating_earlier_period_ignores_later_periods() {
    let config = load_config();
    let (engine, repository) = create_engine(
        &config,
        create_planilla(&["COMMISSION"], &[], &[]),
        vec![create_employee("emp_001", "10000")],
    );
    config
        .catalog()
        .publish(rule_from_yaml(
            r#"
code: COMMISSION
version: 2
effective_from: 2025-01-01
meta: { name: Year to date commission, result: commission }
inputs:
  - { name: ytd, source: ytd.gross, type: decimal }
steps:
  - { name: commission, type: calculation, formula: "round(ytd * 0.01, 2)" }
"#,
        ))
        .unwrap();

    let january_run = engine.run_payroll("pl_main", &january()).unwrap();
    let original = only_result(&repository, january_run.id);
    assert_decimal_eq(original.totals.gross, "10000", "january gross");

    let february_run = engine.run_payroll("pl_main", &february()).unwrap();
    let february_result = only_result(&repository, february_run.id);
    assert_decimal_eq(february_result.totals.gross, "10100", "february gross");

    let recalculated = engine.recalculate(&original).unwrap();
    assert_decimal_eq(recalculated.totals.gross, "10000", "recalculated january gross");
    assert_eq!(recalculated.totals, original.totals);

    let record = repository.get_accumulation("emp_001", 2025).unwrap();
    assert_decimal_eq(record.accrued_gross, "20100", "year to date gross");
    assert_eq!(record.periods_processed, 2);
}

// =============================================================================
// SECTION 3: Deduction Ordering and Loans - 3 tests
// =============================================================================

#[test]
fn test_insufficient_balance_skips_optional_loan() {
    let (engine, repository) = create_engine(
        &load_config(),
        create_planilla(&[], &["PENSION", "UNION_DUES"], &[]),
        vec![create_employee("emp_001", "1000")],
    );
    repository
        .add_loan("emp_001", create_loan("ln_1", "950", false))
        .unwrap();

    let run = engine.run_payroll("pl_main", &january()).unwrap();
    let result = only_result(&repository, run.id);

    let codes: Vec<&str> = result.lines.iter().map(|l| l.code.as_str()).collect();
    assert_eq!(codes, vec!["PENSION", "LOAN", "UNION_DUES"]);
    assert_eq!(
        result.line("LOAN").unwrap().status,
        LineStatus::Skipped(SkipReason::InsufficientBalance)
    );
    assert!(result.line("UNION_DUES").unwrap().is_applied());
    assert_decimal_eq(result.totals.net, "905", "net");
    assert_eq!(result.warnings()[0].code, INSUFFICIENT_BALANCE);
    assert!(repository.get_installments(run.id).unwrap().is_empty());
}

#[test]
fn test_mandatory_loan_drives_net_negative() {
    let (engine, repository) = create_engine(
        &load_config(),
        create_planilla(&[], &["PENSION", "UNION_DUES"], &[]),
        vec![create_employee("emp_001", "1000")],
    );
    repository
        .add_loan("emp_001", create_loan("ln_1", "950", true))
        .unwrap();

    let run = engine.run_payroll("pl_main", &january()).unwrap();
    let result = only_result(&repository, run.id);

    assert_decimal_eq(result.totals.net, "-20", "net");
    assert!(result.has_negative_net());
    assert!(!result.line("UNION_DUES").unwrap().is_applied());
    let warnings: Vec<&str> = result.warnings().iter().map(|w| w.code.as_str()).collect();
    assert_eq!(warnings, vec![INSUFFICIENT_BALANCE, NEGATIVE_NET]);
}

#[test]
fn test_applied_run_settles_loan_balance() {
    let (engine, repository) = reference_engine();
    repository
        .add_loan("emp_001", create_loan("ln_1", "300", false))
        .unwrap();

    let run = engine.run_payroll("pl_main", &january()).unwrap();
    engine.approve_run(run.id).unwrap();
    engine.apply_run(run.id).unwrap();

    let loans = repository.get_loan_balances("emp_001").unwrap();
    assert_decimal_eq(loans[0].balance, "4700", "remaining balance");
    let paid = engine.mark_paid(run.id).unwrap();
    assert_eq!(paid.status, RunStatus::Paid);
}

// =============================================================================
// SECTION 4: Recalculation and Lifecycle - 3 tests
// =============================================================================

#[test]
fn test_recalculation_is_idempotent() {
    let (engine, repository) = reference_engine();
    let run = engine.run_payroll("pl_main", &january()).unwrap();
    let original = only_result(&repository, run.id);

    let recalculated = engine.recalculate(&original).unwrap();
    assert_eq!(recalculated.totals, original.totals);
    assert_eq!(recalculated.lines, original.lines);
    assert_eq!(recalculated.recalculated_from, Some(original.id));
    assert_eq!(only_result(&repository, run.id).id, recalculated.id);
}

#[test]
fn test_applied_run_rejects_recalculation() {
    let (engine, repository) = reference_engine();
    let run = engine.run_payroll("pl_main", &january()).unwrap();
    engine.approve_run(run.id).unwrap();
    engine.apply_run(run.id).unwrap();

    let err = engine
        .recalculate(&only_result(&repository, run.id))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
    assert!(matches!(
        engine.cancel_run(run.id).unwrap_err(),
        EngineError::InvalidState { .. }
    ));
}

#[test]
fn test_applied_run_locks_rule_version() {
    let config = load_config();
    let catalog = config.catalog();
    let (engine, _) = create_engine(
        &config,
        create_planilla(&["BONUS10"], &["PENSION", "INCOME_TAX"], &[]),
        vec![create_employee("emp_001", "10000")],
    );
    let run = engine.run_payroll("pl_main", &january()).unwrap();
    assert!(!catalog.is_referenced("INCOME_TAX", 1));

    engine.approve_run(run.id).unwrap();
    engine.apply_run(run.id).unwrap();
    assert!(catalog.is_referenced("INCOME_TAX", 1));
    assert!(matches!(
        catalog.remove("INCOME_TAX", 1).unwrap_err(),
        EngineError::InvalidState { .. }
    ));
}

// =============================================================================
// SECTION 5: Rule-Driven Concepts - 4 tests
// =============================================================================

fn commission_engine() -> (Arc<PayrollEngine>, Arc<InMemoryRepository>) {
    let (engine, repository) = create_engine(
        &load_config(),
        create_planilla(&["COMMISSION"], &[], &[]),
        vec![
            create_employee("emp_001", "10000"),
            create_employee("emp_002", "10000"),
        ],
    );
    repository
        .add_novelty(
            "emp_001",
            Novelty {
                code: "sales".to_string(),
                amount: decimal("5000"),
                date: date(2025, 1, 15),
            },
        )
        .unwrap();
    (engine, repository)
}

#[test]
fn test_commission_reads_novelty_and_config() {
    let (engine, repository) = commission_engine();
    let run = engine.run_payroll("pl_main", &january()).unwrap();

    let results = repository.current_results(run.id).unwrap();
    let result = results.iter().find(|r| r.employee_id == "emp_001").unwrap();
    assert_decimal_eq(result.line("COMMISSION").unwrap().amount, "250", "commission");
    assert_decimal_eq(result.totals.gross, "10250", "gross");

    let run = repository.get_run(run.id).unwrap();
    assert_decimal_eq(
        run.snapshot.config_values["commission_rate"],
        "0.05",
        "captured rate",
    );
    assert!(run.snapshot.formulas.contains_key("COMMISSION@1"));
}

#[test]
fn test_configured_novelty_defaults_to_zero() {
    let (engine, repository) = commission_engine();
    let run = engine.run_payroll("pl_main", &january()).unwrap();

    assert_eq!(run.status, RunStatus::Generated);
    assert!(run.failures.is_empty());
    let results = repository.current_results(run.id).unwrap();
    let result = results.iter().find(|r| r.employee_id == "emp_002").unwrap();
    assert_decimal_eq(result.line("COMMISSION").unwrap().amount, "0", "commission");
    assert_decimal_eq(result.totals.gross, "10000", "gross");
}

#[test]
fn test_missing_input_fails_only_that_employee() {
    let config = load_config();
    let (engine, repository) = create_engine(
        &config,
        create_planilla(&["COMMISSION"], &[], &[]),
        vec![
            create_employee("emp_001", "10000"),
            create_employee("emp_002", "10000"),
        ],
    );
    config
        .catalog()
        .publish(rule_from_yaml(
            r#"
code: COMMISSION
version: 2
effective_from: 2025-01-01
meta: { name: Referral bonus, result: bonus }
inputs:
  - { name: referrals, source: novelty.referrals, type: decimal }
steps:
  - { name: bonus, type: calculation, formula: "referrals * 100" }
"#,
        ))
        .unwrap();
    repository
        .add_novelty(
            "emp_001",
            Novelty {
                code: "referrals".to_string(),
                amount: decimal("2"),
                date: date(2025, 1, 15),
            },
        )
        .unwrap();

    let run = engine.run_payroll("pl_main", &january()).unwrap();

    assert_eq!(run.status, RunStatus::GeneratedWithErrors);
    assert_eq!(run.results.len(), 1);
    let failure = &run.failures["emp_002"];
    assert_eq!(failure.kind, ErrorKind::PerEmployee);
    assert!(failure.error.contains("COMMISSION"));

    assert!(engine.approve_run(run.id).is_err());
    engine.review_run(run.id).unwrap();
    assert_eq!(engine.approve_run(run.id).unwrap().status, RunStatus::Approved);
}

#[test]
fn test_new_rule_version_applies_from_its_date() {
    let config = load_config();
    let (engine, repository) = create_engine(
        &config,
        create_planilla(&["BONUS10"], &["PENSION", "INCOME_TAX"], &[]),
        vec![create_employee("emp_001", "10000")],
    );
    config
        .catalog()
        .publish(rule_from_yaml(
            r#"
code: INCOME_TAX
version: 2
effective_from: 2025-02-01
meta: { name: Income tax withholding, result: tax }
inputs:
  - { name: taxable, source: taxable_income, type: decimal }
steps:
  - { name: tax, type: bracket_lookup, table: income_tax, amount: taxable }
tables:
  income_tax:
    brackets:
      - { lower: 0, upper: 5000, rate: 0.00 }
      - { lower: 5000, rate: 0.20 }
"#,
        ))
        .unwrap();

    let january_run = engine.run_payroll("pl_main", &january()).unwrap();
    let february_run = engine.run_payroll("pl_main", &february()).unwrap();

    let january_result = only_result(&repository, january_run.id);
    let february_result = only_result(&repository, february_run.id);
    assert_decimal_eq(january_result.totals.tax_withheld, "784.50", "january tax");
    assert_decimal_eq(february_result.totals.tax_withheld, "1046", "february tax");
    assert_eq!(
        february_result.line("INCOME_TAX").unwrap().source,
        "rule INCOME_TAX@2"
    );
}

// =============================================================================
// SECTION 6: Batch Queue - 3 tests
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_batch_above_threshold_completes() {
    let employees = (1..=60)
        .map(|n| create_employee(&format!("emp_{:03}", n), "10000"))
        .collect();
    let (engine, repository) = create_engine(
        &load_config(),
        create_planilla(&["BONUS10"], &["PENSION", "INCOME_TAX"], &[]),
        employees,
    );
    let queue = BatchQueue::new(engine);

    let job_id = queue.enqueue_batch("pl_main", &january()).await;
    let run = queue.wait(job_id).await.unwrap();

    assert_eq!(run.status, RunStatus::Generated);
    assert_eq!(repository.current_results(run.id).unwrap().len(), 60);
    assert_decimal_eq(run.totals.net, "566730", "run net");

    let progress = queue.get_progress(job_id).await.unwrap();
    assert_eq!(progress.state, JobState::Completed);
    assert_eq!(progress.processed, 60);
    assert_eq!(progress.total, 60);
}

#[tokio::test]
async fn test_redelivered_job_returns_same_run() {
    let (engine, repository) = reference_engine();
    let queue = BatchQueue::new(engine);
    let job = BatchJob {
        job_id: Uuid::new_v4(),
        planilla_id: "pl_main".to_string(),
        period: january(),
    };

    let first = queue.process(job.clone()).await.unwrap();
    let second = queue.process(job).await.unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(
        repository
            .get_accumulation("emp_001", 2025)
            .unwrap()
            .periods_processed,
        1
    );
}

#[tokio::test]
async fn test_second_job_for_same_period_conflicts() {
    let (engine, _) = reference_engine();
    let queue = BatchQueue::new(engine.clone());
    let holder = Uuid::new_v4();
    engine.prepare_run("pl_main", &january(), holder).unwrap();

    let job_id = queue.enqueue_batch("pl_main", &january()).await;
    let err = queue.wait(job_id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Structural);
    assert_eq!(queue.get_progress(job_id).await.unwrap().state, JobState::Failed);
}

// =============================================================================
// SECTION 7: Catalog Validation - 3 tests
// =============================================================================

fn single_step_rule(code: &str, formula: &str) -> CalculationRule {
    rule_from_yaml(&format!(
        r#"
code: {code}
version: 1
effective_from: 2025-01-01
inputs:
  - {{ name: gross, source: gross, type: decimal }}
steps:
  - {{ name: result, type: calculation, formula: "{formula}" }}
"#
    ))
}

#[test]
fn test_attribute_access_is_rejected() {
    let catalog = load_config().catalog();
    let err = catalog
        .publish(single_step_rule("ESCAPE", "gross.__class__"))
        .unwrap_err();
    assert!(matches!(err, EngineError::UnsafeExpression { .. }));
    assert_eq!(err.kind(), ErrorKind::CatalogValidation);
}

#[test]
fn test_unlisted_function_call_is_rejected() {
    let catalog = load_config().catalog();
    let err = catalog
        .publish(single_step_rule("SHELL", "system(gross)"))
        .unwrap_err();
    assert!(matches!(err, EngineError::UnsafeExpression { .. }));
}

#[test]
fn test_rejected_rule_is_never_resolvable() {
    let config = load_config();
    let catalog = config.catalog();
    let _ = catalog.publish(single_step_rule("ESCAPE", "gross.__class__"));

    let (engine, _) = create_engine(
        &config,
        create_planilla(&["BONUS10"], &[], &[]),
        vec![create_employee("emp_001", "10000")],
    );
    assert!(engine.run_payroll("pl_main", &january()).is_ok());
    assert_eq!(catalog.get("ESCAPE", 1).unwrap().status, RuleStatus::Draft);
}
