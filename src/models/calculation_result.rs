//! Calculation result models for the payroll engine.
//!
//! This module contains the [`CalculationResult`] type and its associated structures
//! that capture all outputs from one employee's calculation for one period, including
//! itemized lines, totals, warnings, and the audit trace.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::PayPeriod;
use crate::error::{EngineError, EngineResult};

/// Represents the category of a result line.
///
/// # Example
///
/// ```
/// use payroll_engine::models::LineKind;
///
/// let kind = LineKind::Deduction;
/// assert_eq!(serde_json::to_string(&kind).unwrap(), "\"deduction\"");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineKind {
    /// Adds to gross pay.
    Perception,
    /// A deduction concept.
    Deduction,
    /// A loan or advance installment.
    Loan,
    /// Employer-borne cost.
    Benefit,
}

impl LineKind {
    /// Returns true for lines that reduce net pay.
    pub fn reduces_net(self) -> bool {
        matches!(self, LineKind::Deduction | LineKind::Loan)
    }
}

/// Why a line was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Net pay could not cover a non-mandatory deduction.
    InsufficientBalance,
}

/// Whether a line counted towards the totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineStatus {
    /// The amount counted.
    Applied,
    /// The amount was computed but not taken.
    Skipped(SkipReason),
}

/// Represents a single line item of a result.
///
/// # Example
///
/// ```
/// use payroll_engine::models::{LineKind, LineStatus, ResultLine};
/// use rust_decimal::Decimal;
///
/// let line = ResultLine {
///     code: "PENSION".to_string(),
///     name: "Pension fund".to_string(),
///     kind: LineKind::Deduction,
///     amount: Decimal::new(770, 0),
///     status: LineStatus::Applied,
///     priority: 1,
///     mandatory: true,
///     pre_tax: true,
///     source: "percentage 0.07 of gross".to_string(),
/// };
/// assert!(line.is_applied());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultLine {
    /// Concept or loan code.
    pub code: String,
    /// Display name.
    pub name: String,
    /// The category of the line.
    pub kind: LineKind,
    /// The computed amount.
    pub amount: Decimal,
    /// Whether the amount counted.
    pub status: LineStatus,
    /// Deduction priority; zero for other kinds.
    pub priority: i32,
    /// Mandatory flag of the concept.
    pub mandatory: bool,
    /// Pre-tax flag of the concept.
    pub pre_tax: bool,
    /// How the amount was obtained.
    pub source: String,
}

impl ResultLine {
    /// Returns true if the line counted towards the totals.
    pub fn is_applied(&self) -> bool {
        self.status == LineStatus::Applied
    }
}

/// Aggregated totals for one result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultTotals {
    /// Base pay for the days worked.
    pub base_pay: Decimal,
    /// Sum of applied perceptions.
    pub total_perceptions: Decimal,
    /// Base pay plus perceptions.
    pub gross: Decimal,
    /// Sum of applied deductions and installments.
    pub total_deductions: Decimal,
    /// Applied deductions flagged pre-tax.
    pub pre_tax_deductions: Decimal,
    /// Applied deductions flagged as withholding.
    pub tax_withheld: Decimal,
    /// Gross minus applied deductions. May be negative.
    pub net: Decimal,
    /// Sum of benefits.
    pub total_benefits: Decimal,
    /// Gross plus benefits.
    pub employer_cost: Decimal,
}

impl ResultTotals {
    /// Adds another result's totals into these.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::CalculationError`] if any total overflows,
    /// leaving these totals unchanged.
    pub fn add(&mut self, other: &ResultTotals) -> EngineResult<()> {
        let sum = |a: Decimal, b: Decimal, what: &str| {
            a.checked_add(b).ok_or_else(|| EngineError::CalculationError {
                message: format!("arithmetic overflow in run {}", what),
            })
        };
        *self = ResultTotals {
            base_pay: sum(self.base_pay, other.base_pay, "base pay")?,
            total_perceptions: sum(self.total_perceptions, other.total_perceptions, "perceptions")?,
            gross: sum(self.gross, other.gross, "gross")?,
            total_deductions: sum(self.total_deductions, other.total_deductions, "deductions")?,
            pre_tax_deductions: sum(
                self.pre_tax_deductions,
                other.pre_tax_deductions,
                "pre-tax deductions",
            )?,
            tax_withheld: sum(self.tax_withheld, other.tax_withheld, "tax withheld")?,
            net: sum(self.net, other.net, "net")?,
            total_benefits: sum(self.total_benefits, other.total_benefits, "benefits")?,
            employer_cost: sum(self.employer_cost, other.employer_cost, "employer cost")?,
        };
        Ok(())
    }
}

/// A single step in the audit trace recording a calculation decision.
///
/// Each step captures the input, output, and reasoning for one concept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditStep {
    /// The sequential step number.
    pub step_number: u32,
    /// Identifier of what was applied: a concept code or `code@version`.
    pub rule_id: String,
    /// The human-readable name.
    pub rule_name: String,
    /// The input data for this step.
    pub input: serde_json::Value,
    /// The output data from this step.
    pub output: serde_json::Value,
    /// Human-readable explanation of the decision.
    pub reasoning: String,
}

/// A warning generated during calculation.
///
/// Warnings indicate potential issues that don't prevent calculation
/// but may require attention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditWarning {
    /// A code identifying the type of warning.
    pub code: String,
    /// A human-readable description of the warning.
    pub message: String,
    /// The severity level (e.g., "low", "medium", "high").
    pub severity: String,
}

/// The complete audit trace for a calculation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditTrace {
    /// The sequence of calculation steps.
    pub steps: Vec<AuditStep>,
    /// Any warnings generated during calculation.
    pub warnings: Vec<AuditWarning>,
    /// The total calculation duration in microseconds.
    pub duration_us: u64,
}

/// Whether a result is a first calculation or a correction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalculationOrigin {
    /// Produced by the run itself.
    #[default]
    FirstCalculation,
    /// Produced by recalculating an earlier result.
    Recalculated,
}

/// The complete result of one employee's calculation for one period.
///
/// A result is never modified once written: a correction produces a new
/// result whose `recalculated_from` points at the one it replaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalculationResult {
    /// Unique identifier for this result.
    pub id: Uuid,
    /// The run this result belongs to.
    pub run_id: Uuid,
    /// The employee.
    pub employee_id: String,
    /// The planilla.
    pub planilla_id: String,
    /// The pay period.
    pub period: PayPeriod,
    /// The date date-sensitive formulas were evaluated as of.
    pub calculation_date: NaiveDate,
    /// First calculation or recalculation.
    pub origin: CalculationOrigin,
    /// The result this one replaces.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recalculated_from: Option<Uuid>,
    /// Days worked after absences.
    pub days_worked: Decimal,
    /// Itemized lines in application order.
    pub lines: Vec<ResultLine>,
    /// Aggregated totals.
    pub totals: ResultTotals,
    /// Complete audit trace of calculation decisions.
    pub audit_trace: AuditTrace,
    /// When the calculation was performed.
    pub calculated_at: DateTime<Utc>,
    /// The version of the engine that performed the calculation.
    pub engine_version: String,
}

impl CalculationResult {
    /// Finds a line by code.
    pub fn line(&self, code: &str) -> Option<&ResultLine> {
        self.lines.iter().find(|l| l.code == code)
    }

    /// Warnings raised during the calculation.
    pub fn warnings(&self) -> &[AuditWarning] {
        &self.audit_trace.warnings
    }

    /// Returns true if net pay ended below zero.
    pub fn has_negative_net(&self) -> bool {
        self.totals.net.is_sign_negative() && !self.totals.net.is_zero()
    }
}
