//! Concept application: perceptions, deductions, loan installments and
//! benefits, in that order.
//!
//! Deductions and installments share one queue ordered by priority, ties
//! broken by code. A non-mandatory item that the running net cannot cover
//! is skipped with an `INSUFFICIENT_BALANCE` warning; a mandatory one is
//! applied regardless and may leave net negative, which raises a
//! `NEGATIVE_NET` warning. Pre-tax deductions reduce the `taxable_income`
//! later items see.
//!
//! Totals are accumulated with checked arithmetic. An amount that would
//! overflow fails the employee with a `CalculationError` instead of
//! aborting the run.

use rust_decimal::Decimal;
use tracing::debug;
use uuid::Uuid;

use crate::config::RoundingConfig;
use crate::error::{EngineError, EngineResult};
use crate::models::{
    AuditStep, AuditWarning, ConceptDefinition, ConceptMode, LineKind, LineStatus,
    LoanBalance, LoanInstallment, PercentageBase, ResultLine, ResultTotals, SkipReason,
    SnapshotBundle,
};
use crate::rules::{RuleCatalog, bind_inputs, execute};

use super::base_pay::BasePayResult;
use super::context::{
    CanonicalContext, GROSS, NET, PRE_TAX_DEDUCTIONS, TAXABLE_INCOME, TOTAL_PERCEPTIONS,
};
use super::snapshot::SnapshotRecorder;

/// Warning code for a skipped non-mandatory deduction.
pub const INSUFFICIENT_BALANCE: &str = "INSUFFICIENT_BALANCE";
/// Warning code for a result whose net pay is below zero.
pub const NEGATIVE_NET: &str = "NEGATIVE_NET";

/// Everything a [`ConceptPass`] produced.
#[derive(Debug, Clone)]
pub struct ConceptOutcome {
    /// Lines in application order.
    pub lines: Vec<ResultLine>,
    /// Final totals.
    pub totals: ResultTotals,
    /// Audit steps, starting with base pay.
    pub steps: Vec<AuditStep>,
    /// Warnings raised.
    pub warnings: Vec<AuditWarning>,
    /// Loan installments deducted.
    pub installments: Vec<LoanInstallment>,
    /// What the pass consulted.
    pub snapshot: SnapshotBundle,
}

enum Deduction<'l> {
    Concept(ConceptDefinition),
    Loan(&'l LoanBalance),
}

impl Deduction<'_> {
    fn order_key(&self) -> (i32, &str) {
        match self {
            Deduction::Concept(c) => (c.priority, c.code.as_str()),
            Deduction::Loan(l) => (l.priority, l.code.as_str()),
        }
    }
}

/// Applies one employee's concepts on top of base pay.
pub struct ConceptPass<'a> {
    catalog: &'a dyn RuleCatalog,
    recorder: SnapshotRecorder<'a>,
    context: CanonicalContext,
    rounding: RoundingConfig,
    run_id: Uuid,
    employee_id: String,
    totals: ResultTotals,
    lines: Vec<ResultLine>,
    steps: Vec<AuditStep>,
    warnings: Vec<AuditWarning>,
    installments: Vec<LoanInstallment>,
}

impl<'a> ConceptPass<'a> {
    /// Starts a pass from base pay.
    pub fn new(
        catalog: &'a dyn RuleCatalog,
        recorder: SnapshotRecorder<'a>,
        context: CanonicalContext,
        base: &BasePayResult,
        run_id: Uuid,
        employee_id: &str,
    ) -> Self {
        let rounding = recorder.settings().rounding;
        let totals = ResultTotals {
            base_pay: base.base_pay,
            gross: base.base_pay,
            net: base.base_pay,
            ..ResultTotals::default()
        };
        Self {
            catalog,
            recorder,
            context,
            rounding,
            run_id,
            employee_id: employee_id.to_string(),
            totals,
            lines: Vec::new(),
            steps: vec![base.audit_step.clone()],
            warnings: Vec::new(),
            installments: Vec::new(),
        }
    }

    /// Running totals so far.
    pub fn totals(&self) -> &ResultTotals {
        &self.totals
    }

    /// Adds each perception to gross pay. Percentages default to base pay.
    pub fn apply_perceptions(&mut self, concepts: &[&ConceptDefinition]) -> EngineResult<()> {
        for live in concepts {
            let concept = self.recorder.concept(live);
            let (amount, source) = self.amount(&concept, PercentageBase::BasePay)?;

            self.add_perception(amount)
                .map_err(|e| concept_failed(&concept.code, e))?;
            self.context.set(format!("perception.{}", concept.code), amount);

            self.push_line(&concept, LineKind::Perception, amount, LineStatus::Applied, source);
        }
        Ok(())
    }

    /// Applies deductions and loan installments in ascending priority, ties
    /// by code. Percentages default to gross.
    pub fn apply_deductions(
        &mut self,
        concepts: &[&ConceptDefinition],
        loans: &[LoanBalance],
    ) -> EngineResult<()> {
        let mut queue: Vec<Deduction<'_>> = concepts
            .iter()
            .map(|live| Deduction::Concept(self.recorder.concept(live)))
            .chain(
                loans
                    .iter()
                    .filter(|loan| loan.due() > Decimal::ZERO)
                    .map(Deduction::Loan),
            )
            .collect();
        queue.sort_by(|a, b| a.order_key().cmp(&b.order_key()));

        for item in &queue {
            match item {
                Deduction::Concept(concept) => self.apply_deduction(concept)?,
                Deduction::Loan(loan) => self.apply_installment(loan)?,
            }
        }

        if self.totals.net < Decimal::ZERO {
            self.warnings.push(AuditWarning {
                code: NEGATIVE_NET.to_string(),
                message: format!(
                    "Mandatory deductions leave net pay at {}",
                    self.totals.net
                ),
                severity: "high".to_string(),
            });
        }
        Ok(())
    }

    /// Computes each benefit. Benefits never reduce net pay. Percentages
    /// default to gross.
    pub fn apply_benefits(&mut self, concepts: &[&ConceptDefinition]) -> EngineResult<()> {
        for live in concepts {
            let concept = self.recorder.concept(live);
            let (amount, source) = self.amount(&concept, PercentageBase::Gross)?;
            self.totals.total_benefits = sum(self.totals.total_benefits, amount, "total benefits")
                .map_err(|e| concept_failed(&concept.code, e))?;
            self.push_line(&concept, LineKind::Benefit, amount, LineStatus::Applied, source);
        }
        Ok(())
    }

    /// Closes the pass.
    pub fn finish(mut self) -> EngineResult<ConceptOutcome> {
        self.totals.employer_cost =
            sum(self.totals.gross, self.totals.total_benefits, "employer cost")?;
        let totals = self.totals.clone();
        self.audit(
            "totals",
            "Totals",
            serde_json::json!({
                "lines": self.lines.len(),
                "skipped": self.lines.iter().filter(|l| !l.is_applied()).count()
            }),
            serde_json::to_value(&totals).unwrap_or_default(),
            format!(
                "Gross {} − deductions {} = net {}",
                totals.gross, totals.total_deductions, totals.net
            ),
        );
        Ok(ConceptOutcome {
            lines: self.lines,
            totals,
            steps: self.steps,
            warnings: self.warnings,
            installments: self.installments,
            snapshot: self.recorder.finish(),
        })
    }

    fn apply_deduction(&mut self, concept: &ConceptDefinition) -> EngineResult<()> {
        let (amount, source) = self.amount(concept, PercentageBase::Gross)?;

        if !self.can_take(amount, concept.mandatory) {
            self.skip(&concept.code, amount);
            self.push_line(
                concept,
                LineKind::Deduction,
                amount,
                LineStatus::Skipped(SkipReason::InsufficientBalance),
                source,
            );
            return Ok(());
        }

        self.take(amount, concept.pre_tax, concept.withholding)
            .map_err(|e| concept_failed(&concept.code, e))?;
        self.context.set(format!("deduction.{}", concept.code), amount);
        self.push_line(concept, LineKind::Deduction, amount, LineStatus::Applied, source);
        Ok(())
    }

    fn apply_installment(&mut self, loan: &LoanBalance) -> EngineResult<()> {
        let amount = self.rounding.apply(loan.due());
        let source = format!("{:?} {} installment", loan.kind, loan.loan_id).to_lowercase();
        let status = if self.can_take(amount, loan.mandatory) {
            self.take(amount, false, false)
                .map_err(|e| concept_failed(&loan.code, e))?;
            self.context.set(format!("deduction.{}", loan.code), amount);
            self.installments.push(LoanInstallment {
                loan_id: loan.loan_id.clone(),
                run_id: self.run_id,
                employee_id: self.employee_id.clone(),
                amount,
                settled: false,
            });
            LineStatus::Applied
        } else {
            self.skip(&loan.code, amount);
            LineStatus::Skipped(SkipReason::InsufficientBalance)
        };

        self.audit(
            &loan.loan_id,
            &loan.code,
            serde_json::json!({
                "installment": loan.installment.to_string(),
                "balance": loan.balance.to_string(),
                "priority": loan.priority,
                "mandatory": loan.mandatory
            }),
            serde_json::json!({ "amount": amount.to_string(), "status": status }),
            format!("Installment of {} against balance {}", amount, loan.balance),
        );
        self.lines.push(ResultLine {
            code: loan.code.clone(),
            name: loan.loan_id.clone(),
            kind: LineKind::Loan,
            amount,
            status,
            priority: loan.priority,
            mandatory: loan.mandatory,
            pre_tax: false,
            source,
        });
        Ok(())
    }

    fn can_take(&self, amount: Decimal, mandatory: bool) -> bool {
        mandatory || amount <= self.totals.net
    }

    fn add_perception(&mut self, amount: Decimal) -> EngineResult<()> {
        let totals = &mut self.totals;
        totals.total_perceptions = sum(totals.total_perceptions, amount, "total perceptions")?;
        totals.gross = sum(totals.gross, amount, GROSS)?;
        totals.net = sum(totals.net, amount, NET)?;
        self.sync_context()
    }

    fn take(&mut self, amount: Decimal, pre_tax: bool, withholding: bool) -> EngineResult<()> {
        let totals = &mut self.totals;
        totals.total_deductions = sum(totals.total_deductions, amount, "total deductions")?;
        totals.net = difference(totals.net, amount, NET)?;
        if pre_tax {
            totals.pre_tax_deductions = sum(totals.pre_tax_deductions, amount, PRE_TAX_DEDUCTIONS)?;
        }
        if withholding {
            totals.tax_withheld = sum(totals.tax_withheld, amount, "tax withheld")?;
        }
        self.sync_context()
    }

    fn skip(&mut self, code: &str, amount: Decimal) {
        debug!(
            employee_id = %self.employee_id,
            concept = %code,
            amount = %amount,
            net = %self.totals.net,
            "Deduction skipped for insufficient balance"
        );
        self.warnings.push(AuditWarning {
            code: INSUFFICIENT_BALANCE.to_string(),
            message: format!(
                "{} of {} skipped: net pay {} is insufficient",
                code, amount, self.totals.net
            ),
            severity: "medium".to_string(),
        });
    }

    fn taxable_income(&self) -> EngineResult<Decimal> {
        difference(self.totals.gross, self.totals.pre_tax_deductions, TAXABLE_INCOME)
    }

    fn sync_context(&mut self) -> EngineResult<()> {
        let taxable = self.taxable_income()?;
        self.context.set(GROSS, self.totals.gross);
        self.context.set(TOTAL_PERCEPTIONS, self.totals.total_perceptions);
        self.context.set(PRE_TAX_DEDUCTIONS, self.totals.pre_tax_deductions);
        self.context.set(TAXABLE_INCOME, taxable);
        self.context.set(NET, self.totals.net);
        Ok(())
    }

    fn amount(
        &mut self,
        concept: &ConceptDefinition,
        default_base: PercentageBase,
    ) -> EngineResult<(Decimal, String)> {
        let computed = match &concept.mode {
            ConceptMode::Fixed { amount } => Ok((*amount, "fixed amount".to_string())),
            ConceptMode::Percentage { rate, of } => {
                let base = of.unwrap_or(default_base);
                let base_amount = match base {
                    PercentageBase::BasePay => Ok(self.totals.base_pay),
                    PercentageBase::Gross => Ok(self.totals.gross),
                    PercentageBase::Taxable => self.taxable_income(),
                };
                base_amount.and_then(|base_amount| {
                    base_amount
                        .checked_mul(*rate)
                        .map(|value| {
                            (value, format!("{} of {} {}", rate, base_name(base), base_amount))
                        })
                        .ok_or_else(|| overflow("percentage"))
                })
            }
            ConceptMode::Rule { rule } => self.evaluate_rule(concept, rule),
        };

        computed
            .map(|(amount, source)| (self.rounding.apply(amount), source))
            .map_err(|source| concept_failed(&concept.code, source))
    }

    fn evaluate_rule(
        &mut self,
        concept: &ConceptDefinition,
        code: &str,
    ) -> EngineResult<(Decimal, String)> {
        let rule = self.recorder.rule(code, self.catalog)?;
        let bound = bind_inputs(&rule.schema.inputs, self.context.as_context())?;
        self.recorder.record_consulted(&bound.consulted);

        let inputs = serde_json::to_value(&bound.context).unwrap_or_default();
        let outcome = execute(&rule.schema, bound.context)?;
        let amount = outcome.amount(&rule.code)?;

        self.audit(
            &rule.key(),
            &concept.name,
            serde_json::json!({ "concept": concept.code, "inputs": inputs }),
            serde_json::json!({
                "result": amount.to_string(),
                "steps": serde_json::to_value(&outcome.trace).unwrap_or_default()
            }),
            format!(
                "Rule {} evaluated {} step(s) for {}",
                rule.key(),
                outcome.trace.len(),
                concept.code
            ),
        );
        Ok((amount, format!("rule {}", rule.key())))
    }

    fn push_line(
        &mut self,
        concept: &ConceptDefinition,
        kind: LineKind,
        amount: Decimal,
        status: LineStatus,
        source: String,
    ) {
        self.audit(
            &concept.code,
            &concept.name,
            serde_json::json!({
                "kind": kind,
                "priority": concept.priority,
                "mandatory": concept.mandatory,
                "pre_tax": concept.pre_tax
            }),
            serde_json::json!({ "amount": amount.to_string(), "status": status }),
            format!("{}: {}", concept.code, source),
        );
        self.lines.push(ResultLine {
            code: concept.code.clone(),
            name: concept.name.clone(),
            kind,
            amount,
            status,
            priority: if kind.reduces_net() { concept.priority } else { 0 },
            mandatory: concept.mandatory,
            pre_tax: concept.pre_tax,
            source,
        });
    }

    fn audit(
        &mut self,
        rule_id: &str,
        rule_name: &str,
        input: serde_json::Value,
        output: serde_json::Value,
        reasoning: String,
    ) {
        let step_number = self.steps.len() as u32 + 1;
        self.steps.push(AuditStep {
            step_number,
            rule_id: rule_id.to_string(),
            rule_name: rule_name.to_string(),
            input,
            output,
            reasoning,
        });
    }
}

fn overflow(what: &str) -> EngineError {
    EngineError::CalculationError {
        message: format!("arithmetic overflow in {}", what),
    }
}

fn sum(a: Decimal, b: Decimal, what: &str) -> EngineResult<Decimal> {
    a.checked_add(b).ok_or_else(|| overflow(what))
}

fn difference(a: Decimal, b: Decimal, what: &str) -> EngineResult<Decimal> {
    a.checked_sub(b).ok_or_else(|| overflow(what))
}

fn concept_failed(code: &str, source: EngineError) -> EngineError {
    EngineError::ConceptFailed {
        concept: code.to_string(),
        source: Box::new(source),
    }
}

fn base_name(base: PercentageBase) -> &'static str {
    match base {
        PercentageBase::BasePay => "base_pay",
        PercentageBase::Gross => "gross",
        PercentageBase::Taxable => TAXABLE_INCOME,
    }
}
