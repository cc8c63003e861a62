//! Loan and salary-advance ledger models.
//!
//! Installments deducted during a run are provisional until the run is
//! applied. Each one is keyed by loan and run, so a redelivered job or a
//! recalculation overwrites its own entry instead of deducting twice.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Whether the balance is a loan or a salary advance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanKind {
    /// A loan repaid in installments.
    #[default]
    Loan,
    /// An advance on salary.
    Advance,
}

/// The outstanding balance of one loan, as of the last applied run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanBalance {
    /// Unique loan identifier.
    pub loan_id: String,
    /// Line code used in results.
    pub code: String,
    /// Loan or advance.
    #[serde(default)]
    pub kind: LoanKind,
    /// Installment deducted each period.
    pub installment: Decimal,
    /// Amount still owed.
    pub balance: Decimal,
    /// Position among deductions; lower first.
    #[serde(default)]
    pub priority: i32,
    /// Mandatory installments apply even when net is insufficient.
    #[serde(default)]
    pub mandatory: bool,
}

impl LoanBalance {
    /// The amount due this period: the installment, capped at the balance.
    ///
    /// # Example
    ///
    /// ```
    /// use payroll_engine::models::{LoanBalance, LoanKind};
    /// use rust_decimal::Decimal;
    ///
    /// let loan = LoanBalance {
    ///     loan_id: "ln_1".to_string(),
    ///     code: "LOAN".to_string(),
    ///     kind: LoanKind::Loan,
    ///     installment: Decimal::new(500, 0),
    ///     balance: Decimal::new(120, 0),
    ///     priority: 5,
    ///     mandatory: false,
    /// };
    /// assert_eq!(loan.due(), Decimal::new(120, 0));
    /// ```
    pub fn due(&self) -> Decimal {
        self.installment.min(self.balance).max(Decimal::ZERO)
    }
}

/// An installment recorded against a loan by a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanInstallment {
    /// The loan.
    pub loan_id: String,
    /// The run that deducted it.
    pub run_id: Uuid,
    /// The employee.
    pub employee_id: String,
    /// Amount deducted.
    pub amount: Decimal,
    /// True once the run has been applied and the balance reduced.
    #[serde(default)]
    pub settled: bool,
}
