//! Canonical variables a calculation exposes to rule bindings.
//!
//! | Variable | Meaning |
//! |---|---|
//! | `salary` | Salary per period in the planilla currency |
//! | `base_pay`, `days_worked`, `days_per_period` | From base pay |
//! | `gross`, `total_perceptions` | Running totals after perceptions |
//! | `pre_tax_deductions`, `taxable_income`, `net` | Running totals during deductions |
//! | `calculation_date`, `period.start`, `period.end`, `period.days` | Dates |
//! | `employee.id`, `employee.hire_date`, `employee.age`, `employee.seniority_days`, `employee.<attribute>` | Employee facts |
//! | `exchange_rate` | Planilla-currency units per salary-currency unit |
//! | `ytd.gross`, `ytd.pre_tax`, `ytd.tax_withheld`, `ytd.periods`, `ytd.average_gross` | Year to date before this period |
//! | `novelty.<code>` | Summed novelties of the period |
//! | `perception.<code>`, `deduction.<code>` | Amounts of concepts applied so far |
//! | `config.<key>` | Configured values |

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::formula::{Context, Value};
use crate::models::{AccumulationRecord, Employee, PayPeriod};

use super::base_pay::BasePayResult;

/// Gross pay so far.
pub const GROSS: &str = "gross";
/// Sum of perceptions so far.
pub const TOTAL_PERCEPTIONS: &str = "total_perceptions";
/// Pre-tax deductions so far.
pub const PRE_TAX_DEDUCTIONS: &str = "pre_tax_deductions";
/// Gross minus pre-tax deductions so far.
pub const TAXABLE_INCOME: &str = "taxable_income";
/// Gross minus deductions so far.
pub const NET: &str = "net";

/// What a canonical context is seeded from.
#[derive(Debug, Clone, Copy)]
pub struct ContextSeed<'a> {
    /// The employee.
    pub employee: &'a Employee,
    /// The period.
    pub period: &'a PayPeriod,
    /// The date the calculation is made as of.
    pub calculation_date: NaiveDate,
    /// Base pay of the period.
    pub base: &'a BasePayResult,
    /// Year to date as of the period start, without the run being calculated.
    pub ytd: &'a AccumulationRecord,
    /// Novelty totals by code.
    pub novelties: &'a BTreeMap<String, Decimal>,
    /// Configured values by key.
    pub config_values: &'a BTreeMap<String, Decimal>,
}

/// The variables visible to rule input bindings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CanonicalContext {
    vars: Context,
}

impl CanonicalContext {
    /// Builds the context a calculation starts from.
    ///
    /// Running totals start at base pay: `gross`, `taxable_income` and
    /// `net` equal `base_pay`.
    pub fn seed(seed: &ContextSeed<'_>) -> Self {
        let mut context = Self::default();
        let ContextSeed {
            employee,
            period,
            calculation_date,
            base,
            ytd,
            novelties,
            config_values,
        } = *seed;

        context.set("salary", base.salary);
        context.set("base_pay", base.base_pay);
        context.set("days_worked", base.days_worked);
        context.set("days_per_period", base.days_per_period);
        context.set("exchange_rate", base.exchange_rate);
        context.set(GROSS, base.base_pay);
        context.set(TOTAL_PERCEPTIONS, Decimal::ZERO);
        context.set(PRE_TAX_DEDUCTIONS, Decimal::ZERO);
        context.set(TAXABLE_INCOME, base.base_pay);
        context.set(NET, base.base_pay);

        context.set("calculation_date", calculation_date);
        context.set("period.start", period.start_date);
        context.set("period.end", period.end_date);
        context.set("period.days", period.days());

        context.set("employee.id", employee.id.as_str());
        context.set("employee.hire_date", employee.hire_date);
        context.set("employee.seniority_days", employee.seniority_days(calculation_date));
        if let Some(age) = employee.age_on(calculation_date) {
            context.set("employee.age", i64::from(age));
        }
        for (key, value) in &employee.attributes {
            context.set(format!("employee.{}", key), value.clone());
        }

        context.set("ytd.gross", ytd.accrued_gross);
        context.set("ytd.pre_tax", ytd.accrued_pre_tax);
        context.set("ytd.tax_withheld", ytd.accrued_tax_withheld);
        context.set("ytd.periods", i64::from(ytd.periods_processed));
        context.set("ytd.average_gross", ytd.average_gross());

        for (code, total) in novelties {
            context.set(format!("novelty.{}", code), *total);
        }
        for (key, value) in config_values {
            context.set(format!("config.{}", key), *value);
        }
        context
    }

    /// Sets a variable.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.vars.insert(key.into(), value.into());
    }

    /// Reads a variable.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.vars.get(key)
    }

    /// Reads a numeric variable, zero if absent or not a number.
    pub fn amount(&self, key: &str) -> Decimal {
        self.get(key)
            .and_then(|value| value.as_number().ok())
            .unwrap_or(Decimal::ZERO)
    }

    /// The variables as a formula context.
    pub fn as_context(&self) -> &Context {
        &self.vars
    }
}
