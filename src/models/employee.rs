//! Employee model and related types.
//!
//! This module defines the [`Employee`] struct and [`SalaryBasis`] enum
//! for representing workers paid through a planilla.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::formula::Value;

use super::PayPeriod;

/// How an employee's salary turns into base pay for a period.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SalaryBasis {
    /// Salary ÷ days per period × days worked.
    #[default]
    Prorated,
    /// The full salary every period, regardless of days worked.
    Flat,
}

/// Represents an employee on a planilla.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Employee {
    /// Unique identifier for the employee.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Inactive employees are never calculated.
    #[serde(default = "default_active")]
    pub active: bool,
    /// The date the employee started employment.
    pub hire_date: NaiveDate,
    /// The last day of employment, if any.
    #[serde(default)]
    pub termination_date: Option<NaiveDate>,
    /// The employee's date of birth.
    #[serde(default)]
    pub birth_date: Option<NaiveDate>,
    /// Salary per period, in `currency`.
    pub salary: Decimal,
    /// How the salary is turned into base pay.
    #[serde(default)]
    pub salary_basis: SalaryBasis,
    /// Currency the salary is expressed in.
    pub currency: String,
    /// Free-form attributes exposed to formulas as `employee.<key>`.
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
}

fn default_active() -> bool {
    true
}

impl Employee {
    /// Returns true if the employee was employed on at least one day of
    /// the period.
    ///
    /// # Examples
    ///
    /// ```
    /// use payroll_engine::models::{Employee, PayPeriod, SalaryBasis};
    /// use chrono::NaiveDate;
    /// use rust_decimal::Decimal;
    ///
    /// let employee = Employee {
    ///     id: "emp_001".to_string(),
    ///     name: "Ana".to_string(),
    ///     active: true,
    ///     hire_date: NaiveDate::from_ymd_opt(2025, 1, 20).unwrap(),
    ///     termination_date: None,
    ///     birth_date: None,
    ///     salary: Decimal::new(10_000, 0),
    ///     salary_basis: SalaryBasis::Prorated,
    ///     currency: "USD".to_string(),
    ///     attributes: Default::default(),
    /// };
    ///
    /// let january = PayPeriod::new(
    ///     NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
    ///     NaiveDate::from_ymd_opt(2025, 1, 31).unwrap(),
    /// );
    /// assert!(employee.is_employed_during(&january));
    /// assert_eq!(employee.employed_days(&january), 12);
    /// ```
    pub fn is_employed_during(&self, period: &PayPeriod) -> bool {
        self.hire_date <= period.end_date
            && self
                .termination_date
                .is_none_or(|terminated| terminated >= period.start_date)
    }

    /// Number of period days on which the employee was employed.
    pub fn employed_days(&self, period: &PayPeriod) -> i64 {
        let first = self.hire_date.max(period.start_date);
        let last = self
            .termination_date
            .map_or(period.end_date, |terminated| terminated.min(period.end_date));
        if last < first {
            0
        } else {
            (last - first).num_days() + 1
        }
    }

    /// Whole years of age on `date`, if the birth date is known.
    pub fn age_on(&self, date: NaiveDate) -> Option<i32> {
        let birth = self.birth_date?;
        let mut age = date.year() - birth.year();
        if (date.month(), date.day()) < (birth.month(), birth.day()) {
            age -= 1;
        }
        Some(age.max(0))
    }

    /// Days since hire on `date`.
    pub fn seniority_days(&self, date: NaiveDate) -> i64 {
        (date - self.hire_date).num_days().max(0)
    }
}
