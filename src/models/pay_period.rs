//! Pay period model.
//!
//! This module contains the [`PayPeriod`] type that bounds every payroll run.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Represents a pay period with its date range.
///
/// Both ends are inclusive.
///
/// # Example
///
/// ```
/// use payroll_engine::models::PayPeriod;
/// use chrono::NaiveDate;
///
/// let period = PayPeriod::new(
///     NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
///     NaiveDate::from_ymd_opt(2025, 1, 31).unwrap(),
/// );
///
/// assert!(period.contains_date(NaiveDate::from_ymd_opt(2025, 1, 15).unwrap()));
/// assert_eq!(period.days(), 31);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PayPeriod {
    /// The start date of the pay period (inclusive).
    pub start_date: NaiveDate,
    /// The end date of the pay period (inclusive).
    pub end_date: NaiveDate,
    /// The date the period is paid, if scheduled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_date: Option<NaiveDate>,
}

impl PayPeriod {
    /// Creates a period with no payment date.
    pub fn new(start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            start_date,
            end_date,
            payment_date: None,
        }
    }

    /// Checks if a given date falls within this pay period.
    ///
    /// The check is inclusive of both start and end dates.
    pub fn contains_date(&self, date: NaiveDate) -> bool {
        date >= self.start_date && date <= self.end_date
    }

    /// Returns true if the two periods share at least one day.
    pub fn overlaps(&self, other: &PayPeriod) -> bool {
        self.start_date <= other.end_date && other.start_date <= self.end_date
    }

    /// Number of calendar days in the period.
    pub fn days(&self) -> i64 {
        (self.end_date - self.start_date).num_days() + 1
    }

    /// Returns true if the start is not after the end.
    pub fn is_well_formed(&self) -> bool {
        self.start_date <= self.end_date
    }

    /// The date calculations for this period are made as of: the payment
    /// date if set, otherwise the period end.
    pub fn calculation_date(&self) -> NaiveDate {
        self.payment_date.unwrap_or(self.end_date)
    }
}
