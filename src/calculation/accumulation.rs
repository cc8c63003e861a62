//! Year-to-date accumulation tracking.
//!
//! The tracker reads an employee's record as it stood before the period
//! being calculated, so recalculating a run sees the same year to date as
//! its first calculation, even after later periods have been committed. The contribution of a result is written by
//! [`PayrollRepository::commit_employee`] together with the result itself.

use chrono::NaiveDate;
use uuid::Uuid;

use crate::config::EngineSettings;
use crate::error::EngineResult;
use crate::models::{AccumulationDelta, AccumulationRecord, PayPeriod, ResultTotals};
use crate::repository::PayrollRepository;

/// Reads year-to-date records and derives contributions.
pub struct AccumulationTracker<'a> {
    repository: &'a dyn PayrollRepository,
    settings: &'a EngineSettings,
}

impl<'a> AccumulationTracker<'a> {
    /// Creates a tracker.
    pub fn new(repository: &'a dyn PayrollRepository, settings: &'a EngineSettings) -> Self {
        Self {
            repository,
            settings,
        }
    }

    /// The fiscal year `date` falls in.
    pub fn fiscal_year(&self, date: NaiveDate) -> i32 {
        self.settings.fiscal_year(date)
    }

    /// The employee's record for the fiscal year of `date`, holding only
    /// periods that ended before `period` starts. The contribution of
    /// `run_id` is never included.
    pub fn year_to_date(
        &self,
        employee_id: &str,
        date: NaiveDate,
        period: &PayPeriod,
        run_id: Uuid,
    ) -> EngineResult<AccumulationRecord> {
        let record = self
            .repository
            .get_accumulation(employee_id, self.fiscal_year(date))?;
        Ok(record.as_of(period.start_date, run_id))
    }

    /// What a result adds to the year to date.
    ///
    /// # Example
    ///
    /// ```
    /// use payroll_engine::calculation::AccumulationTracker;
    /// use payroll_engine::models::{PayPeriod, ResultTotals};
    /// use chrono::NaiveDate;
    /// use rust_decimal::Decimal;
    ///
    /// let totals = ResultTotals {
    ///     gross: Decimal::new(11_000, 0),
    ///     pre_tax_deductions: Decimal::new(770, 0),
    ///     tax_withheld: Decimal::new(7845, 1),
    ///     ..ResultTotals::default()
    /// };
    /// let period = PayPeriod::new(
    ///     NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
    ///     NaiveDate::from_ymd_opt(2025, 1, 31).unwrap(),
    /// );
    /// let delta = AccumulationTracker::delta(&totals, &period);
    /// assert_eq!(delta.tax_withheld, Decimal::new(7845, 1));
    /// assert_eq!(delta.period_end, period.end_date);
    /// ```
    pub fn delta(totals: &ResultTotals, period: &PayPeriod) -> AccumulationDelta {
        AccumulationDelta {
            gross: totals.gross,
            pre_tax: totals.pre_tax_deductions,
            tax_withheld: totals.tax_withheld,
            period_end: period.end_date,
        }
    }
}
