//! Year-to-date accumulation records.
//!
//! One record exists per employee and fiscal year. Each committed run adds
//! a contribution keyed by its run id; committing the same run again
//! replaces that contribution, so a redelivered job or a recalculation never
//! counts a period twice. Contributions carry the end of their period so a
//! record can be read as it stood before any given period.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What one run added to a record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccumulationDelta {
    /// Gross pay of the period.
    pub gross: Decimal,
    /// Pre-tax deductions of the period.
    pub pre_tax: Decimal,
    /// Tax withheld in the period.
    pub tax_withheld: Decimal,
    /// Last day of the contributing run's period.
    #[serde(default)]
    pub period_end: NaiveDate,
}

/// Year-to-date totals for one employee.
///
/// # Example
///
/// ```
/// use payroll_engine::models::{AccumulationDelta, AccumulationRecord};
/// use chrono::NaiveDate;
/// use rust_decimal::Decimal;
/// use uuid::Uuid;
///
/// let mut record = AccumulationRecord::new("emp_001", 2025);
/// let run = Uuid::new_v4();
/// let delta = AccumulationDelta {
///     gross: Decimal::new(10_000, 0),
///     pre_tax: Decimal::new(700, 0),
///     tax_withheld: Decimal::ZERO,
///     period_end: NaiveDate::from_ymd_opt(2025, 1, 31).unwrap(),
/// };
///
/// record.apply(run, delta);
/// record.apply(run, delta);
/// assert_eq!(record.accrued_gross, Decimal::new(10_000, 0));
/// assert_eq!(record.periods_processed, 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccumulationRecord {
    /// The employee.
    pub employee_id: String,
    /// The fiscal year, named by the calendar year it starts in.
    pub fiscal_year: i32,
    /// Gross pay so far.
    pub accrued_gross: Decimal,
    /// Pre-tax deductions so far.
    pub accrued_pre_tax: Decimal,
    /// Tax withheld so far.
    pub accrued_tax_withheld: Decimal,
    /// Number of periods committed.
    pub periods_processed: u32,
    /// Contribution of each committed run.
    #[serde(default)]
    pub contributions: BTreeMap<Uuid, AccumulationDelta>,
}

impl AccumulationRecord {
    /// Creates an empty record.
    pub fn new(employee_id: &str, fiscal_year: i32) -> Self {
        Self {
            employee_id: employee_id.to_string(),
            fiscal_year,
            accrued_gross: Decimal::ZERO,
            accrued_pre_tax: Decimal::ZERO,
            accrued_tax_withheld: Decimal::ZERO,
            periods_processed: 0,
            contributions: BTreeMap::new(),
        }
    }

    /// Records a run's contribution, replacing any earlier one for the
    /// same run.
    pub fn apply(&mut self, run_id: Uuid, delta: AccumulationDelta) {
        match self.contributions.insert(run_id, delta) {
            Some(previous) => {
                self.accrued_gross -= previous.gross;
                self.accrued_pre_tax -= previous.pre_tax;
                self.accrued_tax_withheld -= previous.tax_withheld;
            }
            None => self.periods_processed += 1,
        }
        self.accrued_gross += delta.gross;
        self.accrued_pre_tax += delta.pre_tax;
        self.accrued_tax_withheld += delta.tax_withheld;
    }

    /// Removes a run's contribution, if present.
    pub fn revert(&mut self, run_id: Uuid) {
        if let Some(previous) = self.contributions.remove(&run_id) {
            self.accrued_gross -= previous.gross;
            self.accrued_pre_tax -= previous.pre_tax;
            self.accrued_tax_withheld -= previous.tax_withheld;
            self.periods_processed = self.periods_processed.saturating_sub(1);
        }
    }

    /// The record as it stood for a period starting on `period_start`:
    /// only contributions of periods that ended before it, never the
    /// contribution of `run_id` itself. Opening balances set without a
    /// contribution are kept.
    pub fn as_of(&self, period_start: NaiveDate, run_id: Uuid) -> Self {
        let mut record = self.clone();
        let later: Vec<Uuid> = self
            .contributions
            .iter()
            .filter(|(id, delta)| **id == run_id || delta.period_end >= period_start)
            .map(|(id, _)| *id)
            .collect();
        for id in later {
            record.revert(id);
        }
        record
    }

    /// Average gross per processed period, or zero before the first period.
    pub fn average_gross(&self) -> Decimal {
        if self.periods_processed == 0 {
            Decimal::ZERO
        } else {
            self.accrued_gross / Decimal::from(self.periods_processed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn month_end(month: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, month + 1, 1)
            .and_then(|d| d.pred_opt())
            .unwrap()
    }

    fn delta(gross: i64, pre_tax: i64) -> AccumulationDelta {
        AccumulationDelta {
            gross: Decimal::new(gross, 0),
            pre_tax: Decimal::new(pre_tax, 0),
            tax_withheld: Decimal::ZERO,
            period_end: month_end(1),
        }
    }

    fn in_month(month: u32, gross: i64) -> AccumulationDelta {
        AccumulationDelta {
            period_end: month_end(month),
            ..delta(gross, 0)
        }
    }

    /// AC-001: two periods of 10,000 / 700
    #[test]
    fn test_ac_001_two_periods_accumulate() {
        let mut record = AccumulationRecord::new("emp_001", 2025);
        record.apply(Uuid::new_v4(), delta(10_000, 700));
        record.apply(Uuid::new_v4(), delta(10_000, 700));
        assert_eq!(record.accrued_gross, Decimal::new(20_000, 0));
        assert_eq!(record.accrued_pre_tax, Decimal::new(1_400, 0));
        assert_eq!(record.periods_processed, 2);
        assert_eq!(record.average_gross(), Decimal::new(10_000, 0));
    }

    /// AC-002: recommitting a run replaces its contribution
    #[test]
    fn test_ac_002_recommit_replaces() {
        let mut record = AccumulationRecord::new("emp_001", 2025);
        let run = Uuid::new_v4();
        record.apply(run, delta(10_000, 700));
        record.apply(run, delta(12_000, 840));
        assert_eq!(record.accrued_gross, Decimal::new(12_000, 0));
        assert_eq!(record.accrued_pre_tax, Decimal::new(840, 0));
        assert_eq!(record.periods_processed, 1);
    }

    #[test]
    fn test_as_of_leaves_original_untouched() {
        let mut record = AccumulationRecord::new("emp_001", 2025);
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        record.apply(first, in_month(1, 10_000));
        record.apply(second, in_month(2, 9_000));

        let before_second = record.as_of(month_end(1).succ_opt().unwrap(), second);
        assert_eq!(before_second.accrued_gross, Decimal::new(10_000, 0));
        assert_eq!(before_second.periods_processed, 1);
        assert_eq!(record.periods_processed, 2);
    }

    /// AC-003: later periods never leak into an earlier period's view
    #[test]
    fn test_ac_003_as_of_ignores_later_periods() {
        let mut record = AccumulationRecord::new("emp_001", 2025);
        let (january, february, march) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        record.apply(january, in_month(1, 10_000));
        record.apply(february, in_month(2, 11_000));
        record.apply(march, in_month(3, 12_000));

        let for_january = record.as_of(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(), january);
        assert_eq!(for_january.accrued_gross, Decimal::ZERO);
        assert_eq!(for_january.periods_processed, 0);

        let for_february = record.as_of(NaiveDate::from_ymd_opt(2025, 2, 1).unwrap(), february);
        assert_eq!(for_february.accrued_gross, Decimal::new(10_000, 0));
        assert_eq!(for_february.periods_processed, 1);
    }

    #[test]
    fn test_as_of_keeps_opening_balance() {
        let mut record = AccumulationRecord::new("emp_001", 2025);
        record.accrued_gross = Decimal::new(4_000, 0);
        record.periods_processed = 1;
        record.apply(Uuid::new_v4(), in_month(2, 10_000));

        let view = record.as_of(NaiveDate::from_ymd_opt(2025, 2, 1).unwrap(), Uuid::new_v4());
        assert_eq!(view.accrued_gross, Decimal::new(4_000, 0));
        assert_eq!(view.periods_processed, 1);
    }

    #[test]
    fn test_average_of_empty_record() {
        assert_eq!(AccumulationRecord::new("emp_001", 2025).average_gross(), Decimal::ZERO);
    }
}
