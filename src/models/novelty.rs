//! Period novelties: per-employee facts such as absences or commissions.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A fact recorded for one employee on one date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Novelty {
    /// What the amount measures, e.g. `days_absent` or `commission`.
    pub code: String,
    /// The quantity or money amount.
    pub amount: Decimal,
    /// The date it applies to.
    pub date: NaiveDate,
}

/// Sums novelty amounts per code.
///
/// # Example
///
/// ```
/// use payroll_engine::models::{totals_by_code, Novelty};
/// use chrono::NaiveDate;
/// use rust_decimal::Decimal;
///
/// let day = NaiveDate::from_ymd_opt(2025, 1, 10).unwrap();
/// let novelties = vec![
///     Novelty { code: "days_absent".to_string(), amount: Decimal::ONE, date: day },
///     Novelty { code: "days_absent".to_string(), amount: Decimal::TWO, date: day },
/// ];
///
/// assert_eq!(totals_by_code(&novelties)["days_absent"], Decimal::new(3, 0));
/// ```
pub fn totals_by_code(novelties: &[Novelty]) -> BTreeMap<String, Decimal> {
    let mut totals = BTreeMap::new();
    for novelty in novelties {
        *totals.entry(novelty.code.clone()).or_insert(Decimal::ZERO) += novelty.amount;
    }
    totals
}
