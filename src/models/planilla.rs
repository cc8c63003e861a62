//! Planilla (payroll group) model.

use serde::{Deserialize, Serialize};

/// How often a planilla is paid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayFrequency {
    /// Every week.
    Weekly,
    /// Every two weeks.
    Biweekly,
    /// Twice a month.
    Semimonthly,
    /// Once a month.
    #[default]
    Monthly,
}

/// A group of employees paid together under one concept set.
///
/// # Example
///
/// ```
/// use payroll_engine::models::{PayFrequency, Planilla};
///
/// let planilla: Planilla = serde_json::from_str(r#"{
///     "id": "pl_main",
///     "name": "Main office",
///     "currency": "USD",
///     "frequency": "monthly",
///     "perceptions": ["BONUS10"],
///     "deductions": ["PENSION", "INCOME_TAX"]
/// }"#).unwrap();
///
/// assert!(planilla.active);
/// assert_eq!(planilla.frequency, PayFrequency::Monthly);
/// assert!(planilla.benefits.is_empty());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Planilla {
    /// Unique identifier.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Inactive planillas cannot be run.
    #[serde(default = "default_active")]
    pub active: bool,
    /// Currency results are expressed in.
    pub currency: String,
    /// Payment frequency.
    #[serde(default)]
    pub frequency: PayFrequency,
    /// Perception concept codes applied to every employee.
    #[serde(default)]
    pub perceptions: Vec<String>,
    /// Deduction concept codes applied to every employee.
    #[serde(default)]
    pub deductions: Vec<String>,
    /// Benefit concept codes applied to every employee.
    #[serde(default)]
    pub benefits: Vec<String>,
}

fn default_active() -> bool {
    true
}
