//! Snapshot bundles: frozen copies of what a calculation consulted.
//!
//! A bundle holds values, not references. Recalculating a run replays the
//! bundle so later configuration changes cannot alter a past period.
//!
//! Formulas live in exactly one place, [`SnapshotBundle::formulas`], keyed
//! by `code@version`. The concept → formula index returned by
//! [`SnapshotBundle::concept_formulas`] is derived from it on demand.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::EngineSettings;
use crate::rules::CalculationRule;

use super::ConceptDefinition;

/// Everything consulted while calculating one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotBundle {
    /// When the bundle was first captured.
    pub captured_at: DateTime<Utc>,
    /// The calculation date of the run.
    pub calculation_date: NaiveDate,
    /// Engine settings in force.
    pub settings: EngineSettings,
    /// `config.<key>` values read by rules.
    #[serde(default)]
    pub config_values: BTreeMap<String, Decimal>,
    /// Exchange rates used, by currency.
    #[serde(default)]
    pub exchange_rates: BTreeMap<String, Decimal>,
    /// Rule versions evaluated, keyed by `code@version`.
    #[serde(default)]
    pub formulas: BTreeMap<String, CalculationRule>,
    /// Concept definitions applied, by code.
    #[serde(default)]
    pub concepts: BTreeMap<String, ConceptDefinition>,
}

impl SnapshotBundle {
    /// Creates an empty bundle for a run.
    pub fn new(calculation_date: NaiveDate, settings: EngineSettings) -> Self {
        Self {
            captured_at: Utc::now(),
            calculation_date,
            settings,
            config_values: BTreeMap::new(),
            exchange_rates: BTreeMap::new(),
            formulas: BTreeMap::new(),
            concepts: BTreeMap::new(),
        }
    }

    /// Adds everything in `other` that this bundle does not hold yet.
    ///
    /// Entries already captured are kept as they are: the first capture of
    /// a value is the one the run used.
    pub fn merge(&mut self, other: &SnapshotBundle) {
        for (key, value) in &other.config_values {
            self.config_values.entry(key.clone()).or_insert(*value);
        }
        for (currency, rate) in &other.exchange_rates {
            self.exchange_rates.entry(currency.clone()).or_insert(*rate);
        }
        for (key, rule) in &other.formulas {
            self.formulas
                .entry(key.clone())
                .or_insert_with(|| rule.clone());
        }
        for (code, concept) in &other.concepts {
            self.concepts
                .entry(code.clone())
                .or_insert_with(|| concept.clone());
        }
    }

    /// The captured version of rule `code`, if any. When several versions
    /// were captured the highest wins.
    pub fn formula_for(&self, code: &str) -> Option<&CalculationRule> {
        self.formulas
            .values()
            .filter(|rule| rule.code == code)
            .max_by_key(|rule| rule.version)
    }

    /// Concept code → `code@version` of the formula it used.
    ///
    /// This index is read-only and always derived from `concepts` and
    /// `formulas`; it is never stored.
    ///
    /// # Example
    ///
    /// ```
    /// use payroll_engine::config::EngineSettings;
    /// use payroll_engine::models::{ConceptDefinition, ConceptMode, SnapshotBundle};
    /// use payroll_engine::rules::{CalculationRule, RuleSchema, RuleStatus};
    /// use chrono::NaiveDate;
    ///
    /// let date = NaiveDate::from_ymd_opt(2025, 1, 31).unwrap();
    /// let mut bundle = SnapshotBundle::new(date, EngineSettings::default());
    /// bundle.formulas.insert("TAX_RULE@2".to_string(), CalculationRule {
    ///     code: "TAX_RULE".to_string(),
    ///     version: 2,
    ///     schema: RuleSchema::default(),
    ///     effective_from: date,
    ///     effective_to: None,
    ///     status: RuleStatus::Active,
    /// });
    /// bundle.concepts.insert("INCOME_TAX".to_string(), ConceptDefinition {
    ///     code: "INCOME_TAX".to_string(),
    ///     name: String::new(),
    ///     mode: ConceptMode::Rule { rule: "TAX_RULE".to_string() },
    ///     priority: 2,
    ///     mandatory: true,
    ///     pre_tax: false,
    ///     withholding: true,
    ///     active: true,
    /// });
    ///
    /// assert_eq!(bundle.concept_formulas()["INCOME_TAX"], "TAX_RULE@2");
    /// ```
    pub fn concept_formulas(&self) -> BTreeMap<String, String> {
        self.concepts
            .values()
            .filter_map(|concept| {
                let rule = self.formula_for(concept.rule_code()?)?;
                Some((concept.code.clone(), rule.key()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{RuleSchema, RuleStatus};

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 31).unwrap()
    }

    fn rule(code: &str, version: u32) -> CalculationRule {
        CalculationRule {
            code: code.to_string(),
            version,
            schema: RuleSchema::default(),
            effective_from: date(),
            effective_to: None,
            status: RuleStatus::Active,
        }
    }

    #[test]
    fn test_merge_keeps_first_capture() {
        let mut first = SnapshotBundle::new(date(), EngineSettings::default());
        first.exchange_rates.insert("EUR".to_string(), Decimal::new(11, 1));

        let mut second = SnapshotBundle::new(date(), EngineSettings::default());
        second.exchange_rates.insert("EUR".to_string(), Decimal::new(12, 1));
        second.exchange_rates.insert("CRC".to_string(), Decimal::new(2, 3));
        second.formulas.insert("TAX@1".to_string(), rule("TAX", 1));

        first.merge(&second);
        assert_eq!(first.exchange_rates["EUR"], Decimal::new(11, 1));
        assert_eq!(first.exchange_rates["CRC"], Decimal::new(2, 3));
        assert!(first.formulas.contains_key("TAX@1"));
    }

    #[test]
    fn test_formula_for_picks_highest_version() {
        let mut bundle = SnapshotBundle::new(date(), EngineSettings::default());
        bundle.formulas.insert("TAX@1".to_string(), rule("TAX", 1));
        bundle.formulas.insert("TAX@3".to_string(), rule("TAX", 3));
        bundle.formulas.insert("OTHER@9".to_string(), rule("OTHER", 9));
        assert_eq!(bundle.formula_for("TAX").map(|r| r.version), Some(3));
        assert!(bundle.formula_for("MISSING").is_none());
    }

    #[test]
    fn test_concept_index_is_not_serialized() {
        let bundle = SnapshotBundle::new(date(), EngineSettings::default());
        let json = serde_json::to_value(&bundle).unwrap();
        assert!(json.get("formulas").is_some());
        assert!(json.get("concept_formulas").is_none());
        let back: SnapshotBundle = serde_json::from_value(json).unwrap();
        assert_eq!(back, bundle);
    }
}
