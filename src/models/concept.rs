//! Payroll concept definitions: perceptions, deductions and benefits.
//!
//! A concept says how one line of a result is computed. The amount comes
//! from a fixed value, a percentage of a base, or a calculation rule from
//! the catalog.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// The amount a percentage is taken of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PercentageBase {
    /// Base pay before perceptions.
    BasePay,
    /// Gross pay: base pay plus every perception.
    Gross,
    /// Gross pay minus pre-tax deductions applied so far.
    Taxable,
}

/// How a concept's amount is computed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ConceptMode {
    /// A fixed amount every period.
    Fixed {
        /// The amount.
        amount: Decimal,
    },
    /// A rate applied to a base.
    Percentage {
        /// The rate, e.g. `0.07` for 7%.
        rate: Decimal,
        /// The base. Perceptions default to base pay; deductions and
        /// benefits to gross.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        of: Option<PercentageBase>,
    },
    /// The result of a catalog rule.
    Rule {
        /// The rule code.
        rule: String,
    },
}

/// The role a concept plays in a calculation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConceptKind {
    /// Adds to gross pay.
    Perception,
    /// Subtracts from net pay.
    Deduction,
    /// Employer cost; never reduces net.
    Benefit,
}

/// One perception, deduction or benefit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConceptDefinition {
    /// Unique code, used as the line code in results.
    pub code: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// How the amount is computed.
    #[serde(flatten)]
    pub mode: ConceptMode,
    /// Application order for deductions; lower first.
    #[serde(default)]
    pub priority: i32,
    /// Mandatory deductions apply even when net is insufficient.
    #[serde(default)]
    pub mandatory: bool,
    /// Pre-tax deductions reduce taxable income.
    #[serde(default)]
    pub pre_tax: bool,
    /// Marks a deduction as tax withheld, for accumulation.
    #[serde(default)]
    pub withholding: bool,
    /// Inactive concepts are ignored.
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl ConceptDefinition {
    /// The rule code, for rule-driven concepts.
    pub fn rule_code(&self) -> Option<&str> {
        match &self.mode {
            ConceptMode::Rule { rule } => Some(rule.as_str()),
            _ => None,
        }
    }
}

/// Every concept known to the engine, by kind.
///
/// # Example
///
/// ```
/// use payroll_engine::models::{ConceptCatalog, ConceptKind};
///
/// let catalog: ConceptCatalog = serde_yaml::from_str(r#"
/// perceptions:
///   - { code: BONUS10, mode: percentage, rate: 0.10 }
/// deductions:
///   - { code: PENSION, mode: percentage, rate: 0.07, priority: 1, pre_tax: true }
///   - { code: INCOME_TAX, mode: rule, rule: INCOME_TAX, priority: 2, withholding: true }
/// "#).unwrap();
///
/// assert!(catalog.get(ConceptKind::Deduction, "PENSION").unwrap().pre_tax);
/// assert_eq!(catalog.get(ConceptKind::Deduction, "INCOME_TAX").unwrap().rule_code(), Some("INCOME_TAX"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConceptCatalog {
    /// Perceptions.
    #[serde(default)]
    pub perceptions: Vec<ConceptDefinition>,
    /// Deductions.
    #[serde(default)]
    pub deductions: Vec<ConceptDefinition>,
    /// Benefits.
    #[serde(default)]
    pub benefits: Vec<ConceptDefinition>,
}

impl ConceptCatalog {
    /// Concepts of one kind.
    pub fn of_kind(&self, kind: ConceptKind) -> &[ConceptDefinition] {
        match kind {
            ConceptKind::Perception => &self.perceptions,
            ConceptKind::Deduction => &self.deductions,
            ConceptKind::Benefit => &self.benefits,
        }
    }

    /// Looks up a concept by kind and code.
    pub fn get(&self, kind: ConceptKind, code: &str) -> Option<&ConceptDefinition> {
        self.of_kind(kind).iter().find(|c| c.code == code)
    }

    /// Resolves a list of codes into active definitions, in list order.
    /// Unknown and inactive codes are left out.
    pub fn resolve<'a>(&'a self, kind: ConceptKind, codes: &[String]) -> Vec<&'a ConceptDefinition> {
        codes
            .iter()
            .filter_map(|code| self.get(kind, code))
            .filter(|c| c.active)
            .collect()
    }

    /// Codes in `codes` that have no definition of `kind`.
    pub fn missing(&self, kind: ConceptKind, codes: &[String]) -> Vec<String> {
        codes
            .iter()
            .filter(|code| self.get(kind, code).is_none())
            .cloned()
            .collect()
    }

    /// Concepts keyed by code, for snapshotting.
    pub fn by_code(&self) -> BTreeMap<String, ConceptDefinition> {
        self.perceptions
            .iter()
            .chain(&self.deductions)
            .chain(&self.benefits)
            .map(|c| (c.code.clone(), c.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn catalog() -> ConceptCatalog {
        serde_yaml::from_str(
            r#"
perceptions:
  - { code: BONUS10, name: Bonus, mode: percentage, rate: 0.10 }
  - { code: TRANSPORT, mode: fixed, amount: 150, active: false }
deductions:
  - { code: PENSION, mode: percentage, rate: 0.07, of: gross, priority: 1, pre_tax: true, mandatory: true }
benefits:
  - { code: EMPLOYER_SS, mode: percentage, rate: 0.10 }
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_concept_modes_deserialize() {
        let catalog = catalog();
        let bonus = catalog.get(ConceptKind::Perception, "BONUS10").unwrap();
        assert_eq!(
            bonus.mode,
            ConceptMode::Percentage {
                rate: dec("0.10"),
                of: None
            }
        );
        assert_eq!(bonus.priority, 0);
        assert!(!bonus.mandatory);

        let transport = catalog.get(ConceptKind::Perception, "TRANSPORT").unwrap();
        assert_eq!(transport.mode, ConceptMode::Fixed { amount: dec("150") });

        let pension = catalog.get(ConceptKind::Deduction, "PENSION").unwrap();
        assert!(pension.mandatory && pension.pre_tax);
        assert_eq!(
            pension.mode,
            ConceptMode::Percentage {
                rate: dec("0.07"),
                of: Some(PercentageBase::Gross)
            }
        );
    }

    #[test]
    fn test_resolve_skips_inactive_and_unknown() {
        let catalog = catalog();
        let codes = vec![
            "TRANSPORT".to_string(),
            "BONUS10".to_string(),
            "UNKNOWN".to_string(),
        ];
        let resolved = catalog.resolve(ConceptKind::Perception, &codes);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].code, "BONUS10");
        assert_eq!(catalog.missing(ConceptKind::Perception, &codes), vec!["UNKNOWN"]);
    }

    #[test]
    fn test_by_code_covers_all_kinds() {
        let by_code = catalog().by_code();
        assert_eq!(by_code.len(), 4);
        assert!(by_code.contains_key("EMPLOYER_SS"));
    }

    #[test]
    fn test_concept_serializes_flat() {
        let pension = catalog().deductions[0].clone();
        let json = serde_json::to_value(&pension).unwrap();
        assert_eq!(json["mode"], "percentage");
        assert_eq!(json["rate"], "0.07");
        assert_eq!(json["of"], "gross");
    }
}
