//! Calculation-rule schema types.
//!
//! A rule is stored as YAML or JSON data:
//!
//! ```yaml
//! meta: { name: Income tax, result: tax }
//! inputs:
//!   - { name: taxable, source: taxable_income, type: decimal }
//! steps:
//!   - { name: tax, type: bracket_lookup, table: income_tax, amount: taxable }
//! tables:
//!   income_tax:
//!     brackets:
//!       - { lower: 0, upper: 5000, rate: 0 }
//!       - { lower: 5000, rate: 0.15 }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::binder::InputBinding;
use super::bracket::BracketTable;

/// Descriptive metadata of a rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleMeta {
    /// Human-readable name.
    #[serde(default)]
    pub name: String,
    /// Longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// The output that is the rule's result. Defaults to the last step's output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

/// The full definition of a calculation rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSchema {
    /// Metadata.
    #[serde(default)]
    pub meta: RuleMeta,
    /// Input bindings, in declaration order.
    #[serde(default)]
    pub inputs: Vec<InputBinding>,
    /// Steps, in execution order.
    #[serde(default)]
    pub steps: Vec<Step>,
    /// Bracket tables referenced by `bracket_lookup` steps.
    #[serde(default)]
    pub tables: BTreeMap<String, BracketTable>,
}

impl RuleSchema {
    /// The name of the output holding the rule's result.
    pub fn result_output(&self) -> Option<&str> {
        self.meta
            .result
            .as_deref()
            .or_else(|| self.steps.last().map(Step::output))
    }
}

/// One step of a rule.
///
/// Steps form a closed set dispatched by a single `match` in the executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Step {
    /// Evaluates a formula.
    Calculation {
        /// Step name.
        name: String,
        /// The formula.
        formula: String,
        /// Output name; defaults to `name`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<String>,
    },
    /// Evaluates a predicate and then one of two branch formulas.
    Conditional {
        /// Step name.
        name: String,
        /// Boolean formula choosing the branch.
        condition: String,
        /// Formula used when the condition holds.
        if_true: String,
        /// Formula used otherwise.
        if_false: String,
        /// Output name; defaults to `name`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<String>,
    },
    /// Resolves an amount against a bracket table.
    #[serde(alias = "bracket-lookup", alias = "bracket")]
    BracketLookup {
        /// Step name.
        name: String,
        /// Name of the table in the rule's `tables`.
        #[serde(alias = "table_ref")]
        table: String,
        /// Formula giving the amount to look up.
        amount: String,
        /// Output name; defaults to `name`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<String>,
    },
    /// Copies a value in scope to a new output.
    Assignment {
        /// Step name.
        name: String,
        /// Name of the value to copy.
        source: String,
        /// Output name; defaults to `name`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<String>,
    },
}

impl Step {
    /// The step name.
    pub fn name(&self) -> &str {
        match self {
            Step::Calculation { name, .. }
            | Step::Conditional { name, .. }
            | Step::BracketLookup { name, .. }
            | Step::Assignment { name, .. } => name,
        }
    }

    /// The output name, which defaults to the step name.
    pub fn output(&self) -> &str {
        match self {
            Step::Calculation { name, output, .. }
            | Step::Conditional { name, output, .. }
            | Step::BracketLookup { name, output, .. }
            | Step::Assignment { name, output, .. } => output.as_deref().unwrap_or(name),
        }
    }

    /// The step's type tag as it appears in rule data.
    pub fn kind(&self) -> &'static str {
        match self {
            Step::Calculation { .. } => "calculation",
            Step::Conditional { .. } => "conditional",
            Step::BracketLookup { .. } => "bracket_lookup",
            Step::Assignment { .. } => "assignment",
        }
    }

    /// Every formula the step evaluates.
    pub fn formulas(&self) -> Vec<&str> {
        match self {
            Step::Calculation { formula, .. } => vec![formula.as_str()],
            Step::Conditional {
                condition,
                if_true,
                if_false,
                ..
            } => vec![condition.as_str(), if_true.as_str(), if_false.as_str()],
            Step::BracketLookup { amount, .. } => vec![amount.as_str()],
            Step::Assignment { .. } => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::InputType;

    const INCOME_TAX: &str = r#"
meta:
  name: Income tax
  result: tax
inputs:
  - { name: taxable, source: taxable_income, type: decimal }
steps:
  - { name: tax, type: bracket-lookup, table: income_tax, amount: taxable }
tables:
  income_tax:
    brackets:
      - { lower: 0, upper: 5000, rate: 0 }
      - { lower: 5000, rate: 0.15 }
"#;

    #[test]
    fn test_schema_deserializes_from_yaml() {
        let schema: RuleSchema = serde_yaml::from_str(INCOME_TAX).unwrap();
        assert_eq!(schema.meta.name, "Income tax");
        assert_eq!(schema.inputs[0].type_hint, InputType::Decimal);
        assert_eq!(schema.steps[0].kind(), "bracket_lookup");
        assert_eq!(schema.tables["income_tax"].brackets.len(), 2);
        assert_eq!(schema.result_output(), Some("tax"));
    }

    #[test]
    fn test_output_defaults_to_name() {
        let step: Step =
            serde_json::from_str(r#"{"type": "calculation", "name": "daily", "formula": "salary / 30"}"#)
                .unwrap();
        assert_eq!(step.output(), "daily");

        let step: Step = serde_json::from_str(
            r#"{"type": "assignment", "name": "copy", "source": "daily", "output": "rate"}"#,
        )
        .unwrap();
        assert_eq!(step.output(), "rate");
        assert!(step.formulas().is_empty());
    }

    #[test]
    fn test_result_defaults_to_last_step_output() {
        let schema = RuleSchema {
            steps: vec![
                Step::Calculation {
                    name: "a".to_string(),
                    formula: "1".to_string(),
                    output: None,
                },
                Step::Calculation {
                    name: "b".to_string(),
                    formula: "a + 1".to_string(),
                    output: Some("total".to_string()),
                },
            ],
            ..RuleSchema::default()
        };
        assert_eq!(schema.result_output(), Some("total"));
        assert_eq!(RuleSchema::default().result_output(), None);
    }

    #[test]
    fn test_unknown_step_type_is_rejected() {
        let result: Result<Step, _> =
            serde_json::from_str(r#"{"type": "python", "name": "x", "code": "import os"}"#);
        assert!(result.is_err());
    }
}
