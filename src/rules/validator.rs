//! Structural validation of calculation-rule schemas.
//!
//! Validation happens once, when a rule is saved into the catalog. A rule
//! that passes can be executed without re-checking its formulas or tables.

use std::collections::BTreeSet;

use crate::error::{EngineError, EngineResult};
use crate::formula::Formula;

use super::schema::{RuleSchema, Step};

/// Validates a rule schema.
///
/// Checks, in order:
/// - input names are unique and every input has a source
/// - there is at least one step and step names are unique
/// - every formula is within the allowed grammar
/// - every name a step reads is an input or the output of an earlier step
/// - every referenced bracket table exists and every table is well formed
/// - `meta.result`, when given, names an output
///
/// # Errors
///
/// Returns [`EngineError::UnsafeExpression`] or [`EngineError::ExpressionSyntax`]
/// for a rejected formula, [`EngineError::MalformedBracketTable`] for a bad
/// table, and [`EngineError::InvalidSchema`] for everything else.
///
/// # Example
///
/// ```
/// use payroll_engine::rules::{validate_schema, RuleSchema};
///
/// let schema: RuleSchema = serde_yaml::from_str(
///     "inputs: [{ name: g, source: gross }]\nsteps: [{ name: x, type: calculation, formula: g.__class__ }]",
/// )
/// .unwrap();
/// assert!(validate_schema("BAD", &schema).is_err());
/// ```
pub fn validate_schema(code: &str, schema: &RuleSchema) -> EngineResult<()> {
    let invalid = |message: String| EngineError::InvalidSchema {
        rule: code.to_string(),
        message,
    };

    let mut scope = BTreeSet::new();
    for input in &schema.inputs {
        if input.name.trim().is_empty() {
            return Err(invalid("input with an empty name".to_string()));
        }
        if input.source.trim().is_empty() {
            return Err(invalid(format!("input '{}' has no source", input.name)));
        }
        if !scope.insert(input.name.as_str()) {
            return Err(invalid(format!("input '{}' is declared twice", input.name)));
        }
    }

    if schema.steps.is_empty() {
        return Err(invalid("rule has no steps".to_string()));
    }

    let mut step_names = BTreeSet::new();
    for step in &schema.steps {
        if step.name().trim().is_empty() {
            return Err(invalid("step with an empty name".to_string()));
        }
        if !step_names.insert(step.name()) {
            return Err(invalid(format!("step '{}' is declared twice", step.name())));
        }

        for source in step.formulas() {
            let formula = Formula::parse(source).map_err(|e| e.in_step(step.name(), source))?;
            if let Some(missing) = formula.names().iter().find(|n| !scope.contains(n.as_str())) {
                return Err(invalid(format!(
                    "step '{}' reads '{}', which is neither an input nor an earlier output",
                    step.name(),
                    missing
                )));
            }
        }

        match step {
            Step::BracketLookup { table, .. } if !schema.tables.contains_key(table) => {
                return Err(invalid(format!(
                    "step '{}' references unknown table '{}'",
                    step.name(),
                    table
                )));
            }
            Step::Assignment { source, .. } if !scope.contains(source.as_str()) => {
                return Err(invalid(format!(
                    "step '{}' copies '{}', which is neither an input nor an earlier output",
                    step.name(),
                    source
                )));
            }
            _ => {}
        }

        scope.insert(step.output());
    }

    for (name, table) in &schema.tables {
        table.validate(name)?;
    }

    if let Some(result) = &schema.meta.result {
        if !schema.steps.iter().any(|s| s.output() == result) {
            return Err(invalid(format!("result '{}' is not the output of any step", result)));
        }
    }

    Ok(())
}
