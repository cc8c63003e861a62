//! Ordered execution of rule steps.
//!
//! [`StepExecutor`] is a small state machine: a queue of pending steps, the
//! scope the next step evaluates against (bound inputs plus every earlier
//! output), and the outputs accumulated so far. Each call to
//! [`StepExecutor::advance`] pops one step, evaluates it and stores its
//! output. The executor is terminal once the queue is empty.

use std::collections::{BTreeMap, VecDeque};

use rust_decimal::Decimal;
use serde::Serialize;

use crate::error::{EngineError, EngineResult};
use crate::formula::{Context, Formula, Value};

use super::schema::{RuleSchema, Step};

/// What one step did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepTrace {
    /// Step name.
    pub step: String,
    /// Step type tag.
    pub kind: &'static str,
    /// Name the value was stored under.
    pub output: String,
    /// The value produced.
    pub value: Value,
    /// Index of the selected bracket, for bracket lookups.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bracket: Option<usize>,
}

/// The result of running every step of a rule.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleOutcome {
    /// Every named output.
    pub outputs: BTreeMap<String, Value>,
    /// One entry per executed step, in order.
    pub trace: Vec<StepTrace>,
    result_output: Option<String>,
}

impl RuleOutcome {
    /// The rule's result value: the output named by `meta.result`, or the
    /// last step's output.
    pub fn result(&self) -> Option<&Value> {
        self.result_output
            .as_deref()
            .and_then(|name| self.outputs.get(name))
    }

    /// The rule's result as a decimal amount.
    ///
    /// # Errors
    ///
    /// Fails if the rule produced no result or a non-numeric one.
    pub fn amount(&self, rule: &str) -> EngineResult<Decimal> {
        let value = self.result().ok_or_else(|| EngineError::CalculationError {
            message: format!("rule '{}' produced no result", rule),
        })?;
        value
            .as_number()
            .map_err(|e| e.in_step(self.result_output.as_deref().unwrap_or(rule), rule))
    }
}

/// Step-by-step executor for one rule evaluation.
#[derive(Debug)]
pub struct StepExecutor<'a> {
    schema: &'a RuleSchema,
    pending: VecDeque<&'a Step>,
    scope: Context,
    outputs: BTreeMap<String, Value>,
    trace: Vec<StepTrace>,
}

impl<'a> StepExecutor<'a> {
    /// Creates an executor with every step of `schema` pending and `inputs`
    /// as the initial scope.
    pub fn new(schema: &'a RuleSchema, inputs: Context) -> Self {
        Self {
            schema,
            pending: schema.steps.iter().collect(),
            scope: inputs,
            outputs: BTreeMap::new(),
            trace: Vec::new(),
        }
    }

    /// Returns true once no steps remain.
    pub fn is_finished(&self) -> bool {
        self.pending.is_empty()
    }

    /// Outputs accumulated so far.
    pub fn outputs(&self) -> &BTreeMap<String, Value> {
        &self.outputs
    }

    /// Executes the next pending step.
    ///
    /// Returns the step's trace entry, or `None` when the executor is
    /// already finished.
    ///
    /// # Errors
    ///
    /// Any failure names the step: [`EngineError::UndefinedVariable`] for a
    /// name that is neither bound nor produced by an earlier step,
    /// [`EngineError::DivisionByZero`], [`EngineError::FormulaEvaluation`]
    /// for type errors. A failed step stays consumed.
    pub fn advance(&mut self) -> EngineResult<Option<&StepTrace>> {
        let Some(step) = self.pending.pop_front() else {
            return Ok(None);
        };

        let (value, bracket) = self.evaluate(step)?;

        let output = step.output().to_string();
        self.scope.insert(output.clone(), value.clone());
        self.outputs.insert(output.clone(), value.clone());
        self.trace.push(StepTrace {
            step: step.name().to_string(),
            kind: step.kind(),
            output,
            value,
            bracket,
        });
        Ok(self.trace.last())
    }

    /// Runs every remaining step and returns the outcome.
    pub fn run(mut self) -> EngineResult<RuleOutcome> {
        while !self.is_finished() {
            self.advance()?;
        }
        Ok(RuleOutcome {
            outputs: self.outputs,
            trace: self.trace,
            result_output: self.schema.result_output().map(str::to_string),
        })
    }

    fn evaluate(&self, step: &Step) -> EngineResult<(Value, Option<usize>)> {
        let name = step.name();
        let eval = |source: &str| -> EngineResult<Value> {
            Formula::parse(source)
                .and_then(|formula| formula.evaluate(&self.scope))
                .map_err(|e| e.in_step(name, source))
        };

        match step {
            Step::Calculation { formula, .. } => Ok((eval(formula)?, None)),
            Step::Conditional {
                condition,
                if_true,
                if_false,
                ..
            } => {
                let holds = eval(condition)?
                    .as_bool()
                    .map_err(|e| e.in_step(name, condition))?;
                let branch = if holds { if_true } else { if_false };
                Ok((eval(branch)?, None))
            }
            Step::BracketLookup { table, amount, .. } => {
                let bracket_table =
                    self.schema
                        .tables
                        .get(table)
                        .ok_or_else(|| EngineError::InvalidSchema {
                            rule: self.schema.meta.name.clone(),
                            message: format!("step '{}' references unknown table '{}'", name, table),
                        })?;
                let amount_value = eval(amount)?
                    .as_number()
                    .map_err(|e| e.in_step(name, amount))?;
                let resolution = bracket_table.resolve(amount_value)?.ok_or_else(|| {
                    EngineError::MalformedBracketTable {
                        table: table.clone(),
                        message: "table has no brackets".to_string(),
                    }
                })?;
                Ok((Value::Number(resolution.computed), Some(resolution.index)))
            }
            Step::Assignment { source, .. } => {
                let value = self.scope.get(source).cloned().ok_or_else(|| {
                    EngineError::UndefinedVariable {
                        step: name.to_string(),
                        name: source.clone(),
                    }
                })?;
                Ok((value, None))
            }
        }
    }
}

/// Runs every step of `schema` against `inputs`.
///
/// # Example
///
/// ```
/// use payroll_engine::formula::{Context, Value};
/// use payroll_engine::rules::{execute, RuleSchema};
/// use rust_decimal::Decimal;
///
/// let schema: RuleSchema = serde_yaml::from_str(r#"
/// inputs: [{ name: salary, source: salary }]
/// steps:
///   - { name: daily, type: calculation, formula: "salary / 30" }
///   - { name: weekly, type: calculation, formula: "daily * 7" }
/// "#).unwrap();
///
/// let mut inputs = Context::new();
/// inputs.insert("salary".to_string(), Value::from(Decimal::new(3_000, 0)));
///
/// let outcome = execute(&schema, inputs).unwrap();
/// assert_eq!(outcome.result(), Some(&Value::from(Decimal::new(700, 0))));
/// ```
pub fn execute(schema: &RuleSchema, inputs: Context) -> EngineResult<RuleOutcome> {
    StepExecutor::new(schema, inputs).run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn schema(yaml: &str) -> RuleSchema {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn inputs(pairs: &[(&str, &str)]) -> Context {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::from(dec(v))))
            .collect()
    }

    const TAX: &str = r#"
meta: { name: Income tax, result: tax }
inputs:
  - { name: gross_pay, source: gross }
  - { name: pension, source: deduction.PENSION }
steps:
  - { name: taxable, type: calculation, formula: "max(gross_pay - pension, 0)" }
  - { name: tax, type: bracket_lookup, table: brackets, amount: taxable }
  - { name: marginal, type: conditional, condition: "taxable > 5000", if_true: "'high'", if_false: "'low'" }
  - { name: keep, type: assignment, source: taxable, output: taxable_copy }
tables:
  brackets:
    brackets:
      - { lower: 0, upper: 5000, rate: 0 }
      - { lower: 5000, rate: 0.15 }
"#;

    /// SE-001: later steps see earlier outputs
    #[test]
    fn test_se_001_outputs_chain() {
        let outcome = execute(
            &schema(TAX),
            inputs(&[("gross_pay", "11000"), ("pension", "770")]),
        )
        .unwrap();
        assert_eq!(outcome.outputs["taxable"], Value::from(dec("10230")));
        assert_eq!(outcome.amount("INCOME_TAX").unwrap(), dec("784.5"));
        assert_eq!(outcome.outputs["marginal"], Value::from("high"));
        assert_eq!(outcome.outputs["taxable_copy"], Value::from(dec("10230")));
    }

    /// SE-002: trace records one entry per step in order
    #[test]
    fn test_se_002_trace_in_order() {
        let outcome = execute(
            &schema(TAX),
            inputs(&[("gross_pay", "4000"), ("pension", "280")]),
        )
        .unwrap();
        let steps: Vec<_> = outcome.trace.iter().map(|t| t.step.as_str()).collect();
        assert_eq!(steps, vec!["taxable", "tax", "marginal", "keep"]);
        assert_eq!(outcome.trace[1].bracket, Some(0));
        assert_eq!(outcome.trace[1].kind, "bracket_lookup");
        assert_eq!(outcome.amount("INCOME_TAX").unwrap(), Decimal::ZERO);
    }

    /// SE-003: an undefined reference names the step and the variable
    #[test]
    fn test_se_003_undefined_variable_names_step() {
        let err = execute(&schema(TAX), inputs(&[("gross_pay", "11000")])).unwrap_err();
        match err {
            EngineError::UndefinedVariable { step, name } => {
                assert_eq!(step, "taxable");
                assert_eq!(name, "pension");
            }
            other => panic!("Expected UndefinedVariable, got {:?}", other),
        }
    }

    /// SE-004: division by zero is reported against the step
    #[test]
    fn test_se_004_division_by_zero() {
        let rule = schema(
            r#"
inputs: [{ name: days, source: days_worked }]
steps:
  - { name: daily, type: calculation, formula: "1000 / days" }
"#,
        );
        let err = execute(&rule, inputs(&[("days", "0")])).unwrap_err();
        assert!(matches!(err, EngineError::DivisionByZero { ref step } if step == "daily"));
    }

    #[test]
    fn test_state_machine_advances_one_step_at_a_time() {
        let rule = schema(TAX);
        let mut executor =
            StepExecutor::new(&rule, inputs(&[("gross_pay", "11000"), ("pension", "770")]));
        assert!(!executor.is_finished());

        let first = executor.advance().unwrap().unwrap();
        assert_eq!(first.step, "taxable");
        assert_eq!(executor.outputs().len(), 1);

        while executor.advance().unwrap().is_some() {}
        assert!(executor.is_finished());
        assert!(executor.advance().unwrap().is_none());
    }

    #[test]
    fn test_conditional_requires_boolean() {
        let rule = schema(
            r#"
inputs: [{ name: g, source: gross }]
steps:
  - { name: c, type: conditional, condition: "g", if_true: "1", if_false: "2" }
"#,
        );
        let err = execute(&rule, inputs(&[("g", "1")])).unwrap_err();
        assert!(matches!(err, EngineError::FormulaEvaluation { ref step, .. } if step == "c"));
    }

    #[test]
    fn test_untaken_branch_is_not_evaluated() {
        let rule = schema(
            r#"
inputs: [{ name: g, source: gross }, { name: missing, source: nowhere }]
steps:
  - { name: c, type: conditional, condition: "g > 0", if_true: "g", if_false: "missing" }
"#,
        );
        let outcome = execute(&rule, inputs(&[("g", "5")])).unwrap();
        assert_eq!(outcome.result(), Some(&Value::from(dec("5"))));
    }

    #[test]
    fn test_non_numeric_result_fails_amount() {
        let rule = schema(
            r#"
inputs: [{ name: g, source: gross }]
steps:
  - { name: label, type: calculation, formula: "'text'" }
"#,
        );
        let outcome = execute(&rule, inputs(&[("g", "5")])).unwrap();
        assert!(outcome.amount("LABEL").is_err());
    }
}
