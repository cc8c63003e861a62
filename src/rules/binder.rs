//! Input binding from canonical engine variables to rule-local aliases.
//!
//! Catalog authors name their inputs in their own vocabulary and point each
//! one at a canonical engine variable. The engine's canonical set stays fixed
//! while rules stay readable.

use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::formula::{Context, Value};

/// Separator between path segments in a binding source.
pub const PATH_SEPARATOR: char = '.';

/// Declared type of a bound input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputType {
    /// A decimal number. Text holding a number is accepted.
    #[default]
    #[serde(alias = "number", alias = "money")]
    Decimal,
    /// A whole number.
    Integer,
    /// A calendar date. Text in `YYYY-MM-DD` form is accepted.
    Date,
    /// Text.
    #[serde(alias = "string")]
    Text,
    /// A boolean.
    #[serde(alias = "bool")]
    Boolean,
    /// Any value, passed through unchanged.
    Any,
}

/// One `{name, source, type}` entry of a rule's inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputBinding {
    /// The alias visible to the rule's formulas.
    pub name: String,
    /// The canonical variable (or dotted path) it reads.
    pub source: String,
    /// The declared type.
    #[serde(rename = "type", default)]
    pub type_hint: InputType,
}

/// The derived context produced by [`bind_inputs`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoundInputs {
    /// Alias → value for every binding that resolved.
    pub context: Context,
    /// Canonical keys that were read to build the context.
    pub consulted: BTreeSet<String>,
    /// Aliases whose source could not be resolved.
    pub unresolved: Vec<String>,
}

/// Builds the derived context for a rule.
///
/// Each binding's `source` is looked up as an exact key in `canonical`. On a
/// miss, if the source contains a `.`, the suffix after the last separator is
/// tried. A binding that still does not resolve leaves its alias absent; the
/// rule only fails if a step actually reads it.
///
/// # Example
///
/// ```
/// use payroll_engine::formula::{Context, Value};
/// use payroll_engine::rules::{bind_inputs, InputBinding, InputType};
/// use rust_decimal::Decimal;
///
/// let mut canonical = Context::new();
/// canonical.insert("gross".to_string(), Value::from(Decimal::new(11_000, 0)));
///
/// let bindings = vec![InputBinding {
///     name: "salary_total".to_string(),
///     source: "employee.gross".to_string(),
///     type_hint: InputType::Decimal,
/// }];
///
/// let bound = bind_inputs(&bindings, &canonical).unwrap();
/// assert_eq!(bound.context["salary_total"], Value::from(Decimal::new(11_000, 0)));
/// assert!(bound.consulted.contains("gross"));
/// ```
pub fn bind_inputs(bindings: &[InputBinding], canonical: &Context) -> EngineResult<BoundInputs> {
    let mut bound = BoundInputs::default();

    for binding in bindings {
        let Some((key, value)) = resolve_source(&binding.source, canonical) else {
            bound.unresolved.push(binding.name.clone());
            continue;
        };
        let value = coerce(value, binding.type_hint).map_err(|message| {
            EngineError::InvalidInput {
                name: binding.name.clone(),
                message,
            }
        })?;
        bound.consulted.insert(key.to_string());
        bound.context.insert(binding.name.clone(), value);
    }

    Ok(bound)
}

fn resolve_source<'a>(source: &'a str, canonical: &'a Context) -> Option<(&'a str, &'a Value)> {
    if let Some((key, value)) = canonical.get_key_value(source) {
        return Some((key.as_str(), value));
    }
    let (_, suffix) = source.rsplit_once(PATH_SEPARATOR)?;
    canonical
        .get_key_value(suffix)
        .map(|(key, value)| (key.as_str(), value))
}

fn coerce(value: &Value, hint: InputType) -> Result<Value, String> {
    match (hint, value) {
        (InputType::Any, v) => Ok(v.clone()),
        (InputType::Decimal, Value::Number(_)) => Ok(value.clone()),
        (InputType::Decimal, Value::Text(t)) => Decimal::from_str(t.trim())
            .map(Value::Number)
            .map_err(|_| format!("'{}' is not a number", t)),
        (InputType::Integer, Value::Number(n)) if n.fract().is_zero() => Ok(value.clone()),
        (InputType::Integer, Value::Number(n)) => Err(format!("{} is not a whole number", n)),
        (InputType::Integer, Value::Text(t)) => match Decimal::from_str(t.trim()) {
            Ok(n) if n.fract().is_zero() => Ok(Value::Number(n)),
            _ => Err(format!("'{}' is not a whole number", t)),
        },
        (InputType::Date, Value::Date(_)) => Ok(value.clone()),
        (InputType::Date, Value::Text(t)) => NaiveDate::parse_from_str(t.trim(), "%Y-%m-%d")
            .map(Value::Date)
            .map_err(|_| format!("'{}' is not a date", t)),
        (InputType::Text, Value::Text(_)) => Ok(value.clone()),
        (InputType::Boolean, Value::Bool(_)) => Ok(value.clone()),
        (hint, v) => Err(format!("expected {:?}, found {}", hint, v.type_name()).to_lowercase()),
    }
}
