//! Typed values flowing through formulas.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::FormulaError;

/// A value a formula can read or produce.
///
/// Numbers are always [`Decimal`]; binary floating point never enters a
/// calculation. Dates and text are typed operands so that formulas stay
/// declarative data.
///
/// # Example
///
/// ```
/// use payroll_engine::formula::Value;
/// use rust_decimal::Decimal;
///
/// let value = Value::from(Decimal::new(10_000, 0));
/// assert_eq!(value.as_number().unwrap(), Decimal::new(10_000, 0));
/// assert_eq!(value.type_name(), "number");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// A boolean.
    Bool(bool),
    /// An arbitrary-precision decimal number.
    Number(Decimal),
    /// A calendar date.
    Date(NaiveDate),
    /// A text value.
    Text(String),
}

/// A flat variable namespace keyed by name.
pub type Context = BTreeMap<String, Value>;

impl Value {
    /// Returns the name of this value's type, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Date(_) => "date",
            Value::Text(_) => "text",
        }
    }

    /// Returns the number inside this value.
    pub fn as_number(&self) -> Result<Decimal, FormulaError> {
        match self {
            Value::Number(n) => Ok(*n),
            other => Err(FormulaError::TypeMismatch {
                message: format!("expected number, found {}", other.type_name()),
            }),
        }
    }

    /// Returns the boolean inside this value.
    pub fn as_bool(&self) -> Result<bool, FormulaError> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(FormulaError::TypeMismatch {
                message: format!("expected boolean, found {}", other.type_name()),
            }),
        }
    }

    /// Returns the date inside this value.
    pub fn as_date(&self) -> Result<NaiveDate, FormulaError> {
        match self {
            Value::Date(d) => Ok(*d),
            other => Err(FormulaError::TypeMismatch {
                message: format!("expected date, found {}", other.type_name()),
            }),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n.normalize()),
            Value::Date(d) => write!(f, "{}", d),
            Value::Text(s) => write!(f, "{:?}", s),
        }
    }
}

impl From<Decimal> for Value {
    fn from(value: Decimal) -> Self {
        Value::Number(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Number(Decimal::from(value))
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<NaiveDate> for Value {
    fn from(value: NaiveDate) -> Self {
        Value::Date(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_number_serializes_as_string() {
        let value = Value::Number(Decimal::from_str("784.50").unwrap());
        assert_eq!(serde_json::to_string(&value).unwrap(), "\"784.50\"");
    }

    #[test]
    fn test_deserialize_picks_typed_variant() {
        let value: Value = serde_json::from_str("true").unwrap();
        assert_eq!(value, Value::Bool(true));

        let value: Value = serde_json::from_str("\"2025-01-31\"").unwrap();
        assert_eq!(value, Value::Date(NaiveDate::from_ymd_opt(2025, 1, 31).unwrap()));

        let value: Value = serde_json::from_str("\"monthly\"").unwrap();
        assert_eq!(value, Value::Text("monthly".to_string()));

        let value: Value = serde_json::from_str("\"10230\"").unwrap();
        assert_eq!(value, Value::Number(Decimal::from(10_230)));
    }

    #[test]
    fn test_as_number_rejects_text() {
        let err = Value::from("abc").as_number().unwrap_err();
        assert_eq!(
            err,
            FormulaError::TypeMismatch {
                message: "expected number, found text".to_string()
            }
        );
    }

    #[test]
    fn test_display_normalizes_numbers() {
        let value = Value::Number(Decimal::from_str("9445.50").unwrap());
        assert_eq!(value.to_string(), "9445.5");
    }
}
