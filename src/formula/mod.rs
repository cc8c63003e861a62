//! Expression sandbox for catalog formulas.
//!
//! Formulas are data, not code: they are parsed into a closed syntax tree
//! ([`Expr`]) and evaluated over [`Value`]s with decimal arithmetic. The only
//! things a formula can do are read names from the context it is given,
//! combine them with arithmetic, comparison and boolean operators, choose
//! between branches, and call `min`, `max`, `abs` and `round`.
//!
//! # Example
//!
//! ```
//! use payroll_engine::formula::{evaluate, Context, Value};
//! use rust_decimal::Decimal;
//!
//! let mut context = Context::new();
//! context.insert("gross".to_string(), Value::from(Decimal::new(11_000, 0)));
//!
//! let value = evaluate("round(gross * 0.07, 2)", &context).unwrap();
//! assert_eq!(value, Value::from(Decimal::new(770, 0)));
//!
//! assert!(evaluate("__import__('os')", &context).is_err());
//! ```

mod ast;
mod eval;
mod lexer;
mod parser;
mod value;

use std::collections::BTreeSet;

pub use ast::{BinaryOp, CompareOp, Expr, Function, UnaryOp};
pub use parser::{MAX_EXPRESSION_LENGTH, MAX_NESTING_DEPTH, parse};
pub use value::{Context, Value};

use crate::error::FormulaError;

/// A formula that has passed the grammar check, paired with its source text.
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    source: String,
    expr: Expr,
}

impl Formula {
    /// Parses and checks formula text.
    pub fn parse(source: &str) -> Result<Self, FormulaError> {
        Ok(Self {
            source: source.to_string(),
            expr: parse(source)?,
        })
    }

    /// The original formula text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The parsed expression.
    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Every variable name the formula may read.
    pub fn names(&self) -> BTreeSet<String> {
        self.expr.names()
    }

    /// Evaluates the formula against a context.
    pub fn evaluate(&self, context: &Context) -> Result<Value, FormulaError> {
        eval::eval(&self.expr, context)
    }
}

/// Parses and evaluates one formula string.
///
/// Fails with [`FormulaError::Unsafe`] for any construct outside the allowed
/// grammar, [`FormulaError::DivisionByZero`] on division by zero and
/// [`FormulaError::UndefinedVariable`] when a referenced name is missing.
pub fn evaluate(expression: &str, context: &Context) -> Result<Value, FormulaError> {
    Formula::parse(expression)?.evaluate(context)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal::Decimal;

    fn safe_expression() -> impl Strategy<Value = String> {
        let leaf = prop_oneof![
            "[a-z][a-z_]{0,6}".prop_filter("not a keyword", |name| {
                ![
                    "and", "or", "not", "if", "else", "in", "is", "for", "from", "def", "del",
                    "try", "with", "pass", "true", "false", "import", "lambda", "class",
                    "while", "yield", "async", "await", "global", "return", "assert",
                    "raise", "except", "finally", "break", "continue", "exec", "eval",
                    "nonlocal",
                ]
                .contains(&name.as_str())
            }),
            (0u32..100_000).prop_map(|n| n.to_string()),
        ];
        leaf.prop_recursive(3, 16, 2, |inner| {
            prop_oneof![
                (inner.clone(), inner.clone()).prop_map(|(a, b)| format!("{} + {}", a, b)),
                (inner.clone(), inner.clone()).prop_map(|(a, b)| format!("({} * {})", a, b)),
                (inner.clone(), inner.clone()).prop_map(|(a, b)| format!("max({}, {})", a, b)),
            ]
        })
    }

    fn injection() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("{}.__class__".to_string()),
            Just("{}.__globals__".to_string()),
            Just("__import__('os').system('id') + {}".to_string()),
            Just("{} + open('/etc/passwd')".to_string()),
            Just("import os; {}".to_string()),
            Just("[c for c in {}]".to_string()),
            Just("{}[0]".to_string()),
            Just("(lambda: {})".to_string()),
            Just("getattr({}, 'real')".to_string()),
            Just("{} if eval('1') else 0".to_string()),
            Just("x = {}".to_string()),
            Just("{} ** 99999999".to_string()),
        ]
    }

    proptest! {
        #[test]
        fn prop_injected_syntax_is_always_unsafe(
            base in safe_expression(),
            template in injection(),
        ) {
            let source = template.replace("{}", &base);
            let result = Formula::parse(&source);
            prop_assert!(
                matches!(result, Err(FormulaError::Unsafe { .. })),
                "expected Unsafe for {:?}, got {:?}", source, result
            );
        }

        #[test]
        fn prop_safe_expressions_parse(base in safe_expression()) {
            prop_assert!(Formula::parse(&base).is_ok(), "failed to parse {:?}", base);
        }
    }

    #[test]
    fn test_formula_keeps_source_and_names() {
        let formula = Formula::parse("max(gross - exempt, 0)").unwrap();
        assert_eq!(formula.source(), "max(gross - exempt, 0)");
        assert_eq!(
            formula.names().into_iter().collect::<Vec<_>>(),
            vec!["exempt".to_string(), "gross".to_string()]
        );
    }

    #[test]
    fn test_evaluate_scenario_bracket_amount() {
        let mut context = Context::new();
        context.insert("gross".to_string(), Value::from(Decimal::new(11_000, 0)));
        context.insert("pension".to_string(), Value::from(Decimal::new(770, 0)));
        assert_eq!(
            evaluate("gross - pension", &context).unwrap(),
            Value::from(Decimal::new(10_230, 0))
        );
    }
}
