//! Evaluation of parsed formulas over decimal values.

use chrono::Duration;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

use super::ast::{BinaryOp, CompareOp, Expr, Function, UnaryOp};
use super::value::{Context, Value};
use crate::error::FormulaError;

/// Largest number of decimals `round` accepts.
const MAX_ROUND_DIGITS: i64 = 28;

/// Evaluates a parsed expression against a variable context.
pub fn eval(expr: &Expr, context: &Context) -> Result<Value, FormulaError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Name(name) => context
            .get(name)
            .cloned()
            .ok_or_else(|| FormulaError::UndefinedVariable { name: name.clone() }),
        Expr::Unary { op, operand } => {
            let value = eval(operand, context)?.as_number()?;
            Ok(Value::Number(match op {
                UnaryOp::Neg => -value,
                UnaryOp::Pos => value,
            }))
        }
        Expr::Binary { op, left, right } => {
            let left = eval(left, context)?;
            let right = eval(right, context)?;
            binary(*op, left, right)
        }
        Expr::Compare { first, rest } => {
            let mut left = eval(first, context)?;
            for (op, operand) in rest {
                let right = eval(operand, context)?;
                if !compare(*op, &left, &right)? {
                    return Ok(Value::Bool(false));
                }
                left = right;
            }
            Ok(Value::Bool(true))
        }
        Expr::And(left, right) => {
            if !eval(left, context)?.as_bool()? {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(eval(right, context)?.as_bool()?))
        }
        Expr::Or(left, right) => {
            if eval(left, context)?.as_bool()? {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(eval(right, context)?.as_bool()?))
        }
        Expr::Not(operand) => Ok(Value::Bool(!eval(operand, context)?.as_bool()?)),
        Expr::Conditional {
            condition,
            if_true,
            if_false,
        } => {
            if eval(condition, context)?.as_bool()? {
                eval(if_true, context)
            } else {
                eval(if_false, context)
            }
        }
        Expr::Call { function, args } => {
            let values = args
                .iter()
                .map(|arg| eval(arg, context))
                .collect::<Result<Vec<_>, _>>()?;
            call(*function, values)
        }
    }
}

fn binary(op: BinaryOp, left: Value, right: Value) -> Result<Value, FormulaError> {
    match (op, left, right) {
        (BinaryOp::Sub, Value::Date(a), Value::Date(b)) => {
            Ok(Value::Number(Decimal::from((a - b).num_days())))
        }
        (BinaryOp::Add, Value::Date(date), Value::Number(days))
        | (BinaryOp::Add, Value::Number(days), Value::Date(date)) => shift_date(date, days),
        (BinaryOp::Sub, Value::Date(date), Value::Number(days)) => shift_date(date, -days),
        (op, Value::Number(a), Value::Number(b)) => {
            let result = match op {
                BinaryOp::Add => a.checked_add(b),
                BinaryOp::Sub => a.checked_sub(b),
                BinaryOp::Mul => a.checked_mul(b),
                BinaryOp::Div => {
                    if b.is_zero() {
                        return Err(FormulaError::DivisionByZero);
                    }
                    a.checked_div(b)
                }
                BinaryOp::Rem => {
                    if b.is_zero() {
                        return Err(FormulaError::DivisionByZero);
                    }
                    a.checked_rem(b)
                }
            };
            result.map(Value::Number).ok_or_else(|| FormulaError::Overflow {
                operation: format!("{:?}", op).to_lowercase(),
            })
        }
        (op, left, right) => Err(FormulaError::TypeMismatch {
            message: format!(
                "cannot apply {:?} to {} and {}",
                op,
                left.type_name(),
                right.type_name()
            ),
        }),
    }
}

fn shift_date(date: chrono::NaiveDate, days: Decimal) -> Result<Value, FormulaError> {
    if !days.fract().is_zero() {
        return Err(FormulaError::TypeMismatch {
            message: "dates can only be shifted by whole days".to_string(),
        });
    }
    let days = days.to_i64().ok_or_else(|| FormulaError::Overflow {
        operation: "date shift".to_string(),
    })?;
    Duration::try_days(days)
        .and_then(|delta| date.checked_add_signed(delta))
        .map(Value::Date)
        .ok_or_else(|| FormulaError::Overflow {
            operation: "date shift".to_string(),
        })
}

fn compare(op: CompareOp, left: &Value, right: &Value) -> Result<bool, FormulaError> {
    let ordering = match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.cmp(b),
        (Value::Date(a), Value::Date(b)) => a.cmp(b),
        (Value::Text(a), Value::Text(b)) if matches!(op, CompareOp::Eq | CompareOp::NotEq) => {
            a.cmp(b)
        }
        (Value::Bool(a), Value::Bool(b)) if matches!(op, CompareOp::Eq | CompareOp::NotEq) => {
            a.cmp(b)
        }
        _ => {
            return Err(FormulaError::TypeMismatch {
                message: format!(
                    "cannot compare {} and {} with {:?}",
                    left.type_name(),
                    right.type_name(),
                    op
                ),
            });
        }
    };
    Ok(match op {
        CompareOp::Eq => ordering.is_eq(),
        CompareOp::NotEq => ordering.is_ne(),
        CompareOp::Lt => ordering.is_lt(),
        CompareOp::Le => ordering.is_le(),
        CompareOp::Gt => ordering.is_gt(),
        CompareOp::Ge => ordering.is_ge(),
    })
}

fn call(function: Function, args: Vec<Value>) -> Result<Value, FormulaError> {
    match function {
        Function::Min | Function::Max => extremum(function, args),
        Function::Abs => Ok(Value::Number(args[0].as_number()?.abs())),
        Function::Round => {
            let value = args[0].as_number()?;
            let digits = match args.get(1) {
                Some(arg) => {
                    let digits = arg.as_number()?;
                    match digits.to_i64() {
                        Some(d) if digits.fract().is_zero() && (0..=MAX_ROUND_DIGITS).contains(&d) => {
                            d as u32
                        }
                        _ => {
                            return Err(FormulaError::TypeMismatch {
                                message: format!(
                                    "round() digits must be a whole number between 0 and {}",
                                    MAX_ROUND_DIGITS
                                ),
                            });
                        }
                    }
                }
                None => 0,
            };
            Ok(Value::Number(value.round_dp_with_strategy(
                digits,
                RoundingStrategy::MidpointAwayFromZero,
            )))
        }
    }
}

fn extremum(function: Function, args: Vec<Value>) -> Result<Value, FormulaError> {
    let pick_max = function == Function::Max;
    let mut iter = args.into_iter();
    let mut best = iter.next().ok_or_else(|| FormulaError::TypeMismatch {
        message: format!("{}() needs at least one argument", function),
    })?;
    if !matches!(best, Value::Number(_) | Value::Date(_)) {
        return Err(FormulaError::TypeMismatch {
            message: format!("{}() accepts numbers or dates, found {}", function, best.type_name()),
        });
    }
    for candidate in iter {
        let replace = match (&best, &candidate) {
            (Value::Number(a), Value::Number(b)) => {
                if pick_max { b > a } else { b < a }
            }
            (Value::Date(a), Value::Date(b)) => {
                if pick_max { b > a } else { b < a }
            }
            _ => {
                return Err(FormulaError::TypeMismatch {
                    message: format!(
                        "{}() arguments must all be numbers or all dates",
                        function
                    ),
                });
            }
        };
        if replace {
            best = candidate;
        }
    }
    Ok(best)
}
