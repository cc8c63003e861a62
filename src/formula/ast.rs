//! Syntax tree for the closed formula grammar.
//!
//! Every node that can exist is listed here; there is no escape hatch to
//! host functionality. Anything the parser cannot map onto one of these
//! variants is rejected before evaluation.

use std::collections::BTreeSet;
use std::fmt;

use super::value::Value;

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// Numeric negation.
    Neg,
    /// Numeric identity.
    Pos,
}

/// Binary arithmetic operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// Addition (numbers) or shifting a date by days.
    Add,
    /// Subtraction (numbers), days between dates, or shifting a date back.
    Sub,
    /// Multiplication.
    Mul,
    /// Division.
    Div,
    /// Remainder.
    Rem,
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `==`
    Eq,
    /// `!=`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

/// The whitelisted pure functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    /// Smallest of one or more numbers or dates.
    Min,
    /// Largest of one or more numbers or dates.
    Max,
    /// Absolute value.
    Abs,
    /// Round half away from zero to an optional number of decimals.
    Round,
}

impl Function {
    /// Looks up a whitelisted function by name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "min" => Some(Function::Min),
            "max" => Some(Function::Max),
            "abs" => Some(Function::Abs),
            "round" => Some(Function::Round),
            _ => None,
        }
    }

    /// Returns the inclusive range of accepted argument counts.
    pub(crate) fn arity(self) -> (usize, usize) {
        match self {
            Function::Min | Function::Max => (1, usize::MAX),
            Function::Abs => (1, 1),
            Function::Round => (1, 2),
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Function::Min => "min",
            Function::Max => "max",
            Function::Abs => "abs",
            Function::Round => "round",
        };
        f.write_str(name)
    }
}

/// A parsed formula expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A literal number, text or boolean.
    Literal(Value),
    /// A variable reference.
    Name(String),
    /// A unary operation.
    Unary {
        /// The operator.
        op: UnaryOp,
        /// The operand.
        operand: Box<Expr>,
    },
    /// A binary arithmetic operation.
    Binary {
        /// The operator.
        op: BinaryOp,
        /// Left operand.
        left: Box<Expr>,
        /// Right operand.
        right: Box<Expr>,
    },
    /// A (possibly chained) comparison: `a < b <= c`.
    Compare {
        /// The leftmost operand.
        first: Box<Expr>,
        /// Each following operator and operand.
        rest: Vec<(CompareOp, Expr)>,
    },
    /// Short-circuit conjunction.
    And(Box<Expr>, Box<Expr>),
    /// Short-circuit disjunction.
    Or(Box<Expr>, Box<Expr>),
    /// Boolean negation.
    Not(Box<Expr>),
    /// `if_true if condition else if_false`
    Conditional {
        /// The predicate.
        condition: Box<Expr>,
        /// Value when the predicate holds.
        if_true: Box<Expr>,
        /// Value otherwise.
        if_false: Box<Expr>,
    },
    /// A call to a whitelisted function.
    Call {
        /// The function.
        function: Function,
        /// Its arguments.
        args: Vec<Expr>,
    },
}

impl Expr {
    /// Returns every variable name referenced anywhere in the expression.
    pub fn names(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        self.collect_names(&mut names);
        names
    }

    fn collect_names(&self, names: &mut BTreeSet<String>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Name(name) => {
                names.insert(name.clone());
            }
            Expr::Unary { operand, .. } | Expr::Not(operand) => operand.collect_names(names),
            Expr::Binary { left, right, .. } | Expr::And(left, right) | Expr::Or(left, right) => {
                left.collect_names(names);
                right.collect_names(names);
            }
            Expr::Compare { first, rest } => {
                first.collect_names(names);
                for (_, operand) in rest {
                    operand.collect_names(names);
                }
            }
            Expr::Conditional {
                condition,
                if_true,
                if_false,
            } => {
                condition.collect_names(names);
                if_true.collect_names(names);
                if_false.collect_names(names);
            }
            Expr::Call { args, .. } => {
                for arg in args {
                    arg.collect_names(names);
                }
            }
        }
    }
}
