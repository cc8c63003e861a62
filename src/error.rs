//! Error types for the payroll calculation engine.
//!
//! This module provides strongly-typed errors using the `thiserror` crate
//! for every failure the engine can report, from a rejected formula at
//! catalog-save time to a structural problem that aborts a payroll run.
//!
//! Errors fall into the categories described by [`ErrorKind`]. Callers use
//! [`EngineError::kind`] to decide whether a failure aborts a whole run,
//! is recorded against a single employee, or rejects a catalog entry.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Errors raised while parsing or evaluating a single formula.
///
/// These carry no knowledge of the rule or step that owns the formula; the
/// step executor attaches that context with [`FormulaError::in_step`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormulaError {
    /// The expression uses syntax outside the allowed grammar.
    #[error("unsafe expression: {reason}")]
    Unsafe {
        /// Which construct was rejected.
        reason: String,
    },

    /// The expression is not well formed.
    #[error("syntax error at position {position}: {message}")]
    Syntax {
        /// A description of the problem.
        message: String,
        /// Byte offset in the expression where the problem was found.
        position: usize,
    },

    /// The expression references a name that is not in scope.
    #[error("undefined variable '{name}'")]
    UndefinedVariable {
        /// The missing name.
        name: String,
    },

    /// A division or modulo by zero was attempted.
    #[error("division by zero")]
    DivisionByZero,

    /// An operator or function received operands of the wrong type.
    #[error("type mismatch: {message}")]
    TypeMismatch {
        /// A description of the mismatch.
        message: String,
    },

    /// A decimal operation overflowed.
    #[error("arithmetic overflow in {operation}")]
    Overflow {
        /// The operation that overflowed.
        operation: String,
    },
}

impl FormulaError {
    /// Converts this formula error into an [`EngineError`] that names the
    /// step and the expression it came from.
    pub fn in_step(self, step: &str, expression: &str) -> EngineError {
        match self {
            FormulaError::Unsafe { reason } => EngineError::UnsafeExpression {
                expression: expression.to_string(),
                reason,
            },
            FormulaError::Syntax { message, position } => EngineError::ExpressionSyntax {
                expression: expression.to_string(),
                message: format!("{} (at position {})", message, position),
            },
            FormulaError::UndefinedVariable { name } => EngineError::UndefinedVariable {
                step: step.to_string(),
                name,
            },
            FormulaError::DivisionByZero => EngineError::DivisionByZero {
                step: step.to_string(),
            },
            other => EngineError::FormulaEvaluation {
                step: step.to_string(),
                message: other.to_string(),
            },
        }
    }
}

/// Classification of an [`EngineError`] by its effect on a payroll run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Configuration could not be loaded.
    Configuration,
    /// Bad planilla, period, currency or a lock conflict: aborts the run.
    Structural,
    /// A failure scoped to one employee: recorded, the run continues.
    PerEmployee,
    /// A catalog entry was rejected before any run could use it.
    CatalogValidation,
    /// Mutation of a finalized run or result was attempted.
    InvalidState,
    /// A referenced entity does not exist.
    NotFound,
}

/// The main error type for the payroll engine.
///
/// # Example
///
/// ```
/// use payroll_engine::error::{EngineError, ErrorKind};
///
/// let error = EngineError::UndefinedVariable {
///     step: "taxable".to_string(),
///     name: "gross".to_string(),
/// };
/// assert_eq!(error.to_string(), "Step 'taxable' references undefined variable 'gross'");
/// assert_eq!(error.kind(), ErrorKind::PerEmployee);
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    /// Configuration file was not found at the specified path.
    #[error("Configuration file not found: {path}")]
    ConfigNotFound {
        /// The path that was not found.
        path: String,
    },

    /// Configuration file could not be parsed.
    #[error("Failed to parse configuration file '{path}': {message}")]
    ConfigParseError {
        /// The path to the file that failed to parse.
        path: String,
        /// A description of the parse error.
        message: String,
    },

    /// A formula uses syntax outside the allowed grammar.
    #[error("Unsafe expression '{expression}': {reason}")]
    UnsafeExpression {
        /// The offending formula text.
        expression: String,
        /// Which construct was rejected.
        reason: String,
    },

    /// A formula is not well formed.
    #[error("Invalid expression '{expression}': {message}")]
    ExpressionSyntax {
        /// The offending formula text.
        expression: String,
        /// A description of the syntax problem.
        message: String,
    },

    /// A step referenced a name that is neither a bound input nor a prior output.
    #[error("Step '{step}' references undefined variable '{name}'")]
    UndefinedVariable {
        /// The step that failed.
        step: String,
        /// The missing reference.
        name: String,
    },

    /// A step divided by zero.
    #[error("Division by zero in step '{step}'")]
    DivisionByZero {
        /// The step that failed.
        step: String,
    },

    /// A step failed for another evaluation reason (type mismatch, overflow).
    #[error("Evaluation of step '{step}' failed: {message}")]
    FormulaEvaluation {
        /// The step that failed.
        step: String,
        /// A description of the failure.
        message: String,
    },

    /// A bound input could not be coerced to its declared type.
    #[error("Invalid input '{name}': {message}")]
    InvalidInput {
        /// The input alias.
        name: String,
        /// A description of the problem.
        message: String,
    },

    /// A bracket table violates its structural invariants.
    #[error("Malformed bracket table '{table}': {message}")]
    MalformedBracketTable {
        /// The table name.
        table: String,
        /// A description of the violated invariant.
        message: String,
    },

    /// A calculation-rule schema is structurally invalid.
    #[error("Invalid schema for rule '{rule}': {message}")]
    InvalidSchema {
        /// The rule code.
        rule: String,
        /// A description of the problem.
        message: String,
    },

    /// No active rule version covers the requested date.
    #[error("Calculation rule '{code}' not found for date {date}")]
    RuleNotFound {
        /// The rule code.
        code: String,
        /// The calculation date.
        date: NaiveDate,
    },

    /// No exchange rate was found for the given currency and date.
    #[error("Exchange rate not found for currency '{currency}' on date {date}")]
    RateNotFound {
        /// The currency code.
        currency: String,
        /// The date for which the rate was requested.
        date: NaiveDate,
    },

    /// The planilla, period or currency setup does not allow a run.
    #[error("Structural configuration error in {subject}: {message}")]
    StructuralConfig {
        /// What was being validated (planilla, period, currency).
        subject: String,
        /// A description of the problem.
        message: String,
    },

    /// Another job already holds the run lock for this planilla and period.
    #[error("Run for planilla '{planilla_id}' starting {period_start} is locked by job {held_by}")]
    RunConflict {
        /// The planilla being run.
        planilla_id: String,
        /// Start of the locked period.
        period_start: NaiveDate,
        /// The job currently holding the lock.
        held_by: Uuid,
    },

    /// An employee record cannot be calculated for this period.
    #[error("Invalid employee '{employee_id}': {message}")]
    InvalidEmployee {
        /// The employee ID.
        employee_id: String,
        /// A description of what made the employee invalid.
        message: String,
    },

    /// A concept could not be computed.
    #[error("Concept '{concept}' failed: {source}")]
    ConceptFailed {
        /// The concept code.
        concept: String,
        /// The underlying failure.
        #[source]
        source: Box<EngineError>,
    },

    /// The entity is finalized and cannot be changed.
    #[error("Invalid state for {entity}: {message}")]
    InvalidState {
        /// The entity being mutated.
        entity: String,
        /// A description of the problem.
        message: String,
    },

    /// A referenced entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The entity type.
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// A general calculation error occurred.
    #[error("Calculation error: {message}")]
    CalculationError {
        /// A description of the calculation error.
        message: String,
    },
}

impl EngineError {
    /// Returns the category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::ConfigNotFound { .. } | EngineError::ConfigParseError { .. } => {
                ErrorKind::Configuration
            }
            EngineError::UnsafeExpression { .. }
            | EngineError::ExpressionSyntax { .. }
            | EngineError::MalformedBracketTable { .. }
            | EngineError::InvalidSchema { .. } => ErrorKind::CatalogValidation,
            EngineError::RateNotFound { .. }
            | EngineError::StructuralConfig { .. }
            | EngineError::RunConflict { .. } => ErrorKind::Structural,
            EngineError::InvalidState { .. } => ErrorKind::InvalidState,
            EngineError::NotFound { .. } => ErrorKind::NotFound,
            EngineError::UndefinedVariable { .. }
            | EngineError::DivisionByZero { .. }
            | EngineError::FormulaEvaluation { .. }
            | EngineError::InvalidInput { .. }
            | EngineError::RuleNotFound { .. }
            | EngineError::InvalidEmployee { .. }
            | EngineError::ConceptFailed { .. }
            | EngineError::CalculationError { .. } => ErrorKind::PerEmployee,
        }
    }

    /// Returns true if this error must abort a whole payroll run.
    pub fn is_structural(&self) -> bool {
        self.kind() == ErrorKind::Structural
    }

    /// Shorthand for a structural error.
    pub(crate) fn structural(subject: &str, message: impl Into<String>) -> Self {
        EngineError::StructuralConfig {
            subject: subject.to_string(),
            message: message.into(),
        }
    }

    /// Shorthand for an invalid-state error.
    pub(crate) fn invalid_state(entity: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::InvalidState {
            entity: entity.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a not-found error.
    pub(crate) fn not_found(entity: &str, id: impl ToString) -> Self {
        EngineError::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        }
    }
}

/// A type alias for Results that return EngineError.
pub type EngineResult<T> = Result<T, EngineError>;
