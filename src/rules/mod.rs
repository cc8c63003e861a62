//! Calculation rules: data-defined, multi-step formulas.
//!
//! A rule binds canonical engine variables to local names ([`binder`]),
//! runs an ordered list of steps over them ([`executor`]), and may look
//! amounts up in progressive bracket tables ([`bracket`]). Rules are
//! validated ([`validator`]) when they are saved into a versioned
//! [`catalog`].

pub mod binder;
pub mod bracket;
pub mod catalog;
pub mod executor;
pub mod schema;
pub mod validator;

pub use binder::{BoundInputs, InputBinding, InputType, bind_inputs};
pub use bracket::{Bracket, BracketResolution, BracketTable};
pub use catalog::{CalculationRule, InMemoryCatalog, RuleCatalog, RuleStatus};
pub use executor::{RuleOutcome, StepExecutor, StepTrace, execute};
pub use schema::{RuleMeta, RuleSchema, Step};
pub use validator::validate_schema;
