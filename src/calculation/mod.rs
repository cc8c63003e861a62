//! Payroll calculation.
//!
//! This module turns an employee, a period and the configured concepts into
//! a [`CalculationResult`](crate::models::CalculationResult): base pay,
//! perceptions, priority-ordered deductions and loan installments, benefits,
//! year-to-date accumulation and the snapshot of everything consulted.
//! [`PayrollEngine`] orchestrates runs; recalculation replays a run's
//! snapshot.

mod accumulation;
mod base_pay;
mod concepts;
mod context;
mod engine;
mod recalculation;
mod snapshot;

pub use accumulation::AccumulationTracker;
pub use base_pay::{BasePayResult, calculate_base_pay};
pub use concepts::{ConceptOutcome, ConceptPass, INSUFFICIENT_BALANCE, NEGATIVE_NET};
pub use context::{
    CanonicalContext, ContextSeed, GROSS, NET, PRE_TAX_DEDUCTIONS, TAXABLE_INCOME,
    TOTAL_PERCEPTIONS,
};
pub use engine::{ENGINE_VERSION, EmployeeOutcome, PayrollEngine};
pub use snapshot::SnapshotRecorder;
