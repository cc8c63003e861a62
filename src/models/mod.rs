//! Core data models for the payroll engine.
//!
//! This module contains all the domain models used throughout the engine:
//! the facts a calculation reads (employees, planillas, periods, novelties,
//! loans, accumulations), the concepts it applies, and what it produces
//! (results, runs, snapshots).

mod accumulation;
mod calculation_result;
mod concept;
mod employee;
mod loan;
mod novelty;
mod pay_period;
mod planilla;
mod run;
mod snapshot;

pub use accumulation::{AccumulationDelta, AccumulationRecord};
pub use calculation_result::{
    AuditStep, AuditTrace, AuditWarning, CalculationOrigin, CalculationResult, LineKind,
    LineStatus, ResultLine, ResultTotals, SkipReason,
};
pub use concept::{ConceptCatalog, ConceptDefinition, ConceptKind, ConceptMode, PercentageBase};
pub use employee::{Employee, SalaryBasis};
pub use loan::{LoanBalance, LoanInstallment, LoanKind};
pub use novelty::{Novelty, totals_by_code};
pub use pay_period::PayPeriod;
pub use planilla::{PayFrequency, Planilla};
pub use run::{EmployeeFailure, PayrollRun, RunStatus, RunSummary};
pub use snapshot::SnapshotBundle;
