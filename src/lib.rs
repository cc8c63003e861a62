//! Payroll Calculation Engine
//!
//! This crate calculates payroll runs: one result per employee per period,
//! built from base pay, perceptions, priority-ordered deductions and loan
//! installments, and employer benefits. Amounts that need more than a fixed
//! value or a percentage come from versioned calculation rules: multi-step
//! formulas evaluated in a sandbox, with progressive bracket tables.
//!
//! Every result carries an audit trace, and every run keeps a snapshot of
//! the settings, exchange rates, concepts and rule versions it consulted,
//! so a result can be recalculated later exactly as it was first made.
//!
//! - [`formula`]: the expression sandbox
//! - [`rules`]: rule schemas, input binding, step execution and the catalog
//! - [`calculation`]: the engine, accumulation, snapshots and recalculation
//! - [`batch`]: run locks and the background queue
//! - [`repository`]: the persistence boundary
//! - [`config`]: YAML configuration loading

#![warn(missing_docs)]

pub mod batch;
pub mod calculation;
pub mod config;
pub mod error;
pub mod formula;
pub mod models;
pub mod repository;
pub mod rules;
