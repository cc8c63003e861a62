//! Recalculation of individual results.
//!
//! A recalculation reruns one employee as of the original calculation
//! date. Settings, exchange rates, concept definitions and rule versions
//! come from the run's snapshot; novelties, loan balances and the employee
//! record are read again. The new result replaces the employee's current
//! one and points back at it.

use tracing::info;
use uuid::Uuid;

use crate::error::EngineResult;
use crate::models::{CalculationOrigin, CalculationResult, RunStatus};

use super::engine::PayrollEngine;

impl PayrollEngine {
    /// Recalculates `previous` and makes the new result current.
    ///
    /// Run totals are recomputed. An approved run goes back to `generated`
    /// and needs approving again.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidState`](crate::error::EngineError::InvalidState)
    /// if the run is applied, paid, cancelled or still calculating, and any
    /// calculation error for the employee. A failed recalculation leaves the
    /// previous result current.
    pub fn recalculate(&self, previous: &CalculationResult) -> EngineResult<CalculationResult> {
        let run = self.repository().get_run(previous.run_id)?;
        run.ensure_recalculable()?;

        let planilla = self.repository().get_planilla(&run.planilla_id)?;
        let employee = self.repository().get_employee(&previous.employee_id)?;
        let commit = self.calculate(
            &run,
            &planilla,
            &employee,
            previous.calculation_date,
            CalculationOrigin::Recalculated,
            Some(previous.id),
        )?;
        let result = commit.result.clone();
        self.repository().commit_employee(commit)?;

        let mut run = self.repository().get_run(run.id)?;
        run.totals = self.sum_totals(run.id)?;
        if run.status == RunStatus::Approved {
            run.transition(RunStatus::Generated)?;
        }
        self.repository().save_run(&run)?;

        info!(
            run_id = %run.id,
            employee_id = %result.employee_id,
            previous_id = %previous.id,
            result_id = %result.id,
            net = %result.totals.net,
            "Result recalculated"
        );
        Ok(result)
    }

    /// Recalculates a stored result by id.
    pub fn recalculate_result(&self, result_id: Uuid) -> EngineResult<CalculationResult> {
        let previous = self.repository().get_result(result_id)?;
        self.recalculate(&previous)
    }
}
