//! Exclusive run locks keyed by planilla and period.
//!
//! The first job to lock a `(planilla, period)` wins. A different job is
//! rejected with [`EngineError::RunConflict`] until the holder releases;
//! the holding job itself may acquire again, which is how a redelivered job
//! resumes its run.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::NaiveDate;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::models::PayPeriod;

/// Identifies what a lock protects.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunKey {
    /// The planilla.
    pub planilla_id: String,
    /// First day of the period.
    pub start: NaiveDate,
    /// Last day of the period.
    pub end: NaiveDate,
}

impl RunKey {
    /// The key for a planilla and period.
    pub fn new(planilla_id: &str, period: &PayPeriod) -> Self {
        Self {
            planilla_id: planilla_id.to_string(),
            start: period.start_date,
            end: period.end_date,
        }
    }
}

/// The set of held run locks.
///
/// # Example
///
/// ```
/// use payroll_engine::batch::{RunKey, RunLocks};
/// use payroll_engine::models::PayPeriod;
/// use chrono::NaiveDate;
/// use uuid::Uuid;
///
/// let period = PayPeriod::new(
///     NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
///     NaiveDate::from_ymd_opt(2025, 1, 31).unwrap(),
/// );
/// let key = RunKey::new("pl_main", &period);
/// let locks = RunLocks::new();
/// let (first, second) = (Uuid::new_v4(), Uuid::new_v4());
///
/// locks.acquire(&key, first).unwrap();
/// locks.acquire(&key, first).unwrap();
/// assert!(locks.acquire(&key, second).is_err());
///
/// locks.release(&key, first);
/// locks.acquire(&key, second).unwrap();
/// ```
#[derive(Debug, Default)]
pub struct RunLocks {
    held: Mutex<HashMap<RunKey, Uuid>>,
}

impl RunLocks {
    /// Creates an empty lock set.
    pub fn new() -> Self {
        Self::default()
    }

    fn held(&self) -> EngineResult<MutexGuard<'_, HashMap<RunKey, Uuid>>> {
        self.held.lock().map_err(|_| EngineError::CalculationError {
            message: "run lock table poisoned".to_string(),
        })
    }

    /// Takes the lock for `job_id`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::RunConflict`] if another job holds it.
    pub fn acquire(&self, key: &RunKey, job_id: Uuid) -> EngineResult<()> {
        let mut held = self.held()?;
        match held.get(key) {
            Some(holder) if *holder != job_id => {
                warn!(
                    planilla_id = %key.planilla_id,
                    job_id = %job_id,
                    held_by = %holder,
                    "Run lock conflict"
                );
                Err(EngineError::RunConflict {
                    planilla_id: key.planilla_id.clone(),
                    period_start: key.start,
                    held_by: *holder,
                })
            }
            Some(_) => Ok(()),
            None => {
                held.insert(key.clone(), job_id);
                debug!(planilla_id = %key.planilla_id, job_id = %job_id, "Run lock acquired");
                Ok(())
            }
        }
    }

    /// Releases the lock if `job_id` holds it. Returns true if it did.
    pub fn release(&self, key: &RunKey, job_id: Uuid) -> bool {
        let Ok(mut held) = self.held() else {
            return false;
        };
        if held.get(key) == Some(&job_id) {
            held.remove(key);
            debug!(planilla_id = %key.planilla_id, job_id = %job_id, "Run lock released");
            true
        } else {
            false
        }
    }

    /// The job holding the lock, if any.
    pub fn holder(&self, key: &RunKey) -> Option<Uuid> {
        self.held().ok()?.get(key).copied()
    }
}
