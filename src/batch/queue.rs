//! Background batch processing of payroll runs.
//!
//! A job prepares its run, calculates every pending employee and finalizes
//! the run. Batches larger than the configured threshold run each employee
//! as its own blocking unit, at most `workers` at a time; smaller batches
//! run as a single unit. Cancellation is checked before each unit starts
//! and in-flight units are allowed to finish.
//!
//! Delivering the same job twice is safe: the run lock is keyed by job id,
//! the second delivery resumes the existing run and skips employees that
//! already have a result.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock, Semaphore, mpsc};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::calculation::{EmployeeOutcome, PayrollEngine};
use crate::error::{EngineError, EngineResult};
use crate::models::{Employee, PayPeriod, PayrollRun, RunStatus};

use super::progress::{JobProgress, JobState, ProgressTracker};

/// A unit of background work: one planilla for one period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchJob {
    /// Identifies the job across deliveries.
    pub job_id: Uuid,
    /// The planilla to run.
    pub planilla_id: String,
    /// The period to run.
    pub period: PayPeriod,
}

enum UnitEvent {
    Started(String),
    Finished { failed: bool },
}

type JobHandle = JoinHandle<EngineResult<PayrollRun>>;

/// Runs payroll jobs on the tokio runtime.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use payroll_engine::batch::BatchQueue;
/// use payroll_engine::calculation::PayrollEngine;
/// use payroll_engine::config::ConfigLoader;
/// use payroll_engine::models::PayPeriod;
/// use payroll_engine::repository::InMemoryRepository;
/// use chrono::NaiveDate;
///
/// # async fn run() {
/// let config = ConfigLoader::load("./config/default").unwrap();
/// let engine = PayrollEngine::new(config.config(), Arc::new(InMemoryRepository::new()));
/// let queue = BatchQueue::new(Arc::new(engine));
///
/// let period = PayPeriod::new(
///     NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
///     NaiveDate::from_ymd_opt(2025, 1, 31).unwrap(),
/// );
/// let job_id = queue.enqueue_batch("pl_main", &period).await;
/// let run = queue.wait(job_id).await.unwrap();
/// println!("{:?}", queue.get_progress(job_id).await);
/// # }
/// ```
#[derive(Clone)]
pub struct BatchQueue {
    engine: Arc<PayrollEngine>,
    progress: ProgressTracker,
    cancellations: Arc<RwLock<HashMap<Uuid, Arc<AtomicBool>>>>,
    handles: Arc<Mutex<HashMap<Uuid, JobHandle>>>,
    workers: Arc<Semaphore>,
    threshold: usize,
}

impl BatchQueue {
    /// Creates a queue sized from the engine's batch settings.
    pub fn new(engine: Arc<PayrollEngine>) -> Self {
        let batch = engine.settings().batch;
        Self::with_limits(engine, batch.threshold, batch.workers)
    }

    /// Creates a queue with an explicit threshold and worker count.
    pub fn with_limits(engine: Arc<PayrollEngine>, threshold: usize, workers: usize) -> Self {
        Self {
            engine,
            progress: ProgressTracker::new(),
            cancellations: Arc::new(RwLock::new(HashMap::new())),
            handles: Arc::new(Mutex::new(HashMap::new())),
            workers: Arc::new(Semaphore::new(workers.max(1))),
            threshold,
        }
    }

    /// The engine jobs run on.
    pub fn engine(&self) -> &Arc<PayrollEngine> {
        &self.engine
    }

    /// Queues a run of `planilla_id` for `period` and returns its job id.
    pub async fn enqueue_batch(&self, planilla_id: &str, period: &PayPeriod) -> Uuid {
        let job = BatchJob {
            job_id: Uuid::new_v4(),
            planilla_id: planilla_id.to_string(),
            period: period.clone(),
        };
        let job_id = job.job_id;
        self.progress.register(job_id).await;
        self.cancel_flag(job_id).await;

        let queue = self.clone();
        let handle = tokio::spawn(async move { queue.process(job).await });
        self.handles.lock().await.insert(job_id, handle);

        info!(job_id = %job_id, planilla_id = %planilla_id, "Batch job queued");
        job_id
    }

    /// Processes one delivery of a job.
    ///
    /// # Errors
    ///
    /// Structural errors from run preparation, including
    /// [`EngineError::RunConflict`]; [`EngineError::InvalidState`] if the
    /// job was cancelled before it started.
    pub async fn process(&self, job: BatchJob) -> EngineResult<PayrollRun> {
        let job_id = job.job_id;
        self.progress.register(job_id).await;
        let cancelled = self.cancel_flag(job_id).await;

        match self.execute(&job, &cancelled).await {
            Ok(run) => {
                let state = if run.status == RunStatus::Cancelled {
                    JobState::Cancelled
                } else {
                    JobState::Completed
                };
                self.progress.complete(job_id, state, None).await;
                Ok(run)
            }
            Err(error) => {
                let state = if cancelled.load(Ordering::SeqCst) {
                    JobState::Cancelled
                } else {
                    JobState::Failed
                };
                warn!(job_id = %job_id, error = %error, state = ?state, "Batch job stopped");
                self.progress
                    .complete(job_id, state, Some(error.to_string()))
                    .await;
                Err(error)
            }
        }
    }

    async fn execute(&self, job: &BatchJob, cancelled: &Arc<AtomicBool>) -> EngineResult<PayrollRun> {
        let job_id = job.job_id;
        if cancelled.load(Ordering::SeqCst) {
            return Err(EngineError::invalid_state(
                format!("job {}", job_id),
                "cancelled before it started",
            ));
        }

        let delivery = job.clone();
        let run = self
            .blocking(move |engine| {
                engine.prepare_run(&delivery.planilla_id, &delivery.period, delivery.job_id)
            })
            .await?;
        if run.status != RunStatus::Calculating {
            return Ok(run);
        }

        let run_id = run.id;
        let pending = self
            .blocking(move |engine| engine.pending_employees(run_id))
            .await?;
        let done = run.results.len();
        self.progress
            .start(job_id, run_id, done + pending.len(), done, 0)
            .await;
        info!(
            job_id = %job_id,
            run_id = %run_id,
            pending = pending.len(),
            already_done = done,
            "Batch job started"
        );

        let (events, mut received) = mpsc::unbounded_channel();
        let progress = self.progress.clone();
        let reporter = async move {
            while let Some(event) = received.recv().await {
                match event {
                    UnitEvent::Started(employee_id) => {
                        progress.begin_employee(job_id, &employee_id).await
                    }
                    UnitEvent::Finished { failed } => progress.finish_employee(job_id, failed).await,
                }
            }
        };
        let units = self.run_units(run, pending, cancelled.clone(), events);
        let (outcome, ()) = tokio::join!(units, reporter);
        outcome?;

        if cancelled.load(Ordering::SeqCst) {
            let run = self.blocking(move |engine| engine.cancel_run(run_id)).await?;
            info!(job_id = %job_id, run_id = %run_id, "Batch job cancelled");
            return Ok(run);
        }
        self.blocking(move |engine| engine.finalize_run(run_id)).await
    }

    async fn run_units(
        &self,
        run: PayrollRun,
        pending: Vec<Employee>,
        cancelled: Arc<AtomicBool>,
        events: mpsc::UnboundedSender<UnitEvent>,
    ) -> EngineResult<()> {
        let run = Arc::new(run);

        if pending.len() <= self.threshold {
            let engine = self.engine.clone();
            return tokio::task::spawn_blocking(move || {
                for employee in pending {
                    if cancelled.load(Ordering::SeqCst) {
                        break;
                    }
                    let _ = events.send(UnitEvent::Started(employee.id.clone()));
                    let outcome = engine.process_employee(&run, &employee)?;
                    let _ = events.send(UnitEvent::Finished {
                        failed: outcome.is_failed(),
                    });
                }
                Ok::<(), EngineError>(())
            })
            .await
            .map_err(join_error)?;
        }

        debug!(run_id = %run.id, units = pending.len(), "Fanning out per-employee units");
        let mut units = JoinSet::new();
        for employee in pending {
            let permit = self
                .workers
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| EngineError::CalculationError {
                    message: "worker pool closed".to_string(),
                })?;
            if cancelled.load(Ordering::SeqCst) {
                break;
            }

            let engine = self.engine.clone();
            let run = run.clone();
            let events = events.clone();
            units.spawn_blocking(move || {
                let _permit = permit;
                let _ = events.send(UnitEvent::Started(employee.id.clone()));
                let outcome = engine.process_employee(&run, &employee);
                let _ = events.send(UnitEvent::Finished {
                    failed: !matches!(outcome, Ok(EmployeeOutcome::Calculated(_))),
                });
                outcome.map(|_| ())
            });
        }

        while let Some(joined) = units.join_next().await {
            joined.map_err(join_error)??;
        }
        Ok(())
    }

    async fn blocking<T, F>(&self, work: F) -> EngineResult<T>
    where
        F: FnOnce(&PayrollEngine) -> EngineResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let engine = self.engine.clone();
        tokio::task::spawn_blocking(move || work(&engine))
            .await
            .map_err(join_error)?
    }

    async fn cancel_flag(&self, job_id: Uuid) -> Arc<AtomicBool> {
        self.cancellations
            .write()
            .await
            .entry(job_id)
            .or_default()
            .clone()
    }

    /// The job's progress, if the job is known.
    pub async fn get_progress(&self, job_id: Uuid) -> Option<JobProgress> {
        self.progress.get(job_id).await
    }

    /// Requests cancellation. Units already running finish; the run is
    /// then cancelled.
    ///
    /// # Errors
    ///
    /// [`EngineError::NotFound`] for an unknown job,
    /// [`EngineError::InvalidState`] for a finished one.
    pub async fn cancel(&self, job_id: Uuid) -> EngineResult<()> {
        let progress = self
            .progress
            .get(job_id)
            .await
            .ok_or_else(|| EngineError::not_found("Job", job_id))?;
        if progress.state.is_terminal() {
            return Err(EngineError::invalid_state(
                format!("job {}", job_id),
                format!("already {:?}", progress.state),
            ));
        }
        self.cancel_flag(job_id).await.store(true, Ordering::SeqCst);
        info!(job_id = %job_id, "Batch job cancellation requested");
        Ok(())
    }

    /// Waits for a queued job to finish.
    ///
    /// # Errors
    ///
    /// The job's own error, or [`EngineError::NotFound`] if the job was not
    /// queued here or has already been waited on.
    pub async fn wait(&self, job_id: Uuid) -> EngineResult<PayrollRun> {
        let handle = self
            .handles
            .lock()
            .await
            .remove(&job_id)
            .ok_or_else(|| EngineError::not_found("Job", job_id))?;
        handle.await.map_err(join_error)?
    }
}

fn join_error(error: JoinError) -> EngineError {
    EngineError::CalculationError {
        message: format!("worker task failed: {}", error),
    }
}
