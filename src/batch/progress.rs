//! Progress of batch jobs.
//!
//! Progress is updated outside the per-employee commit: a unit first
//! commits its result, then reports. Readers may see a count lag behind the
//! repository, never run ahead of it.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

/// State of a batch job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Accepted, not started.
    Queued,
    /// Employees are being processed.
    Running,
    /// The run was generated.
    Completed,
    /// Stopped on request; the run was cancelled.
    Cancelled,
    /// Aborted by an error before or after processing.
    Failed,
}

impl JobState {
    /// Returns true once the job will not change again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Cancelled | JobState::Failed
        )
    }
}

/// A snapshot of one job's progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    /// The job.
    pub job_id: Uuid,
    /// The run, once prepared.
    pub run_id: Option<Uuid>,
    /// Employees processed, successfully or not.
    pub processed: usize,
    /// Employees in scope.
    pub total: usize,
    /// Employees that failed.
    pub errors: usize,
    /// The employee most recently started.
    pub current_employee: Option<String>,
    /// Job state.
    pub state: JobState,
    /// Why the job failed or was cancelled.
    pub message: Option<String>,
}

impl JobProgress {
    fn queued(job_id: Uuid) -> Self {
        Self {
            job_id,
            run_id: None,
            processed: 0,
            total: 0,
            errors: 0,
            current_employee: None,
            state: JobState::Queued,
            message: None,
        }
    }
}

/// Shared progress of every known job.
#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    jobs: Arc<RwLock<HashMap<Uuid, JobProgress>>>,
}

impl ProgressTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a queued job. A job already known keeps its progress.
    pub async fn register(&self, job_id: Uuid) {
        self.jobs
            .write()
            .await
            .entry(job_id)
            .or_insert_with(|| JobProgress::queued(job_id));
    }

    /// Marks a job running over a prepared run. `done` and `errors` count
    /// employees a previous delivery already handled.
    pub async fn start(&self, job_id: Uuid, run_id: Uuid, total: usize, done: usize, errors: usize) {
        let mut jobs = self.jobs.write().await;
        let progress = jobs
            .entry(job_id)
            .or_insert_with(|| JobProgress::queued(job_id));
        progress.run_id = Some(run_id);
        progress.total = total;
        progress.processed = done;
        progress.errors = errors;
        progress.state = JobState::Running;
    }

    /// Records the employee a unit is starting.
    pub async fn begin_employee(&self, job_id: Uuid, employee_id: &str) {
        if let Some(progress) = self.jobs.write().await.get_mut(&job_id) {
            progress.current_employee = Some(employee_id.to_string());
        }
    }

    /// Records a finished employee.
    pub async fn finish_employee(&self, job_id: Uuid, failed: bool) {
        if let Some(progress) = self.jobs.write().await.get_mut(&job_id) {
            progress.processed += 1;
            if failed {
                progress.errors += 1;
            }
        }
    }

    /// Moves a job to a terminal state.
    pub async fn complete(&self, job_id: Uuid, state: JobState, message: Option<String>) {
        let mut jobs = self.jobs.write().await;
        let progress = jobs
            .entry(job_id)
            .or_insert_with(|| JobProgress::queued(job_id));
        progress.state = state;
        progress.message = message;
        progress.current_employee = None;
    }

    /// The job's progress, if known.
    pub async fn get(&self, job_id: Uuid) -> Option<JobProgress> {
        self.jobs.read().await.get(&job_id).cloned()
    }
}
