//! Background execution of payroll runs.
//!
//! [`RunLocks`] keeps two jobs from running the same planilla and period.
//! [`BatchQueue`] runs jobs on the tokio runtime and reports their
//! [`JobProgress`].

mod locks;
mod progress;
mod queue;

pub use locks::{RunKey, RunLocks};
pub use progress::{JobProgress, JobState, ProgressTracker};
pub use queue::{BatchJob, BatchQueue};
