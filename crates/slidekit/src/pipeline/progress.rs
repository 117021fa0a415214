use std::sync::Arc;

use crate::persistence::PersistenceError;
use crate::status::{JobState, StatusTracker};

/// Events emitted by the orchestrator while a job runs.
pub enum ProgressEvent {
    Phase { state: JobState, message: String },
    Completed,
    Failed { error: String },
}

pub trait ProgressReporter: Send + Sync {
    /// Terminal events fail when the durable status could not be written.
    fn report(&self, event: ProgressEvent) -> Result<(), PersistenceError>;
}

/// No-op reporter for unit tests.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: ProgressEvent) -> Result<(), PersistenceError> {
        Ok(())
    }
}

/// Forwards events of one job to the status tracker.
pub struct TrackerProgress {
    tracker: Arc<StatusTracker>,
    job_id: String,
}

impl TrackerProgress {
    pub fn new(tracker: Arc<StatusTracker>, job_id: &str) -> Self {
        Self {
            tracker,
            job_id: job_id.to_string(),
        }
    }
}

impl ProgressReporter for TrackerProgress {
    fn report(&self, event: ProgressEvent) -> Result<(), PersistenceError> {
        match event {
            ProgressEvent::Phase { state, message } => {
                self.tracker.advance(&self.job_id, state, &message);
                Ok(())
            }
            ProgressEvent::Completed => {
                self.tracker
                    .finish(&self.job_id, JobState::Completed, None)
            }
            ProgressEvent::Failed { error } => {
                self.tracker
                    .finish(&self.job_id, JobState::Failed, Some(error))
            }
        }
    }
}
