//! Job states and the progress event stream.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// State of a processing job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Rendering,
    Extracting,
    Validating,
    Finalizing,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    /// Progress percentage reported while in this state.
    pub fn progress_pct(&self) -> u8 {
        match self {
            JobState::Queued => 0,
            JobState::Rendering => 10,
            JobState::Extracting => 40,
            JobState::Validating => 60,
            JobState::Finalizing => 80,
            JobState::Completed => 100,
            JobState::Failed | JobState::Cancelled => 100,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }

    /// States in which a job holds a worker and does document work.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            JobState::Rendering | JobState::Extracting | JobState::Validating | JobState::Finalizing
        )
    }

    /// Whether a job may move from `self` to `next`.
    ///
    /// Work stages only move forward, `failed` is reachable from any
    /// non-terminal state and `cancelled` only from `queued`.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            JobState::Failed => true,
            JobState::Cancelled => *self == JobState::Queued,
            JobState::Queued => false,
            _ => next.rank() > self.rank(),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            JobState::Queued => 0,
            JobState::Rendering => 1,
            JobState::Extracting => 2,
            JobState::Validating => 3,
            JobState::Finalizing => 4,
            JobState::Completed => 5,
            JobState::Failed | JobState::Cancelled => 6,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Rendering => "rendering",
            JobState::Extracting => "extracting",
            JobState::Validating => "validating",
            JobState::Finalizing => "finalizing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobState::Queued),
            "rendering" => Some(JobState::Rendering),
            "extracting" => Some(JobState::Extracting),
            "validating" => Some(JobState::Validating),
            "finalizing" => Some(JobState::Finalizing),
            "completed" => Some(JobState::Completed),
            "failed" => Some(JobState::Failed),
            "cancelled" => Some(JobState::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Queued => write!(f, "Queued"),
            JobState::Rendering => write!(f, "Rendering slides"),
            JobState::Extracting => write!(f, "Extracting text"),
            JobState::Validating => write!(f, "Validating coordinates"),
            JobState::Finalizing => write!(f, "Saving results"),
            JobState::Completed => write!(f, "Completed"),
            JobState::Failed => write!(f, "Failed"),
            JobState::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Progress event for a job, broadcast on every status change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgressEvent {
    pub job_id: String,
    pub session_id: String,
    pub state: JobState,
    pub progress_pct: u8,
    pub stage_label: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobProgressEvent {
    pub fn new(job_id: &str, session_id: &str, state: JobState, stage_label: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            session_id: session_id.to_string(),
            state,
            progress_pct: state.progress_pct(),
            stage_label: stage_label.to_string(),
            timestamp: Utc::now(),
            error: None,
        }
    }

    pub fn failed(job_id: &str, session_id: &str, error: &str) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::new(job_id, session_id, JobState::Failed, "Processing failed")
        }
    }
}

/// Fan-out of progress events to any number of subscribers.
#[derive(Clone)]
pub struct JobProgressBroadcaster {
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl JobProgressBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn send(&self, event: JobProgressEvent) {
        // No active receivers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.sender.subscribe()
    }
}

impl Default for JobProgressBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}
