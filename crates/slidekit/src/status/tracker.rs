//! Ephemeral and durable job status.
//!
//! The ephemeral projection lives in memory and follows every state change;
//! the durable projection is written through [`Persistence`] once a job
//! reaches a terminal state. Status queries prefer the ephemeral record and
//! fall back to the durable one, e.g. after a restart.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::WorkerError;
use crate::persistence::{DurableStatus, Persistence, PersistenceError};
use crate::retry::RetryPolicy;

use super::progress::{JobProgressBroadcaster, JobProgressEvent, JobState};

/// In-memory status of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub job_id: String,
    pub session_id: String,
    pub state: JobState,
    pub progress_pct: u8,
    pub stage_label: String,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// What a status poll returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusView {
    pub job_id: String,
    pub session_id: String,
    pub state: JobState,
    pub progress_pct: u8,
    pub stage_label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminal_status: Option<JobState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&ProgressRecord> for StatusView {
    fn from(record: &ProgressRecord) -> Self {
        Self {
            job_id: record.job_id.clone(),
            session_id: record.session_id.clone(),
            state: record.state,
            progress_pct: record.progress_pct,
            stage_label: record.stage_label.clone(),
            terminal_status: record.state.is_terminal().then_some(record.state),
            error: record.error.clone(),
        }
    }
}

impl From<DurableStatus> for StatusView {
    fn from(status: DurableStatus) -> Self {
        Self {
            job_id: status.job_id,
            session_id: status.session_id,
            state: status.terminal_status,
            progress_pct: status.terminal_status.progress_pct(),
            stage_label: status.terminal_status.to_string(),
            terminal_status: Some(status.terminal_status),
            error: status.error_message,
        }
    }
}

struct Entry {
    record: ProgressRecord,
    /// Set once a worker picked the job up; claimed jobs cannot be cancelled.
    claimed: bool,
}

pub struct StatusTracker {
    entries: RwLock<HashMap<String, Entry>>,
    broadcaster: JobProgressBroadcaster,
    persistence: Arc<dyn Persistence>,
    retry: RetryPolicy,
}

impl StatusTracker {
    pub fn new(
        persistence: Arc<dyn Persistence>,
        broadcaster: JobProgressBroadcaster,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            broadcaster,
            persistence,
            retry,
        }
    }

    pub fn broadcaster(&self) -> &JobProgressBroadcaster {
        &self.broadcaster
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Entry>> {
        self.entries.read().unwrap_or_else(|poisoned| {
            log::warn!("Status lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Entry>> {
        self.entries.write().unwrap_or_else(|poisoned| {
            log::warn!("Status lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Records a newly submitted job as queued.
    pub fn register(&self, job_id: &str, session_id: &str) {
        let event = Self::insert_queued(&mut self.write(), job_id, session_id);
        self.broadcaster.send(event);
    }

    /// Records a job as queued unless its session already has a job in
    /// progress or a completed result.
    pub fn register_exclusive(&self, job_id: &str, session_id: &str) -> Result<(), WorkerError> {
        let busy = |reason: String| WorkerError::SessionBusy {
            session_id: session_id.to_string(),
            reason,
        };

        let event = {
            let mut entries = self.write();
            if let Some(other) = entries.values().find(|e| {
                e.record.session_id == session_id
                    && !matches!(e.record.state, JobState::Failed | JobState::Cancelled)
            }) {
                return Err(busy(format!(
                    "job {} is {}",
                    other.record.job_id, other.record.state
                )));
            }
            // Completed jobs leave memory only after their durable write.
            match self.persistence.load_session_status(session_id) {
                Ok(Some(status)) if status.terminal_status == JobState::Completed => {
                    return Err(busy("results are already complete".to_string()));
                }
                Ok(_) => {}
                Err(e) => log::warn!("Session {}: durable status unavailable: {}", session_id, e),
            }
            Self::insert_queued(&mut entries, job_id, session_id)
        };
        self.broadcaster.send(event);
        Ok(())
    }

    fn insert_queued(
        entries: &mut HashMap<String, Entry>,
        job_id: &str,
        session_id: &str,
    ) -> JobProgressEvent {
        let record = ProgressRecord {
            job_id: job_id.to_string(),
            session_id: session_id.to_string(),
            state: JobState::Queued,
            progress_pct: 0,
            stage_label: JobState::Queued.to_string(),
            updated_at: Utc::now(),
            error: None,
        };
        entries.insert(
            job_id.to_string(),
            Entry {
                record,
                claimed: false,
            },
        );
        JobProgressEvent::new(
            job_id,
            session_id,
            JobState::Queued,
            "Job queued for processing",
        )
    }

    /// Marks a queued job as picked up by a worker. Returns false when the
    /// job is unknown, no longer queued, or already claimed.
    pub fn try_claim(&self, job_id: &str) -> bool {
        let mut entries = self.write();
        match entries.get_mut(job_id) {
            Some(entry) if entry.record.state == JobState::Queued && !entry.claimed => {
                entry.claimed = true;
                entry.record.stage_label = "Opening document".to_string();
                entry.record.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }

    /// Moves a job to a non-terminal state. Invalid transitions are ignored
    /// and reported as false.
    pub fn advance(&self, job_id: &str, state: JobState, stage_label: &str) -> bool {
        debug_assert!(!state.is_terminal());
        let event = {
            let mut entries = self.write();
            let Some(entry) = entries.get_mut(job_id) else {
                return false;
            };
            if !entry.record.state.can_transition_to(state) {
                log::warn!(
                    "Job {}: ignoring transition {} -> {}",
                    job_id,
                    entry.record.state.as_str(),
                    state.as_str()
                );
                return false;
            }
            entry.record.state = state;
            entry.record.progress_pct = state.progress_pct();
            entry.record.stage_label = stage_label.to_string();
            entry.record.updated_at = Utc::now();
            JobProgressEvent::new(job_id, &entry.record.session_id, state, stage_label)
        };
        self.broadcaster.send(event);
        true
    }

    /// Moves a job to a terminal state in both projections.
    ///
    /// A completion only becomes visible once it is stored durably; if that
    /// write fails the job keeps its current state and the error is returned.
    /// Failures and cancellations always update the ephemeral record. Once
    /// the durable write succeeded the ephemeral record is dropped and
    /// status queries are served from durable storage.
    pub fn finish(
        &self,
        job_id: &str,
        state: JobState,
        error: Option<String>,
    ) -> Result<(), PersistenceError> {
        debug_assert!(state.is_terminal());
        let session_id = {
            let entries = self.read();
            let Some(entry) = entries.get(job_id) else {
                log::warn!("Job {}: finish on unknown job", job_id);
                return Ok(());
            };
            if !entry.record.state.can_transition_to(state) {
                log::warn!(
                    "Job {}: already {}, not moving to {}",
                    job_id,
                    entry.record.state.as_str(),
                    state.as_str()
                );
                return Ok(());
            }
            entry.record.session_id.clone()
        };

        let durable = DurableStatus::new(job_id, &session_id, state, error.clone());
        let written = self.retry.run(
            "durable status",
            |_| self.persistence.update_durable_status(&durable),
            |_| true,
        );
        if state == JobState::Completed && written.is_err() {
            return written;
        }

        self.apply_terminal(job_id, state, error, written.is_ok());
        written
    }

    fn apply_terminal(&self, job_id: &str, state: JobState, error: Option<String>, evict: bool) {
        let event = {
            let mut entries = self.write();
            let Some(entry) = entries.get_mut(job_id) else {
                return;
            };
            if !entry.record.state.can_transition_to(state) {
                return;
            }
            entry.record.state = state;
            entry.record.progress_pct = state.progress_pct();
            entry.record.stage_label = state.to_string();
            entry.record.updated_at = Utc::now();
            entry.record.error = error.clone();

            let session_id = entry.record.session_id.as_str();
            let event = match (state, &error) {
                (JobState::Failed, Some(message)) => {
                    JobProgressEvent::failed(job_id, session_id, message)
                }
                _ => JobProgressEvent::new(job_id, session_id, state, &state.to_string()),
            };
            if evict {
                entries.remove(job_id);
            }
            event
        };
        self.broadcaster.send(event);
    }

    /// Cancels a job that no worker has picked up yet.
    pub fn cancel_if_queued(&self, job_id: &str) -> bool {
        {
            let mut entries = self.write();
            match entries.get_mut(job_id) {
                // Reserved so no worker can claim it in the meantime.
                Some(entry) if entry.record.state == JobState::Queued && !entry.claimed => {
                    entry.claimed = true;
                }
                _ => return false,
            }
        }
        if let Err(e) = self.finish(job_id, JobState::Cancelled, None) {
            log::error!("Job {}: failed to record cancellation: {}", job_id, e);
        }
        true
    }

    /// Current status, from memory or, failing that, durable storage.
    pub fn get_status(&self, job_id: &str) -> Option<StatusView> {
        if let Some(entry) = self.read().get(job_id) {
            return Some(StatusView::from(&entry.record));
        }
        match self.persistence.load_durable_status(job_id) {
            Ok(status) => status.map(StatusView::from),
            Err(e) => {
                log::warn!("Job {}: durable status unavailable: {}", job_id, e);
                None
            }
        }
    }

    pub fn record(&self, job_id: &str) -> Option<ProgressRecord> {
        self.read().get(job_id).map(|e| e.record.clone())
    }

    /// Number of jobs currently doing document work.
    pub fn active_count(&self) -> usize {
        self.read()
            .values()
            .filter(|e| e.record.state.is_active())
            .count()
    }
}
