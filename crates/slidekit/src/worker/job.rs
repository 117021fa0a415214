use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::model::JobParams;
use crate::status::JobState;

/// A submitted deck waiting for or undergoing processing.
#[derive(Debug, Clone)]
pub struct ProcessingJob {
    pub job_id: String,
    pub session_id: String,
    pub source_path: PathBuf,
    pub params: JobParams,
    /// The source is a private copy in the work directory.
    pub spooled: bool,
    pub created_at: DateTime<Utc>,
}

impl ProcessingJob {
    pub fn new(session_id: &str, source_path: PathBuf, params: JobParams) -> Self {
        Self {
            job_id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            source_path,
            params,
            spooled: false,
            created_at: Utc::now(),
        }
    }

    pub fn spooled(mut self) -> Self {
        self.spooled = true;
        self
    }

    /// A fresh job for the same session and source.
    pub fn retry(&self) -> Self {
        Self {
            job_id: uuid::Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            ..self.clone()
        }
    }

    pub fn filename(&self) -> String {
        file_name_of(&self.source_path)
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// How a job ended.
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    pub job_id: String,
    pub session_id: String,
    pub state: JobState,
    pub error: Option<String>,
    /// Result was served from the cache without rendering or extraction.
    pub from_cache: bool,
}

impl JobOutcome {
    pub fn completed(job: &ProcessingJob, from_cache: bool) -> Self {
        Self {
            job_id: job.job_id.clone(),
            session_id: job.session_id.clone(),
            state: JobState::Completed,
            error: None,
            from_cache,
        }
    }

    pub fn failure(job: &ProcessingJob, error: String) -> Self {
        Self {
            job_id: job.job_id.clone(),
            session_id: job.session_id.clone(),
            state: JobState::Failed,
            error: Some(error),
            from_cache: false,
        }
    }

    pub fn cancelled(job: &ProcessingJob) -> Self {
        Self {
            job_id: job.job_id.clone(),
            session_id: job.session_id.clone(),
            state: JobState::Cancelled,
            error: None,
            from_cache: false,
        }
    }
}
