//! Boundary to durable storage of session results.
//!
//! The orchestrator, the status tracker and the results assembler only see
//! the [`Persistence`] trait. [`LocalPersistence`] keeps rows in SQLite and
//! assets on the local filesystem.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::session_repo::{self, StatusRow};
use crate::db::{Database, DatabaseError};
use crate::error::StorageError;
use crate::model::{CombinedResult, ShapeRecord, SlideRenderResult};
use crate::status::JobState;
use crate::storage::AssetStore;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Asset storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Stored result for session {session_id} is unreadable: {message}")]
    Corrupt { session_id: String, message: String },

    #[error("Persistence unavailable: {0}")]
    Unavailable(String),
}

/// Kind of per-slide asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    SlideImage,
    Thumbnail,
}

impl AssetKind {
    pub fn directory(&self) -> &'static str {
        match self {
            AssetKind::SlideImage => "slides",
            AssetKind::Thumbnail => "thumbnails",
        }
    }

    pub fn file_name(&self, slide_number: u32) -> String {
        match self {
            AssetKind::SlideImage => format!("slide_{}.svg", slide_number),
            AssetKind::Thumbnail => format!("slide_{}.png", slide_number),
        }
    }
}

/// Durable outcome of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DurableStatus {
    pub job_id: String,
    pub session_id: String,
    pub terminal_status: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl DurableStatus {
    pub fn new(job_id: &str, session_id: &str, state: JobState, error: Option<String>) -> Self {
        Self {
            job_id: job_id.to_string(),
            session_id: session_id.to_string(),
            terminal_status: state,
            error_message: error,
            completed_at: state.is_terminal().then(Utc::now),
        }
    }

    fn to_row(&self) -> StatusRow {
        StatusRow {
            job_id: self.job_id.clone(),
            session_id: self.session_id.clone(),
            terminal_status: self.terminal_status.as_str().to_string(),
            error_message: self.error_message.clone(),
            completed_at: self.completed_at.map(|t| t.to_rfc3339()),
            updated_at: Utc::now().to_rfc3339(),
        }
    }

    fn from_row(row: StatusRow) -> Self {
        let terminal_status = JobState::parse(&row.terminal_status).unwrap_or_else(|| {
            log::warn!(
                "Unknown status '{}' for job {}, treating as failed",
                row.terminal_status,
                row.job_id
            );
            JobState::Failed
        });
        let completed_at = row.completed_at.as_deref().and_then(|s| {
            DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| log::warn!("Bad completed_at '{}' for job {}: {}", s, row.job_id, e))
                .ok()
        });
        Self {
            job_id: row.job_id,
            session_id: row.session_id,
            terminal_status,
            error_message: row.error_message,
            completed_at,
        }
    }
}

/// Durable store for everything a finished job produces.
///
/// Every call may fail transiently; callers retry with backoff.
pub trait Persistence: Send + Sync {
    /// Stores a slide asset and returns its ref.
    fn save_slide_asset(
        &self,
        session_id: &str,
        slide_number: u32,
        kind: AssetKind,
        content: &[u8],
    ) -> Result<String, PersistenceError>;

    fn save_slide_records(
        &self,
        session_id: &str,
        slides: &[SlideRenderResult],
    ) -> Result<(), PersistenceError>;

    fn save_shape_records(
        &self,
        session_id: &str,
        shapes: &[ShapeRecord],
    ) -> Result<(), PersistenceError>;

    fn save_combined_result(&self, result: &CombinedResult) -> Result<(), PersistenceError>;

    fn update_durable_status(&self, status: &DurableStatus) -> Result<(), PersistenceError>;

    /// The stored combined result. Unreadable payloads are an error.
    fn load_combined_result(
        &self,
        session_id: &str,
    ) -> Result<Option<CombinedResult>, PersistenceError>;

    fn load_slide_records(
        &self,
        session_id: &str,
    ) -> Result<Vec<SlideRenderResult>, PersistenceError>;

    fn load_shape_records(&self, session_id: &str) -> Result<Vec<ShapeRecord>, PersistenceError>;

    fn load_durable_status(&self, job_id: &str) -> Result<Option<DurableStatus>, PersistenceError>;

    /// Latest durable status recorded for any job of the session.
    fn load_session_status(
        &self,
        session_id: &str,
    ) -> Result<Option<DurableStatus>, PersistenceError>;

    /// Deletes all rows and assets of a session. Durable status is kept.
    fn discard_session(&self, session_id: &str) -> Result<(), PersistenceError>;
}

pub struct LocalPersistence {
    db: Database,
    assets: AssetStore,
}

impl LocalPersistence {
    pub fn new(db: Database, assets: AssetStore) -> Self {
        Self { db, assets }
    }

    pub fn assets(&self) -> &AssetStore {
        &self.assets
    }
}

impl Persistence for LocalPersistence {
    fn save_slide_asset(
        &self,
        session_id: &str,
        slide_number: u32,
        kind: AssetKind,
        content: &[u8],
    ) -> Result<String, PersistenceError> {
        Ok(self.assets.store(
            session_id,
            kind.directory(),
            &kind.file_name(slide_number),
            content,
        )?)
    }

    fn save_slide_records(
        &self,
        session_id: &str,
        slides: &[SlideRenderResult],
    ) -> Result<(), PersistenceError> {
        Ok(session_repo::replace_slides(&self.db, session_id, slides)?)
    }

    fn save_shape_records(
        &self,
        session_id: &str,
        shapes: &[ShapeRecord],
    ) -> Result<(), PersistenceError> {
        Ok(session_repo::replace_shapes(&self.db, session_id, shapes)?)
    }

    fn save_combined_result(&self, result: &CombinedResult) -> Result<(), PersistenceError> {
        let payload =
            serde_json::to_string(result).map_err(|source| DatabaseError::Payload {
                table: "combined_results",
                source,
            })?;
        Ok(session_repo::upsert_combined(
            &self.db,
            &result.session_id,
            &payload,
            &Utc::now().to_rfc3339(),
        )?)
    }

    fn update_durable_status(&self, status: &DurableStatus) -> Result<(), PersistenceError> {
        Ok(session_repo::upsert_status(&self.db, &status.to_row())?)
    }

    fn load_combined_result(
        &self,
        session_id: &str,
    ) -> Result<Option<CombinedResult>, PersistenceError> {
        let Some(payload) = session_repo::find_combined(&self.db, session_id)? else {
            return Ok(None);
        };
        serde_json::from_str(&payload)
            .map(Some)
            .map_err(|e| PersistenceError::Corrupt {
                session_id: session_id.to_string(),
                message: e.to_string(),
            })
    }

    fn load_slide_records(
        &self,
        session_id: &str,
    ) -> Result<Vec<SlideRenderResult>, PersistenceError> {
        Ok(session_repo::find_slides(&self.db, session_id)?)
    }

    fn load_shape_records(&self, session_id: &str) -> Result<Vec<ShapeRecord>, PersistenceError> {
        Ok(session_repo::find_shapes(&self.db, session_id)?)
    }

    fn load_durable_status(&self, job_id: &str) -> Result<Option<DurableStatus>, PersistenceError> {
        Ok(session_repo::find_status(&self.db, job_id)?.map(DurableStatus::from_row))
    }

    fn load_session_status(
        &self,
        session_id: &str,
    ) -> Result<Option<DurableStatus>, PersistenceError> {
        Ok(session_repo::find_latest_status_for_session(&self.db, session_id)?
            .map(DurableStatus::from_row))
    }

    fn discard_session(&self, session_id: &str) -> Result<(), PersistenceError> {
        session_repo::delete_session(&self.db, session_id)?;
        self.assets.remove_session(session_id)?;
        Ok(())
    }
}
