//! Session repository: job outcomes, slide rows, shape rows and the combined
//! result artifact.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};
use crate::model::{ShapeRecord, SlideRenderResult};

/// A raw `job_status` row.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusRow {
    pub job_id: String,
    pub session_id: String,
    pub terminal_status: String,
    pub error_message: Option<String>,
    pub completed_at: Option<String>,
    pub updated_at: String,
}

impl StatusRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            job_id: row.get("job_id")?,
            session_id: row.get("session_id")?,
            terminal_status: row.get("terminal_status")?,
            error_message: row.get("error_message")?,
            completed_at: row.get("completed_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

fn slide_from_row(row: &Row<'_>) -> Result<SlideRenderResult, rusqlite::Error> {
    Ok(SlideRenderResult {
        slide_number: row.get("slide_number")?,
        image_ref: row.get("image_ref")?,
        thumbnail_ref: row.get("thumbnail_ref")?,
        width: row.get("width")?,
        height: row.get("height")?,
    })
}

/// Inserts or replaces the status of a job.
pub fn upsert_status(db: &Database, status: &StatusRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO job_status (job_id, session_id, terminal_status, error_message,
             completed_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(job_id) DO UPDATE SET session_id=?2, terminal_status=?3,
             error_message=?4, completed_at=?5, updated_at=?6",
            params![
                status.job_id,
                status.session_id,
                status.terminal_status,
                status.error_message,
                status.completed_at,
                status.updated_at,
            ],
        )?;
        Ok(())
    })
}

pub fn find_status(db: &Database, job_id: &str) -> Result<Option<StatusRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM job_status WHERE job_id = ?1")?;
        let mut rows = stmt.query_map(params![job_id], StatusRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Most recently updated status recorded for a session.
pub fn find_latest_status_for_session(
    db: &Database,
    session_id: &str,
) -> Result<Option<StatusRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM job_status WHERE session_id = ?1
             ORDER BY updated_at DESC, rowid DESC LIMIT 1",
        )?;
        let mut rows = stmt.query_map(params![session_id], StatusRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Replaces all slide rows of a session.
pub fn replace_slides(
    db: &Database,
    session_id: &str,
    slides: &[SlideRenderResult],
) -> Result<(), DatabaseError> {
    db.with_transaction(|tx| {
        tx.execute("DELETE FROM slides WHERE session_id = ?1", params![session_id])?;
        let mut stmt = tx.prepare(
            "INSERT INTO slides (session_id, slide_number, image_ref, thumbnail_ref, width, height)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for slide in slides {
            stmt.execute(params![
                session_id,
                slide.slide_number,
                slide.image_ref,
                slide.thumbnail_ref,
                slide.width,
                slide.height,
            ])?;
        }
        Ok(())
    })
}

pub fn find_slides(
    db: &Database,
    session_id: &str,
) -> Result<Vec<SlideRenderResult>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn
            .prepare("SELECT * FROM slides WHERE session_id = ?1 ORDER BY slide_number")?;
        let rows = stmt
            .query_map(params![session_id], slide_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Replaces all shape rows of a session. Each shape is stored as JSON next
/// to the columns used for ordering.
pub fn replace_shapes(
    db: &Database,
    session_id: &str,
    shapes: &[ShapeRecord],
) -> Result<(), DatabaseError> {
    let payloads = shapes
        .iter()
        .map(|s| {
            serde_json::to_string(s).map_err(|source| DatabaseError::Payload {
                table: "shapes",
                source,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    db.with_transaction(|tx| {
        tx.execute("DELETE FROM shapes WHERE session_id = ?1", params![session_id])?;
        let mut stmt = tx.prepare(
            "INSERT INTO shapes (session_id, shape_id, slide_number, reading_order,
             validation_state, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for (shape, payload) in shapes.iter().zip(&payloads) {
            stmt.execute(params![
                session_id,
                shape.shape_id,
                shape.slide_number,
                shape.reading_order,
                shape.validation_state.to_string(),
                payload,
            ])?;
        }
        Ok(())
    })
}

pub fn find_shapes(db: &Database, session_id: &str) -> Result<Vec<ShapeRecord>, DatabaseError> {
    let payloads: Vec<String> = db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT payload FROM shapes WHERE session_id = ?1
             ORDER BY slide_number, reading_order, shape_id",
        )?;
        let rows = stmt
            .query_map(params![session_id], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })?;

    payloads
        .iter()
        .map(|p| {
            serde_json::from_str(p).map_err(|source| DatabaseError::Payload {
                table: "shapes",
                source,
            })
        })
        .collect()
}

pub fn upsert_combined(
    db: &Database,
    session_id: &str,
    payload: &str,
    created_at: &str,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO combined_results (session_id, payload, created_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(session_id) DO UPDATE SET payload=?2, created_at=?3",
            params![session_id, payload, created_at],
        )?;
        Ok(())
    })
}

/// Raw JSON of the combined result, if one was stored.
pub fn find_combined(db: &Database, session_id: &str) -> Result<Option<String>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT payload FROM combined_results WHERE session_id = ?1")?;
        let mut rows = stmt.query_map(params![session_id], |r| r.get::<_, String>(0))?;
        match rows.next() {
            Some(Ok(payload)) => Ok(Some(payload)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

pub fn delete_combined(db: &Database, session_id: &str) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "DELETE FROM combined_results WHERE session_id = ?1",
            params![session_id],
        )?;
        Ok(())
    })
}

/// Removes every result row of a session. Status rows are kept.
pub fn delete_session(db: &Database, session_id: &str) -> Result<(), DatabaseError> {
    db.with_transaction(|tx| {
        tx.execute("DELETE FROM shapes WHERE session_id = ?1", params![session_id])?;
        tx.execute("DELETE FROM slides WHERE session_id = ?1", params![session_id])?;
        tx.execute(
            "DELETE FROM combined_results WHERE session_id = ?1",
            params![session_id],
        )?;
        Ok(())
    })
}
