//! Database error types.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Migration failed at version {version}: {reason}")]
    Migration { version: u32, reason: String },

    /// A stored JSON payload could not be encoded or decoded.
    #[error("Corrupt payload in {table}: {source}")]
    Payload {
        table: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Database lock poisoned")]
    LockPoisoned,
}
