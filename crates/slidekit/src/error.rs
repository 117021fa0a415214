use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SlidekitError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Rendering error: {0}")]
    Render(#[from] RenderError),

    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Results error: {0}")]
    Results(#[from] ResultsError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] crate::persistence::PersistenceError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },
}

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Rendering engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("Session render failed: {0}")]
    Session(#[from] crate::render::bridge::BridgeError),

    #[error("Batch conversion timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("Batch conversion exited with {code:?}: {stderr}")]
    BatchFailed { code: Option<i32>, stderr: String },

    #[error("Rendered {got} of {expected} slides")]
    Incomplete { expected: usize, got: usize },

    #[error("Render IO error for '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("All render strategies failed: {0}")]
    Exhausted(String),
}

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Failed to read document '{path}': {source}")]
    ReadDocument {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Not a valid OOXML package: {0}")]
    Archive(String),

    #[error("Package part missing: {0}")]
    MissingPart(String),

    #[error("Malformed XML in '{part}': {message}")]
    Xml { part: String, message: String },

    #[error("Invalid presentation: {0}")]
    InvalidDocument(String),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode image: {0}")]
    Image(String),

    #[error("Invalid asset reference: {0}")]
    InvalidRef(String),
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache IO error for '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize cache entry: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("Worker channel closed unexpectedly")]
    ChannelClosed,

    #[error("Job not found: {0}")]
    UnknownJob(String),

    #[error("Job {job_id} cannot be retried: {reason}")]
    NotRetryable { job_id: String, reason: String },

    #[error("Session {session_id} cannot take another job: {reason}")]
    SessionBusy { session_id: String, reason: String },

    #[error("Failed to spool upload '{path}': {source}")]
    Spool {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum ResultsError {
    #[error("No results for session {0}")]
    NotFound(String),

    #[error("Failed to load results: {0}")]
    Load(#[from] crate::persistence::PersistenceError),
}

pub type Result<T> = std::result::Result<T, SlidekitError>;
