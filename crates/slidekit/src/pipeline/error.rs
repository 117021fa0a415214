use std::path::PathBuf;

use thiserror::Error;

use crate::error::{ExtractionError, RenderError, StorageError};
use crate::persistence::PersistenceError;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Failed to read source '{path}': {source}")]
    ReadSource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Rendering failed: {0}")]
    Render(#[from] RenderError),

    #[error("Saving results failed: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Preparing slide assets failed: {0}")]
    Storage(#[from] StorageError),

    #[error("{stage} thread panicked")]
    Panicked { stage: &'static str },
}
