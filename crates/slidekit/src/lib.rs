pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod logging;
pub mod model;
pub mod persistence;
pub mod pipeline;
pub mod render;
pub mod results;
pub mod retry;
pub mod sanitize;
pub mod service;
pub mod status;
pub mod storage;
pub mod validate;
pub mod worker;
pub mod xml;

pub use cache::{CacheEntry, ResultCache};
pub use config::{load_config, Config};
pub use error::{
    CacheError, ConfigError, ExtractionError, RenderError, Result, ResultsError, SlidekitError,
    StorageError, WorkerError,
};
pub use extract::{Deck, PptxExtractor, ShapeExtractor};
pub use model::{
    CombinedResult, JobParams, ResultStatus, ShapeKind, ShapeRecord, SlideGeometry,
    SlideRenderResult, ValidationState,
};
pub use persistence::{LocalPersistence, Persistence, PersistenceError};
pub use pipeline::{Orchestrator, PipelineContext, PipelineError};
pub use render::{FallbackPolicy, RenderStrategy, RenderingEngineAdapter};
pub use results::ResultsAssembler;
pub use service::{Service, ServiceComponents, Submission};
pub use status::{JobProgressEvent, JobState, StatusTracker, StatusView};
pub use validate::CoordinateValidator;
pub use worker::{JobQueue, ProcessingJob, QueueMetrics};
