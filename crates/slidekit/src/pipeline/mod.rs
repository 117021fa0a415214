pub mod context;
pub mod error;
pub mod progress;
pub mod runner;

pub use context::PipelineContext;
pub use error::PipelineError;
pub use progress::{NoopProgress, ProgressEvent, ProgressReporter, TrackerProgress};
pub use runner::Orchestrator;
