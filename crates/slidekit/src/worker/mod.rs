pub mod job;
pub mod pool;

pub use job::{JobOutcome, ProcessingJob};
pub use pool::{JobHandler, JobQueue, QueueMetrics};
