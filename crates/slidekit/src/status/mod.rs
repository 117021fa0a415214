pub mod progress;
pub mod tracker;

pub use progress::{JobProgressBroadcaster, JobProgressEvent, JobState};
pub use tracker::{ProgressRecord, StatusTracker, StatusView};
