//! Entry point tying the queue, orchestrator, status tracker and result
//! assembly together.

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use log::{info, warn};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::cache::ResultCache;
use crate::config::Config;
use crate::db::Database;
use crate::error::{Result, StorageError, WorkerError};
use crate::extract::{PptxExtractor, ShapeExtractor};
use crate::model::{CombinedResult, JobParams};
use crate::persistence::{LocalPersistence, Persistence};
use crate::pipeline::Orchestrator;
use crate::render::FallbackPolicy;
use crate::results::ResultsAssembler;
use crate::status::{JobProgressBroadcaster, JobProgressEvent, JobState, StatusTracker, StatusView};
use crate::storage::AssetStore;
use crate::worker::{JobQueue, ProcessingJob, QueueMetrics};

const UPLOADS_DIR: &str = "uploads";

/// Collaborators the service is built from.
pub struct ServiceComponents {
    pub persistence: Arc<dyn Persistence>,
    pub render_policy: FallbackPolicy,
    pub extractor: Arc<dyn ShapeExtractor>,
    pub cache: Arc<ResultCache>,
}

impl ServiceComponents {
    /// Production wiring: SQLite + filesystem persistence, session then batch
    /// rendering, and the configured cache.
    pub fn from_config(config: &Config) -> Result<Self> {
        let db = Database::open(&config.database_path())?;
        let persistence = LocalPersistence::new(db, AssetStore::new(config.assets_dir()));
        Ok(Self {
            persistence: Arc::new(persistence),
            render_policy: FallbackPolicy::from_config(&config.renderer),
            extractor: Arc::new(PptxExtractor::new()),
            cache: Arc::new(ResultCache::new(&config.cache, &config.cache_dir())),
        })
    }
}

/// Identifiers handed back for an accepted job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Submission {
    pub job_id: String,
    pub session_id: String,
}

/// A submitted job kept around while it may still need a retry.
struct RetainedJob {
    job: ProcessingJob,
    failed: bool,
}

pub struct Service {
    tracker: Arc<StatusTracker>,
    queue: JobQueue,
    assembler: ResultsAssembler,
    cache: Arc<ResultCache>,
    jobs: RwLock<HashMap<String, RetainedJob>>,
    spool_dir: PathBuf,
}

impl Service {
    pub fn start(config: Config) -> Result<Self> {
        let components = ServiceComponents::from_config(&config)?;
        Self::with_components(config, components)
    }

    pub fn with_components(config: Config, components: ServiceComponents) -> Result<Self> {
        let spool_dir = config.work_dir().join(UPLOADS_DIR);
        std::fs::create_dir_all(&spool_dir).map_err(|source| StorageError::CreateDirectory {
            path: spool_dir.clone(),
            source,
        })?;

        let tracker = Arc::new(StatusTracker::new(
            Arc::clone(&components.persistence),
            JobProgressBroadcaster::default(),
            config.persistence.retry_policy(),
        ));
        let orchestrator = Orchestrator::from_config(
            &config,
            components.render_policy,
            components.extractor,
            Arc::clone(&components.cache),
            Arc::clone(&components.persistence),
            Arc::clone(&tracker),
        );
        let queue = JobQueue::new(Arc::new(orchestrator), config.worker_count)?;

        info!(
            "Service started with {} workers, data in {}",
            config.worker_count,
            config.data_dir().display()
        );

        Ok(Self {
            tracker,
            queue,
            assembler: ResultsAssembler::new(components.persistence),
            cache: components.cache,
            jobs: RwLock::new(HashMap::new()),
            spool_dir,
        })
    }

    /// Queues a deck already on disk. The file must stay in place until the
    /// job is terminal.
    ///
    /// A session takes one job at a time and is closed once it has complete
    /// results; submissions to a busy or finished session are rejected.
    pub fn submit_path(
        &self,
        path: &Path,
        session_id: Option<&str>,
        params: JobParams,
    ) -> Result<Submission> {
        let session_id = session_id
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        self.enqueue(ProcessingJob::new(&session_id, path.to_path_buf(), params))
    }

    /// Copies the deck into the work directory and queues the copy. The copy
    /// is removed once the job completes or is cancelled.
    pub fn submit_reader<R: Read>(
        &self,
        reader: &mut R,
        filename: &str,
        session_id: Option<&str>,
        params: JobParams,
    ) -> Result<Submission> {
        let path = self.spool(reader, filename)?;
        let session_id = session_id
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        self.enqueue(ProcessingJob::new(&session_id, path.clone(), params).spooled())
            .map_err(|e| {
                if let Err(remove) = std::fs::remove_file(&path) {
                    warn!("Failed to remove rejected upload: {}", remove);
                }
                e
            })
    }

    fn spool<R: Read>(&self, reader: &mut R, filename: &str) -> Result<PathBuf> {
        let name = Path::new(filename)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "upload.pptx".to_string());
        let path = self
            .spool_dir
            .join(format!("{}-{}", uuid::Uuid::new_v4(), name));

        let spool_error = |source| WorkerError::Spool {
            path: path.clone(),
            source,
        };
        let mut file = std::fs::File::create(&path).map_err(spool_error)?;
        if let Err(source) = std::io::copy(reader, &mut file) {
            drop(file);
            let _ = std::fs::remove_file(&path);
            return Err(spool_error(source).into());
        }
        Ok(path)
    }

    fn enqueue(&self, job: ProcessingJob) -> Result<Submission> {
        let submission = Submission {
            job_id: job.job_id.clone(),
            session_id: job.session_id.clone(),
        };

        // Registered first so a worker can always claim it.
        self.tracker.register_exclusive(&job.job_id, &job.session_id)?;
        self.prune_jobs();
        self.jobs_write().insert(
            job.job_id.clone(),
            RetainedJob {
                job: job.clone(),
                failed: false,
            },
        );

        if let Err(e) = self.queue.submit(job) {
            self.jobs_write().remove(&submission.job_id);
            if let Err(persist) = self.tracker.finish(
                &submission.job_id,
                JobState::Failed,
                Some("service is shutting down".to_string()),
            ) {
                warn!("Job {}: {}", submission.job_id, persist);
            }
            return Err(e.into());
        }
        Ok(submission)
    }

    fn jobs_write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, RetainedJob>> {
        self.jobs.write().unwrap_or_else(|poisoned| {
            warn!("Job registry lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Drops finished jobs, keeping failed ones whose source is still there.
    fn prune_jobs(&self) {
        self.jobs_write().retain(|job_id, retained| {
            if !retained.failed {
                let state = match self.tracker.record(job_id) {
                    Some(record) if !record.state.is_terminal() => return true,
                    Some(record) => Some(record.state),
                    None => self.tracker.get_status(job_id).map(|s| s.state),
                };
                retained.failed = state == Some(JobState::Failed);
            }
            retained.failed && retained.job.source_path.is_file()
        });
    }

    /// Number of jobs the service still holds for processing or retry.
    pub fn retained_jobs(&self) -> usize {
        self.prune_jobs();
        self.jobs
            .read()
            .unwrap_or_else(|poisoned| {
                warn!("Job registry lock poisoned, recovering");
                poisoned.into_inner()
            })
            .len()
    }

    pub fn get_status(&self, job_id: &str) -> Option<StatusView> {
        self.tracker.get_status(job_id)
    }

    /// Cancels a job no worker has started yet.
    pub fn cancel(&self, job_id: &str) -> bool {
        let cancelled = self.tracker.cancel_if_queued(job_id);
        if cancelled {
            info!("Job {} cancelled", job_id);
        }
        cancelled
    }

    /// Queues a failed job again under a new job id and the same session.
    /// The failed job is superseded and cannot be retried a second time.
    pub fn retry(&self, job_id: &str) -> Result<Submission> {
        let not_retryable = |reason: String| WorkerError::NotRetryable {
            job_id: job_id.to_string(),
            reason,
        };

        let Some(state) = self.tracker.get_status(job_id).map(|s| s.state) else {
            return Err(WorkerError::UnknownJob(job_id.to_string()).into());
        };
        if state != JobState::Failed {
            return Err(not_retryable(format!("job is {}", state)).into());
        }

        let job = {
            let mut jobs = self.jobs_write();
            match jobs.remove(job_id) {
                Some(retained) if retained.job.source_path.is_file() => retained.job,
                Some(_) => {
                    return Err(not_retryable("source is no longer available".to_string()).into())
                }
                None => {
                    return Err(not_retryable("job was already retried".to_string()).into())
                }
            }
        };

        info!("Retrying job {} for session {}", job_id, job.session_id);
        match self.enqueue(job.retry()) {
            Ok(submission) => Ok(submission),
            Err(e) => {
                self.jobs_write()
                    .insert(job.job_id.clone(), RetainedJob { job, failed: true });
                Err(e)
            }
        }
    }

    pub fn fetch_results(&self, session_id: &str) -> Result<CombinedResult> {
        Ok(self.assembler.fetch(session_id)?)
    }

    pub fn metrics(&self) -> QueueMetrics {
        self.queue.metrics()
    }

    /// Stream of every status change.
    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.tracker.broadcaster().subscribe()
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// Finishes running jobs, cancels queued ones and stops the workers.
    pub fn shutdown(&self) {
        for job in self.queue.shutdown() {
            self.tracker.cancel_if_queued(&job.job_id);
            if job.spooled {
                let _ = std::fs::remove_file(&job.source_path);
            }
        }
        info!("Service stopped");
    }
}

impl Drop for Service {
    fn drop(&mut self) {
        if !self.queue.is_shutdown() {
            self.shutdown();
        }
    }
}
