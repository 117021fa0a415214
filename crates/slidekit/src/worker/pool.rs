use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info};
use serde::Serialize;

use crate::error::WorkerError;
use crate::status::JobState;
use crate::worker::job::{JobOutcome, ProcessingJob};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Runs one job to a terminal state.
pub trait JobHandler: Send + Sync {
    fn handle(&self, job: &ProcessingJob) -> JobOutcome;

    /// Called when `handle` panicked; must leave the job in a terminal state.
    fn on_panic(&self, job: &ProcessingJob, message: &str) -> JobOutcome;
}

/// Point-in-time queue counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueMetrics {
    pub submitted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub queue_depth: usize,
    pub busy_workers: usize,
    pub available_workers: usize,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    busy: AtomicUsize,
}

impl Counters {
    fn record(&self, outcome: &JobOutcome) {
        let counter = match outcome.state {
            JobState::Completed => &self.succeeded,
            JobState::Cancelled => &self.cancelled,
            _ => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// FIFO job queue drained by a fixed set of worker threads.
///
/// Submission never blocks; at most `worker_count` jobs run at once.
pub struct JobQueue {
    sender: Mutex<Option<Sender<ProcessingJob>>>,
    receiver: Receiver<ProcessingJob>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown: Arc<AtomicBool>,
    counters: Arc<Counters>,
    worker_count: usize,
}

impl JobQueue {
    /// # Panics
    /// Panics if `worker_count` is 0.
    pub fn new(handler: Arc<dyn JobHandler>, worker_count: usize) -> Result<Self, WorkerError> {
        assert!(worker_count > 0, "worker_count must be > 0");
        let (sender, receiver) = unbounded::<ProcessingJob>();
        let shutdown = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(Counters::default());

        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let job_rx = receiver.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let worker_counters = Arc::clone(&counters);
            let worker_handler = Arc::clone(&handler);

            let handle = thread::Builder::new()
                .name(format!("slidekit-worker-{}", worker_id))
                .spawn(move || {
                    run_worker(
                        worker_id,
                        job_rx,
                        shutdown_flag,
                        worker_counters,
                        worker_handler,
                    );
                })
                .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;
            workers.push(handle);
        }

        info!("Started {} workers", worker_count);

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            receiver,
            workers: Mutex::new(workers),
            shutdown,
            counters,
            worker_count,
        })
    }

    pub fn submit(&self, job: ProcessingJob) -> Result<(), WorkerError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(WorkerError::ChannelClosed);
        }

        let guard = self.sender.lock().map_err(|_| WorkerError::ChannelClosed)?;
        let sender = guard.as_ref().ok_or(WorkerError::ChannelClosed)?;
        debug!("Queueing job {}", job.job_id);
        sender.send(job).map_err(|_| WorkerError::ChannelClosed)?;
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn metrics(&self) -> QueueMetrics {
        let busy = self.counters.busy.load(Ordering::Relaxed);
        QueueMetrics {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            succeeded: self.counters.succeeded.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            cancelled: self.counters.cancelled.load(Ordering::Relaxed),
            queue_depth: self.receiver.len(),
            busy_workers: busy,
            available_workers: self.worker_count.saturating_sub(busy),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Stops accepting jobs, lets running jobs finish and joins the workers.
    ///
    /// Jobs still waiting in the queue are returned untouched.
    pub fn shutdown(&self) -> Vec<ProcessingJob> {
        info!("Shutting down job queue...");
        self.shutdown.store(true, Ordering::Relaxed);

        // Drop sender to signal workers to exit
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }

        let workers = match self.workers.lock() {
            Ok(mut workers) => std::mem::take(&mut *workers),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for (i, worker) in workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        let pending: Vec<ProcessingJob> = self.receiver.try_iter().collect();
        info!(
            "All workers have stopped ({} queued jobs not started)",
            pending.len()
        );
        pending
    }
}

impl Drop for JobQueue {
    fn drop(&mut self) {
        if !self.is_shutdown() {
            self.shutdown();
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn run_worker(
    worker_id: usize,
    job_receiver: Receiver<ProcessingJob>,
    shutdown: Arc<AtomicBool>,
    counters: Arc<Counters>,
    handler: Arc<dyn JobHandler>,
) {
    debug!("Worker {} started", worker_id);

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        match job_receiver.recv_timeout(POLL_INTERVAL) {
            Ok(job) => {
                debug!("Worker {} processing job {}", worker_id, job.job_id);
                counters.busy.fetch_add(1, Ordering::Relaxed);

                let outcome = match panic::catch_unwind(AssertUnwindSafe(|| handler.handle(&job)))
                {
                    Ok(outcome) => outcome,
                    Err(payload) => {
                        let message = panic_message(payload.as_ref());
                        error!("Worker {} panicked on job {}: {}", worker_id, job.job_id, message);
                        handler.on_panic(&job, &message)
                    }
                };

                counters.record(&outcome);
                counters.busy.fetch_sub(1, Ordering::Relaxed);
                debug!(
                    "Worker {} finished job {} as {}",
                    worker_id, outcome.job_id, outcome.state
                );
            }
            Err(RecvTimeoutError::Timeout) => {
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => {
                debug!("Worker {} job channel disconnected", worker_id);
                break;
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::JobParams;
    use std::path::PathBuf;
    use std::time::Instant;

    struct SleepyHandler {
        delay: Duration,
        running: AtomicUsize,
        peak: AtomicUsize,
        handled: Mutex<Vec<String>>,
    }

    impl SleepyHandler {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                delay,
                running: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                handled: Mutex::new(Vec::new()),
            })
        }
    }

    impl JobHandler for SleepyHandler {
        fn handle(&self, job: &ProcessingJob) -> JobOutcome {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(self.delay);
            self.running.fetch_sub(1, Ordering::SeqCst);

            if job.session_id == "boom" {
                panic!("handler exploded");
            }
            self.handled.lock().unwrap().push(job.job_id.clone());
            if job.session_id == "bad" {
                JobOutcome::failure(job, "bad deck".into())
            } else {
                JobOutcome::completed(job, false)
            }
        }

        fn on_panic(&self, job: &ProcessingJob, message: &str) -> JobOutcome {
            JobOutcome::failure(job, message.to_string())
        }
    }

    fn job(session: &str) -> ProcessingJob {
        ProcessingJob::new(session, PathBuf::from("/tmp/deck.pptx"), JobParams::default())
    }

    fn wait_for(queue: &JobQueue, finished: u64) {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let m = queue.metrics();
            if m.succeeded + m.failed + m.cancelled >= finished {
                return;
            }
            assert!(Instant::now() < deadline, "jobs did not finish: {:?}", m);
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_queue_creation_and_shutdown() {
        let queue = JobQueue::new(SleepyHandler::new(Duration::ZERO), 2).unwrap();
        assert!(!queue.is_shutdown());
        assert_eq!(queue.metrics().available_workers, 2);

        assert!(queue.shutdown().is_empty());
        assert!(queue.is_shutdown());
        assert!(matches!(queue.submit(job("s")), Err(WorkerError::ChannelClosed)));
    }

    #[test]
    fn test_concurrency_is_bounded_by_worker_count() {
        let handler = SleepyHandler::new(Duration::from_millis(50));
        let queue = JobQueue::new(handler.clone(), 2).unwrap();

        for i in 0..6 {
            queue.submit(job(&format!("s{}", i))).unwrap();
        }
        wait_for(&queue, 6);

        assert_eq!(handler.peak.load(Ordering::SeqCst), 2);
        let metrics = queue.metrics();
        assert_eq!(metrics.submitted, 6);
        assert_eq!(metrics.succeeded, 6);
        assert_eq!(metrics.queue_depth, 0);
        queue.shutdown();
    }

    #[test]
    fn test_single_worker_runs_jobs_in_submission_order() {
        let handler = SleepyHandler::new(Duration::ZERO);
        let queue = JobQueue::new(handler.clone(), 1).unwrap();

        let jobs: Vec<_> = (0..4).map(|i| job(&format!("s{}", i))).collect();
        for j in &jobs {
            queue.submit(j.clone()).unwrap();
        }
        wait_for(&queue, 4);

        let expected: Vec<_> = jobs.iter().map(|j| j.job_id.clone()).collect();
        assert_eq!(*handler.handled.lock().unwrap(), expected);
        queue.shutdown();
    }

    #[test]
    fn test_panicking_job_is_failed_and_worker_survives() {
        let handler = SleepyHandler::new(Duration::ZERO);
        let queue = JobQueue::new(handler, 1).unwrap();

        queue.submit(job("boom")).unwrap();
        queue.submit(job("bad")).unwrap();
        queue.submit(job("ok")).unwrap();
        wait_for(&queue, 3);

        let metrics = queue.metrics();
        assert_eq!(metrics.failed, 2);
        assert_eq!(metrics.succeeded, 1);
        queue.shutdown();
    }

    #[test]
    fn test_shutdown_returns_unstarted_jobs() {
        let handler = SleepyHandler::new(Duration::from_millis(200));
        let queue = JobQueue::new(handler, 1).unwrap();

        for i in 0..4 {
            queue.submit(job(&format!("s{}", i))).unwrap();
        }
        thread::sleep(Duration::from_millis(50));

        let pending = queue.shutdown();
        assert_eq!(pending.len(), 3);
        assert_eq!(queue.metrics().succeeded, 1);
    }
}
