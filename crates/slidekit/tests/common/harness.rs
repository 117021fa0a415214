//! Test harness for isolated service execution.
//!
//! `TestService` runs a complete `Service` against a temporary data and work
//! directory, with a fake renderer and a counting extractor injected.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use slidekit::cache::ResultCache;
use slidekit::config::Config;
use slidekit::db::Database;
use slidekit::persistence::{LocalPersistence, Persistence};
use slidekit::render::FallbackPolicy;
use slidekit::service::{Service, ServiceComponents};
use slidekit::status::StatusView;
use slidekit::storage::AssetStore;

use super::fakes::{CountingExtractor, MirrorRenderer};

const WAIT_TIMEOUT: Duration = Duration::from_secs(20);

/// Fields drop in order: the service stops before its directories go.
pub struct TestService {
    pub service: Service,
    pub config: Config,
    pub db: Database,
    pub persistence: Arc<LocalPersistence>,
    pub renderer: Arc<MirrorRenderer>,
    pub extractor: Arc<CountingExtractor>,
    temp_dir: TempDir,
}

impl TestService {
    /// A service with `workers` workers rendering through a `MirrorRenderer`.
    pub fn new(workers: usize) -> Self {
        Self::with_renderer(workers, MirrorRenderer::new())
    }

    pub fn with_renderer(workers: usize, renderer: MirrorRenderer) -> Self {
        Self::build(workers, renderer, |renderer| FallbackPolicy::new().then(renderer))
    }

    /// Lets the caller put other strategies in front of the mirror renderer.
    pub fn build(
        workers: usize,
        renderer: MirrorRenderer,
        policy: impl FnOnce(Arc<MirrorRenderer>) -> FallbackPolicy,
    ) -> Self {
        Self::build_with(workers, renderer, policy, |local| -> Arc<dyn Persistence> { local })
    }

    /// Lets the caller wrap the local persistence the service writes through.
    /// `persistence` still points at the unwrapped store.
    pub fn with_persistence(
        workers: usize,
        wrap: impl FnOnce(Arc<LocalPersistence>) -> Arc<dyn Persistence>,
    ) -> Self {
        Self::build_with(
            workers,
            MirrorRenderer::new(),
            |renderer| FallbackPolicy::new().then(renderer),
            wrap,
        )
    }

    fn build_with(
        workers: usize,
        renderer: MirrorRenderer,
        policy: impl FnOnce(Arc<MirrorRenderer>) -> FallbackPolicy,
        wrap: impl FnOnce(Arc<LocalPersistence>) -> Arc<dyn Persistence>,
    ) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let mut config = Config::default_for(temp_dir.path());
        config.worker_count = workers;
        config.persistence.initial_backoff_ms = 1;

        let db = Database::open(&config.database_path()).expect("Failed to open database");
        let persistence = Arc::new(LocalPersistence::new(
            db.clone(),
            AssetStore::new(config.assets_dir()),
        ));
        let renderer = Arc::new(renderer);
        let extractor = Arc::new(CountingExtractor::default());

        let components = ServiceComponents {
            persistence: wrap(persistence.clone()),
            render_policy: policy(renderer.clone()),
            extractor: extractor.clone(),
            cache: Arc::new(ResultCache::new(&config.cache, &config.cache_dir())),
        };
        let service =
            Service::with_components(config.clone(), components).expect("Failed to start service");

        Self {
            service,
            config,
            db,
            persistence,
            renderer,
            extractor,
            temp_dir,
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }

    /// Writes deck bytes into the temp directory and returns their path.
    pub fn write_deck(&self, name: &str, bytes: &[u8]) -> PathBuf {
        let path = self.path(name);
        std::fs::write(&path, bytes).expect("Failed to write deck");
        path
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.config.work_dir().join("uploads")
    }

    /// Polls until the job reaches a terminal state.
    pub fn wait_for(&self, job_id: &str) -> StatusView {
        let deadline = Instant::now() + WAIT_TIMEOUT;
        loop {
            if let Some(status) = self.service.get_status(job_id) {
                if status.state.is_terminal() {
                    return status;
                }
            }
            assert!(Instant::now() < deadline, "job {} did not finish", job_id);
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}
