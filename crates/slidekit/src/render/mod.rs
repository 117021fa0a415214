//! Slide rendering through the external engine.
//!
//! Two strategies produce one SVG per slide: a per-slide session against a
//! long-lived engine, and a one-shot batch conversion. The adapter tries them
//! in order and only accepts a complete, gap-free set of slides.

pub mod batch;
pub mod bridge;
pub mod session;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tracing::{info, info_span, warn};

use crate::config::RendererConfig;
use crate::error::RenderError;

pub use batch::BatchRenderer;
pub use bridge::{BridgeConnector, BridgeError, BridgeSession, TcpBridgeConnector};
pub use session::SessionRenderer;

/// One way of turning a document into per-slide SVG files.
pub trait RenderStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Renders into `out_dir`. The returned map may be incomplete; the
    /// adapter decides whether that is acceptable.
    fn render(
        &self,
        source: &Path,
        slide_count: usize,
        out_dir: &Path,
    ) -> Result<BTreeMap<u32, PathBuf>, RenderError>;
}

pub(crate) fn slide_file_name(slide_number: u32) -> String {
    format!("slide_{}.svg", slide_number)
}

/// Ordered list of strategies; later ones are fallbacks.
#[derive(Clone, Default)]
pub struct FallbackPolicy {
    strategies: Vec<Arc<dyn RenderStrategy>>,
}

impl FallbackPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(mut self, strategy: Arc<dyn RenderStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Session mode first when enabled, batch mode always last.
    pub fn from_config(config: &RendererConfig) -> Self {
        let mut policy = Self::new();
        if config.session_enabled {
            let connector = TcpBridgeConnector::new(
                &config.session_host,
                config.session_port,
                Duration::from_secs(config.request_timeout_secs),
            );
            policy = policy.then(Arc::new(SessionRenderer::new(
                Arc::new(connector),
                config.connect_retry(),
                config.slide_retry(),
            )));
        }
        policy.then(Arc::new(BatchRenderer::new(
            &config.soffice_path,
            Duration::from_secs(config.batch_timeout_secs),
        )))
    }
}

/// Rendered slides of one document. The files live in a temporary
/// directory removed when this value is dropped.
#[derive(Debug)]
pub struct RenderOutput {
    pub dir: TempDir,
    pub images: BTreeMap<u32, PathBuf>,
    /// Strategy that produced the images.
    pub strategy: &'static str,
}

impl RenderOutput {
    pub fn slide_count(&self) -> usize {
        self.images.len()
    }
}

pub struct RenderingEngineAdapter {
    policy: FallbackPolicy,
    work_dir: PathBuf,
}

impl RenderingEngineAdapter {
    pub fn new(policy: FallbackPolicy, work_dir: &Path) -> Self {
        Self {
            policy,
            work_dir: work_dir.to_path_buf(),
        }
    }

    /// Renders all `slide_count` slides of `source`, falling back through the
    /// policy until one strategy yields a complete set.
    pub fn render(&self, source: &Path, slide_count: usize) -> Result<RenderOutput, RenderError> {
        let _span = info_span!("render", slides = slide_count).entered();

        if self.policy.is_empty() {
            return Err(RenderError::EngineUnavailable(
                "no render strategy configured".to_string(),
            ));
        }

        std::fs::create_dir_all(&self.work_dir).map_err(|source| RenderError::Io {
            path: self.work_dir.clone(),
            source,
        })?;
        let dir = tempfile::Builder::new()
            .prefix("render-")
            .tempdir_in(&self.work_dir)
            .map_err(|source| RenderError::Io {
                path: self.work_dir.clone(),
                source,
            })?;

        let mut failures = Vec::new();
        for strategy in &self.policy.strategies {
            let out_dir = dir.path().join(strategy.name());
            std::fs::create_dir_all(&out_dir).map_err(|source| RenderError::Io {
                path: out_dir.clone(),
                source,
            })?;

            let outcome = strategy
                .render(source, slide_count, &out_dir)
                .and_then(|images| check_complete(images, slide_count));

            match outcome {
                Ok(images) => {
                    info!(
                        "Rendered {} slides with {} strategy",
                        images.len(),
                        strategy.name()
                    );
                    return Ok(RenderOutput {
                        dir,
                        images,
                        strategy: strategy.name(),
                    });
                }
                Err(e) => {
                    warn!("{} rendering failed: {}", strategy.name(), e);
                    failures.push(format!("{}: {}", strategy.name(), e));
                }
            }
        }

        Err(RenderError::Exhausted(failures.join("; ")))
    }
}

/// Accepts exactly the slides `1..=slide_count`.
fn check_complete(
    images: BTreeMap<u32, PathBuf>,
    slide_count: usize,
) -> Result<BTreeMap<u32, PathBuf>, RenderError> {
    let complete = images.len() == slide_count
        && images
            .keys()
            .copied()
            .eq(1..=slide_count as u32);
    if complete {
        Ok(images)
    } else {
        Err(RenderError::Incomplete {
            expected: slide_count,
            got: images.len(),
        })
    }
}
