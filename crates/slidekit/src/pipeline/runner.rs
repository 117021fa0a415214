use std::sync::Arc;
use std::thread;

use tracing::{debug, error, info, info_span, warn};

use crate::cache::{self, CacheEntry, ResultCache};
use crate::config::Config;
use crate::extract::{Deck, ShapeExtractor};
use crate::model::{CombinedResult, ResultStatus, SlideRenderResult};
use crate::persistence::{AssetKind, Persistence, PersistenceError};
use crate::render::{FallbackPolicy, RenderOutput, RenderingEngineAdapter};
use crate::retry::RetryPolicy;
use crate::sanitize;
use crate::status::{JobState, StatusTracker};
use crate::storage::render_thumbnail;
use crate::validate::CoordinateValidator;
use crate::worker::job::{JobOutcome, ProcessingJob};
use crate::worker::pool::JobHandler;

use super::context::PipelineContext;
use super::error::PipelineError;
use super::progress::{ProgressEvent, ProgressReporter, TrackerProgress};

/// Drives one job through open, render + extract, validate and finalize.
pub struct Orchestrator {
    renderer: RenderingEngineAdapter,
    extractor: Arc<dyn ShapeExtractor>,
    validator: CoordinateValidator,
    cache: Arc<ResultCache>,
    persistence: Arc<dyn Persistence>,
    tracker: Arc<StatusTracker>,
    persist_retry: RetryPolicy,
    thumbnail_width: u32,
}

impl Orchestrator {
    pub fn from_config(
        config: &Config,
        render_policy: FallbackPolicy,
        extractor: Arc<dyn ShapeExtractor>,
        cache: Arc<ResultCache>,
        persistence: Arc<dyn Persistence>,
        tracker: Arc<StatusTracker>,
    ) -> Self {
        Self {
            renderer: RenderingEngineAdapter::new(render_policy, &config.work_dir()),
            extractor,
            validator: CoordinateValidator::new(config.validation.clone()),
            cache,
            persistence,
            tracker,
            persist_retry: config.persistence.retry_policy(),
            thumbnail_width: config.thumbnails.width,
        }
    }

    /// Run the full sequence for a single job.
    /// Returns the outcome together with the final context.
    pub fn run(
        &self,
        mut ctx: PipelineContext,
        progress: &dyn ProgressReporter,
    ) -> (JobOutcome, PipelineContext) {
        let filename = sanitize::redact_path(&ctx.job.source_path);
        let _pipeline_span = info_span!("pipeline",
            job_id = %ctx.job.job_id,
            session_id = %ctx.job.session_id,
            filename = %filename,
        )
        .entered();

        // Step 1: Read source and look up the cache
        {
            let _step = info_span!("cache_lookup").entered();
            if let Err(e) = self.step_read_source(&mut ctx) {
                return self.fail(ctx, progress, e);
            }
            if let Some(entry) = self.lookup_cache(&ctx) {
                if let Err(e) = self.step_reuse_cached(&mut ctx, entry, progress) {
                    return self.fail(ctx, progress, e);
                }
                return self.complete(ctx, progress);
            }
        }

        // Step 2: Open the object model (still queued)
        {
            let _step = info_span!("open_document").entered();
            if let Err(e) = self.step_open_document(&mut ctx) {
                return self.fail(ctx, progress, e);
            }
        }

        // Step 3: Render and extract concurrently
        if let Err(e) = self.step_render_and_extract(&mut ctx, progress) {
            return self.fail(ctx, progress, e);
        }

        // Step 4: Validate coordinates
        {
            let _step = info_span!("validate").entered();
            report_phase(progress, JobState::Validating, "Validating shape coordinates");
            self.step_validate(&mut ctx);
        }

        // Step 5: Persist everything
        {
            let _step = info_span!("finalize").entered();
            report_phase(progress, JobState::Finalizing, "Saving results");
            if let Err(e) = self.step_finalize(&mut ctx) {
                return self.fail(ctx, progress, e);
            }
        }

        self.complete(ctx, progress)
    }

    fn step_read_source(&self, ctx: &mut PipelineContext) -> Result<(), PipelineError> {
        let bytes =
            std::fs::read(&ctx.job.source_path).map_err(|source| PipelineError::ReadSource {
                path: ctx.job.source_path.clone(),
                source,
            })?;
        ctx.cache_key = Some(cache::key_for(&bytes, &ctx.job.params));
        ctx.document = Some(bytes);
        Ok(())
    }

    fn lookup_cache(&self, ctx: &PipelineContext) -> Option<CacheEntry> {
        let key = ctx.cache_key.as_deref()?;
        let entry = self.cache.get(key)?;
        info!(
            "Reusing cached result of session {} ({} slides)",
            entry.result_ref, entry.result.slide_count
        );
        Some(entry)
    }

    /// Stores a cached result under the job's session without any document work.
    fn step_reuse_cached(
        &self,
        ctx: &mut PipelineContext,
        entry: CacheEntry,
        progress: &dyn ProgressReporter,
    ) -> Result<(), PipelineError> {
        report_phase(progress, JobState::Finalizing, "Reusing cached result");
        let result = entry.result.for_session(&ctx.job.session_id);
        let session_id = ctx.job.session_id.as_str();
        let slides = result.render_results();
        let shapes: Vec<_> = result.shapes().cloned().collect();

        self.persist("slide records", || {
            self.persistence.save_slide_records(session_id, &slides)
        })?;
        self.persist("shape records", || {
            self.persistence.save_shape_records(session_id, &shapes)
        })?;
        self.persist("combined result", || {
            self.persistence.save_combined_result(&result)
        })?;

        ctx.slides = slides;
        ctx.shapes = shapes;
        ctx.result = Some(result);
        ctx.from_cache = true;
        Ok(())
    }

    fn step_open_document(&self, ctx: &mut PipelineContext) -> Result<(), PipelineError> {
        let bytes = ctx.document.take().unwrap_or_default();
        let deck = Deck::from_bytes(bytes)?;
        debug!("Opened deck with {} slides", deck.slide_count());
        ctx.deck = Some(deck);
        Ok(())
    }

    fn step_render_and_extract(
        &self,
        ctx: &mut PipelineContext,
        progress: &dyn ProgressReporter,
    ) -> Result<(), PipelineError> {
        let Some(deck) = ctx.deck.as_ref() else {
            return Err(PipelineError::Extraction(
                crate::error::ExtractionError::InvalidDocument("document not opened".into()),
            ));
        };
        let source = ctx.job.source_path.as_path();
        let slide_count = deck.slide_count();

        report_phase(progress, JobState::Rendering, "Rendering slides");
        let (rendered, extracted) = thread::scope(|scope| {
            let render_span = info_span!("render");
            let render = scope.spawn(move || {
                let _step = render_span.entered();
                self.renderer.render(source, slide_count)
            });

            report_phase(progress, JobState::Extracting, "Extracting text shapes");
            let extracted = {
                let _step = info_span!("extract").entered();
                self.extractor.extract(deck)
            };
            (render.join(), extracted)
        });

        // Extraction errors take precedence.
        let shapes = extracted?;
        let render: RenderOutput = rendered
            .map_err(|_| PipelineError::Panicked { stage: "render" })??;

        info!(
            "Rendered {} slides via {}, extracted {} shapes",
            render.slide_count(),
            render.strategy,
            shapes.len()
        );
        ctx.render = Some(render);
        ctx.shapes = shapes;
        Ok(())
    }

    fn step_validate(&self, ctx: &mut PipelineContext) {
        let (Some(deck), Some(render)) = (ctx.deck.as_ref(), ctx.render.as_ref()) else {
            return;
        };
        ctx.validation = self
            .validator
            .validate(&mut ctx.shapes, &render.images, deck.geometry());
    }

    fn step_finalize(&self, ctx: &mut PipelineContext) -> Result<(), PipelineError> {
        let (Some(deck), Some(render)) = (ctx.deck.as_ref(), ctx.render.as_ref()) else {
            return Err(PipelineError::Extraction(
                crate::error::ExtractionError::InvalidDocument("nothing rendered".into()),
            ));
        };
        let session_id = ctx.job.session_id.as_str();
        let geometry = deck.geometry();

        let mut slides = Vec::with_capacity(render.images.len());
        for (&slide_number, path) in &render.images {
            let content = std::fs::read(path).map_err(|source| {
                crate::error::StorageError::ReadFile {
                    path: path.clone(),
                    source,
                }
            })?;
            let image_ref = self.persist("slide image", || {
                self.persistence.save_slide_asset(
                    session_id,
                    slide_number,
                    AssetKind::SlideImage,
                    &content,
                )
            })?;

            let thumbnail_ref = if ctx.job.params.want_thumbnails {
                let slide_shapes: Vec<_> = ctx
                    .shapes
                    .iter()
                    .filter(|s| s.slide_number == slide_number)
                    .collect();
                let png = render_thumbnail(&slide_shapes, geometry, self.thumbnail_width)?;
                Some(self.persist("thumbnail", || {
                    self.persistence.save_slide_asset(
                        session_id,
                        slide_number,
                        AssetKind::Thumbnail,
                        &png,
                    )
                })?)
            } else {
                None
            };

            slides.push(SlideRenderResult {
                slide_number,
                image_ref,
                thumbnail_ref,
                width: geometry.width_px,
                height: geometry.height_px,
            });
        }

        self.persist("slide records", || {
            self.persistence.save_slide_records(session_id, &slides)
        })?;
        self.persist("shape records", || {
            self.persistence.save_shape_records(session_id, &ctx.shapes)
        })?;

        let result =
            CombinedResult::from_parts(session_id, &slides, &ctx.shapes, ResultStatus::Completed);
        self.persist("combined result", || {
            self.persistence.save_combined_result(&result)
        })?;

        ctx.slides = slides;
        ctx.result = Some(result);
        Ok(())
    }

    fn persist<T>(
        &self,
        label: &str,
        mut op: impl FnMut() -> Result<T, PersistenceError>,
    ) -> Result<T, PersistenceError> {
        self.persist_retry.run(
            label,
            |_| op(),
            |e| !matches!(e, PersistenceError::Corrupt { .. }),
        )
    }

    fn complete(
        &self,
        ctx: PipelineContext,
        progress: &dyn ProgressReporter,
    ) -> (JobOutcome, PipelineContext) {
        if let Err(e) = progress.report(ProgressEvent::Completed) {
            return self.fail(ctx, progress, PipelineError::Persistence(e));
        }
        // Only durably completed sessions may be shared through the cache.
        if !ctx.from_cache {
            if let (Some(key), Some(result)) = (ctx.cache_key.as_deref(), ctx.result.as_ref()) {
                if let Err(e) = self.cache.put(key, CacheEntry::new(key, result.clone())) {
                    warn!("Failed to cache result: {}", e);
                }
            }
        }
        info!(
            "Job completed: {} slides, {} shapes{}",
            ctx.slides.len(),
            ctx.shapes.len(),
            if ctx.from_cache { " (cached)" } else { "" }
        );
        let outcome = JobOutcome::completed(&ctx.job, ctx.from_cache);
        (outcome, ctx)
    }

    /// Discards partial work and records the failure.
    fn fail(
        &self,
        mut ctx: PipelineContext,
        progress: &dyn ProgressReporter,
        error: PipelineError,
    ) -> (JobOutcome, PipelineContext) {
        let message = error.to_string();
        error!("Job failed: {}", message);

        // Render temp files go first.
        ctx.render = None;
        let session_id = ctx.job.session_id.clone();
        if let Err(e) = self.persist("discard session", || {
            self.persistence.discard_session(&session_id)
        }) {
            error!("Failed to discard partial results: {}", e);
        }

        if let Err(e) = progress.report(ProgressEvent::Failed {
            error: message.clone(),
        }) {
            error!("Failed to record failure durably: {}", e);
        }
        (JobOutcome::failure(&ctx.job, message), ctx)
    }
}

fn report_phase(progress: &dyn ProgressReporter, state: JobState, message: &str) {
    // Phase updates never touch durable storage.
    let _ = progress.report(ProgressEvent::Phase {
        state,
        message: message.to_string(),
    });
}

/// Deletes a spooled upload once it can no longer be retried.
fn cleanup_source(job: &ProcessingJob, state: JobState) {
    if !job.spooled || state == JobState::Failed {
        return;
    }
    if let Err(e) = std::fs::remove_file(&job.source_path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(
                "Failed to remove spooled source {}: {}",
                sanitize::redact_path(&job.source_path),
                e
            );
        }
    }
}

impl JobHandler for Orchestrator {
    fn handle(&self, job: &ProcessingJob) -> JobOutcome {
        if !self.tracker.try_claim(&job.job_id) {
            debug!("Skipping job {}: no longer queued", job.job_id);
            cleanup_source(job, JobState::Cancelled);
            return JobOutcome::cancelled(job);
        }

        let progress = TrackerProgress::new(Arc::clone(&self.tracker), &job.job_id);
        let (outcome, _ctx) = self.run(PipelineContext::new(job.clone()), &progress);
        cleanup_source(job, outcome.state);
        outcome
    }

    fn on_panic(&self, job: &ProcessingJob, message: &str) -> JobOutcome {
        let error = format!("internal error: {}", message);
        let session_id = job.session_id.clone();
        if let Err(e) = self.persist("discard session", || {
            self.persistence.discard_session(&session_id)
        }) {
            error!("Failed to discard partial results: {}", e);
        }
        if let Err(e) = self
            .tracker
            .finish(&job.job_id, JobState::Failed, Some(error.clone()))
        {
            error!("Failed to record failure durably: {}", e);
        }
        JobOutcome::failure(job, error)
    }
}
