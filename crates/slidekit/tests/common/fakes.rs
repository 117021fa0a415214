//! Fake collaborators implementing the public traits, with call counters.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use slidekit::error::{ExtractionError, RenderError};
use slidekit::extract::{Deck, PptxExtractor, ShapeExtractor};
use slidekit::model::{CombinedResult, ShapeRecord, SlideRenderResult};
use slidekit::persistence::{
    AssetKind, DurableStatus, LocalPersistence, Persistence, PersistenceError,
};
use slidekit::status::JobState;
use slidekit::render::{BridgeConnector, BridgeError, BridgeSession, RenderStrategy};

use super::builders::SvgBuilder;

/// Renders each slide by drawing the deck's own text boxes into an SVG, the
/// way a faithful engine would.
pub struct MirrorRenderer {
    name: &'static str,
    delay: Duration,
    /// Text written instead of the real shape text.
    replace_text: Option<String>,
    pub calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub peak: AtomicUsize,
}

impl MirrorRenderer {
    pub fn new() -> Self {
        Self::named("mirror")
    }

    pub fn named(name: &'static str) -> Self {
        Self {
            name,
            delay: Duration::ZERO,
            replace_text: None,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_text(mut self, text: &str) -> Self {
        self.replace_text = Some(text.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn draw(
        &self,
        source: &Path,
        slide_count: usize,
        out_dir: &Path,
    ) -> Result<BTreeMap<u32, PathBuf>, RenderError> {
        let deck =
            Deck::open(source).map_err(|e| RenderError::EngineUnavailable(e.to_string()))?;
        let shapes = PptxExtractor::new()
            .extract(&deck)
            .map_err(|e| RenderError::EngineUnavailable(e.to_string()))?;
        let geometry = deck.geometry();

        let mut images = BTreeMap::new();
        for n in 1..=slide_count as u32 {
            let svg = shapes
                .iter()
                .filter(|s| s.slide_number == n)
                .fold(
                    SvgBuilder::new(geometry.width_px, geometry.height_px, 2.0),
                    |svg, s| {
                        let text = self.replace_text.as_deref().unwrap_or(&s.text);
                        svg.text_shape(text, (s.x, s.y, s.width, s.height))
                    },
                )
                .build();
            let path = out_dir.join(format!("slide_{}.svg", n));
            std::fs::write(&path, svg).map_err(|source| RenderError::Io {
                path: path.clone(),
                source,
            })?;
            images.insert(n, path);
        }
        Ok(images)
    }
}

impl Default for MirrorRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderStrategy for MirrorRenderer {
    fn name(&self) -> &'static str {
        self.name
    }

    fn render(
        &self,
        source: &Path,
        slide_count: usize,
        out_dir: &Path,
    ) -> Result<BTreeMap<u32, PathBuf>, RenderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(self.delay);

        let result = self.draw(source, slide_count, out_dir);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// The real extractor, counting calls.
#[derive(Default)]
pub struct CountingExtractor {
    inner: PptxExtractor,
    pub calls: AtomicUsize,
}

impl CountingExtractor {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ShapeExtractor for CountingExtractor {
    fn extract(&self, deck: &Deck) -> Result<Vec<ShapeRecord>, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.extract(deck)
    }
}

/// Bridge whose sessions fail one slide with remote errors a number of
/// times and then drop the connection.
pub struct FlakyBridge {
    failing_slide: u32,
    remote_failures: usize,
    pub connects: AtomicUsize,
    pub attempts: Arc<Mutex<BTreeMap<u32, usize>>>,
}

impl FlakyBridge {
    pub fn new(failing_slide: u32, remote_failures: usize) -> Self {
        Self {
            failing_slide,
            remote_failures,
            connects: AtomicUsize::new(0),
            attempts: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    pub fn attempts_for(&self, slide: u32) -> usize {
        self.attempts.lock().unwrap().get(&slide).copied().unwrap_or(0)
    }
}

impl BridgeConnector for FlakyBridge {
    fn connect(&self) -> Result<Box<dyn BridgeSession>, BridgeError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FlakySession {
            failing_slide: self.failing_slide,
            remote_failures: self.remote_failures,
            attempts: Arc::clone(&self.attempts),
        }))
    }
}

struct FlakySession {
    failing_slide: u32,
    remote_failures: usize,
    attempts: Arc<Mutex<BTreeMap<u32, usize>>>,
}

impl BridgeSession for FlakySession {
    fn open(&mut self, _document: &Path) -> Result<(), BridgeError> {
        Ok(())
    }

    fn render_slide(&mut self, slide_number: u32, output: &Path) -> Result<(), BridgeError> {
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let count = attempts.entry(slide_number).or_insert(0);
            *count += 1;
            *count
        };
        if slide_number == self.failing_slide {
            if attempt <= self.remote_failures {
                return Err(BridgeError::Remote("export filter failed".into()));
            }
            return Err(BridgeError::Disconnected);
        }
        std::fs::write(output, "<svg xmlns=\"http://www.w3.org/2000/svg\"/>")
            .map_err(BridgeError::Io)
    }

    fn close(&mut self) -> Result<(), BridgeError> {
        Ok(())
    }

    fn ping(&mut self) -> Result<(), BridgeError> {
        Ok(())
    }
}

/// Persistence writes that `FlakyPersistence` can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Write {
    Asset,
    Slides,
    Shapes,
    Combined,
    CompletedStatus,
}

/// Local persistence whose writes fail a set number of times before they
/// reach the real store.
pub struct FlakyPersistence {
    inner: Arc<LocalPersistence>,
    failures: Mutex<HashMap<Write, usize>>,
    calls: Mutex<HashMap<Write, usize>>,
}

impl FlakyPersistence {
    pub fn new(inner: Arc<LocalPersistence>) -> Self {
        Self {
            inner,
            failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn failing(self, write: Write, times: usize) -> Self {
        self.failures.lock().unwrap().insert(write, times);
        self
    }

    pub fn calls(&self, write: Write) -> usize {
        self.calls.lock().unwrap().get(&write).copied().unwrap_or(0)
    }

    fn attempt(&self, write: Write) -> Result<(), PersistenceError> {
        *self.calls.lock().unwrap().entry(write).or_insert(0) += 1;
        let mut failures = self.failures.lock().unwrap();
        match failures.get_mut(&write) {
            Some(left) if *left > 0 => {
                *left -= 1;
                Err(PersistenceError::Unavailable(format!("{:?} write refused", write)))
            }
            _ => Ok(()),
        }
    }
}

impl Persistence for FlakyPersistence {
    fn save_slide_asset(
        &self,
        session_id: &str,
        slide_number: u32,
        kind: AssetKind,
        content: &[u8],
    ) -> Result<String, PersistenceError> {
        self.attempt(Write::Asset)?;
        self.inner
            .save_slide_asset(session_id, slide_number, kind, content)
    }

    fn save_slide_records(
        &self,
        session_id: &str,
        slides: &[SlideRenderResult],
    ) -> Result<(), PersistenceError> {
        self.attempt(Write::Slides)?;
        self.inner.save_slide_records(session_id, slides)
    }

    fn save_shape_records(
        &self,
        session_id: &str,
        shapes: &[ShapeRecord],
    ) -> Result<(), PersistenceError> {
        self.attempt(Write::Shapes)?;
        self.inner.save_shape_records(session_id, shapes)
    }

    fn save_combined_result(&self, result: &CombinedResult) -> Result<(), PersistenceError> {
        self.attempt(Write::Combined)?;
        self.inner.save_combined_result(result)
    }

    fn update_durable_status(&self, status: &DurableStatus) -> Result<(), PersistenceError> {
        if status.terminal_status == JobState::Completed {
            self.attempt(Write::CompletedStatus)?;
        }
        self.inner.update_durable_status(status)
    }

    fn load_combined_result(
        &self,
        session_id: &str,
    ) -> Result<Option<CombinedResult>, PersistenceError> {
        self.inner.load_combined_result(session_id)
    }

    fn load_slide_records(
        &self,
        session_id: &str,
    ) -> Result<Vec<SlideRenderResult>, PersistenceError> {
        self.inner.load_slide_records(session_id)
    }

    fn load_shape_records(&self, session_id: &str) -> Result<Vec<ShapeRecord>, PersistenceError> {
        self.inner.load_shape_records(session_id)
    }

    fn load_durable_status(&self, job_id: &str) -> Result<Option<DurableStatus>, PersistenceError> {
        self.inner.load_durable_status(job_id)
    }

    fn load_session_status(
        &self,
        session_id: &str,
    ) -> Result<Option<DurableStatus>, PersistenceError> {
        self.inner.load_session_status(session_id)
    }

    fn discard_session(&self, session_id: &str) -> Result<(), PersistenceError> {
        self.inner.discard_session(session_id)
    }
}
