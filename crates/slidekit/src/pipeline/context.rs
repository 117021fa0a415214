use crate::extract::Deck;
use crate::model::{CombinedResult, ShapeRecord, SlideRenderResult};
use crate::render::RenderOutput;
use crate::validate::ValidationSummary;
use crate::worker::job::ProcessingJob;

pub struct PipelineContext {
    // Input
    pub job: ProcessingJob,

    // Read while queued
    pub document: Option<Vec<u8>>,
    pub cache_key: Option<String>,

    // Set once the object model opened
    pub deck: Option<Deck>,

    // Render and extraction results; render files are removed with `render`
    pub render: Option<RenderOutput>,
    pub shapes: Vec<ShapeRecord>,

    pub validation: ValidationSummary,

    // Finalize results
    pub slides: Vec<SlideRenderResult>,
    pub result: Option<CombinedResult>,

    pub from_cache: bool,
}

impl PipelineContext {
    pub fn new(job: ProcessingJob) -> Self {
        Self {
            job,
            document: None,
            cache_key: None,
            deck: None,
            render: None,
            shapes: Vec::new(),
            validation: ValidationSummary::default(),
            slides: Vec::new(),
            result: None,
            from_cache: false,
        }
    }
}
