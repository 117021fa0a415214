//! Text and geometry extraction from the presentation object model.
//!
//! Extraction never looks at rendered output: every position comes from the
//! slide XML (with layout and master inheritance) and is converted from EMU
//! to pixels at 96 DPI.

pub mod metadata;
pub mod package;
pub mod slide;

pub use package::{Deck, SlidePart, EMU_PER_PIXEL};

use crate::error::ExtractionError;
use crate::model::ShapeRecord;

/// Produces shape records for every slide of an opened deck.
pub trait ShapeExtractor: Send + Sync {
    fn extract(&self, deck: &Deck) -> Result<Vec<ShapeRecord>, ExtractionError>;
}

/// Extractor for OOXML (`.pptx`) presentations.
pub struct PptxExtractor;

impl PptxExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PptxExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl ShapeExtractor for PptxExtractor {
    fn extract(&self, deck: &Deck) -> Result<Vec<ShapeRecord>, ExtractionError> {
        let mut records = Vec::new();
        for slide in &deck.slides {
            let shapes = slide::extract_slide(deck, slide);
            log::debug!(
                "Slide {} ({}): {} text shapes",
                slide.number,
                slide.part_name,
                shapes.len()
            );
            records.extend(shapes);
        }
        Ok(records)
    }
}
