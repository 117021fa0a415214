//! Records produced by a processing job.
//!
//! These types are shared by the extractor, the validator, the cache and the
//! results assembler, and all of them serialize to the same JSON shape.

use serde::{Deserialize, Serialize};

/// Version of the result layout. Part of every cache key, so bumping it
/// invalidates previously cached results.
pub const OUTPUT_FORMAT_VERSION: u32 = 1;

/// Parameters supplied with a submission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobParams {
    #[serde(default)]
    pub source_lang: Option<String>,
    #[serde(default)]
    pub target_lang: Option<String>,
    #[serde(default)]
    pub want_thumbnails: bool,
}

/// Slide size in pixels at 96 DPI.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SlideGeometry {
    pub width_px: f64,
    pub height_px: f64,
}

/// One rendered slide image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlideRenderResult {
    pub slide_number: u32,
    pub image_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_ref: Option<String>,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShapeKind {
    Text,
    TableCell,
    Other,
}

impl ShapeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShapeKind::Text => "text",
            ShapeKind::TableCell => "table_cell",
            ShapeKind::Other => "other",
        }
    }
}

/// Outcome of matching a shape against its slide image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationState {
    Validated,
    Adjusted,
    Questionable,
    #[default]
    Unvalidated,
}

impl std::fmt::Display for ValidationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationState::Validated => write!(f, "validated"),
            ValidationState::Adjusted => write!(f, "adjusted"),
            ValidationState::Questionable => write!(f, "questionable"),
            ValidationState::Unvalidated => write!(f, "unvalidated"),
        }
    }
}

/// Styling taken from the first run of a text body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FontAttrs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_pt: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family: Option<String>,
    #[serde(default)]
    pub bold: bool,
    #[serde(default)]
    pub italic: bool,
    #[serde(default)]
    pub underline: bool,
    /// Hex RGB, e.g. `1F497D`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub align: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vertical_anchor: Option<String>,
}

/// A piece of shape text sized for a translation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextSegment {
    pub segment_index: usize,
    pub text: String,
    pub is_complete_sentence: bool,
    pub word_count: usize,
    pub char_count: usize,
}

/// A text-bearing region of a slide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapeRecord {
    pub shape_id: String,
    pub slide_number: u32,
    pub kind: ShapeKind,
    pub text: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    #[serde(default)]
    pub font: FontAttrs,
    pub is_title: bool,
    pub is_subtitle: bool,
    pub priority: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder_type: Option<String>,
    /// 1-based position in the slide's shape tree.
    pub reading_order: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_row: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_col: Option<u32>,
    pub word_count: usize,
    pub char_count: usize,
    #[serde(default)]
    pub text_segments: Vec<TextSegment>,
    #[serde(default)]
    pub validation_state: ValidationState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_text: Option<String>,
}

impl ShapeRecord {
    /// Creates a record with the given box and neutral metadata.
    pub fn new(
        shape_id: impl Into<String>,
        slide_number: u32,
        kind: ShapeKind,
        text: impl Into<String>,
        bounds: (f64, f64, f64, f64),
    ) -> Self {
        let (x, y, width, height) = bounds;
        Self {
            shape_id: shape_id.into(),
            slide_number,
            kind,
            text: text.into(),
            x,
            y,
            width,
            height,
            font: FontAttrs::default(),
            is_title: false,
            is_subtitle: false,
            priority: 5,
            placeholder_type: None,
            reading_order: 0,
            table_row: None,
            table_col: None,
            word_count: 0,
            char_count: 0,
            text_segments: Vec::new(),
            validation_state: ValidationState::Unvalidated,
            validation_score: None,
            validation_details: None,
            matched_text: None,
        }
    }

    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Completed,
    PartiallyCompleted,
}

/// A slide together with its shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlideResult {
    pub slide_number: u32,
    pub image_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_ref: Option<String>,
    pub width: f64,
    pub height: f64,
    pub shapes: Vec<ShapeRecord>,
}

/// Everything a client needs to draw the translation overlay for a deck.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedResult {
    pub session_id: String,
    pub slide_count: usize,
    pub status: ResultStatus,
    pub slides: Vec<SlideResult>,
}

impl CombinedResult {
    /// Joins render results and shapes by slide number.
    ///
    /// Slides are ordered by number; shapes keep reading order within a slide.
    pub fn from_parts(
        session_id: &str,
        renders: &[SlideRenderResult],
        shapes: &[ShapeRecord],
        status: ResultStatus,
    ) -> Self {
        let mut renders: Vec<&SlideRenderResult> = renders.iter().collect();
        renders.sort_by_key(|r| r.slide_number);

        let slides: Vec<SlideResult> = renders
            .into_iter()
            .map(|render| {
                let mut slide_shapes: Vec<ShapeRecord> = shapes
                    .iter()
                    .filter(|s| s.slide_number == render.slide_number)
                    .cloned()
                    .collect();
                slide_shapes.sort_by(|a, b| {
                    a.reading_order
                        .cmp(&b.reading_order)
                        .then_with(|| a.shape_id.cmp(&b.shape_id))
                });
                SlideResult {
                    slide_number: render.slide_number,
                    image_ref: render.image_ref.clone(),
                    thumbnail_ref: render.thumbnail_ref.clone(),
                    width: render.width,
                    height: render.height,
                    shapes: slide_shapes,
                }
            })
            .collect();

        Self {
            session_id: session_id.to_string(),
            slide_count: slides.len(),
            status,
            slides,
        }
    }

    /// Copies the result under a different session id.
    pub fn for_session(&self, session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            ..self.clone()
        }
    }

    pub fn render_results(&self) -> Vec<SlideRenderResult> {
        self.slides
            .iter()
            .map(|s| SlideRenderResult {
                slide_number: s.slide_number,
                image_ref: s.image_ref.clone(),
                thumbnail_ref: s.thumbnail_ref.clone(),
                width: s.width,
                height: s.height,
            })
            .collect()
    }

    pub fn shapes(&self) -> impl Iterator<Item = &ShapeRecord> {
        self.slides.iter().flat_map(|s| s.shapes.iter())
    }
}
