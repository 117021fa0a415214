//! Reconciles extracted shape boxes with the rendered slide images.
//!
//! Extraction and rendering produce two independent coordinate spaces. For
//! every shape, the validator maps its box into image space, looks for the
//! best fuzzy text match among the image's text regions and classifies the
//! shape. Shapes are never dropped and their text is never modified.

pub mod similarity;
pub mod svg;

use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::{debug, warn};

use crate::config::ValidationConfig;
use crate::model::{ShapeRecord, SlideGeometry, ValidationState};
use svg::{SvgInfo, TextCandidate};

/// Maps extractor pixels to image user units and back.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinateTransform {
    pub scale_x: f64,
    pub scale_y: f64,
    pub offset_x: f64,
    pub offset_y: f64,
}

impl CoordinateTransform {
    pub fn new(info: &SvgInfo, geometry: SlideGeometry) -> Self {
        match info.user_extent() {
            Some((min_x, min_y, width, height))
                if geometry.width_px > 0.0 && geometry.height_px > 0.0 =>
            {
                Self {
                    scale_x: width / geometry.width_px,
                    scale_y: height / geometry.height_px,
                    offset_x: min_x,
                    offset_y: min_y,
                }
            }
            _ => Self {
                scale_x: 1.0,
                scale_y: 1.0,
                offset_x: 0.0,
                offset_y: 0.0,
            },
        }
    }

    pub fn to_image(&self, x: f64, y: f64, w: f64, h: f64) -> (f64, f64, f64, f64) {
        (
            x * self.scale_x + self.offset_x,
            y * self.scale_y + self.offset_y,
            w * self.scale_x,
            h * self.scale_y,
        )
    }

    pub fn to_slide(&self, x: f64, y: f64, w: f64, h: f64) -> (f64, f64, f64, f64) {
        (
            (x - self.offset_x) / self.scale_x,
            (y - self.offset_y) / self.scale_y,
            w / self.scale_x,
            h / self.scale_y,
        )
    }
}

/// Counts per outcome for one validation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidationSummary {
    pub validated: usize,
    pub adjusted: usize,
    pub questionable: usize,
    pub unvalidated: usize,
}

impl ValidationSummary {
    fn record(&mut self, state: ValidationState) {
        match state {
            ValidationState::Validated => self.validated += 1,
            ValidationState::Adjusted => self.adjusted += 1,
            ValidationState::Questionable => self.questionable += 1,
            ValidationState::Unvalidated => self.unvalidated += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.validated + self.adjusted + self.questionable + self.unvalidated
    }
}

pub struct CoordinateValidator {
    config: ValidationConfig,
}

impl CoordinateValidator {
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    /// Validates every shape against the image rendered for its slide.
    pub fn validate(
        &self,
        shapes: &mut [ShapeRecord],
        images: &BTreeMap<u32, PathBuf>,
        geometry: SlideGeometry,
    ) -> ValidationSummary {
        let mut summary = ValidationSummary::default();
        let mut by_slide: BTreeMap<u32, Vec<&mut ShapeRecord>> = BTreeMap::new();
        for shape in shapes.iter_mut() {
            by_slide.entry(shape.slide_number).or_default().push(shape);
        }

        for (slide_number, mut slide_shapes) in by_slide {
            let page = match images.get(&slide_number) {
                Some(path) => std::fs::read_to_string(path)
                    .map_err(|e| e.to_string())
                    .and_then(|content| svg::parse_svg(&content).map_err(|e| e.to_string())),
                None => Err("no rendered image for slide".to_string()),
            };

            match page {
                Ok(page) => {
                    let transform = CoordinateTransform::new(&page.info, geometry);
                    for shape in slide_shapes.iter_mut() {
                        self.validate_shape(shape, &page.candidates, &transform);
                        summary.record(shape.validation_state);
                    }
                }
                Err(reason) => {
                    warn!("Slide {}: skipping validation: {}", slide_number, reason);
                    for shape in slide_shapes.iter_mut() {
                        mark_unvalidated(shape, &reason);
                        summary.record(shape.validation_state);
                    }
                }
            }
        }

        debug!(
            "Validation: {} validated, {} adjusted, {} questionable, {} unvalidated",
            summary.validated, summary.adjusted, summary.questionable, summary.unvalidated
        );
        summary
    }

    /// Validates shapes of one slide against already parsed image content.
    pub fn validate_slide(
        &self,
        shapes: &mut [ShapeRecord],
        svg_content: &str,
        geometry: SlideGeometry,
    ) -> ValidationSummary {
        let mut summary = ValidationSummary::default();
        match svg::parse_svg(svg_content) {
            Ok(page) => {
                let transform = CoordinateTransform::new(&page.info, geometry);
                for shape in shapes.iter_mut() {
                    self.validate_shape(shape, &page.candidates, &transform);
                    summary.record(shape.validation_state);
                }
            }
            Err(e) => {
                for shape in shapes.iter_mut() {
                    mark_unvalidated(shape, &e.to_string());
                    summary.record(shape.validation_state);
                }
            }
        }
        summary
    }

    fn validate_shape(
        &self,
        shape: &mut ShapeRecord,
        candidates: &[TextCandidate],
        transform: &CoordinateTransform,
    ) {
        let scored: Vec<(f64, &TextCandidate)> = candidates
            .iter()
            .map(|c| (similarity::score(&shape.text, &c.text), c))
            .collect();

        let best = scored.iter().map(|(s, _)| *s).fold(0.0_f64, f64::max);
        if scored.is_empty() || best < self.config.low_threshold {
            shape.validation_state = ValidationState::Questionable;
            shape.validation_score = Some(best);
            shape.matched_text = None;
            shape.validation_details = Some(if scored.is_empty() {
                "no text found in rendered image".to_string()
            } else {
                format!(
                    "best match score {:.2} below threshold {:.2}",
                    best, self.config.low_threshold
                )
            });
            return;
        }

        let (ix, iy, iw, ih) = transform.to_image(shape.x, shape.y, shape.width, shape.height);
        let center = (ix + iw / 2.0, iy + ih / 2.0);
        let window = best - self.config.tie_epsilon;

        let Some((score, candidate)) = scored
            .iter()
            .filter(|(s, _)| *s >= window)
            .min_by(|(_, a), (_, b)| {
                distance(center, a.center()).total_cmp(&distance(center, b.center()))
            })
            .copied()
        else {
            return;
        };

        let (cx, cy, cw, ch) =
            transform.to_slide(candidate.x, candidate.y, candidate.width, candidate.height);
        let offset = distance(shape.center(), (cx + cw / 2.0, cy + ch / 2.0));

        shape.validation_score = Some(score);
        shape.matched_text = Some(candidate.text.clone());

        if score >= self.config.high_threshold {
            shape.validation_state = ValidationState::Validated;
            if self.config.nudge_validated && !candidate.estimated {
                set_bounds(shape, (cx, cy, cw, ch));
            }
            shape.validation_details = Some(format!(
                "text match {:.2}, centre offset {:.1}px",
                score, offset
            ));
        } else {
            shape.validation_state = ValidationState::Adjusted;
            set_bounds(shape, (cx, cy, cw, ch));
            shape.validation_details = Some(format!(
                "partial text match {:.2}, moved {:.1}px to rendered position{}",
                score,
                offset,
                if candidate.estimated { " (estimated box)" } else { "" }
            ));
        }
    }
}

fn set_bounds(shape: &mut ShapeRecord, bounds: (f64, f64, f64, f64)) {
    shape.x = bounds.0;
    shape.y = bounds.1;
    shape.width = bounds.2;
    shape.height = bounds.3;
}

fn mark_unvalidated(shape: &mut ShapeRecord, reason: &str) {
    shape.validation_state = ValidationState::Unvalidated;
    shape.validation_score = None;
    shape.matched_text = None;
    shape.validation_details = Some(reason.to_string());
}

fn distance(a: (f64, f64), b: (f64, f64)) -> f64 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ShapeKind;

    const GEOMETRY: SlideGeometry = SlideGeometry {
        width_px: 960.0,
        height_px: 540.0,
    };

    fn shape(text: &str, bounds: (f64, f64, f64, f64)) -> ShapeRecord {
        ShapeRecord::new("s1-1", 1, ShapeKind::Text, text, bounds)
    }

    /// An SVG at twice the slide resolution, one bounding-box group per entry.
    fn svg(groups: &[(&str, f64, f64, f64, f64)]) -> String {
        let mut body = String::new();
        for (text, x, y, w, h) in groups {
            body.push_str(&format!(
                r#"<g class="TextShape"><rect class="BoundingBox" x="{}" y="{}" width="{}" height="{}"/><text><tspan class="TextPosition">{}</tspan></text></g>"#,
                x, y, w, h, text
            ));
        }
        format!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="960px" height="540px" viewBox="0 0 1920 1080">{}</svg>"#,
            body
        )
    }

    fn validator() -> CoordinateValidator {
        CoordinateValidator::new(ValidationConfig::default())
    }

    #[test]
    fn test_transform_round_trip_with_offset() {
        let info = SvgInfo {
            width_px: None,
            height_px: None,
            view_box: Some(svg::ViewBox {
                min_x: 50.0,
                min_y: 20.0,
                width: 1920.0,
                height: 1080.0,
            }),
        };
        let t = CoordinateTransform::new(&info, GEOMETRY);
        assert_eq!(t.scale_x, 2.0);
        assert_eq!(t.to_image(10.0, 10.0, 100.0, 50.0), (70.0, 40.0, 200.0, 100.0));
        assert_eq!(t.to_slide(70.0, 40.0, 200.0, 100.0), (10.0, 10.0, 100.0, 50.0));
    }

    #[test]
    fn test_identical_text_is_validated_and_box_kept() {
        let mut shapes = vec![shape("Quarterly Results", (100.0, 50.0, 400.0, 60.0))];
        let content = svg(&[("Quarterly Results", 200.0, 100.0, 800.0, 120.0)]);

        let summary = validator().validate_slide(&mut shapes, &content, GEOMETRY);

        assert_eq!(summary.validated, 1);
        assert_eq!(shapes[0].validation_state, ValidationState::Validated);
        assert_eq!((shapes[0].x, shapes[0].y), (100.0, 50.0));
        assert_eq!(shapes[0].validation_score, Some(1.0));
    }

    #[test]
    fn test_no_matching_text_is_questionable() {
        let mut shapes = vec![shape("Quarterly revenue grew", (100.0, 50.0, 400.0, 60.0))];
        let content = svg(&[("Lorem ipsum dolor sit amet", 200.0, 100.0, 800.0, 120.0)]);

        let summary = validator().validate_slide(&mut shapes, &content, GEOMETRY);

        assert_eq!(summary.questionable, 1);
        assert_eq!(shapes[0].text, "Quarterly revenue grew");
        assert_eq!((shapes[0].x, shapes[0].y), (100.0, 50.0));
    }

    #[test]
    fn test_partial_match_adjusts_box() {
        let mut shapes = vec![shape("Revenue by region", (0.0, 0.0, 10.0, 10.0))];
        let content = svg(&[("Revenue per region", 200.0, 100.0, 800.0, 120.0)]);
        let config = ValidationConfig {
            high_threshold: 0.95,
            ..ValidationConfig::default()
        };

        let summary =
            CoordinateValidator::new(config).validate_slide(&mut shapes, &content, GEOMETRY);

        assert_eq!(summary.adjusted, 1);
        assert_eq!(shapes[0].validation_state, ValidationState::Adjusted);
        assert_eq!(
            (shapes[0].x, shapes[0].y, shapes[0].width, shapes[0].height),
            (100.0, 50.0, 400.0, 60.0)
        );
        assert_eq!(shapes[0].text, "Revenue by region");
    }

    #[test]
    fn test_tie_broken_by_nearest_centroid() {
        let mut shapes = vec![
            ShapeRecord::new("s1-1", 1, ShapeKind::TableCell, "Total", (0.0, 0.0, 100.0, 20.0)),
            ShapeRecord::new("s1-2", 1, ShapeKind::TableCell, "Total", (500.0, 400.0, 100.0, 20.0)),
        ];
        let content = svg(&[
            ("Total", 0.0, 0.0, 200.0, 40.0),
            ("Total", 1000.0, 800.0, 200.0, 40.0),
        ]);
        let config = ValidationConfig {
            nudge_validated: true,
            ..ValidationConfig::default()
        };

        CoordinateValidator::new(config).validate_slide(&mut shapes, &content, GEOMETRY);

        assert_eq!((shapes[0].x, shapes[0].y), (0.0, 0.0));
        assert_eq!((shapes[1].x, shapes[1].y), (500.0, 400.0));
        assert!(shapes
            .iter()
            .all(|s| s.validation_state == ValidationState::Validated));
    }

    #[test]
    fn test_missing_image_marks_unvalidated() {
        let mut shapes = vec![shape("Hello", (0.0, 0.0, 1.0, 1.0))];
        let summary = validator().validate(&mut shapes, &BTreeMap::new(), GEOMETRY);
        assert_eq!(summary.unvalidated, 1);
        assert_eq!(shapes[0].validation_state, ValidationState::Unvalidated);
        assert!(shapes[0].validation_details.is_some());
    }

    #[test]
    fn test_validate_reads_images_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slide_1.svg");
        std::fs::write(&path, svg(&[("Hello world", 0.0, 0.0, 100.0, 40.0)])).unwrap();
        let mut images = BTreeMap::new();
        images.insert(1, path);

        let mut shapes = vec![
            shape("Hello world", (0.0, 0.0, 50.0, 20.0)),
            ShapeRecord::new("s2-1", 2, ShapeKind::Text, "Second", (0.0, 0.0, 1.0, 1.0)),
        ];
        let summary = validator().validate(&mut shapes, &images, GEOMETRY);

        assert_eq!(summary.total(), 2);
        assert_eq!(shapes[0].validation_state, ValidationState::Validated);
        assert_eq!(shapes[1].validation_state, ValidationState::Unvalidated);
    }
}
