//! Text-bearing regions of a rendered slide image.
//!
//! LibreOffice wraps each text shape in a group holding a
//! `rect class="BoundingBox"` next to the `<text>` element, which gives an
//! exact box. Free-standing `<text>` elements only carry a baseline origin,
//! so their box is estimated from the font size.

use crate::xml::{self, Element, XmlError};

const DEFAULT_FONT_SIZE: f64 = 16.0;
/// Average glyph advance as a fraction of the font size.
const GLYPH_WIDTH_FACTOR: f64 = 0.5;
const LINE_HEIGHT_FACTOR: f64 = 1.2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewBox {
    pub min_x: f64,
    pub min_y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SvgInfo {
    /// Viewport size in CSS pixels, when declared.
    pub width_px: Option<f64>,
    pub height_px: Option<f64>,
    pub view_box: Option<ViewBox>,
}

impl SvgInfo {
    /// Extent of the user coordinate space.
    pub fn user_extent(&self) -> Option<(f64, f64, f64, f64)> {
        if let Some(vb) = self.view_box {
            if vb.width > 0.0 && vb.height > 0.0 {
                return Some((vb.min_x, vb.min_y, vb.width, vb.height));
            }
        }
        match (self.width_px, self.height_px) {
            (Some(w), Some(h)) if w > 0.0 && h > 0.0 => Some((0.0, 0.0, w, h)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextCandidate {
    pub text: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    /// Box derived from font metrics rather than a bounding rect.
    pub estimated: bool,
}

impl TextCandidate {
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

#[derive(Debug, Clone)]
pub struct SvgPage {
    pub info: SvgInfo,
    pub candidates: Vec<TextCandidate>,
}

/// Converts a CSS length with optional unit into pixels.
pub fn css_length_px(value: &str) -> Option<f64> {
    let value = value.trim();
    let number = xml::parse_length(value)?;
    let unit = value
        .trim_start_matches(|c: char| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'))
        .trim();
    let px = match unit {
        "" | "px" => number,
        "in" => number * 96.0,
        "cm" => number * 96.0 / 2.54,
        "mm" => number * 96.0 / 25.4,
        "pt" => number * 96.0 / 72.0,
        "pc" => number * 16.0,
        _ => return None,
    };
    Some(px)
}

fn parse_view_box(value: &str) -> Option<ViewBox> {
    let parts: Vec<f64> = value
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<f64>())
        .collect::<Result<_, _>>()
        .ok()?;
    if parts.len() != 4 {
        return None;
    }
    Some(ViewBox {
        min_x: parts[0],
        min_y: parts[1],
        width: parts[2],
        height: parts[3],
    })
}

fn has_class(el: &Element, class: &str) -> bool {
    el.attr("class")
        .is_some_and(|c| c.split_whitespace().any(|part| part == class))
}

fn font_size(el: &Element) -> Option<f64> {
    if let Some(size) = el.attr("font-size").and_then(css_length_px) {
        return Some(size);
    }
    el.attr("style").and_then(|style| {
        style.split(';').find_map(|decl| {
            let (key, value) = decl.split_once(':')?;
            (key.trim() == "font-size").then(|| css_length_px(value)).flatten()
        })
    })
}

/// Text of a `<text>` element; line and paragraph tspans are space separated.
fn collect_text(el: &Element, out: &mut String) {
    out.push_str(&el.text);
    for child in &el.children {
        if has_class(child, "TextParagraph") || has_class(child, "TextPosition") {
            out.push(' ');
        }
        collect_text(child, out);
    }
}

fn text_of(el: &Element) -> String {
    let mut out = String::new();
    collect_text(el, &mut out);
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn group_text(group: &Element) -> String {
    let mut texts = Vec::new();
    group.find_all("text", &mut texts);
    texts
        .into_iter()
        .map(text_of)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn bounding_rect(group: &Element) -> Option<&Element> {
    group
        .children
        .iter()
        .find(|c| c.name == "rect" && has_class(c, "BoundingBox"))
}

/// Origin and font size of a free-standing `<text>`, looking into its first tspans.
fn text_origin(text: &Element) -> (f64, f64, f64) {
    let mut x = text.attr("x").and_then(xml::parse_length);
    let mut y = text.attr("y").and_then(xml::parse_length);
    let mut size = font_size(text);

    let mut tspans = Vec::new();
    text.find_all("tspan", &mut tspans);
    for tspan in tspans {
        if x.is_none() {
            x = tspan.attr("x").and_then(xml::parse_length);
        }
        if y.is_none() {
            y = tspan.attr("y").and_then(xml::parse_length);
        }
        if size.is_none() {
            size = font_size(tspan);
        }
    }

    (
        x.unwrap_or(0.0),
        y.unwrap_or(0.0),
        size.unwrap_or(DEFAULT_FONT_SIZE),
    )
}

fn collect_candidates(el: &Element, out: &mut Vec<TextCandidate>) {
    match el.name.as_str() {
        "defs" | "clipPath" | "mask" | "symbol" => {}
        "g" => {
            if let Some(rect) = bounding_rect(el) {
                let text = group_text(el);
                if !text.is_empty() {
                    out.push(TextCandidate {
                        text,
                        x: rect.attr_f64("x").unwrap_or(0.0),
                        y: rect.attr_f64("y").unwrap_or(0.0),
                        width: rect.attr_f64("width").unwrap_or(0.0),
                        height: rect.attr_f64("height").unwrap_or(0.0),
                        estimated: false,
                    });
                    return;
                }
            }
            for child in &el.children {
                collect_candidates(child, out);
            }
        }
        "text" => {
            let text = text_of(el);
            if text.is_empty() {
                return;
            }
            let (x, baseline, size) = text_origin(el);
            out.push(TextCandidate {
                x,
                y: baseline - size,
                width: text.chars().count() as f64 * size * GLYPH_WIDTH_FACTOR,
                height: size * LINE_HEIGHT_FACTOR,
                text,
                estimated: true,
            });
        }
        _ => {
            for child in &el.children {
                collect_candidates(child, out);
            }
        }
    }
}

/// Parses a rendered slide into its viewport description and text candidates.
pub fn parse_svg(content: &str) -> Result<SvgPage, XmlError> {
    let root = xml::parse_document(content)?;
    if root.name != "svg" {
        return Err(XmlError {
            position: 0,
            message: format!("expected <svg> root, found <{}>", root.name),
        });
    }

    let info = SvgInfo {
        width_px: root.attr("width").and_then(css_length_px),
        height_px: root.attr("height").and_then(css_length_px),
        view_box: root.attr("viewBox").and_then(parse_view_box),
    };

    let mut candidates = Vec::new();
    for child in &root.children {
        collect_candidates(child, &mut candidates);
    }

    Ok(SvgPage { info, candidates })
}
