//! Shape tree walk for a single slide.

use crate::model::{FontAttrs, ShapeKind, ShapeRecord};
use crate::xml::Element;

use super::metadata;
use super::package::{Deck, SlidePart, EMU_PER_PIXEL};

/// Placeholder type assumed when `<p:ph>` carries no `type`.
const DEFAULT_PLACEHOLDER_TYPE: &str = "obj";

/// `X = scale * x + offset`, per axis, in EMU.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Affine {
    scale_x: f64,
    scale_y: f64,
    offset_x: f64,
    offset_y: f64,
}

impl Affine {
    const IDENTITY: Affine = Affine {
        scale_x: 1.0,
        scale_y: 1.0,
        offset_x: 0.0,
        offset_y: 0.0,
    };

    /// Transform of a group's child coordinate space into its parent's.
    fn for_group(group: &Element) -> Affine {
        let Some(xfrm) = group.path(&["grpSpPr", "xfrm"]) else {
            return Affine::IDENTITY;
        };
        let (off_x, off_y) = point(xfrm.child("off"), "x", "y");
        let (ext_x, ext_y) = point(xfrm.child("ext"), "cx", "cy");
        let (ch_off_x, ch_off_y) = point(xfrm.child("chOff"), "x", "y");
        let (ch_ext_x, ch_ext_y) = point(xfrm.child("chExt"), "cx", "cy");

        let scale_x = if ch_ext_x > 0.0 { ext_x / ch_ext_x } else { 1.0 };
        let scale_y = if ch_ext_y > 0.0 { ext_y / ch_ext_y } else { 1.0 };
        Affine {
            scale_x,
            scale_y,
            offset_x: off_x - ch_off_x * scale_x,
            offset_y: off_y - ch_off_y * scale_y,
        }
    }

    /// Applies `self` first, then `outer`.
    fn then(self, outer: Affine) -> Affine {
        Affine {
            scale_x: outer.scale_x * self.scale_x,
            scale_y: outer.scale_y * self.scale_y,
            offset_x: outer.scale_x * self.offset_x + outer.offset_x,
            offset_y: outer.scale_y * self.offset_y + outer.offset_y,
        }
    }

    fn apply(&self, bounds: Bounds) -> Bounds {
        Bounds {
            x: self.scale_x * bounds.x + self.offset_x,
            y: self.scale_y * bounds.y + self.offset_y,
            w: self.scale_x * bounds.w,
            h: self.scale_y * bounds.h,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Bounds {
    x: f64,
    y: f64,
    w: f64,
    h: f64,
}

impl Bounds {
    fn from_xfrm(xfrm: &Element) -> Option<Bounds> {
        let off = xfrm.child("off")?;
        let ext = xfrm.child("ext")?;
        let (x, y) = point(Some(off), "x", "y");
        let (w, h) = point(Some(ext), "cx", "cy");
        Some(Bounds { x, y, w, h })
    }

    fn to_pixels(self) -> (f64, f64, f64, f64) {
        (
            self.x / EMU_PER_PIXEL,
            self.y / EMU_PER_PIXEL,
            self.w / EMU_PER_PIXEL,
            self.h / EMU_PER_PIXEL,
        )
    }
}

fn point(el: Option<&Element>, x: &str, y: &str) -> (f64, f64) {
    match el {
        Some(el) => (
            el.attr_i64(x).unwrap_or(0) as f64,
            el.attr_i64(y).unwrap_or(0) as f64,
        ),
        None => (0.0, 0.0),
    }
}

struct Placeholder<'a> {
    kind: &'a str,
    idx: Option<&'a str>,
}

impl<'a> Placeholder<'a> {
    fn of(shape: &'a Element) -> Option<Self> {
        let ph = shape.path(&["nvSpPr", "nvPr", "ph"])?;
        Some(Self {
            kind: ph.attr("type").unwrap_or(DEFAULT_PLACEHOLDER_TYPE),
            idx: ph.attr("idx"),
        })
    }

    fn is_title(&self) -> bool {
        matches!(self.kind, "title" | "ctrTitle")
    }

    fn is_subtitle(&self) -> bool {
        self.kind == "subTitle"
    }

    /// Layout placeholders match by index first, then by type.
    fn matches_layout(&self, other: &Placeholder<'_>) -> bool {
        if let (Some(a), Some(b)) = (self.idx, other.idx) {
            if a == b {
                return true;
            }
        }
        normalize_layout_type(self.kind) == normalize_layout_type(other.kind)
    }

    /// Masters only carry title, body and footer placeholders.
    fn matches_master(&self, other: &Placeholder<'_>) -> bool {
        normalize_master_type(self.kind) == normalize_master_type(other.kind)
    }
}

fn normalize_layout_type(kind: &str) -> &str {
    match kind {
        "ctrTitle" => "title",
        other => other,
    }
}

fn normalize_master_type(kind: &str) -> &str {
    match kind {
        "ctrTitle" | "title" => "title",
        "subTitle" | "obj" | "body" => "body",
        other => other,
    }
}

/// Finds the position a placeholder inherits from its layout or master.
fn inherited_bounds(deck: &Deck, slide: &SlidePart, ph: &Placeholder<'_>) -> Option<Bounds> {
    if let Some(layout) = deck.layout_for(slide) {
        let found = placeholder_shapes(layout)
            .into_iter()
            .find(|(candidate, _)| ph.matches_layout(candidate))
            .and_then(|(_, shape)| shape.path(&["spPr", "xfrm"]))
            .and_then(Bounds::from_xfrm);
        if found.is_some() {
            return found;
        }
    }

    let master = deck.master_for(slide)?;
    placeholder_shapes(master)
        .into_iter()
        .find(|(candidate, _)| ph.matches_master(candidate))
        .and_then(|(_, shape)| shape.path(&["spPr", "xfrm"]))
        .and_then(Bounds::from_xfrm)
}

fn placeholder_shapes(root: &Element) -> Vec<(Placeholder<'_>, &Element)> {
    let mut shapes = Vec::new();
    root.find_all("sp", &mut shapes);
    shapes
        .into_iter()
        .filter_map(|shape| Placeholder::of(shape).map(|ph| (ph, shape)))
        .collect()
}

/// Text of a `txBody`: paragraphs joined by newlines, `<a:br>` as newline.
pub(crate) fn body_text(body: &Element) -> String {
    body.children_named("p")
        .map(|p| {
            let mut line = String::new();
            for part in &p.children {
                match part.name.as_str() {
                    "r" | "fld" => {
                        if let Some(t) = part.child("t") {
                            line.push_str(&t.text);
                        }
                    }
                    "br" => line.push('\n'),
                    _ => {}
                }
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub(crate) fn font_attrs(body: &Element) -> FontAttrs {
    let mut font = FontAttrs {
        vertical_anchor: body
            .child("bodyPr")
            .and_then(|b| b.attr("anchor"))
            .map(|a| match a {
                "t" => "top".to_string(),
                "ctr" => "middle".to_string(),
                "b" => "bottom".to_string(),
                other => other.to_string(),
            }),
        ..FontAttrs::default()
    };

    font.align = body
        .children_named("p")
        .find_map(|p| p.child("pPr").and_then(|ppr| ppr.attr("algn")))
        .map(|a| match a {
            "l" => "left".to_string(),
            "ctr" => "center".to_string(),
            "r" => "right".to_string(),
            "just" => "justify".to_string(),
            other => other.to_string(),
        });

    let run_props = body
        .children_named("p")
        .flat_map(|p| p.children_named("r"))
        .find_map(|r| r.child("rPr"));

    if let Some(rpr) = run_props {
        font.size_pt = rpr.attr_i64("sz").map(|sz| sz as f64 / 100.0);
        font.bold = is_on(rpr.attr("b"));
        font.italic = is_on(rpr.attr("i"));
        font.underline = matches!(rpr.attr("u"), Some(u) if u != "none");
        font.family = rpr
            .child("latin")
            .and_then(|l| l.attr("typeface"))
            .map(str::to_string);
        font.color = rpr
            .path(&["solidFill", "srgbClr"])
            .and_then(|c| c.attr("val"))
            .map(str::to_string);
    }

    font
}

fn is_on(value: Option<&str>) -> bool {
    matches!(value, Some("1") | Some("true"))
}

struct SlideWalk<'d> {
    deck: &'d Deck,
    slide: &'d SlidePart,
    records: Vec<ShapeRecord>,
}

impl<'d> SlideWalk<'d> {
    fn push(&mut self, mut record: ShapeRecord) {
        record.reading_order = self.records.len() as u32 + 1;
        metadata::annotate(&mut record);
        self.records.push(record);
    }

    fn walk(&mut self, tree: &Element, transform: Affine) {
        for child in &tree.children {
            match child.name.as_str() {
                "sp" => self.visit_shape(child, transform),
                "grpSp" => {
                    let inner = Affine::for_group(child).then(transform);
                    self.walk(child, inner);
                }
                "graphicFrame" => self.visit_frame(child, transform),
                _ => {}
            }
        }
    }

    fn visit_shape(&mut self, shape: &Element, transform: Affine) {
        let Some(body) = shape.child("txBody") else {
            return;
        };
        let text = body_text(body);
        if text.trim().is_empty() {
            return;
        }

        let shape_id = shape
            .path(&["nvSpPr", "cNvPr"])
            .and_then(|c| c.attr("id"))
            .unwrap_or("0");
        let placeholder = Placeholder::of(shape);
        let is_text_box = shape
            .path(&["nvSpPr", "cNvSpPr"])
            .and_then(|c| c.attr("txBox"))
            .is_some_and(|v| v == "1" || v == "true");

        let own = shape.path(&["spPr", "xfrm"]).and_then(Bounds::from_xfrm);
        let bounds = match (&own, &placeholder) {
            (Some(b), _) => *b,
            (None, Some(ph)) => inherited_bounds(self.deck, self.slide, ph).unwrap_or_default(),
            (None, None) => Bounds::default(),
        };

        let kind = if is_text_box || placeholder.is_some() {
            ShapeKind::Text
        } else {
            ShapeKind::Other
        };

        let mut record = ShapeRecord::new(
            format!("s{}-{}", self.slide.number, shape_id),
            self.slide.number,
            kind,
            text,
            transform.apply(bounds).to_pixels(),
        );
        record.font = font_attrs(body);
        if let Some(ph) = placeholder {
            record.is_title = ph.is_title();
            record.is_subtitle = ph.is_subtitle();
            record.placeholder_type = Some(ph.kind.to_string());
        }
        self.push(record);
    }

    fn visit_frame(&mut self, frame: &Element, transform: Affine) {
        let Some(table) = frame.find("tbl") else {
            return;
        };
        let origin = frame
            .child("xfrm")
            .and_then(Bounds::from_xfrm)
            .unwrap_or_default();
        let frame_id = frame
            .path(&["nvGraphicFramePr", "cNvPr"])
            .and_then(|c| c.attr("id"))
            .unwrap_or("0");

        let col_widths: Vec<f64> = table
            .child("tblGrid")
            .map(|grid| {
                grid.children_named("gridCol")
                    .map(|c| c.attr_i64("w").unwrap_or(0) as f64)
                    .collect()
            })
            .unwrap_or_default();
        let rows: Vec<&Element> = table.children_named("tr").collect();
        let row_heights: Vec<f64> = rows
            .iter()
            .map(|r| r.attr_i64("h").unwrap_or(0) as f64)
            .collect();

        for (r, row) in rows.iter().enumerate() {
            for (c, cell) in row.children_named("tc").enumerate() {
                if is_on(cell.attr("hMerge")) || is_on(cell.attr("vMerge")) {
                    continue;
                }
                let Some(body) = cell.child("txBody") else {
                    continue;
                };
                let text = body_text(body);
                if text.trim().is_empty() {
                    continue;
                }

                let col_span = cell.attr_i64("gridSpan").unwrap_or(1).max(1) as usize;
                let row_span = cell.attr_i64("rowSpan").unwrap_or(1).max(1) as usize;
                let bounds = Bounds {
                    x: origin.x + span_sum(&col_widths, 0, c),
                    y: origin.y + span_sum(&row_heights, 0, r),
                    w: span_sum(&col_widths, c, c + col_span),
                    h: span_sum(&row_heights, r, r + row_span),
                };

                let mut record = ShapeRecord::new(
                    format!("s{}-{}-r{}c{}", self.slide.number, frame_id, r, c),
                    self.slide.number,
                    ShapeKind::TableCell,
                    text,
                    transform.apply(bounds).to_pixels(),
                );
                record.font = font_attrs(body);
                record.table_row = Some(r as u32);
                record.table_col = Some(c as u32);
                self.push(record);
            }
        }
    }
}

fn span_sum(values: &[f64], start: usize, end: usize) -> f64 {
    let end = end.min(values.len());
    if start >= end {
        return 0.0;
    }
    values[start..end].iter().sum()
}

/// Extracts every text-bearing shape of one slide in shape-tree order.
pub fn extract_slide(deck: &Deck, slide: &SlidePart) -> Vec<ShapeRecord> {
    let mut walk = SlideWalk {
        deck,
        slide,
        records: Vec::new(),
    };
    if let Some(tree) = slide.root.path(&["cSld", "spTree"]) {
        walk.walk(tree, Affine::IDENTITY);
    }
    walk.records
}
