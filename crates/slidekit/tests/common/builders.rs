//! Builder patterns for creating test decks and slide images programmatically.

#![allow(dead_code)]

use std::io::{Cursor, Write};
use std::path::Path;

use zip::write::SimpleFileOptions;

pub const EMU: i64 = 9525;

const NS: &str = r#"xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships" xmlns:p="http://schemas.openxmlformats.org/presentationml/2006/main""#;
const REL_NS: &str = "http://schemas.openxmlformats.org/package/2006/relationships";
const REL_SLIDE: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/slide";
const REL_LAYOUT: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/slideLayout";

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn px(v: f64) -> i64 {
    (v * EMU as f64).round() as i64
}

fn xfrm(prefix: &str, (x, y, w, h): (f64, f64, f64, f64)) -> String {
    format!(
        r#"<{p}:xfrm><a:off x="{}" y="{}"/><a:ext cx="{}" cy="{}"/></{p}:xfrm>"#,
        px(x),
        px(y),
        px(w),
        px(h),
        p = prefix
    )
}

fn text_body(text: &str) -> String {
    format!(
        r#"<p:txBody><a:bodyPr/><a:p><a:r><a:rPr lang="en-US" sz="2400"/><a:t>{}</a:t></a:r></a:p></p:txBody>"#,
        escape(text)
    )
}

fn cell_body(text: &str) -> String {
    format!(
        r#"<a:txBody><a:bodyPr/><a:p><a:r><a:t>{}</a:t></a:r></a:p></a:txBody>"#,
        escape(text)
    )
}

/// Builder for one slide's shape tree. Coordinates are in pixels.
#[derive(Default, Clone)]
pub struct SlideBuilder {
    shapes: Vec<String>,
}

impl SlideBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text_box(mut self, id: u32, text: &str, bounds: (f64, f64, f64, f64)) -> Self {
        self.shapes.push(format!(
            r#"<p:sp><p:nvSpPr><p:cNvPr id="{id}" name="TextBox {id}"/><p:cNvSpPr txBox="1"/><p:nvPr/></p:nvSpPr><p:spPr>{}</p:spPr>{}</p:sp>"#,
            xfrm("a", bounds),
            text_body(text),
        ));
        self
    }

    /// Title placeholder without its own position; it inherits from the layout.
    pub fn title(mut self, id: u32, text: &str) -> Self {
        self.shapes.push(format!(
            r#"<p:sp><p:nvSpPr><p:cNvPr id="{id}" name="Title {id}"/><p:cNvSpPr/><p:nvPr><p:ph type="title"/></p:nvPr></p:nvSpPr><p:spPr/>{}</p:sp>"#,
            text_body(text),
        ));
        self
    }

    /// Shape with a text body but nothing in it.
    pub fn empty_box(mut self, id: u32, bounds: (f64, f64, f64, f64)) -> Self {
        self.shapes.push(format!(
            r#"<p:sp><p:nvSpPr><p:cNvPr id="{id}" name="Empty {id}"/><p:cNvSpPr txBox="1"/><p:nvPr/></p:nvSpPr><p:spPr>{}</p:spPr><p:txBody><a:bodyPr/><a:p/></p:txBody></p:sp>"#,
            xfrm("a", bounds),
        ));
        self
    }

    /// Table at `origin` with the given grid. A `None` cell is a horizontal
    /// merge continuation of its left neighbour, which spans into it.
    pub fn table(
        mut self,
        id: u32,
        origin: (f64, f64),
        col_widths: &[f64],
        row_heights: &[f64],
        rows: &[&[Option<&str>]],
    ) -> Self {
        let grid: String = col_widths
            .iter()
            .map(|w| format!(r#"<a:gridCol w="{}"/>"#, px(*w)))
            .collect();

        let mut body = String::new();
        for (r, row) in rows.iter().enumerate() {
            body.push_str(&format!(r#"<a:tr h="{}">"#, px(row_heights[r])));
            for (c, cell) in row.iter().enumerate() {
                match cell {
                    Some(text) => {
                        let span = row[c + 1..].iter().take_while(|n| n.is_none()).count() + 1;
                        let span_attr = if span > 1 {
                            format!(r#" gridSpan="{}""#, span)
                        } else {
                            String::new()
                        };
                        body.push_str(&format!("<a:tc{}>{}</a:tc>", span_attr, cell_body(text)));
                    }
                    None => body.push_str(&format!(r#"<a:tc hMerge="1">{}</a:tc>"#, cell_body(""))),
                }
            }
            body.push_str("</a:tr>");
        }

        let width: f64 = col_widths.iter().sum();
        let height: f64 = row_heights.iter().sum();
        self.shapes.push(format!(
            r#"<p:graphicFrame><p:nvGraphicFramePr><p:cNvPr id="{id}" name="Table {id}"/><p:cNvGraphicFramePr/><p:nvPr/></p:nvGraphicFramePr>{}<a:graphic><a:graphicData uri="http://schemas.openxmlformats.org/drawingml/2006/table"><a:tbl><a:tblGrid>{}</a:tblGrid>{}</a:tbl></a:graphicData></a:graphic></p:graphicFrame>"#,
            xfrm("p", (origin.0, origin.1, width, height)),
            grid,
            body,
        ));
        self
    }

    fn xml(&self) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><p:sld {}><p:cSld><p:spTree><p:nvGrpSpPr><p:cNvPr id="1" name=""/><p:cNvGrpSpPr/><p:nvPr/></p:nvGrpSpPr><p:grpSpPr/>{}</p:spTree></p:cSld></p:sld>"#,
            NS,
            self.shapes.concat()
        )
    }
}

/// Builder for a minimal but well-formed `.pptx` package.
pub struct DeckBuilder {
    width_px: f64,
    height_px: f64,
    slides: Vec<SlideBuilder>,
    layout_title: Option<(f64, f64, f64, f64)>,
}

impl DeckBuilder {
    /// A 1280x720 pixel (16:9) deck.
    pub fn new() -> Self {
        Self {
            width_px: 1280.0,
            height_px: 720.0,
            slides: Vec::new(),
            layout_title: None,
        }
    }

    pub fn size(mut self, width_px: f64, height_px: f64) -> Self {
        self.width_px = width_px;
        self.height_px = height_px;
        self
    }

    pub fn slide(mut self, slide: SlideBuilder) -> Self {
        self.slides.push(slide);
        self
    }

    /// Gives every slide a layout whose title placeholder sits at `bounds`.
    pub fn layout_title(mut self, bounds: (f64, f64, f64, f64)) -> Self {
        self.layout_title = Some(bounds);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let mut add = |name: &str, content: &str| {
            zip.start_file(name, SimpleFileOptions::default()).unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        };

        add("[Content_Types].xml", r#"<?xml version="1.0" encoding="UTF-8"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"/>"#);

        let ids: String = (0..self.slides.len())
            .map(|i| format!(r#"<p:sldId id="{}" r:id="rId{}"/>"#, 256 + i, i + 1))
            .collect();
        add(
            "ppt/presentation.xml",
            &format!(
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><p:presentation {}><p:sldIdLst>{}</p:sldIdLst><p:sldSz cx="{}" cy="{}"/></p:presentation>"#,
                NS,
                ids,
                px(self.width_px),
                px(self.height_px)
            ),
        );

        let rels: String = (0..self.slides.len())
            .map(|i| {
                format!(
                    r#"<Relationship Id="rId{}" Type="{}" Target="slides/slide{}.xml"/>"#,
                    i + 1,
                    REL_SLIDE,
                    i + 1
                )
            })
            .collect();
        add(
            "ppt/_rels/presentation.xml.rels",
            &format!(r#"<?xml version="1.0" encoding="UTF-8"?><Relationships xmlns="{}">{}</Relationships>"#, REL_NS, rels),
        );

        for (i, slide) in self.slides.iter().enumerate() {
            add(&format!("ppt/slides/slide{}.xml", i + 1), &slide.xml());
            if self.layout_title.is_some() {
                add(
                    &format!("ppt/slides/_rels/slide{}.xml.rels", i + 1),
                    &format!(
                        r#"<?xml version="1.0" encoding="UTF-8"?><Relationships xmlns="{}"><Relationship Id="rId1" Type="{}" Target="../slideLayouts/slideLayout1.xml"/></Relationships>"#,
                        REL_NS, REL_LAYOUT
                    ),
                );
            }
        }

        if let Some(bounds) = self.layout_title {
            add(
                "ppt/slideLayouts/slideLayout1.xml",
                &format!(
                    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><p:sldLayout {}><p:cSld><p:spTree><p:nvGrpSpPr><p:cNvPr id="1" name=""/><p:cNvGrpSpPr/><p:nvPr/></p:nvGrpSpPr><p:grpSpPr/><p:sp><p:nvSpPr><p:cNvPr id="2" name="Title"/><p:cNvSpPr/><p:nvPr><p:ph type="title"/></p:nvPr></p:nvSpPr><p:spPr>{}</p:spPr></p:sp></p:spTree></p:cSld></p:sldLayout>"#,
                    NS,
                    xfrm("a", bounds)
                ),
            );
        }

        drop(add);
        zip.finish().unwrap().into_inner()
    }

    pub fn write_to(&self, path: &Path) {
        std::fs::write(path, self.build()).unwrap();
    }
}

impl Default for DeckBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A deck of `slides` slides, each with one distinct text box.
pub fn simple_deck(label: &str, slides: usize) -> DeckBuilder {
    (1..=slides).fold(DeckBuilder::new(), |deck, n| {
        deck.slide(SlideBuilder::new().text_box(
            2,
            &format!("{} slide {}", label, n),
            (100.0, 80.0 * n as f64, 600.0, 60.0),
        ))
    })
}

/// Builder for a LibreOffice-style SVG export of one slide.
pub struct SvgBuilder {
    width: f64,
    height: f64,
    scale: f64,
    body: String,
}

impl SvgBuilder {
    /// Viewport of `width` x `height` CSS pixels; user space is `scale` times larger.
    pub fn new(width: f64, height: f64, scale: f64) -> Self {
        Self {
            width,
            height,
            scale,
            body: String::new(),
        }
    }

    /// Adds a text shape group; `bounds` are in slide pixels.
    pub fn text_shape(mut self, text: &str, (x, y, w, h): (f64, f64, f64, f64)) -> Self {
        let s = self.scale;
        self.body.push_str(&format!(
            r#"<g class="TextShape"><rect class="BoundingBox" stroke="none" fill="none" x="{}" y="{}" width="{}" height="{}"/><text class="SVGTextShape"><tspan class="TextParagraph"><tspan class="TextPosition" x="{}" y="{}">{}</tspan></tspan></text></g>"#,
            x * s,
            y * s,
            w * s,
            h * s,
            x * s,
            (y + h) * s,
            escape(text)
        ));
        self
    }

    pub fn build(&self) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?><svg xmlns="http://www.w3.org/2000/svg" version="1.2" width="{}px" height="{}px" viewBox="0 0 {} {}">{}</svg>"#,
            self.width,
            self.height,
            self.width * self.scale,
            self.height * self.scale,
            self.body
        )
    }
}
