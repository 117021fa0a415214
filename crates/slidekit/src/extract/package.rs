//! OOXML presentation package access.
//!
//! Resolves `presentation.xml` and the relationship parts so slides can be
//! visited in presentation order, each with its layout and master.

use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::path::Path;

use crate::error::ExtractionError;
use crate::model::SlideGeometry;
use crate::xml::{self, Element};

pub const EMU_PER_PIXEL: f64 = 9525.0;

/// Default 4:3 slide size used when `sldSz` is absent.
const DEFAULT_SLIDE_CX: i64 = 9_144_000;
const DEFAULT_SLIDE_CY: i64 = 6_858_000;

const REL_SLIDE_LAYOUT: &str = "/slideLayout";
const REL_SLIDE_MASTER: &str = "/slideMaster";

#[derive(Debug)]
pub struct SlidePart {
    /// 1-based position in the presentation.
    pub number: u32,
    pub part_name: String,
    pub root: Element,
    pub layout: Option<String>,
}

/// An opened presentation with every slide parsed.
#[derive(Debug)]
pub struct Deck {
    pub slide_width_emu: i64,
    pub slide_height_emu: i64,
    pub slides: Vec<SlidePart>,
    layouts: HashMap<String, Element>,
    layout_masters: HashMap<String, String>,
    masters: HashMap<String, Element>,
}

struct Package {
    archive: zip::ZipArchive<Cursor<Vec<u8>>>,
}

impl Package {
    fn read_part(&mut self, name: &str) -> Result<String, ExtractionError> {
        let mut file = self
            .archive
            .by_name(name)
            .map_err(|_| ExtractionError::MissingPart(name.to_string()))?;
        let mut content = String::new();
        file.read_to_string(&mut content)
            .map_err(|e| ExtractionError::Xml {
                part: name.to_string(),
                message: e.to_string(),
            })?;
        Ok(content)
    }

    fn parse_part(&mut self, name: &str) -> Result<Element, ExtractionError> {
        let content = self.read_part(name)?;
        xml::parse_document(&content).map_err(|e| ExtractionError::Xml {
            part: name.to_string(),
            message: e.to_string(),
        })
    }

    /// Relationships of a part as `(id, type, resolved target)`.
    fn relationships(
        &mut self,
        part_name: &str,
    ) -> Result<Vec<(String, String, String)>, ExtractionError> {
        let rels_name = rels_path_for(part_name);
        let root = match self.parse_part(&rels_name) {
            Ok(root) => root,
            Err(ExtractionError::MissingPart(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let base_dir = part_dir(part_name);
        Ok(root
            .children_named("Relationship")
            .filter(|rel| rel.attr("TargetMode") != Some("External"))
            .filter_map(|rel| {
                let id = rel.attr("Id")?.to_string();
                let rel_type = rel.attr("Type").unwrap_or_default().to_string();
                let target = resolve_target(&base_dir, rel.attr("Target")?);
                Some((id, rel_type, target))
            })
            .collect())
    }
}

impl Deck {
    pub fn open(path: &Path) -> Result<Self, ExtractionError> {
        let bytes = std::fs::read(path).map_err(|e| ExtractionError::ReadDocument {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_bytes(bytes)
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, ExtractionError> {
        let archive = zip::ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| ExtractionError::Archive(e.to_string()))?;
        let mut package = Package { archive };

        let presentation = package.parse_part("ppt/presentation.xml")?;
        let (slide_width_emu, slide_height_emu) = match presentation.child("sldSz") {
            Some(size) => (
                size.attr_i64("cx").unwrap_or(DEFAULT_SLIDE_CX),
                size.attr_i64("cy").unwrap_or(DEFAULT_SLIDE_CY),
            ),
            None => (DEFAULT_SLIDE_CX, DEFAULT_SLIDE_CY),
        };
        if slide_width_emu <= 0 || slide_height_emu <= 0 {
            return Err(ExtractionError::InvalidDocument(format!(
                "slide size {}x{} EMU",
                slide_width_emu, slide_height_emu
            )));
        }

        let presentation_rels: HashMap<String, String> = package
            .relationships("ppt/presentation.xml")?
            .into_iter()
            .map(|(id, _, target)| (id, target))
            .collect();

        let slide_ids: Vec<String> = presentation
            .child("sldIdLst")
            .map(|list| {
                list.children_named("sldId")
                    .filter_map(|s| s.prefixed_attr("id").map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        if slide_ids.is_empty() {
            return Err(ExtractionError::InvalidDocument(
                "presentation has no slides".to_string(),
            ));
        }

        let mut deck = Deck {
            slide_width_emu,
            slide_height_emu,
            slides: Vec::with_capacity(slide_ids.len()),
            layouts: HashMap::new(),
            layout_masters: HashMap::new(),
            masters: HashMap::new(),
        };

        for (index, rel_id) in slide_ids.iter().enumerate() {
            let part_name = presentation_rels.get(rel_id).ok_or_else(|| {
                ExtractionError::InvalidDocument(format!(
                    "slide relationship {} has no target",
                    rel_id
                ))
            })?;
            let root = package.parse_part(part_name)?;

            let layout = package
                .relationships(part_name)?
                .into_iter()
                .find(|(_, rel_type, _)| rel_type.ends_with(REL_SLIDE_LAYOUT))
                .map(|(_, _, target)| target);

            if let Some(ref layout_name) = layout {
                deck.load_layout(&mut package, layout_name)?;
            }

            deck.slides.push(SlidePart {
                number: index as u32 + 1,
                part_name: part_name.clone(),
                root,
                layout,
            });
        }

        Ok(deck)
    }

    fn load_layout(
        &mut self,
        package: &mut Package,
        layout_name: &str,
    ) -> Result<(), ExtractionError> {
        if self.layouts.contains_key(layout_name) {
            return Ok(());
        }
        let layout = package.parse_part(layout_name)?;
        self.layouts.insert(layout_name.to_string(), layout);

        let master = package
            .relationships(layout_name)?
            .into_iter()
            .find(|(_, rel_type, _)| rel_type.ends_with(REL_SLIDE_MASTER))
            .map(|(_, _, target)| target);

        if let Some(master_name) = master {
            if !self.masters.contains_key(&master_name) {
                let root = package.parse_part(&master_name)?;
                self.masters.insert(master_name.clone(), root);
            }
            self.layout_masters
                .insert(layout_name.to_string(), master_name);
        }
        Ok(())
    }

    pub fn slide_count(&self) -> usize {
        self.slides.len()
    }

    pub fn geometry(&self) -> SlideGeometry {
        SlideGeometry {
            width_px: self.slide_width_emu as f64 / EMU_PER_PIXEL,
            height_px: self.slide_height_emu as f64 / EMU_PER_PIXEL,
        }
    }

    pub fn layout_for(&self, slide: &SlidePart) -> Option<&Element> {
        slide.layout.as_ref().and_then(|l| self.layouts.get(l))
    }

    pub fn master_for(&self, slide: &SlidePart) -> Option<&Element> {
        slide
            .layout
            .as_ref()
            .and_then(|l| self.layout_masters.get(l))
            .and_then(|m| self.masters.get(m))
    }
}

fn rels_path_for(part_name: &str) -> String {
    match part_name.rsplit_once('/') {
        Some((dir, file)) => format!("{}/_rels/{}.rels", dir, file),
        None => format!("_rels/{}.rels", part_name),
    }
}

fn part_dir(part_name: &str) -> String {
    part_name
        .rsplit_once('/')
        .map(|(dir, _)| dir.to_string())
        .unwrap_or_default()
}

/// Resolves a relationship target against the directory of its source part.
fn resolve_target(base_dir: &str, target: &str) -> String {
    if let Some(absolute) = target.strip_prefix('/') {
        return absolute.to_string();
    }

    let mut segments: Vec<&str> = base_dir.split('/').filter(|s| !s.is_empty()).collect();
    for segment in target.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}
