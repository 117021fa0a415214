//! Minimal element tree built on top of `quick_xml`.
//!
//! Slide parts and rendered SVGs are small, and both are walked with a lot of
//! look-ahead (placeholder lookups, group transforms, sibling bounding
//! boxes), so they are loaded into a tree once instead of being matched
//! event by event.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

#[derive(Error, Debug)]
#[error("XML error at byte {position}: {message}")]
pub struct XmlError {
    pub position: u64,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct Element {
    /// Local name without namespace prefix.
    pub name: String,
    /// Attributes keyed by their qualified name (`r:id`, `x`).
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Element>,
    /// Character data directly inside this element.
    pub text: String,
}

impl Element {
    fn from_start(e: &BytesStart<'_>) -> Self {
        let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
        let attrs = e
            .attributes()
            .flatten()
            .map(|attr| {
                let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
                let raw = String::from_utf8_lossy(&attr.value).to_string();
                let value = quick_xml::escape::unescape(&raw)
                    .map(|v| v.to_string())
                    .unwrap_or(raw);
                (key, value)
            })
            .collect();
        Self {
            name,
            attrs,
            children: Vec::new(),
            text: String::new(),
        }
    }

    /// Looks up an attribute by exact qualified name, then by local name.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .or_else(|| {
                self.attrs
                    .iter()
                    .find(|(k, _)| k.rsplit(':').next() == Some(name))
            })
            .map(|(_, v)| v.as_str())
    }

    /// Looks up a namespace-prefixed attribute (`r:id`) regardless of prefix.
    pub fn prefixed_attr(&self, local: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k.contains(':') && k.rsplit(':').next() == Some(local))
            .map(|(_, v)| v.as_str())
    }

    pub fn attr_i64(&self, name: &str) -> Option<i64> {
        self.attr(name).and_then(|v| v.trim().parse().ok())
    }

    pub fn attr_f64(&self, name: &str) -> Option<f64> {
        self.attr(name).and_then(parse_length)
    }

    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Follows a chain of child names.
    pub fn path(&self, names: &[&str]) -> Option<&Element> {
        names.iter().try_fold(self, |el, name| el.child(name))
    }

    /// First element with the given name in document order, including `self`.
    pub fn find(&self, name: &str) -> Option<&Element> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(name))
    }

    /// All descendants (and `self`) with the given name, in document order.
    pub fn find_all<'a>(&'a self, name: &str, out: &mut Vec<&'a Element>) {
        if self.name == name {
            out.push(self);
        }
        for child in &self.children {
            child.find_all(name, out);
        }
    }

    /// Concatenated character data of this element and its descendants.
    pub fn deep_text(&self) -> String {
        let mut out = self.text.clone();
        for child in &self.children {
            out.push_str(&child.deep_text());
        }
        out
    }
}

/// Parses a numeric attribute, tolerating unit suffixes such as `px` or `mm`.
pub fn parse_length(value: &str) -> Option<f64> {
    let trimmed = value.trim();
    let end = trimmed
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E')))
        .map(|(i, _)| i)
        .unwrap_or(trimmed.len());
    trimmed[..end].parse().ok()
}

/// Parses a document into its root element.
pub fn parse_document(xml: &str) -> Result<Element, XmlError> {
    let mut reader = Reader::from_str(xml);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        let event = reader.read_event().map_err(|e| XmlError {
            position: reader.buffer_position() as u64,
            message: e.to_string(),
        })?;

        match event {
            Event::Start(ref e) => stack.push(Element::from_start(e)),
            Event::Empty(ref e) => {
                let element = Element::from_start(e);
                attach(&mut stack, &mut root, element);
            }
            Event::End(_) => {
                let element = stack.pop().ok_or_else(|| XmlError {
                    position: reader.buffer_position() as u64,
                    message: "unbalanced end tag".to_string(),
                })?;
                attach(&mut stack, &mut root, element);
            }
            Event::Text(ref e) => {
                if let Some(current) = stack.last_mut() {
                    let raw = String::from_utf8_lossy(e);
                    match quick_xml::escape::unescape(&raw) {
                        Ok(text) => current.text.push_str(&text),
                        Err(_) => current.text.push_str(&raw),
                    }
                }
            }
            Event::GeneralRef(ref e) => {
                if let Some(current) = stack.last_mut() {
                    let reference = format!("&{};", String::from_utf8_lossy(e));
                    if let Ok(text) = quick_xml::escape::unescape(&reference) {
                        current.text.push_str(&text);
                    }
                }
            }
            Event::CData(ref e) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&String::from_utf8_lossy(e));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(XmlError {
            position: reader.buffer_position() as u64,
            message: format!("unclosed element <{}>", stack[stack.len() - 1].name),
        });
    }

    root.ok_or_else(|| XmlError {
        position: 0,
        message: "document has no root element".to_string(),
    })
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None => {
            if root.is_none() {
                *root = Some(element);
            }
        }
    }
}
