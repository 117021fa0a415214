//! Derived, translation-oriented fields of a shape record.

use std::sync::LazyLock;

use regex::Regex;

use crate::model::{ShapeRecord, TextSegment};

pub const TITLE_PRIORITY: u8 = 10;
pub const SUBTITLE_PRIORITY: u8 = 8;
pub const DEFAULT_PRIORITY: u8 = 5;

pub const MAX_SEGMENT_CHARS: usize = 100;

static RE_SENTENCE_END: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[.!?]+\s+").unwrap());

/// Fills priority, counts and segments from the record's text and flags.
pub fn annotate(record: &mut ShapeRecord) {
    record.priority = priority(record.is_title, record.is_subtitle);
    record.word_count = word_count(&record.text);
    record.char_count = record.text.chars().count();
    record.text_segments = segment_text(&record.text, MAX_SEGMENT_CHARS);
}

pub fn priority(is_title: bool, is_subtitle: bool) -> u8 {
    if is_title {
        TITLE_PRIORITY
    } else if is_subtitle {
        SUBTITLE_PRIORITY
    } else {
        DEFAULT_PRIORITY
    }
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Splits text into sentences, keeping the terminating punctuation.
fn sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    for m in RE_SENTENCE_END.find_iter(text) {
        let end = m.start() + m.as_str().trim_end().len();
        let sentence = text[start..end].trim();
        if !sentence.is_empty() {
            out.push(sentence);
        }
        start = m.end();
    }
    let rest = text[start..].trim();
    if !rest.is_empty() {
        out.push(rest);
    }
    out
}

fn make_segment(index: usize, text: &str, complete: bool) -> TextSegment {
    TextSegment {
        segment_index: index,
        text: text.to_string(),
        is_complete_sentence: complete,
        word_count: word_count(text),
        char_count: text.chars().count(),
    }
}

/// Breaks text into pieces of at most `max_chars` characters.
///
/// Sentences are packed together while they fit; a sentence longer than the
/// limit is split at word boundaries and its pieces are marked incomplete.
pub fn segment_text(text: &str, max_chars: usize) -> Vec<TextSegment> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }
    if text.chars().count() <= max_chars {
        return vec![make_segment(0, text, true)];
    }

    let mut segments = Vec::new();
    let mut current = String::new();

    for sentence in sentences(text) {
        let sentence_len = sentence.chars().count();

        if sentence_len > max_chars {
            if !current.is_empty() {
                segments.push(make_segment(segments.len(), &current, true));
                current.clear();
            }
            let mut piece = String::new();
            for word in sentence.split_whitespace() {
                if !piece.is_empty() && piece.chars().count() + 1 + word.chars().count() > max_chars
                {
                    segments.push(make_segment(segments.len(), &piece, false));
                    piece.clear();
                }
                if !piece.is_empty() {
                    piece.push(' ');
                }
                piece.push_str(word);
            }
            if !piece.is_empty() {
                segments.push(make_segment(segments.len(), &piece, false));
            }
            continue;
        }

        if !current.is_empty() && current.chars().count() + 1 + sentence_len > max_chars {
            segments.push(make_segment(segments.len(), &current, true));
            current.clear();
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(sentence);
    }

    if !current.is_empty() {
        segments.push(make_segment(segments.len(), &current, true));
    }

    segments
}
