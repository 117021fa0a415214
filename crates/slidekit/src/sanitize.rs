//! Helpers for sanitizing data before it enters tracing span attributes.
//!
//! Uploaded decks often carry customer names in their paths, so spans only
//! ever see the file name.

use std::path::Path;

/// Returns only the filename component of a path (no directory).
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// Shortens a content hash for log lines.
pub fn short_key(key: &str) -> &str {
    let end = key
        .char_indices()
        .nth(12)
        .map(|(i, _)| i)
        .unwrap_or(key.len());
    &key[..end]
}
