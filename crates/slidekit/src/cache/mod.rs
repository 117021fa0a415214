//! Content-addressed cache of finished results.
//!
//! Keys are SHA-256 digests of the document bytes and the parameters that
//! change the output. Entries live in a bounded in-memory cache backed by
//! one JSON file per key, so hits survive restarts. Losing an entry only
//! costs a recomputation.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use moka::sync::Cache;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::model::{CombinedResult, JobParams, OUTPUT_FORMAT_VERSION};
use crate::sanitize::short_key;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub cache_key: String,
    pub created_at: DateTime<Utc>,
    /// Session whose stored assets the result points at.
    pub result_ref: String,
    pub result: CombinedResult,
}

impl CacheEntry {
    pub fn new(cache_key: &str, result: CombinedResult) -> Self {
        Self {
            cache_key: cache_key.to_string(),
            created_at: Utc::now(),
            result_ref: result.session_id.clone(),
            result,
        }
    }
}

/// Derives the cache key for a document and its parameters.
///
/// Languages do not influence rendering or extraction and are left out.
pub fn key_for(document: &[u8], params: &JobParams) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document);
    hasher.update(OUTPUT_FORMAT_VERSION.to_le_bytes());
    hasher.update([u8::from(params.want_thumbnails)]);
    hex::encode(hasher.finalize())
}

pub struct ResultCache {
    enabled: bool,
    memory: Cache<String, CacheEntry>,
    dir: Option<PathBuf>,
    ttl: Duration,
}

impl ResultCache {
    pub fn new(config: &CacheConfig, cache_dir: &Path) -> Self {
        let ttl = Duration::from_secs(config.ttl_secs);
        let memory = Cache::builder()
            .max_capacity(config.max_entries)
            .time_to_live(ttl)
            .build();
        Self {
            enabled: config.enabled,
            memory,
            dir: config.persist_to_disk.then(|| cache_dir.to_path_buf()),
            ttl,
        }
    }

    /// A cache that never hits.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            memory: Cache::new(0),
            dir: None,
            ttl: Duration::ZERO,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn entry_path(&self, key: &str) -> Option<PathBuf> {
        let safe = !key.is_empty() && key.chars().all(|c| c.is_ascii_hexdigit());
        match (&self.dir, safe) {
            (Some(dir), true) => Some(dir.join(format!("{}.json", key))),
            _ => None,
        }
    }

    fn is_expired(&self, entry: &CacheEntry) -> bool {
        let age = Utc::now().signed_duration_since(entry.created_at);
        age.to_std().map(|age| age > self.ttl).unwrap_or(false)
    }

    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        if !self.enabled {
            return None;
        }
        if let Some(entry) = self.memory.get(key) {
            log::debug!("Cache hit (memory) for {}", short_key(key));
            return Some(entry);
        }

        let path = self.entry_path(key)?;
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                log::warn!("Cannot read cache file {}: {}", path.display(), e);
                return None;
            }
        };

        match serde_json::from_str::<CacheEntry>(&content) {
            Ok(entry) if entry.cache_key == key && !self.is_expired(&entry) => {
                log::debug!("Cache hit (disk) for {}", short_key(key));
                self.memory.insert(key.to_string(), entry.clone());
                Some(entry)
            }
            Ok(_) => {
                log::debug!("Dropping stale cache file {}", path.display());
                let _ = std::fs::remove_file(&path);
                None
            }
            Err(e) => {
                log::warn!("Deleting corrupt cache file {}: {}", path.display(), e);
                let _ = std::fs::remove_file(&path);
                None
            }
        }
    }

    /// Stores an entry. Writing the same key again replaces it.
    pub fn put(&self, key: &str, entry: CacheEntry) -> Result<(), CacheError> {
        if !self.enabled {
            return Ok(());
        }
        if let Some(path) = self.entry_path(key) {
            write_atomic(&path, &serde_json::to_vec_pretty(&entry)?)?;
        }
        self.memory.insert(key.to_string(), entry);
        log::debug!("Cached result for {}", short_key(key));
        Ok(())
    }

    pub fn clear_entry(&self, key: &str) -> Result<(), CacheError> {
        self.memory.invalidate(key);
        if let Some(path) = self.entry_path(key) {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => return Err(CacheError::Io { path, source }),
            }
        }
        Ok(())
    }

    pub fn clear_all(&self) -> Result<(), CacheError> {
        self.memory.invalidate_all();
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(source) => {
                return Err(CacheError::Io {
                    path: dir.clone(),
                    source,
                })
            }
        };
        for path in entries.filter_map(|e| e.ok().map(|e| e.path())) {
            if path.extension().is_some_and(|e| e == "json") {
                std::fs::remove_file(&path).map_err(|source| CacheError::Io {
                    path: path.clone(),
                    source,
                })?;
            }
        }
        Ok(())
    }
}

fn write_atomic(path: &Path, content: &[u8]) -> Result<(), CacheError> {
    let io_err = |source| CacheError::Io {
        path: path.to_path_buf(),
        source,
    };
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(io_err)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
    tmp.write_all(content).map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ResultStatus;

    fn result(session: &str) -> CombinedResult {
        CombinedResult::from_parts(session, &[], &[], ResultStatus::Completed)
    }

    fn cache(dir: &Path) -> ResultCache {
        ResultCache::new(&CacheConfig::default(), dir)
    }

    #[test]
    fn test_key_depends_on_bytes_and_thumbnails_only() {
        let params = JobParams::default();
        let with_langs = JobParams {
            source_lang: Some("en".into()),
            target_lang: Some("de".into()),
            ..JobParams::default()
        };
        let thumbs = JobParams {
            want_thumbnails: true,
            ..JobParams::default()
        };

        let key = key_for(b"deck", &params);
        assert_eq!(key.len(), 64);
        assert_eq!(key, key_for(b"deck", &with_langs));
        assert_ne!(key, key_for(b"deck", &thumbs));
        assert_ne!(key, key_for(b"other", &params));
    }

    #[test]
    fn test_put_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path());
        let key = key_for(b"deck", &JobParams::default());

        assert!(cache.get(&key).is_none());
        cache.put(&key, CacheEntry::new(&key, result("s1"))).unwrap();

        let entry = cache.get(&key).unwrap();
        assert_eq!(entry.result_ref, "s1");
    }

    #[test]
    fn test_put_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path());
        let key = key_for(b"deck", &JobParams::default());

        cache.put(&key, CacheEntry::new(&key, result("s1"))).unwrap();
        cache.put(&key, CacheEntry::new(&key, result("s1"))).unwrap();

        assert_eq!(cache.get(&key).unwrap().result, result("s1"));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_disk_entries_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        let key = key_for(b"deck", &JobParams::default());
        cache(dir.path())
            .put(&key, CacheEntry::new(&key, result("s1")))
            .unwrap();

        let reopened = cache(dir.path());
        assert_eq!(reopened.get(&key).unwrap().result_ref, "s1");
    }

    #[test]
    fn test_corrupt_file_is_a_miss_and_removed() {
        let dir = tempfile::tempdir().unwrap();
        let key = key_for(b"deck", &JobParams::default());
        let path = dir.path().join(format!("{}.json", key));
        std::fs::write(&path, "{ truncated").unwrap();

        assert!(cache(dir.path()).get(&key).is_none());
        assert!(!path.exists());
    }

    #[test]
    fn test_clear_entry_and_all() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path());
        let a = key_for(b"a", &JobParams::default());
        let b = key_for(b"b", &JobParams::default());
        cache.put(&a, CacheEntry::new(&a, result("sa"))).unwrap();
        cache.put(&b, CacheEntry::new(&b, result("sb"))).unwrap();

        cache.clear_entry(&a).unwrap();
        assert!(cache.get(&a).is_none());
        assert!(cache.get(&b).is_some());

        cache.clear_all().unwrap();
        assert!(cache.get(&b).is_none());
    }

    #[test]
    fn test_disabled_cache_never_hits() {
        let cache = ResultCache::disabled();
        let key = key_for(b"deck", &JobParams::default());
        cache.put(&key, CacheEntry::new(&key, result("s1"))).unwrap();
        assert!(cache.get(&key).is_none());
    }
}
