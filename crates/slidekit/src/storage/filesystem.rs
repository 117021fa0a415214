use std::io::Write;
use std::path::{Component, Path, PathBuf};

use crate::error::StorageError;

/// Session assets (slide images and thumbnails) under one root directory.
///
/// Assets are addressed by refs relative to the root, e.g.
/// `<session>/slides/slide_3.svg`, so stored results stay valid when the
/// data directory moves.
pub struct AssetStore {
    root: PathBuf,
}

impl AssetStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Writes `content` to `<session>/<kind>/<filename>` and returns its ref.
    ///
    /// The file is written next to its destination and renamed into place,
    /// so a retried write replaces a partial one instead of failing.
    pub fn store(
        &self,
        session_id: &str,
        kind: &str,
        filename: &str,
        content: &[u8],
    ) -> Result<String, StorageError> {
        let asset_ref = format!("{}/{}/{}", session_id, kind, filename);
        let path = self.resolve(&asset_ref)?;
        let dir = path.parent().unwrap_or(&self.root).to_path_buf();
        self.ensure_directory(&dir)?;

        let tmp = dir.join(format!(".{}.tmp", filename));
        let write = || -> std::io::Result<()> {
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(content)?;
            file.sync_all()?;
            std::fs::rename(&tmp, &path)
        };
        write().map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            StorageError::WriteFile {
                path: path.clone(),
                source: e,
            }
        })?;

        Ok(asset_ref)
    }

    pub fn read(&self, asset_ref: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.resolve(asset_ref)?;
        std::fs::read(&path).map_err(|e| StorageError::ReadFile { path, source: e })
    }

    /// Absolute path of an asset ref. Refs escaping the root are rejected.
    pub fn resolve(&self, asset_ref: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(asset_ref);
        let safe = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !safe || asset_ref.is_empty() {
            return Err(StorageError::InvalidRef(asset_ref.to_string()));
        }
        Ok(self.root.join(relative))
    }

    /// Deletes every asset of a session. Missing sessions are not an error.
    pub fn remove_session(&self, session_id: &str) -> Result<(), StorageError> {
        let dir = self.resolve(session_id)?;
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::WriteFile {
                path: dir,
                source: e,
            }),
        }
    }

    fn ensure_directory(&self, path: &Path) -> Result<(), StorageError> {
        if !path.exists() {
            std::fs::create_dir_all(path).map_err(|e| StorageError::CreateDirectory {
                path: path.to_path_buf(),
                source: e,
            })?;
        }
        Ok(())
    }
}
