use std::io::Write;
use std::path::{Path, PathBuf};

use crate::{unix_time_ms, validate_key, BackendKind, StorageBackend, StorageError};

/// Local-filesystem backend: keys map to paths under a root directory.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    fn io_err(key: &str, source: std::io::Error) -> StorageError {
        StorageError::Io {
            kind: BackendKind::Local,
            key: key.to_string(),
            source,
        }
    }

    fn ensure_parent(path: &Path, key: &str) -> Result<(), StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Self::io_err(key, e))?;
        }
        Ok(())
    }
}

impl StorageBackend for FsStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.path_for(key)?;
        Ok(path.is_file())
    }

    fn put(&self, key: &str, bytes: &[u8], _content_type: &str) -> Result<String, StorageError> {
        let path = self.path_for(key)?;
        Self::ensure_parent(&path, key)?;

        // Write to a sibling temp file and rename, so a crashed run never
        // leaves a truncated object behind for the resume check to count.
        let file_name = path
            .file_name()
            .and_then(|s| s.to_str())
            .ok_or_else(|| StorageError::InvalidKey(key.to_string()))?;
        let mut tmp = path.clone();
        tmp.set_file_name(format!(
            "{file_name}.tmp.{}.{}",
            std::process::id(),
            unix_time_ms()
        ));

        let write = (|| -> Result<(), std::io::Error> {
            let mut f = std::fs::OpenOptions::new()
                .create_new(true)
                .write(true)
                .open(&tmp)?;
            f.write_all(bytes)?;
            f.sync_all()?;
            std::fs::rename(&tmp, &path)?;
            Ok(())
        })();
        if let Err(err) = write {
            let _ = std::fs::remove_file(&tmp);
            return Err(Self::io_err(key, err));
        }
        Ok(self.uri_for(key))
    }

    fn put_new(
        &self,
        key: &str,
        bytes: &[u8],
        _content_type: &str,
    ) -> Result<String, StorageError> {
        let path = self.path_for(key)?;
        Self::ensure_parent(&path, key)?;

        match std::fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&path)
        {
            Ok(mut f) => {
                f.write_all(bytes).map_err(|e| Self::io_err(key, e))?;
                f.sync_all().map_err(|e| Self::io_err(key, e))?;
                Ok(self.uri_for(key))
            }
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(StorageError::AlreadyExists {
                    key: key.to_string(),
                })
            }
            Err(err) => Err(Self::io_err(key, err)),
        }
    }

    fn uri_for(&self, key: &str) -> String {
        key.to_string()
    }

    fn count_prefix(&self, prefix: &str, suffix: &str) -> Result<u64, StorageError> {
        validate_key(prefix)?;
        let dir = self.root.join(prefix);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(Self::io_err(prefix, err)),
        };

        let mut count: u64 = 0;
        for entry in entries {
            let entry = entry.map_err(|e| Self::io_err(prefix, e))?;
            let meta = entry.metadata().map_err(|e| Self::io_err(prefix, e))?;
            if !meta.is_file() {
                continue;
            }
            if entry.file_name().to_string_lossy().ends_with(suffix) {
                count = count.saturating_add(1);
            }
        }
        Ok(count)
    }
}
