#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

pub mod fs;
#[cfg(feature = "s3")]
pub mod s3;

use std::fmt;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Local,
    S3,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Local => f.write_str("local"),
            BackendKind::S3 => f.write_str("s3"),
        }
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid storage key {0:?}")]
    InvalidKey(String),
    #[error("object already exists: {key}")]
    AlreadyExists { key: String },
    #[error("{kind} backend io error for {key}: {source}")]
    Io {
        kind: BackendKind,
        key: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{kind} backend error for {key}: {message}")]
    Backend {
        kind: BackendKind,
        key: String,
        message: String,
    },
    #[error("storage runtime error: {0}")]
    Runtime(String),
}

/// Uniform write-side interface over the dataset storage backends.
///
/// Keys are slash-separated relative paths (`v1/images/sushi/000000.jpg`).
/// `exists` must observe the effect of an earlier `put` of the same key and
/// have no side effect of its own.
pub trait StorageBackend: Send + Sync + 'static {
    fn kind(&self) -> BackendKind;

    fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// Write `bytes` under `key`, overwriting any existing object. Returns
    /// the backend URI for the key.
    fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<String, StorageError>;

    /// Like `put`, but fails with `AlreadyExists` instead of overwriting.
    fn put_new(&self, key: &str, bytes: &[u8], content_type: &str)
        -> Result<String, StorageError>;

    /// URI a reader would use for `key`: a relative path for the local
    /// backend, a fully qualified object URI for the cloud backend.
    fn uri_for(&self, key: &str) -> String;

    /// Number of objects directly under `prefix` whose name ends with
    /// `suffix`. Used for resume accounting; a missing prefix counts as 0.
    fn count_prefix(&self, prefix: &str, suffix: &str) -> Result<u64, StorageError>;
}

pub(crate) fn unix_time_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .min(u64::MAX as u128) as u64
}

pub(crate) fn validate_key(key: &str) -> Result<(), StorageError> {
    let invalid = key.trim().is_empty()
        || key.starts_with('/')
        || key.ends_with('/')
        || key.contains('\\')
        || key.split('/').any(|seg| seg.is_empty() || seg == "..");
    if invalid {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}
