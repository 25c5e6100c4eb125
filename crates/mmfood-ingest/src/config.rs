use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use mmfood_core::types::{validate_dish_labels, DishSpec, DishSpecError};
use mmfood_store::fs::FsStore;
use mmfood_store::{StorageBackend, StorageError};

/// Backend selection plus its location parameters.
#[derive(Debug, Clone)]
pub enum BackendConfig {
    Local { root: PathBuf },
    S3 { bucket: String, prefix: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("at least one dish is required")]
    NoDishes,
    #[error(transparent)]
    Dish(#[from] DishSpecError),
    #[error("dataset version must be non-empty")]
    EmptyVersion,
    #[error("s3 backend requested, but this build has no s3 support (rebuild with --features s3)")]
    S3Disabled,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Immutable run configuration, constructed once at startup and passed into
/// the pipeline.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub dishes: Vec<DishSpec>,
    pub per_class: u32,
    pub version: String,
    pub seed: u64,
    pub source_id: String,
    pub backend: BackendConfig,
    /// Replace an already-finalized version instead of refusing.
    pub overwrite: bool,
    pub http_timeout: Duration,
}

impl IngestConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dishes.is_empty() {
            return Err(ConfigError::NoDishes);
        }
        validate_dish_labels(&self.dishes)?;
        if self.version.trim().is_empty() {
            return Err(ConfigError::EmptyVersion);
        }
        Ok(())
    }

    /// Open the configured backend. The rest of the pipeline only sees the
    /// `StorageBackend` trait.
    pub fn open_backend(&self) -> Result<Arc<dyn StorageBackend>, ConfigError> {
        match &self.backend {
            BackendConfig::Local { root } => Ok(Arc::new(FsStore::new(root.clone()))),
            BackendConfig::S3 { bucket, prefix } => {
                #[cfg(feature = "s3")]
                {
                    let store = mmfood_store::s3::S3Store::from_env(bucket.clone(), prefix.clone())?;
                    Ok(Arc::new(store))
                }
                #[cfg(not(feature = "s3"))]
                {
                    let _ = (bucket, prefix);
                    Err(ConfigError::S3Disabled)
                }
            }
        }
    }
}
