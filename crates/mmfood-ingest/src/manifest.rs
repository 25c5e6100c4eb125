use chrono::Utc;
use tracing::info;

use mmfood_core::types::{label_table_key, manifest_key, DatasetVersion, SampleRecord};
use mmfood_store::{StorageBackend, StorageError};

use crate::config::IngestConfig;
use crate::labels::class_distribution;

/// A version is considered finalized once its manifest or label table is
/// present at the version root.
pub fn version_exists(store: &dyn StorageBackend, version: &str) -> Result<bool, StorageError> {
    Ok(store.exists(&manifest_key(version))? || store.exists(&label_table_key(version))?)
}

/// Assemble the manifest for a completed run.
pub fn build_manifest(cfg: &IngestConfig, records: &[SampleRecord]) -> DatasetVersion {
    DatasetVersion {
        version: cfg.version.clone(),
        created_at: Utc::now(),
        dishes: cfg.dishes.iter().map(|d| d.name.clone()).collect(),
        per_class: cfg.per_class,
        total_samples: records.len() as u64,
        class_distribution: class_distribution(records),
        source_id: cfg.source_id.clone(),
        seed: cfg.seed,
    }
}

/// Persist the label table and manifest, in that order, as the last two
/// writes of the run. The manifest lands last so its presence marks a fully
/// finalized version.
///
/// Without `overwrite`, both writes are conditional creates; losing that
/// race to a concurrent finalizer surfaces as `AlreadyExists` instead of a
/// silent overwrite.
pub fn write_artifacts(
    store: &dyn StorageBackend,
    version: &str,
    labels_csv: &[u8],
    manifest: &DatasetVersion,
    overwrite: bool,
) -> Result<(), WriteArtifactsError> {
    let manifest_bytes = serde_json::to_vec_pretty(manifest)?;

    let put = |key: &str, bytes: &[u8], content_type: &str| -> Result<String, StorageError> {
        if overwrite {
            store.put(key, bytes, content_type)
        } else {
            store.put_new(key, bytes, content_type)
        }
    };

    let labels_uri = put(&label_table_key(version), labels_csv, "text/csv")?;
    let manifest_uri = put(&manifest_key(version), &manifest_bytes, "application/json")?;

    info!(
        target: "mmfood_ingest",
        event = "artifacts_written",
        version,
        labels = labels_uri.as_str(),
        manifest = manifest_uri.as_str(),
        total_samples = manifest.total_samples,
        "wrote label table and manifest"
    );
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum WriteArtifactsError {
    #[error("manifest encode failed: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Storage(#[from] StorageError),
}
