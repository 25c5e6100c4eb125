use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// File name of the flat label table under the version root.
pub const LABEL_TABLE_FILE: &str = "labels.csv";
/// File name of the version manifest under the version root.
pub const MANIFEST_FILE: &str = "metadata.json";

/// Canonical label for a dish name: lowercase, trimmed, spaces to underscores.
pub fn slug(name: &str) -> String {
    name.trim().to_lowercase().replace(' ', "_")
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DishSpecError {
    #[error("dish name must be non-empty")]
    EmptyName,
    #[error("dish quota must be > 0")]
    ZeroQuota,
    #[error("duplicate dish label {0:?}")]
    DuplicateLabel(String),
}

/// One food class to sample: display name, derived label, per-class quota.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DishSpec {
    pub name: String,
    pub label: String,
    pub quota: u32,
}

impl DishSpec {
    pub fn new(name: impl Into<String>, quota: u32) -> Result<Self, DishSpecError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DishSpecError::EmptyName);
        }
        if quota == 0 {
            return Err(DishSpecError::ZeroQuota);
        }
        let label = slug(&name);
        Ok(Self { name, label, quota })
    }
}

/// Labels must be unique across a run; two dish names that slug to the same
/// label would collide on destination keys.
pub fn validate_dish_labels(dishes: &[DishSpec]) -> Result<(), DishSpecError> {
    let mut seen: std::collections::BTreeSet<&str> = std::collections::BTreeSet::new();
    for d in dishes {
        if !seen.insert(d.label.as_str()) {
            return Err(DishSpecError::DuplicateLabel(d.label.clone()));
        }
    }
    Ok(())
}

/// Where an item's image bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageRef {
    Url(String),
    Inline(Vec<u8>),
}

impl ImageRef {
    /// A usable reference is inline bytes or an http(s) URL.
    pub fn is_usable(&self) -> bool {
        match self {
            ImageRef::Inline(bytes) => !bytes.is_empty(),
            ImageRef::Url(url) => {
                let u = url.trim();
                u.starts_with("http://") || u.starts_with("https://")
            }
        }
    }

    /// Short human-readable form for log lines.
    pub fn describe(&self) -> String {
        match self {
            ImageRef::Url(url) => url.clone(),
            ImageRef::Inline(bytes) => format!("<inline {} bytes>", bytes.len()),
        }
    }
}

/// One annotation record from the source dataset snapshot.
///
/// The nested `portion_size` / `nutritional_profile` payloads are kept raw
/// (the upstream data mixes string-encoded and structured forms) and only
/// parsed at label-flattening time.
#[derive(Debug, Clone)]
pub struct SourceItem {
    pub dish_name: String,
    pub image: Option<ImageRef>,
    pub portion_size: Option<serde_json::Value>,
    pub nutritional_profile: Option<serde_json::Value>,
}

/// Location an item's re-encoded image was written to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredImage {
    pub destination_key: String,
    pub backend_uri: String,
}

/// Pre-flattening label row, accumulated per successfully recorded item.
#[derive(Debug, Clone)]
pub struct SampleRecord {
    pub image_path: String,
    pub label: String,
    pub portion_size: Option<serde_json::Value>,
    pub nutritional_profile: Option<serde_json::Value>,
}

/// Destination key for one sampled item. Keys are unique within a version by
/// construction: labels are unique per run and the ordinal index is unique
/// per dish.
pub fn image_key(version: &str, label: &str, index: u32) -> String {
    format!("{version}/images/{label}/{index:06}.jpg")
}

/// Key prefix holding one dish's images.
pub fn dish_prefix(version: &str, label: &str) -> String {
    format!("{version}/images/{label}")
}

pub fn label_table_key(version: &str) -> String {
    format!("{version}/{LABEL_TABLE_FILE}")
}

pub fn manifest_key(version: &str) -> String {
    format!("{version}/{MANIFEST_FILE}")
}

/// Versioned manifest describing a finalized dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetVersion {
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub dishes: Vec<String>,
    pub per_class: u32,
    pub total_samples: u64,
    pub class_distribution: BTreeMap<String, u64>,
    pub source_id: String,
    pub seed: u64,
}
