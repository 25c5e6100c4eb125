use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use thiserror::Error;
use tracing::{info, warn};

use mmfood_core::types::{
    dish_prefix, image_key, DishSpec, SampleRecord, SourceItem, StoredImage,
};
use mmfood_observe::metrics::{Counter, DurationAgg, ScopedTimer};
use mmfood_store::{BackendKind, StorageBackend, StorageError};

use crate::config::IngestConfig;
use crate::fetch::ImageFetcher;
use crate::labels::{build_label_table, LabelTableError};
use crate::manifest::{build_manifest, version_exists, write_artifacts, WriteArtifactsError};
use crate::sampler::sample_dish;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(
        "dataset version {version:?} already exists in the {kind} backend; \
         refusing to overwrite a finalized version"
    )]
    VersionExists {
        version: String,
        kind: BackendKind,
    },
    #[error("no samples were produced; check dish filters and image downloads")]
    EmptyDataset,
    #[error("http client init failed: {0}")]
    HttpClient(#[from] reqwest::Error),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Labels(#[from] LabelTableError),
    #[error("manifest encode failed: {0}")]
    ManifestEncode(#[from] serde_json::Error),
}

/// Counts for one completed (or failed) run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub rows: u64,
    pub fetched: u64,
    pub cache_hits: u64,
    pub failures: u64,
    pub skipped: u64,
    pub empty_dishes: Vec<String>,
}

#[derive(Debug, Default)]
struct IngestMetrics {
    fetched: Counter,
    cache_hits: Counter,
    failures: Counter,
    skipped: Counter,
    fetch_time: DurationAgg,
}

struct DishPlan<'a> {
    spec: &'a DishSpec,
    items: Vec<&'a SourceItem>,
    cached: u64,
}

/// Orchestrates the per-dish cache check -> fetch -> store -> record loop.
///
/// One engine drives one run: dishes strictly in configured order, items
/// strictly in sampled order, so ordinal index assignment is deterministic
/// and the progress counter needs no coordination.
pub struct IngestionEngine {
    cfg: IngestConfig,
    store: Arc<dyn StorageBackend>,
    metrics: IngestMetrics,
}

impl IngestionEngine {
    pub fn new(cfg: IngestConfig, store: Arc<dyn StorageBackend>) -> Self {
        Self {
            cfg,
            store,
            metrics: IngestMetrics::default(),
        }
    }

    pub async fn run(&self, items: &[SourceItem]) -> Result<IngestReport, IngestError> {
        if !self.cfg.overwrite && version_exists(self.store.as_ref(), &self.cfg.version)? {
            return Err(IngestError::VersionExists {
                version: self.cfg.version.clone(),
                kind: self.store.kind(),
            });
        }

        let fetcher = ImageFetcher::new(self.cfg.http_timeout)?;

        let mut plans: Vec<DishPlan<'_>> = Vec::with_capacity(self.cfg.dishes.len());
        let mut empty_dishes: Vec<String> = Vec::new();
        let mut total_target: u64 = 0;
        let mut total_cached: u64 = 0;
        for spec in &self.cfg.dishes {
            let sampled = sample_dish(items, spec, self.cfg.seed);
            if sampled.is_empty() {
                empty_dishes.push(spec.name.clone());
            }
            let cached = self
                .store
                .count_prefix(&dish_prefix(&self.cfg.version, &spec.label), ".jpg")?;
            let target = sampled.len() as u64;
            total_target = total_target.saturating_add(target);
            total_cached = total_cached.saturating_add(cached.min(target));
            plans.push(DishPlan {
                spec,
                items: sampled,
                cached,
            });
        }

        let remaining = total_target.saturating_sub(total_cached);
        info!(
            target: "mmfood_ingest",
            event = "ingest_plan",
            version = self.cfg.version.as_str(),
            total_target,
            total_cached,
            remaining,
            "planned ingestion run"
        );

        let bar = ProgressBar::new(remaining);
        bar.set_style(
            ProgressStyle::with_template("{bar:40} {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );

        let mut records: Vec<SampleRecord> = Vec::with_capacity(total_target as usize);
        for plan in &plans {
            bar.set_message(plan.spec.label.clone());
            self.ingest_dish(plan, &fetcher, &bar, &mut records).await?;
        }
        bar.finish_and_clear();

        if records.is_empty() {
            return Err(IngestError::EmptyDataset);
        }

        let table = build_label_table(&records);
        let labels_csv = table.to_csv_bytes()?;
        let manifest = build_manifest(&self.cfg, &records);
        match write_artifacts(
            self.store.as_ref(),
            &self.cfg.version,
            &labels_csv,
            &manifest,
            self.cfg.overwrite,
        ) {
            Ok(()) => {}
            Err(WriteArtifactsError::Storage(StorageError::AlreadyExists { .. })) => {
                return Err(IngestError::VersionExists {
                    version: self.cfg.version.clone(),
                    kind: self.store.kind(),
                });
            }
            Err(WriteArtifactsError::Storage(err)) => return Err(err.into()),
            Err(WriteArtifactsError::Encode(err)) => return Err(err.into()),
        }

        let report = IngestReport {
            rows: records.len() as u64,
            fetched: self.metrics.fetched.get(),
            cache_hits: self.metrics.cache_hits.get(),
            failures: self.metrics.failures.get(),
            skipped: self.metrics.skipped.get(),
            empty_dishes,
        };
        let fetch = self.metrics.fetch_time.snapshot();
        info!(
            target: "mmfood_ingest",
            event = "ingest_complete",
            version = self.cfg.version.as_str(),
            rows = report.rows,
            fetched = report.fetched,
            cache_hits = report.cache_hits,
            failures = report.failures,
            skipped = report.skipped,
            fetch_avg_ms = fetch.avg_ms(),
            fetch_max_ms = fetch.max_ms(),
            "ingestion run complete"
        );
        Ok(report)
    }

    async fn ingest_dish(
        &self,
        plan: &DishPlan<'_>,
        fetcher: &ImageFetcher,
        bar: &ProgressBar,
        records: &mut Vec<SampleRecord>,
    ) -> Result<(), IngestError> {
        let version = &self.cfg.version;
        let spec = plan.spec;
        let target = plan.items.len() as u64;

        // Dish-level resume short-circuit, local backend only: when the
        // on-disk count already covers the sampled set there is nothing to
        // fetch, and the label rows can be emitted from the keys alone. Rows
        // are still emitted so a fully cached re-run reproduces the same
        // label table.
        if self.store.kind() == BackendKind::Local && target > 0 && plan.cached >= target {
            info!(
                target: "mmfood_ingest",
                event = "dish_complete_cached",
                dish = spec.name.as_str(),
                label = spec.label.as_str(),
                cached = plan.cached,
                "dish already complete, skipping"
            );
            for (i, item) in plan.items.iter().enumerate() {
                let key = image_key(version, &spec.label, i as u32);
                records.push(self.sample_record(item, self.store.uri_for(&key), spec));
                self.metrics.cache_hits.inc();
            }
            return Ok(());
        }

        for (i, item) in plan.items.iter().enumerate() {
            let index = i as u32;
            let key = image_key(version, &spec.label, index);

            if self.store.exists(&key)? {
                records.push(self.sample_record(item, self.store.uri_for(&key), spec));
                self.metrics.cache_hits.inc();
                continue;
            }

            let Some(image) = item.image.as_ref().filter(|r| r.is_usable()) else {
                warn!(
                    target: "mmfood_ingest",
                    event = "item_skipped",
                    dish = spec.name.as_str(),
                    index,
                    "missing or malformed image reference"
                );
                self.metrics.skipped.inc();
                bar.inc(1);
                continue;
            };

            let fetched = {
                let _timer = ScopedTimer::new(&self.metrics.fetch_time);
                fetcher.fetch_jpeg(image).await
            };
            let stored = fetched.and_then(|jpeg| {
                let backend_uri = self.store.put(&key, &jpeg, "image/jpeg")?;
                Ok(StoredImage {
                    destination_key: key.clone(),
                    backend_uri,
                })
            });

            match stored {
                Ok(written) => {
                    records.push(self.sample_record(item, written.backend_uri, spec));
                    self.metrics.fetched.inc();
                }
                Err(err) => {
                    warn!(
                        target: "mmfood_ingest",
                        event = "item_failed",
                        dish = spec.name.as_str(),
                        index,
                        reference = image.describe().as_str(),
                        error = %err,
                        "item failed, continuing"
                    );
                    self.metrics.failures.inc();
                }
            }
            bar.inc(1);
        }
        Ok(())
    }

    fn sample_record(&self, item: &SourceItem, image_path: String, spec: &DishSpec) -> SampleRecord {
        SampleRecord {
            image_path,
            label: spec.label.clone(),
            portion_size: item.portion_size.clone(),
            nutritional_profile: item.nutritional_profile.clone(),
        }
    }
}
