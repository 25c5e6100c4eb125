#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};

use mmfood_core::types::DishSpec;
use mmfood_ingest::config::{BackendConfig, IngestConfig};
use mmfood_ingest::engine::IngestionEngine;
use mmfood_ingest::source::load_candidates;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BackendArg {
    Local,
    S3,
}

#[derive(Debug, Parser)]
#[command(
    name = "mmfood-ingest",
    about = "Materialize a versioned, per-class-sampled food image dataset from a source snapshot"
)]
struct Args {
    /// Source annotation snapshot (JSON Lines: dish_name, image_url,
    /// portion_size, nutritional_profile per line).
    #[arg(long, env = "MMFOOD_CANDIDATES")]
    candidates: PathBuf,

    /// Dish to sample; repeat once per class.
    #[arg(long = "dish", required = true)]
    dishes: Vec<String>,

    /// Maximum images to materialize per dish.
    #[arg(long, env = "MMFOOD_PER_CLASS", default_value_t = 200)]
    per_class: u32,

    /// Dataset version identifier; doubles as the output key prefix.
    #[arg(long, env = "MMFOOD_DATASET_VERSION", default_value = "v1")]
    version: String,

    /// Sampling seed. Must stay fixed across runs of the same version, or
    /// resume will pair indices with different items.
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Where to materialize the dataset.
    #[arg(long, value_enum, default_value_t = BackendArg::Local)]
    backend: BackendArg,

    /// Root directory for the local backend.
    #[arg(long, env = "MMFOOD_DATA_DIR", default_value = "data/mmfood")]
    root: PathBuf,

    /// Bucket for the s3 backend.
    #[arg(long, env = "MMFOOD_S3_BUCKET")]
    bucket: Option<String>,

    /// Optional key prefix inside the bucket.
    #[arg(long, env = "MMFOOD_S3_PREFIX", default_value = "")]
    prefix: String,

    /// Replace an already-finalized version instead of refusing.
    #[arg(long)]
    overwrite: bool,

    /// Per-request HTTP timeout in seconds.
    #[arg(long, default_value_t = 15)]
    http_timeout_secs: u64,

    /// Provenance identifier recorded in the manifest.
    #[arg(long, env = "MMFOOD_SOURCE_ID", default_value = "Codatta/MM-Food-100K")]
    source_id: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    mmfood_observe::logging::init_tracing();
    let args = Args::parse();

    let mut dishes = Vec::with_capacity(args.dishes.len());
    for name in &args.dishes {
        dishes.push(DishSpec::new(name.clone(), args.per_class)?);
    }

    let backend = match args.backend {
        BackendArg::Local => BackendConfig::Local {
            root: args.root.clone(),
        },
        BackendArg::S3 => BackendConfig::S3 {
            bucket: args
                .bucket
                .clone()
                .context("--bucket is required with --backend s3")?,
            prefix: args.prefix.clone(),
        },
    };

    let cfg = IngestConfig {
        dishes,
        per_class: args.per_class,
        version: args.version.clone(),
        seed: args.seed,
        source_id: args.source_id.clone(),
        backend,
        overwrite: args.overwrite,
        http_timeout: Duration::from_secs(args.http_timeout_secs),
    };
    cfg.validate()?;

    let items = load_candidates(&args.candidates)?;
    let store = cfg.open_backend()?;

    let engine = IngestionEngine::new(cfg, store);
    let report = engine.run(&items).await?;

    println!(
        "done: {} rows ({} fetched, {} cached, {} failed, {} skipped)",
        report.rows, report.fetched, report.cache_hits, report.failures, report.skipped
    );
    if !report.empty_dishes.is_empty() {
        println!("dishes with no source items: {}", report.empty_dishes.join(", "));
    }
    Ok(())
}
