use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde_json::json;

use mmfood_core::types::{DatasetVersion, DishSpec, ImageRef, SourceItem};
use mmfood_ingest::config::{BackendConfig, IngestConfig};
use mmfood_ingest::engine::{IngestError, IngestionEngine};
use mmfood_store::fs::FsStore;

fn temp_root(test_name: &str) -> Result<PathBuf> {
    let mut root = std::env::temp_dir();
    root.push(format!(
        "mmfood-ingest-{test_name}-{}-{}",
        std::process::id(),
        mmfood_observe::time::unix_time_ms()
    ));
    std::fs::create_dir_all(&root)?;
    Ok(root)
}

/// Tiny valid PNG payload; the engine re-encodes it to JPEG.
fn png_payload(r: u8, g: u8, b: u8) -> Vec<u8> {
    let img = image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
        8,
        8,
        image::Rgb([r, g, b]),
    ));
    let mut out = std::io::Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png)
        .expect("png encode");
    out.into_inner()
}

fn inline_item(dish: &str, shade: u8) -> SourceItem {
    SourceItem {
        dish_name: dish.to_string(),
        image: Some(ImageRef::Inline(png_payload(shade, 64, 64))),
        portion_size: Some(json!(["150g rice", "50g chicken"])),
        nutritional_profile: Some(json!({"calories_kcal": 300, "protein_g": 20})),
    }
}

fn config(root: &Path, dishes: Vec<DishSpec>, overwrite: bool) -> IngestConfig {
    IngestConfig {
        per_class: dishes.first().map(|d| d.quota).unwrap_or(1),
        dishes,
        version: "v1".to_string(),
        seed: 42,
        source_id: "test-source".to_string(),
        backend: BackendConfig::Local {
            root: root.to_path_buf(),
        },
        overwrite,
        http_timeout: Duration::from_secs(5),
    }
}

fn engine(cfg: &IngestConfig, root: &Path) -> IngestionEngine {
    IngestionEngine::new(cfg.clone(), Arc::new(FsStore::new(root.to_path_buf())))
}

fn read_manifest(root: &Path) -> Result<DatasetVersion> {
    let bytes = std::fs::read(root.join("v1/metadata.json"))?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn full_run_writes_images_labels_and_manifest() -> Result<()> {
    let root = temp_root("full-run")?;
    let mut items: Vec<SourceItem> = (0..3).map(|i| inline_item("Fried Chicken", i)).collect();
    items.extend((0..2).map(|i| inline_item("apple", i)));

    let cfg = config(
        &root,
        vec![
            DishSpec::new("Fried Chicken", 3)?,
            DishSpec::new("apple", 3)?,
        ],
        false,
    );
    let report = engine(&cfg, &root).run(&items).await?;

    assert_eq!(report.rows, 5);
    assert_eq!(report.fetched, 5);
    assert_eq!(report.cache_hits, 0);
    assert_eq!(report.failures, 0);
    assert!(report.empty_dishes.is_empty());

    for i in 0..3 {
        let path = root.join(format!("v1/images/fried_chicken/{i:06}.jpg"));
        assert!(path.is_file(), "missing {}", path.display());
        let bytes = std::fs::read(&path)?;
        assert_eq!(image::guess_format(&bytes)?, image::ImageFormat::Jpeg);
    }
    assert!(root.join("v1/images/apple/000001.jpg").is_file());
    assert!(!root.join("v1/images/apple/000002.jpg").exists());

    let labels = std::fs::read_to_string(root.join("v1/labels.csv"))?;
    let mut lines = labels.lines();
    assert_eq!(
        lines.next(),
        Some("image_path,label,portion_grams,calories_kcal,protein_g")
    );
    let rows: Vec<&str> = lines.collect();
    assert_eq!(rows.len(), 5);
    assert!(rows
        .iter()
        .any(|r| r.starts_with("v1/images/fried_chicken/000000.jpg,fried_chicken,200,300,20")));

    let manifest = read_manifest(&root)?;
    assert_eq!(manifest.version, "v1");
    assert_eq!(manifest.total_samples, 5);
    assert_eq!(manifest.class_distribution.get("fried_chicken"), Some(&3));
    assert_eq!(manifest.class_distribution.get("apple"), Some(&2));
    assert_eq!(
        manifest.total_samples,
        manifest.class_distribution.values().sum::<u64>()
    );
    assert_eq!(manifest.seed, 42);
    assert_eq!(manifest.dishes, vec!["Fried Chicken", "apple"]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn corrupt_item_is_isolated_not_fatal() -> Result<()> {
    let root = temp_root("corrupt-item")?;
    let mut items: Vec<SourceItem> = (0..9).map(|i| inline_item("sushi", i)).collect();
    items.push(SourceItem {
        dish_name: "sushi".to_string(),
        image: Some(ImageRef::Inline(b"definitely not an image".to_vec())),
        portion_size: None,
        nutritional_profile: None,
    });

    let cfg = config(&root, vec![DishSpec::new("sushi", 10)?], false);
    let report = engine(&cfg, &root).run(&items).await?;

    assert_eq!(report.rows, 9);
    assert_eq!(report.fetched, 9);
    assert_eq!(report.failures, 1);

    let labels = std::fs::read_to_string(root.join("v1/labels.csv"))?;
    assert_eq!(labels.lines().count(), 10); // header + 9 rows
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unusable_references_are_skipped_without_rows() -> Result<()> {
    let root = temp_root("skipped")?;
    let items = vec![
        SourceItem {
            dish_name: "ramen".to_string(),
            image: None,
            portion_size: None,
            nutritional_profile: None,
        },
        SourceItem {
            dish_name: "ramen".to_string(),
            image: Some(ImageRef::Url("not a url".to_string())),
            portion_size: None,
            nutritional_profile: None,
        },
        inline_item("ramen", 128),
    ];

    let cfg = config(&root, vec![DishSpec::new("ramen", 3)?], false);
    let report = engine(&cfg, &root).run(&items).await?;

    assert_eq!(report.rows, 1);
    assert_eq!(report.skipped, 2);
    assert_eq!(report.failures, 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn second_run_is_a_pure_cache_hit() -> Result<()> {
    let root = temp_root("idempotent")?;
    let items: Vec<SourceItem> = (0..4).map(|i| inline_item("pizza", i)).collect();
    let dishes = vec![DishSpec::new("pizza", 4)?];

    let first = engine(&config(&root, dishes.clone(), false), &root)
        .run(&items)
        .await?;
    assert_eq!(first.fetched, 4);
    let labels_after_first = std::fs::read(root.join("v1/labels.csv"))?;

    // Same inputs against the same (now overwrite-allowed) target: nothing
    // to fetch, identical label table.
    let second = engine(&config(&root, dishes, true), &root)
        .run(&items)
        .await?;
    assert_eq!(second.fetched, 0);
    assert_eq!(second.cache_hits, 4);
    assert_eq!(second.rows, first.rows);

    let labels_after_second = std::fs::read(root.join("v1/labels.csv"))?;
    assert_eq!(labels_after_first, labels_after_second);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn interrupted_run_resumes_remaining_work_only() -> Result<()> {
    let root = temp_root("resume")?;
    let mut items: Vec<SourceItem> = (0..3).map(|i| inline_item("apple", i)).collect();
    items.extend((0..3).map(|i| inline_item("ramen", i)));
    let dishes = vec![DishSpec::new("apple", 3)?, DishSpec::new("ramen", 3)?];

    let first = engine(&config(&root, dishes.clone(), false), &root)
        .run(&items)
        .await?;
    assert_eq!(first.fetched, 6);

    // Simulate a run killed after the first dish: second dish's images are
    // gone and no artifacts were finalized.
    std::fs::remove_dir_all(root.join("v1/images/ramen"))?;
    std::fs::remove_file(root.join("v1/labels.csv"))?;
    std::fs::remove_file(root.join("v1/metadata.json"))?;

    let second = engine(&config(&root, dishes, false), &root)
        .run(&items)
        .await?;
    assert_eq!(second.fetched, 3, "only the missing dish is re-fetched");
    assert_eq!(second.cache_hits, 3);
    assert_eq!(second.rows, 6);

    assert!(root.join("v1/images/ramen/000002.jpg").is_file());
    assert_eq!(read_manifest(&root)?.total_samples, 6);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn finalized_version_is_guarded() -> Result<()> {
    let root = temp_root("guard")?;
    let items: Vec<SourceItem> = (0..2).map(|i| inline_item("sushi", i)).collect();
    let dishes = vec![DishSpec::new("sushi", 2)?];

    engine(&config(&root, dishes.clone(), false), &root)
        .run(&items)
        .await?;

    let err = engine(&config(&root, dishes, false), &root)
        .run(&items)
        .await
        .unwrap_err();
    assert!(
        matches!(err, IngestError::VersionExists { ref version, .. } if version.as_str() == "v1")
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn guard_fires_before_any_image_write() -> Result<()> {
    let root = temp_root("guard-early")?;
    // A manifest from some earlier finalized run, with no images on disk.
    std::fs::create_dir_all(root.join("v1"))?;
    std::fs::write(root.join("v1/metadata.json"), b"{}")?;

    let items: Vec<SourceItem> = (0..2).map(|i| inline_item("sushi", i)).collect();
    let err = engine(&config(&root, vec![DishSpec::new("sushi", 2)?], false), &root)
        .run(&items)
        .await
        .unwrap_err();

    assert!(matches!(err, IngestError::VersionExists { .. }));
    assert!(!root.join("v1/images").exists(), "no image may be written");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn zero_rows_overall_is_fatal_and_writes_nothing() -> Result<()> {
    let root = temp_root("empty")?;
    let items: Vec<SourceItem> = (0..3).map(|i| inline_item("pizza", i)).collect();

    // No dish matches anything in the source.
    let cfg = config(
        &root,
        vec![DishSpec::new("sushi", 2)?, DishSpec::new("ramen", 2)?],
        false,
    );
    let err = engine(&cfg, &root).run(&items).await.unwrap_err();

    assert!(matches!(err, IngestError::EmptyDataset));
    assert!(!root.join("v1/labels.csv").exists());
    assert!(!root.join("v1/metadata.json").exists());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn one_empty_dish_is_a_warning_not_an_error() -> Result<()> {
    let root = temp_root("empty-dish")?;
    let items: Vec<SourceItem> = (0..2).map(|i| inline_item("pizza", i)).collect();

    let cfg = config(
        &root,
        vec![DishSpec::new("pizza", 2)?, DishSpec::new("sushi", 2)?],
        false,
    );
    let report = engine(&cfg, &root).run(&items).await?;

    assert_eq!(report.rows, 2);
    assert_eq!(report.empty_dishes, vec!["sushi".to_string()]);
    assert_eq!(
        read_manifest(&root)?.class_distribution.get("sushi"),
        None,
        "empty dish contributes no distribution entry"
    );
    Ok(())
}
