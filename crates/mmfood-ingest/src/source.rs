use std::io::BufRead;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{info, warn};

use mmfood_core::types::{ImageRef, SourceItem};

/// One line of the candidates snapshot (JSON Lines).
#[derive(Debug, Deserialize)]
struct CandidateRecord {
    dish_name: String,
    #[serde(default)]
    image_url: Option<String>,
    #[serde(default)]
    portion_size: Option<serde_json::Value>,
    #[serde(default)]
    nutritional_profile: Option<serde_json::Value>,
}

impl From<CandidateRecord> for SourceItem {
    fn from(rec: CandidateRecord) -> Self {
        let image = rec
            .image_url
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .map(ImageRef::Url);
        SourceItem {
            dish_name: rec.dish_name,
            image,
            portion_size: rec.portion_size,
            nutritional_profile: rec.nutritional_profile,
        }
    }
}

/// Load the source annotation snapshot.
///
/// Malformed lines are logged and skipped; heterogeneous upstream exports
/// must not kill a multi-hour ingestion run at the parse stage.
pub fn load_candidates(path: &Path) -> Result<Vec<SourceItem>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("open candidates file failed: {}", path.display()))?;
    let reader = std::io::BufReader::new(file);

    let mut items: Vec<SourceItem> = Vec::new();
    let mut malformed: u64 = 0;
    for (line_no, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("read candidates line {} failed", line_no + 1))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<CandidateRecord>(trimmed) {
            Ok(rec) => items.push(rec.into()),
            Err(err) => {
                malformed = malformed.saturating_add(1);
                warn!(
                    target: "mmfood_ingest",
                    event = "candidate_line_skipped",
                    line = line_no + 1,
                    error = %err,
                    "skipping malformed candidates line"
                );
            }
        }
    }

    info!(
        target: "mmfood_ingest",
        event = "candidates_loaded",
        path = %path.display(),
        items = items.len() as u64,
        malformed,
        "loaded source snapshot"
    );
    Ok(items)
}
