use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

use mmfood_core::parse::{nutrition_fields, numeric, portion_grams, portion_tokens, ParseOutcome};
use mmfood_core::types::SampleRecord;

#[derive(Debug, Error)]
pub enum LabelTableError {
    #[error("csv write failed: {0}")]
    Csv(#[from] csv::Error),
    #[error("csv writer finalize failed: {0}")]
    Finalize(String),
}

/// Flat label table: fixed columns, then one column per nutrient key
/// observed anywhere in the run.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

const FIXED_COLUMNS: [&str; 3] = ["image_path", "label", "portion_grams"];

/// Flatten accumulated records into the final table.
///
/// Nutrition objects are expanded to scalar columns; a key absent in a given
/// row yields an empty field, not an error and not a zero. Portion token
/// lists collapse into a summed `portion_grams`, defaulting to 0.0. The raw
/// nested payloads do not survive into the table.
pub fn build_label_table(records: &[SampleRecord]) -> LabelTable {
    let mut parsed: Vec<(f64, serde_json::Map<String, serde_json::Value>)> =
        Vec::with_capacity(records.len());
    let mut nutrient_keys: BTreeSet<String> = BTreeSet::new();

    for rec in records {
        let grams = match portion_tokens(rec.portion_size.as_ref()) {
            ParseOutcome::Parsed(tokens) => portion_grams(&tokens),
            ParseOutcome::Empty => 0.0,
        };
        let nutrients = nutrition_fields(rec.nutritional_profile.as_ref())
            .into_option()
            .unwrap_or_default();
        for key in nutrients.keys() {
            nutrient_keys.insert(key.clone());
        }
        parsed.push((grams, nutrients));
    }

    let mut header: Vec<String> = FIXED_COLUMNS.iter().map(|c| c.to_string()).collect();
    header.extend(nutrient_keys.iter().cloned());

    let mut rows: Vec<Vec<String>> = Vec::with_capacity(records.len());
    for (rec, (grams, nutrients)) in records.iter().zip(parsed) {
        let mut row: Vec<String> = Vec::with_capacity(header.len());
        row.push(rec.image_path.clone());
        row.push(rec.label.clone());
        row.push(format_float(grams));
        for key in &nutrient_keys {
            let field = nutrients
                .get(key)
                .and_then(numeric)
                .map(format_float)
                .unwrap_or_default();
            row.push(field);
        }
        rows.push(row);
    }

    LabelTable { header, rows }
}

impl LabelTable {
    pub fn to_csv_bytes(&self) -> Result<Vec<u8>, LabelTableError> {
        let mut wtr = csv::Writer::from_writer(Vec::new());
        wtr.write_record(&self.header)?;
        for row in &self.rows {
            wtr.write_record(row)?;
        }
        wtr.into_inner()
            .map_err(|e| LabelTableError::Finalize(e.to_string()))
    }
}

/// Count of rows per label.
pub fn class_distribution(records: &[SampleRecord]) -> BTreeMap<String, u64> {
    let mut dist: BTreeMap<String, u64> = BTreeMap::new();
    for rec in records {
        *dist.entry(rec.label.clone()).or_insert(0) += 1;
    }
    dist
}

fn format_float(v: f64) -> String {
    format!("{v}")
}
