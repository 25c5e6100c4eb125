//! Lenient parsing of the nested annotation payloads.
//!
//! Upstream annotation fields arrive either as structured JSON or as
//! string-encoded JSON, and are sometimes absent or garbage. Callers need the
//! lenient behavior (bad data degrades to "no annotation", never an error),
//! but the fallback is a typed, logged outcome rather than a swallowed parse
//! failure.

use serde_json::{Map, Value};
use tracing::debug;

/// Outcome of a lenient parse: either a usable value or explicitly nothing.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome<T> {
    Parsed(T),
    Empty,
}

impl<T> ParseOutcome<T> {
    pub fn into_option(self) -> Option<T> {
        match self {
            ParseOutcome::Parsed(v) => Some(v),
            ParseOutcome::Empty => None,
        }
    }
}

/// Nutrition payload as a flat key/value object.
///
/// Accepts an object or a string-encoded object; anything else is `Empty`.
pub fn nutrition_fields(raw: Option<&Value>) -> ParseOutcome<Map<String, Value>> {
    match raw {
        Some(Value::Object(map)) => ParseOutcome::Parsed(map.clone()),
        Some(Value::String(s)) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Object(map)) => ParseOutcome::Parsed(map),
            Ok(other) => {
                debug!(
                    target: "mmfood_ingest",
                    event = "nutrition_parse_empty",
                    got = other.to_string().as_str(),
                    "string-encoded nutrition payload is not an object"
                );
                ParseOutcome::Empty
            }
            Err(err) => {
                debug!(
                    target: "mmfood_ingest",
                    event = "nutrition_parse_empty",
                    error = %err,
                    "nutrition payload is not valid JSON"
                );
                ParseOutcome::Empty
            }
        },
        Some(_) | None => ParseOutcome::Empty,
    }
}

/// Portion payload as a list of free-text amount tokens.
///
/// Accepts a list or a string-encoded list; non-string list entries are
/// stringified (they carry no gram marker and contribute nothing).
pub fn portion_tokens(raw: Option<&Value>) -> ParseOutcome<Vec<String>> {
    let list = match raw {
        Some(Value::Array(items)) => items.clone(),
        Some(Value::String(s)) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Array(items)) => items,
            Ok(_) | Err(_) => {
                debug!(
                    target: "mmfood_ingest",
                    event = "portion_parse_empty",
                    "portion payload is not a list"
                );
                return ParseOutcome::Empty;
            }
        },
        Some(_) | None => return ParseOutcome::Empty,
    };

    let tokens = list
        .into_iter()
        .map(|v| match v {
            Value::String(s) => s,
            other => other.to_string(),
        })
        .collect();
    ParseOutcome::Parsed(tokens)
}

/// Total grams across portion tokens.
///
/// Each token contributes its first decimal amount that is immediately
/// followed by a `g` unit marker ("150g rice" -> 150.0); tokens without one
/// contribute nothing. No tokens at all means 0.0.
pub fn portion_grams(tokens: &[String]) -> f64 {
    tokens.iter().filter_map(|t| token_grams(t)).sum()
}

fn token_grams(token: &str) -> Option<f64> {
    let bytes = token.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if !bytes[i].is_ascii_digit() {
            i += 1;
            continue;
        }
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        // Optional fraction; only consumed when digits follow the dot.
        if i + 1 < bytes.len() && bytes[i] == b'.' && bytes[i + 1].is_ascii_digit() {
            i += 1;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
        }
        if i < bytes.len() && bytes[i] == b'g' {
            return token[start..i].parse::<f64>().ok();
        }
    }
    None
}

/// Numeric view of a flattened nutrient value: JSON numbers, or strings that
/// parse as numbers. Anything else is treated as absent.
pub fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}
