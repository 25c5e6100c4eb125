use tracing_subscriber::EnvFilter;

/// Initializes a `tracing_subscriber` using `MMFOOD_LOG` first, then
/// `RUST_LOG`, then a default.
///
/// Log field contract for ingestion runs:
/// - Always include `version` on run-level events.
/// - Include `dish` and `index` on any per-item event.
/// - Include the destination `key` or source reference when a write or fetch
///   is involved.
pub fn init_tracing() {
    let filter = env_filter();
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env("MMFOOD_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"))
}
