use std::time::Duration;

use thiserror::Error;

use mmfood_core::types::ImageRef;
use mmfood_store::StorageError;

/// JPEG quality for re-encoded images.
pub const JPEG_QUALITY: u8 = 90;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const MAX_ATTEMPTS: usize = 3;
const BASE_DELAY_MS: u64 = 100;
const MAX_DELAY_MS: u64 = 1000;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("http get failed for {url}: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("http status {status} for {url}")]
    Status {
        status: reqwest::StatusCode,
        url: String,
    },
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("image decode failed: {0}")]
    Decode(#[source] image::ImageError),
    #[error("jpeg encode failed: {0}")]
    Encode(#[source] image::ImageError),
}

/// Any per-item failure. All variants are non-fatal at the run level: the
/// engine logs them and moves on to the next item.
#[derive(Debug, Error)]
pub enum ItemError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Retrieves, validates, and canonicalizes one item's image bytes.
///
/// One client (and connection pool) is shared across all fetches in a run.
pub struct ImageFetcher {
    client: reqwest::Client,
}

impl ImageFetcher {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }

    /// Resolve an image reference to canonical JPEG bytes: fetch (for URLs),
    /// decode, convert to 3-channel color, re-encode at quality 90.
    pub async fn fetch_jpeg(&self, image: &ImageRef) -> Result<Vec<u8>, ItemError> {
        let raw = match image {
            ImageRef::Inline(bytes) => bytes.clone(),
            ImageRef::Url(url) => self.http_get(url.trim()).await?,
        };
        Ok(reencode_jpeg(&raw)?)
    }

    async fn http_get(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let mut attempt: usize = 0;
        let mut delay_ms: u64 = BASE_DELAY_MS;
        loop {
            attempt = attempt.saturating_add(1);
            match self.client.get(url).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let bytes = resp.bytes().await.map_err(|source| FetchError::Http {
                            url: url.to_string(),
                            source,
                        })?;
                        return Ok(bytes.to_vec());
                    }
                    let transient = status == reqwest::StatusCode::TOO_MANY_REQUESTS
                        || status == reqwest::StatusCode::REQUEST_TIMEOUT
                        || status.is_server_error();
                    if !(transient && attempt < MAX_ATTEMPTS) {
                        return Err(FetchError::Status {
                            status,
                            url: url.to_string(),
                        });
                    }
                }
                Err(err) => {
                    let transient = err.is_timeout() || err.is_connect();
                    if !(transient && attempt < MAX_ATTEMPTS) {
                        return Err(FetchError::Http {
                            url: url.to_string(),
                            source: err,
                        });
                    }
                }
            }
            let jitter = mmfood_observe::time::unix_time_ms() % 37;
            tokio::time::sleep(Duration::from_millis(delay_ms.saturating_add(jitter))).await;
            delay_ms = (delay_ms.saturating_mul(2)).min(MAX_DELAY_MS);
        }
    }
}

/// Decode any supported still-image payload, drop alpha, and re-encode as a
/// quality-90 JPEG.
pub fn reencode_jpeg(bytes: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let decoded = image::load_from_memory(bytes).map_err(DecodeError::Decode)?;
    let rgb = decoded.to_rgb8();

    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY);
    encoder.encode_image(&rgb).map_err(DecodeError::Encode)?;
    Ok(out)
}
