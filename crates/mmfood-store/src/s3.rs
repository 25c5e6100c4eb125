use std::future::Future;

use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::primitives::ByteStream;

use crate::{validate_key, BackendKind, StorageBackend, StorageError};

/// S3-compatible object-store backend: keys map to object names under a
/// bucket and optional prefix.
#[derive(Debug, Clone)]
pub struct S3Store {
    client: aws_sdk_s3::Client,
    bucket: String,
    prefix: String,
}

impl S3Store {
    /// Build a client from ambient AWS configuration. `MMFOOD_S3_ENDPOINT_URL`
    /// points at a non-AWS endpoint (e.g. MinIO); `MMFOOD_S3_FORCE_PATH_STYLE`
    /// overrides the path-style default (on whenever an endpoint is set).
    pub fn from_env(bucket: impl Into<String>, prefix: impl Into<String>) -> Result<Self, StorageError> {
        let bucket = bucket.into();
        if bucket.trim().is_empty() {
            return Err(StorageError::Runtime(
                "s3 backend requires a bucket name".to_string(),
            ));
        }
        let prefix = prefix.into().trim_matches('/').to_string();
        let client = block_on(client_from_env())??;
        Ok(Self {
            client,
            bucket,
            prefix,
        })
    }

    fn object_key(&self, key: &str) -> Result<String, StorageError> {
        validate_key(key)?;
        if self.prefix.is_empty() {
            Ok(key.to_string())
        } else {
            Ok(format!("{}/{key}", self.prefix))
        }
    }

    fn put_object(
        &self,
        key: &str,
        bytes: &[u8],
        content_type: &str,
        if_absent: bool,
    ) -> Result<String, StorageError> {
        let object_key = self.object_key(key)?;
        let body = bytes.to_vec();
        let content_type = content_type.to_string();

        let put = block_on({
            let c = self.client.clone();
            let bucket = self.bucket.clone();
            let object_key = object_key.clone();
            async move {
                let mut req = c
                    .put_object()
                    .bucket(bucket)
                    .key(object_key)
                    .content_type(content_type)
                    .body(ByteStream::from(body));
                if if_absent {
                    req = req.if_none_match("*");
                }
                req.send().await
            }
        })?;

        match put {
            Ok(_) => Ok(self.uri_for(key)),
            Err(err) if if_absent && is_put_precondition_failed(&err) => {
                Err(StorageError::AlreadyExists {
                    key: key.to_string(),
                })
            }
            Err(err) => Err(StorageError::Backend {
                kind: BackendKind::S3,
                key: key.to_string(),
                message: format!("put_object failed: {err:?}"),
            }),
        }
    }
}

impl StorageBackend for S3Store {
    fn kind(&self) -> BackendKind {
        BackendKind::S3
    }

    fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let object_key = self.object_key(key)?;
        let head = block_on({
            let c = self.client.clone();
            let bucket = self.bucket.clone();
            async move { c.head_object().bucket(bucket).key(object_key).send().await }
        })?;

        match head {
            Ok(_) => Ok(true),
            Err(err) => match &err {
                aws_sdk_s3::error::SdkError::ServiceError(se) if se.err().is_not_found() => {
                    Ok(false)
                }
                _ => Err(StorageError::Backend {
                    kind: BackendKind::S3,
                    key: key.to_string(),
                    message: format!("head_object failed: {err:?}"),
                }),
            },
        }
    }

    fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<String, StorageError> {
        self.put_object(key, bytes, content_type, false)
    }

    fn put_new(
        &self,
        key: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<String, StorageError> {
        self.put_object(key, bytes, content_type, true)
    }

    fn uri_for(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            format!("s3://{}/{key}", self.bucket)
        } else {
            format!("s3://{}/{}/{key}", self.bucket, self.prefix)
        }
    }

    fn count_prefix(&self, prefix: &str, suffix: &str) -> Result<u64, StorageError> {
        let object_prefix = format!("{}/", self.object_key(prefix)?);
        let suffix = suffix.to_string();

        block_on({
            let c = self.client.clone();
            let bucket = self.bucket.clone();
            let key_for_err = prefix.to_string();
            async move {
                let mut count: u64 = 0;
                let mut token: Option<String> = None;
                loop {
                    let mut req = c
                        .list_objects_v2()
                        .bucket(&bucket)
                        .prefix(&object_prefix);
                    if let Some(t) = token.as_deref() {
                        req = req.continuation_token(t);
                    }
                    let resp = req.send().await.map_err(|err| StorageError::Backend {
                        kind: BackendKind::S3,
                        key: key_for_err.clone(),
                        message: format!("list_objects_v2 failed: {err:?}"),
                    })?;
                    if let Some(contents) = resp.contents {
                        for obj in contents {
                            let Some(k) = obj.key else { continue };
                            if k.ends_with(&suffix) {
                                count = count.saturating_add(1);
                            }
                        }
                    }
                    if resp.is_truncated.unwrap_or(false) {
                        token = resp.next_continuation_token;
                        if token.is_none() {
                            break;
                        }
                    } else {
                        break;
                    }
                }
                Ok::<u64, StorageError>(count)
            }
        })?
    }
}

async fn client_from_env() -> Result<aws_sdk_s3::Client, StorageError> {
    let cfg = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;

    let endpoint_url: Option<String> = std::env::var("MMFOOD_S3_ENDPOINT_URL").ok();
    let force_path_style = match parse_env_bool("MMFOOD_S3_FORCE_PATH_STYLE")? {
        Some(v) => v,
        None => endpoint_url.is_some(),
    };

    let mut b = aws_sdk_s3::config::Builder::from(&cfg);
    if let Some(url) = endpoint_url {
        b = b.endpoint_url(url);
    }
    if force_path_style {
        b = b.force_path_style(true);
    }

    Ok(aws_sdk_s3::Client::from_conf(b.build()))
}

fn parse_env_bool(key: &str) -> Result<Option<bool>, StorageError> {
    match std::env::var(key) {
        Ok(v) => {
            let s = v.trim().to_ascii_lowercase();
            let b = match s.as_str() {
                "1" | "true" | "yes" | "y" | "on" => true,
                "0" | "false" | "no" | "n" | "off" => false,
                _ => {
                    return Err(StorageError::Runtime(format!(
                        "invalid boolean env var {key}={v:?} (expected true/false/1/0)"
                    )))
                }
            };
            Ok(Some(b))
        }
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(StorageError::Runtime(format!(
            "read env var {key} failed: {e}"
        ))),
    }
}

fn block_on<Fut>(fut: Fut) -> Result<Fut::Output, StorageError>
where
    Fut: Future,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => Ok(tokio::task::block_in_place(|| handle.block_on(fut))),
        Err(_) => {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| StorageError::Runtime(format!("tokio runtime init failed: {e}")))?;
            Ok(rt.block_on(fut))
        }
    }
}

fn is_put_precondition_failed(
    err: &aws_sdk_s3::error::SdkError<aws_sdk_s3::operation::put_object::PutObjectError>,
) -> bool {
    match err {
        aws_sdk_s3::error::SdkError::ServiceError(se) => {
            se.err().code() == Some("PreconditionFailed")
        }
        _ => false,
    }
}
