//! S3 backend (feature `s3`).
//!
//! Keys are `<prefix>/artist/collection/filename`. Listing uses
//! `ListObjectsV2` continuation tokens; renames are `CopyObject` followed by a
//! separate delete issued by the executor once the copy is verified.

use super::{ItemRef, ItemStore, ListPage, ObjectMeta, Side};
use crate::config::StoreConfig;
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::debug;

pub struct S3ObjectStore {
    client: Client,
    bucket: String,
    prefix: String,
    page_size: usize,
}

impl S3ObjectStore {
    /// Build a client from the standard AWS environment.
    ///
    /// `SHELFSYNC_S3_ENDPOINT` and `SHELFSYNC_S3_REGION` override the endpoint
    /// and region (for S3-compatible services).
    pub async fn connect(bucket: String, prefix: String) -> Result<Self> {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Ok(region) = std::env::var("SHELFSYNC_S3_REGION") {
            loader = loader.region(aws_sdk_s3::config::Region::new(region));
        }
        if let Ok(endpoint) = std::env::var("SHELFSYNC_S3_ENDPOINT") {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;
        Ok(Self {
            client: Client::new(&sdk_config),
            bucket,
            prefix,
            page_size: StoreConfig::DEFAULT_PAGE_SIZE,
        })
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.clamp(1, 1000);
        self
    }

    fn key_for(&self, item: &ItemRef) -> String {
        if self.prefix.is_empty() {
            item.key()
        } else {
            format!("{}/{}", self.prefix, item.key())
        }
    }

    fn item_for(&self, key: &str) -> Option<ItemRef> {
        let rel = if self.prefix.is_empty() {
            key
        } else {
            key.strip_prefix(&self.prefix)?.strip_prefix('/')?
        };
        ItemRef::from_key(rel)
    }

    fn map_error<E>(&self, operation: &str, key: &str, err: &SdkError<E, HttpResponse>) -> SyncError
    where
        E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    {
        let connection = matches!(err, SdkError::TimeoutError(_) | SdkError::DispatchFailure(_));
        let status = err.raw_response().map(|r| r.status().as_u16());
        let message = DisplayErrorContext(err).to_string();
        self.failure(classify(err.code(), status, connection), operation, key, message)
    }

    fn failure(&self, failure: Failure, operation: &str, key: &str, message: String) -> SyncError {
        match failure {
            Failure::Denied => {
                SyncError::PermissionDenied(format!("s3://{}/{}: {}", self.bucket, key, message))
            }
            Failure::Throttled => SyncError::Throttled {
                store: self.describe(),
                message: format!("{} {}: {}", operation, key, message),
            },
            Failure::Transient => SyncError::Transient {
                message: format!("{} {}: {}", operation, key, message),
            },
            Failure::Other => SyncError::Store {
                message: format!("{} {}: {}", operation, key, message),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Failure {
    Denied,
    Throttled,
    Transient,
    Other,
}

/// Classify a failed call by its S3 error code and HTTP status.
///
/// `connection` is set when no response arrived at all (timeout or dispatch
/// failure).
fn classify(code: Option<&str>, status: Option<u16>, connection: bool) -> Failure {
    match code {
        Some(
            "AccessDenied" | "AllAccessDisabled" | "InvalidAccessKeyId" | "SignatureDoesNotMatch"
            | "ExpiredToken" | "InvalidToken" | "AccountProblem",
        ) => return Failure::Denied,
        Some(
            "SlowDown" | "Throttling" | "ThrottlingException" | "RequestLimitExceeded"
            | "TooManyRequestsException",
        ) => return Failure::Throttled,
        Some("RequestTimeout" | "InternalError" | "ServiceUnavailable") => {
            return Failure::Transient
        }
        _ => {}
    }
    match status {
        Some(401 | 403) => Failure::Denied,
        Some(429 | 503) => Failure::Throttled,
        Some(408) => Failure::Transient,
        Some(s) if s >= 500 => Failure::Transient,
        _ if connection => Failure::Transient,
        _ => Failure::Other,
    }
}

fn copy_source(bucket: &str, key: &str) -> String {
    let encoded: Vec<String> = key
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect();
    format!("{}/{}", bucket, encoded.join("/"))
}

#[async_trait]
impl ItemStore for S3ObjectStore {
    fn side(&self) -> Side {
        Side::Remote
    }

    fn describe(&self) -> String {
        if self.prefix.is_empty() {
            format!("s3://{}", self.bucket)
        } else {
            format!("s3://{}/{}", self.bucket, self.prefix)
        }
    }

    async fn list_page(&self, continuation: Option<String>) -> Result<ListPage> {
        let mut request = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .max_keys(self.page_size as i32)
            .set_continuation_token(continuation);
        if !self.prefix.is_empty() {
            request = request.prefix(format!("{}/", self.prefix));
        }

        let output = request
            .send()
            .await
            .map_err(|e| self.map_error("list", &self.prefix, &e))?;

        let mut entries = Vec::new();
        for object in output.contents() {
            let Some(key) = object.key() else { continue };
            match self.item_for(key) {
                Some(item) => entries.push(ObjectMeta {
                    item,
                    size: object.size().unwrap_or(0).max(0) as u64,
                    content_hash: None,
                }),
                None => debug!("Ignoring key outside artist/collection/file layout: {}", key),
            }
        }

        let next = if output.is_truncated().unwrap_or(false) {
            output.next_continuation_token().map(str::to_string)
        } else {
            None
        };
        Ok(ListPage { entries, next })
    }

    async fn head(&self, item: &ItemRef) -> Result<Option<ObjectMeta>> {
        let key = self.key_for(item);
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
        {
            Ok(output) => Ok(Some(ObjectMeta {
                item: item.clone(),
                size: output.content_length().unwrap_or(0).max(0) as u64,
                content_hash: None,
            })),
            Err(e) => {
                if e.as_service_error().map(|s| s.is_not_found()).unwrap_or(false) {
                    Ok(None)
                } else {
                    Err(self.map_error("head", &key, &e))
                }
            }
        }
    }

    async fn download_to(&self, item: &ItemRef, dest: &Path) -> Result<u64> {
        let key = self.key_for(item);
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().map(|s| s.is_no_such_key()).unwrap_or(false) {
                    SyncError::NotFound(format!("s3://{}/{}", self.bucket, key))
                } else {
                    self.map_error("get", &key, &e)
                }
            })?;

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| SyncError::io_with_path(e, dest))?;
        let mut body = output.body;
        let mut written = 0u64;
        while let Some(chunk) = body
            .try_next()
            .await
            .map_err(|e| self.failure(Failure::Transient, "get", &key, e.to_string()))?
        {
            file.write_all(&chunk)
                .await
                .map_err(|e| SyncError::io_with_path(e, dest))?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(|e| SyncError::io_with_path(e, dest))?;
        Ok(written)
    }

    async fn upload_from(&self, item: &ItemRef, src: &Path) -> Result<u64> {
        let key = self.key_for(item);
        let size = tokio::fs::metadata(src)
            .await
            .map_err(|e| SyncError::io_with_path(e, src))?
            .len();
        let body = ByteStream::from_path(src)
            .await
            .map_err(|e| SyncError::Io {
                message: e.to_string(),
                path: Some(src.to_path_buf()),
                source: None,
            })?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(body)
            .send()
            .await
            .map_err(|e| self.map_error("put", &key, &e))?;

        // Confirm what landed rather than trusting the request size.
        let landed = self.head(item).await?.map(|m| m.size).unwrap_or(0);
        debug!("Uploaded {} ({} of {} bytes)", key, landed, size);
        Ok(landed)
    }

    async fn copy_within(&self, from: &ItemRef, to: &ItemRef) -> Result<u64> {
        let src_key = self.key_for(from);
        let dest_key = self.key_for(to);
        self.client
            .copy_object()
            .bucket(&self.bucket)
            .copy_source(copy_source(&self.bucket, &src_key))
            .key(&dest_key)
            .send()
            .await
            .map_err(|e| self.map_error("copy", &src_key, &e))?;
        Ok(self.head(to).await?.map(|m| m.size).unwrap_or(0))
    }

    async fn delete(&self, item: &ItemRef) -> Result<bool> {
        // S3 deletes are idempotent and do not report absence, so check first.
        if self.head(item).await?.is_none() {
            return Ok(false);
        }
        let key = self.key_for(item);
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| self.map_error("delete", &key, &e))?;
        Ok(true)
    }
}
