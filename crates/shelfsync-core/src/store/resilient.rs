//! Timeout and bounded-retry wrapper for remote stores.

use super::{ItemRef, ItemStore, ListPage, ObjectMeta, Side};
use crate::error::Result;
use crate::retry::{retry_with_timeout, RetryConfig};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Wraps any store so every call carries a timeout and a small retry budget
/// for transient faults (throttling, 5xx, timeouts).
pub struct ResilientStore {
    inner: Arc<dyn ItemStore>,
    retry: RetryConfig,
    timeout: Duration,
}

impl ResilientStore {
    pub fn new(inner: Arc<dyn ItemStore>, retry: RetryConfig, timeout: Duration) -> Self {
        Self {
            inner,
            retry,
            timeout,
        }
    }
}

#[async_trait]
impl ItemStore for ResilientStore {
    fn side(&self) -> Side {
        self.inner.side()
    }

    fn describe(&self) -> String {
        self.inner.describe()
    }

    async fn list_page(&self, continuation: Option<String>) -> Result<ListPage> {
        retry_with_timeout(&self.retry, self.timeout, "list", || {
            self.inner.list_page(continuation.clone())
        })
        .await
    }

    async fn head(&self, item: &ItemRef) -> Result<Option<ObjectMeta>> {
        let label = format!("head {}", item);
        retry_with_timeout(&self.retry, self.timeout, &label, || self.inner.head(item)).await
    }

    async fn download_to(&self, item: &ItemRef, dest: &Path) -> Result<u64> {
        let label = format!("get {}", item);
        retry_with_timeout(&self.retry, self.timeout, &label, || {
            self.inner.download_to(item, dest)
        })
        .await
    }

    async fn upload_from(&self, item: &ItemRef, src: &Path) -> Result<u64> {
        let label = format!("put {}", item);
        retry_with_timeout(&self.retry, self.timeout, &label, || {
            self.inner.upload_from(item, src)
        })
        .await
    }

    async fn copy_within(&self, from: &ItemRef, to: &ItemRef) -> Result<u64> {
        let label = format!("copy {} -> {}", from, to.filename);
        retry_with_timeout(&self.retry, self.timeout, &label, || {
            self.inner.copy_within(from, to)
        })
        .await
    }

    async fn delete(&self, item: &ItemRef) -> Result<bool> {
        let label = format!("delete {}", item);
        retry_with_timeout(&self.retry, self.timeout, &label, || self.inner.delete(item)).await
    }

    async fn content_hash(&self, item: &ItemRef) -> Result<Option<String>> {
        let label = format!("hash {}", item);
        retry_with_timeout(&self.retry, self.timeout, &label, || {
            self.inner.content_hash(item)
        })
        .await
    }
}
