//! Store wrappers for fault injection in tests.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{Document, DocumentStore, FieldOp, Fields, Write};
use crate::error::{Error, Result};

/// Fails every write that touches a chosen document key.
pub struct FlakyStore {
    inner: Arc<dyn DocumentStore>,
    failing: Mutex<HashSet<String>>,
}

impl FlakyStore {
    pub fn new(inner: Arc<dyn DocumentStore>) -> Self {
        Self {
            inner,
            failing: Mutex::new(HashSet::new()),
        }
    }

    /// Make writes to `key` fail until [`FlakyStore::heal`].
    pub fn fail_writes_to(&self, key: &str) {
        self.failing.lock().insert(key.to_string());
    }

    pub fn heal(&self) {
        self.failing.lock().clear();
    }

    fn check(&self, key: &str) -> Result<()> {
        if self.failing.lock().contains(key) {
            return Err(Error::Backend(format!("injected failure writing {}", key)));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for FlakyStore {
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Document>> {
        self.inner.get(collection, key).await
    }

    async fn set_merge(&self, collection: &str, key: &str, fields: Fields) -> Result<()> {
        self.check(key)?;
        self.inner.set_merge(collection, key, fields).await
    }

    async fn update(&self, collection: &str, key: &str, ops: Vec<FieldOp>) -> Result<()> {
        self.check(key)?;
        self.inner.update(collection, key, ops).await
    }

    async fn query_prefix(
        &self,
        collection: &str,
        field: &str,
        prefix: &str,
    ) -> Result<Vec<Document>> {
        self.inner.query_prefix(collection, field, prefix).await
    }

    async fn list(&self, collection: &str) -> Result<Vec<Document>> {
        self.inner.list(collection).await
    }

    async fn commit_batch(&self, writes: Vec<Write>) -> Result<()> {
        for write in &writes {
            self.check(write.key())?;
        }
        self.inner.commit_batch(writes).await
    }
}

/// Yields to the scheduler before every call so two operations driven by
/// `tokio::join!` interleave their reads and writes.
pub struct InterleavingStore {
    inner: Arc<dyn DocumentStore>,
}

impl InterleavingStore {
    pub fn new(inner: Arc<dyn DocumentStore>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl DocumentStore for InterleavingStore {
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Document>> {
        tokio::task::yield_now().await;
        self.inner.get(collection, key).await
    }

    async fn set_merge(&self, collection: &str, key: &str, fields: Fields) -> Result<()> {
        tokio::task::yield_now().await;
        self.inner.set_merge(collection, key, fields).await
    }

    async fn update(&self, collection: &str, key: &str, ops: Vec<FieldOp>) -> Result<()> {
        tokio::task::yield_now().await;
        self.inner.update(collection, key, ops).await
    }

    async fn query_prefix(
        &self,
        collection: &str,
        field: &str,
        prefix: &str,
    ) -> Result<Vec<Document>> {
        tokio::task::yield_now().await;
        self.inner.query_prefix(collection, field, prefix).await
    }

    async fn list(&self, collection: &str) -> Result<Vec<Document>> {
        tokio::task::yield_now().await;
        self.inner.list(collection).await
    }

    async fn commit_batch(&self, writes: Vec<Write>) -> Result<()> {
        tokio::task::yield_now().await;
        self.inner.commit_batch(writes).await
    }
}
