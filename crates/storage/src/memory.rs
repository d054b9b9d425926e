//! In-memory object store
//!
//! Behaves like a single-region S3 endpoint: keys list in lexicographic
//! order, pages are capped, and writes to a missing bucket fail. Used to
//! exercise the S3 driver without a network.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use pkgstash_core::{Error, Result};
use tracing::debug;

use crate::object_store::{ObjectMetadata, ObjectPage, ObjectStore};

/// Default number of keys per listing page (matches S3)
const DEFAULT_PAGE_SIZE: usize = 1000;

/// Object body and metadata as stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Object contents
    pub body: Bytes,
    /// User metadata
    pub metadata: ObjectMetadata,
}

#[derive(Debug, Default)]
struct Bucket {
    region: String,
    objects: BTreeMap<String, StoredObject>,
}

/// Thread-safe in-memory [`ObjectStore`]
#[derive(Debug)]
pub struct MemoryObjectStore {
    buckets: RwLock<BTreeMap<String, Bucket>>,
    page_size: usize,
    offline: AtomicBool,
    bucket_check_failure: RwLock<Option<String>>,
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryObjectStore {
    /// Create an empty store with no buckets
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    /// Create an empty store returning at most `page_size` keys per listing page
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            buckets: RwLock::new(BTreeMap::new()),
            page_size: page_size.max(1),
            offline: AtomicBool::new(false),
            bucket_check_failure: RwLock::new(None),
        }
    }

    /// Create a bucket directly, bypassing the driver
    pub fn insert_bucket(&self, bucket: &str, region: &str) {
        self.buckets
            .write()
            .entry(bucket.to_string())
            .or_default()
            .region = region.to_string();
    }

    /// Write an object directly, bypassing the driver
    ///
    /// Creates the bucket if needed. Useful for seeding legacy entries.
    pub fn insert_object(&self, bucket: &str, key: &str, body: Bytes, metadata: ObjectMetadata) {
        self.buckets
            .write()
            .entry(bucket.to_string())
            .or_default()
            .objects
            .insert(key.to_string(), StoredObject { body, metadata });
    }

    /// Read an object directly
    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.buckets
            .read()
            .get(bucket)
            .and_then(|b| b.objects.get(key).cloned())
    }

    /// All keys in a bucket, in listing order
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.buckets
            .read()
            .get(bucket)
            .map(|b| b.objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Region a bucket was created in
    pub fn bucket_region(&self, bucket: &str) -> Option<String> {
        self.buckets.read().get(bucket).map(|b| b.region.clone())
    }

    /// Simulate a network outage: every call fails until turned back on
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Make bucket existence checks fail with a non-"not found" error
    pub fn fail_bucket_check(&self, message: impl Into<String>) {
        *self.bucket_check_failure.write() = Some(message.into());
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::StorageUnavailable {
                backend: "memory".to_string(),
            });
        }
        Ok(())
    }

    fn no_such_bucket(bucket: &str) -> Error {
        Error::storage(format!("NoSuchBucket: {}", bucket))
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        self.check_online()?;
        if let Some(message) = self.bucket_check_failure.read().clone() {
            return Err(Error::storage(message));
        }
        Ok(self.buckets.read().contains_key(bucket))
    }

    async fn create_bucket(&self, bucket: &str, region: &str) -> Result<()> {
        self.check_online()?;
        let mut buckets = self.buckets.write();
        if buckets.contains_key(bucket) {
            return Err(Error::storage(format!("BucketAlreadyExists: {}", bucket)));
        }
        buckets.insert(
            bucket.to_string(),
            Bucket {
                region: region.to_string(),
                objects: BTreeMap::new(),
            },
        );
        debug!(bucket, region, "Created in-memory bucket");
        Ok(())
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        metadata: ObjectMetadata,
    ) -> Result<()> {
        self.check_online()?;
        let mut buckets = self.buckets.write();
        let target = buckets
            .get_mut(bucket)
            .ok_or_else(|| Self::no_such_bucket(bucket))?;
        target
            .objects
            .insert(key.to_string(), StoredObject { body, metadata });
        Ok(())
    }

    async fn object_metadata(&self, bucket: &str, key: &str) -> Result<Option<ObjectMetadata>> {
        self.check_online()?;
        let buckets = self.buckets.read();
        let target = buckets
            .get(bucket)
            .ok_or_else(|| Self::no_such_bucket(bucket))?;
        Ok(target.objects.get(key).map(|o| o.metadata.clone()))
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.check_online()?;
        let mut buckets = self.buckets.write();
        let target = buckets
            .get_mut(bucket)
            .ok_or_else(|| Self::no_such_bucket(bucket))?;
        target.objects.remove(key);
        Ok(())
    }

    async fn list_objects(&self, bucket: &str, token: Option<String>) -> Result<ObjectPage> {
        self.check_online()?;
        let buckets = self.buckets.read();
        let target = buckets
            .get(bucket)
            .ok_or_else(|| Self::no_such_bucket(bucket))?;

        let start = match token {
            Some(token) => Bound::Excluded(token),
            None => Bound::Unbounded,
        };
        let mut keys: Vec<String> = target
            .objects
            .range((start, Bound::Unbounded))
            .take(self.page_size + 1)
            .map(|(key, _)| key.clone())
            .collect();

        let next_token = if keys.len() > self.page_size {
            keys.truncate(self.page_size);
            keys.last().cloned()
        } else {
            None
        };
        Ok(ObjectPage { keys, next_token })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_requires_bucket() {
        let store = MemoryObjectStore::new();
        let result = store
            .put_object("missing", "k", Bytes::from("v"), ObjectMetadata::new())
            .await;
        assert!(matches!(result, Err(Error::Storage { .. })));
    }

    #[tokio::test]
    async fn test_pagination() {
        let store = MemoryObjectStore::with_page_size(2);
        for key in ["a", "b", "c", "d", "e"] {
            store.insert_object("bucket", key, Bytes::new(), ObjectMetadata::new());
        }

        let mut token = None;
        let mut pages = Vec::new();
        loop {
            let page = store.list_objects("bucket", token).await.unwrap();
            pages.push(page.keys.clone());
            match page.next_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        assert_eq!(pages, vec![vec!["a", "b"], vec!["c", "d"], vec!["e"]]);
    }

    #[tokio::test]
    async fn test_offline() {
        let store = MemoryObjectStore::new();
        store.insert_bucket("bucket", "us-east-1");
        store.set_offline(true);
        assert!(store.bucket_exists("bucket").await.is_err());
        store.set_offline(false);
        assert!(store.bucket_exists("bucket").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_missing_key() {
        let store = MemoryObjectStore::new();
        store.insert_bucket("bucket", "us-east-1");
        store.delete_object("bucket", "nope").await.unwrap();
    }
}
