//! Object store client seam
//!
//! The S3 driver talks to its bucket through this trait so the same driver
//! logic runs against AWS ([`crate::AwsObjectStore`]) or the in-memory
//! store ([`crate::MemoryObjectStore`]).

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use pkgstash_core::Result;

/// Per-object user metadata
pub type ObjectMetadata = HashMap<String, String>;

/// One page of a key listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectPage {
    /// Keys in this page, in store order
    pub keys: Vec<String>,

    /// Token for the next page, if the listing is truncated
    pub next_token: Option<String>,
}

/// Minimal key/value object store operations used by the S3 driver
///
/// Errors are returned as-is; implementations never retry.
#[async_trait]
pub trait ObjectStore: Send + Sync + std::fmt::Debug {
    /// Check whether a bucket exists
    ///
    /// Returns `Ok(false)` only for a "not found" answer; any other failure
    /// is an error.
    async fn bucket_exists(&self, bucket: &str) -> Result<bool>;

    /// Create a bucket in the given region
    async fn create_bucket(&self, bucket: &str, region: &str) -> Result<()>;

    /// Write an object, replacing any existing object under the key
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        metadata: ObjectMetadata,
    ) -> Result<()>;

    /// Fetch an object's user metadata; `None` if the key does not exist
    async fn object_metadata(&self, bucket: &str, key: &str) -> Result<Option<ObjectMetadata>>;

    /// Delete an object; deleting a missing key succeeds
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()>;

    /// List one page of keys, continuing from `token`
    async fn list_objects(&self, bucket: &str, token: Option<String>) -> Result<ObjectPage>;
}
