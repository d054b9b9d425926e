//! Package storage contract
//!
//! Defines the async interface that every storage backend implements.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use pkgstash_core::{PackageIdentity, Result};
use tokio::io::AsyncRead;

/// Lazy sequence of stored packages produced by [`PackageStorage::list`]
pub type PackageStream<'a> = BoxStream<'a, Result<PackageIdentity>>;

/// How a client should fetch a package
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadResponse {
    /// Redirect the client to a time-limited signed URL
    Redirect {
        /// Signed URL
        location: String,
        /// Instant after which the URL stops working
        expires_at: DateTime<Utc>,
    },

    /// Serve the file directly from local disk
    File {
        /// Absolute path of the stored file
        path: PathBuf,
        /// Filename to present to the client
        filename: String,
    },
}

impl DownloadResponse {
    /// Signed URL, for redirect responses
    pub fn location(&self) -> Option<&str> {
        match self {
            DownloadResponse::Redirect { location, .. } => Some(location),
            DownloadResponse::File { .. } => None,
        }
    }
}

/// Async trait for package storage backends
///
/// Implementors hold no shared mutable state of their own: every call is
/// self-contained and may run concurrently with any other. Concurrent
/// uploads to one location resolve by the backend's last-write-wins rule.
#[async_trait]
pub trait PackageStorage: Send + Sync + std::fmt::Debug {
    /// Short backend name used in logs ("local", "s3")
    fn backend_name(&self) -> &'static str;

    /// Enumerate stored packages
    ///
    /// Each call starts a fresh enumeration in the backend's native order.
    /// Entries whose identity cannot be recovered are skipped with a
    /// warning; backend failures end the stream with an error item.
    fn list(&self) -> PackageStream<'_>;

    /// Store a package, overwriting any existing file at the same location
    ///
    /// # Errors
    /// Returns error if the identity cannot be stored or the write fails
    async fn upload(
        &self,
        identity: &PackageIdentity,
        data: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<()>;

    /// Remove a package
    ///
    /// Deleting a package that is not stored succeeds.
    ///
    /// # Errors
    /// Returns error if the backend fails to remove an existing entry
    async fn delete(&self, identity: &PackageIdentity) -> Result<()>;

    /// Describe how a client should download a package
    ///
    /// # Errors
    /// Returns error if a signed URL cannot be produced
    async fn download_response(&self, identity: &PackageIdentity) -> Result<DownloadResponse>;

    /// Resolved location of a package: an object key or an absolute file path
    fn get_path(&self, identity: &PackageIdentity) -> String;
}
