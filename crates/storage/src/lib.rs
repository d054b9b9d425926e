//! pkgstash storage - Pluggable package artifact backends
//!
//! Stores, lists, deletes and serves versioned package files through one
//! contract, [`PackageStorage`], with two drivers:
//! - Local filesystem ([`FileStorage`]), identity encoded in the path
//! - S3-compatible object storage ([`S3Storage`]), identity attached as
//!   object metadata, downloads via signed URLs
//!
//! Entries that predate the metadata convention are recovered by parsing
//! their key (see [`legacy`]).
//!
//! # Example
//!
//! ```no_run
//! use futures::TryStreamExt;
//! use pkgstash_core::{PackageIdentity, StorageConfig};
//! use pkgstash_storage::configure_storage;
//!
//! # async fn example() -> pkgstash_core::Result<()> {
//! let storage = configure_storage(&StorageConfig::file("/tmp/packages")).await?;
//! let package = PackageIdentity::sdist("mypkg", "1.2")?;
//! storage.upload(&package, &mut &b"contents"[..]).await?;
//! let packages: Vec<PackageIdentity> = storage.list().try_collect().await?;
//! # Ok(())
//! # }
//! ```

mod backend;
mod dispatch;
mod local;
mod memory;
mod object_store;
mod s3;
mod signer;

#[cfg(feature = "s3")]
mod aws;

pub mod legacy;
pub mod path;

pub use backend::{DownloadResponse, PackageStorage, PackageStream};
pub use dispatch::{configure_storage, StorageHandle};
pub use legacy::{ParseFailure, StorageEntry};
pub use local::FileStorage;
pub use memory::{MemoryObjectStore, StoredObject};
pub use object_store::{ObjectMetadata, ObjectPage, ObjectStore};
pub use path::PathResolver;
pub use s3::{S3Options, S3Storage};
pub use signer::{UrlSigner, ACCESS_KEY_PARAM, EXPIRES_PARAM, SIGNATURE_PARAM};

#[cfg(feature = "s3")]
pub use aws::AwsObjectStore;
