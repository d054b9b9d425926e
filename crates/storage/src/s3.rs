//! S3 storage backend
//!
//! Stores each package as one object keyed by its resolved location, with
//! `name` and `version` attached as object metadata. Downloads are served
//! through query-string signed URLs.
//!
//! An `S3Storage` only exists once its bucket has been verified (or
//! created), so every operation runs against a ready bucket.

use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::StreamExt;
use pkgstash_core::{
    Error, PackageIdentity, Result, StorageConfig, DEFAULT_REGION, DEFAULT_URL_EXPIRY,
    METADATA_NAME, METADATA_VERSION,
};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, instrument};

use crate::backend::{DownloadResponse, PackageStorage, PackageStream};
use crate::legacy::{self, StorageEntry};
use crate::object_store::{ObjectMetadata, ObjectStore};
use crate::path::PathResolver;
use crate::signer::UrlSigner;

const BACKEND: &str = "s3";

/// Driver parameters derived from configuration
#[derive(Debug, Clone)]
pub struct S3Options {
    /// Bucket holding the packages
    pub bucket: String,
    /// Region to create the bucket in if it is missing
    pub region: String,
    /// Prefix keys with a hash segment
    pub prepend_hash: bool,
    /// Lifetime of signed download URLs
    pub url_expiry: Duration,
    /// Access key pair used to sign URLs
    pub credentials: Option<(String, String)>,
    /// Custom endpoint (path-style URLs)
    pub endpoint_url: Option<String>,
}

impl S3Options {
    /// Options for `bucket` with defaults for everything else
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            region: DEFAULT_REGION.to_string(),
            prepend_hash: false,
            url_expiry: DEFAULT_URL_EXPIRY,
            credentials: None,
            endpoint_url: None,
        }
    }

    /// Validate configuration and derive driver parameters
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        config.validate()?;
        let bucket = config
            .bucket
            .clone()
            .ok_or_else(|| Error::config("storage.bucket is required for the s3 backend"))?;
        let credentials = match (&config.access_key, &config.secret_key) {
            (Some(access), Some(secret)) => Some((access.clone(), secret.clone())),
            _ => None,
        };
        Ok(Self {
            bucket,
            region: config.region.clone(),
            prepend_hash: config.prepend_hash,
            url_expiry: config.url_expiry,
            credentials,
            endpoint_url: config.endpoint_url.clone(),
        })
    }
}

/// S3-compatible storage backend
#[derive(Debug, Clone)]
pub struct S3Storage {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    resolver: PathResolver,
    signer: Option<UrlSigner>,
    url_expiry: Duration,
}

impl S3Storage {
    /// Configure against AWS using storage settings
    ///
    /// Creates the bucket if it does not exist.
    #[cfg(feature = "s3")]
    pub async fn configure(config: &StorageConfig) -> Result<Self> {
        let options = S3Options::from_config(config)?;
        let store = crate::aws::AwsObjectStore::from_config(config).await;
        Self::with_store(Arc::new(store), options).await
    }

    /// Configure against an arbitrary object store
    ///
    /// Checks that the bucket exists and creates it in the configured
    /// region when the store answers "not found". Any other failure is a
    /// configuration error.
    pub async fn with_store(store: Arc<dyn ObjectStore>, options: S3Options) -> Result<Self> {
        let bucket = options.bucket;

        let exists = store.bucket_exists(&bucket).await.map_err(|e| {
            Error::config(format!("cannot access bucket {:?}: {}", bucket, e))
        })?;
        if !exists {
            store
                .create_bucket(&bucket, &options.region)
                .await
                .map_err(|e| Error::config(format!("cannot create bucket {:?}: {}", bucket, e)))?;
            info!(%bucket, region = %options.region, "Created missing bucket");
        }

        let signer = options
            .credentials
            .map(|(access, secret)| {
                UrlSigner::new(
                    access,
                    secret,
                    bucket.clone(),
                    &options.region,
                    options.endpoint_url.as_deref(),
                )
            })
            .transpose()?;

        Ok(Self {
            store,
            bucket,
            resolver: PathResolver::new(options.prepend_hash),
            signer,
            url_expiry: options.url_expiry,
        })
    }

    /// Bucket holding the packages
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Change whether new locations carry a hash prefix
    pub fn set_prepend_hash(&mut self, prepend_hash: bool) {
        self.resolver = PathResolver::new(prepend_hash);
    }

    fn identity_metadata(identity: &PackageIdentity) -> ObjectMetadata {
        ObjectMetadata::from([
            (METADATA_NAME.to_string(), identity.name().to_string()),
            (METADATA_VERSION.to_string(), identity.version().to_string()),
        ])
    }
}

#[async_trait]
impl PackageStorage for S3Storage {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    fn list(&self) -> PackageStream<'_> {
        let store = Arc::clone(&self.store);
        let bucket = self.bucket.clone();

        let packages = stream! {
            debug!(%bucket, "Listing S3 objects");
            let mut token = None;
            loop {
                let page = match store.list_objects(&bucket, token.take()).await {
                    Ok(page) => page,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };

                for key in page.keys {
                    let metadata = match store.object_metadata(&bucket, &key).await {
                        Ok(Some(metadata)) => metadata,
                        // Deleted between listing and lookup
                        Ok(None) => continue,
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    };
                    let entry = StorageEntry::with_metadata(key, metadata);
                    if let Some(identity) = legacy::parse_or_skip(&entry, BACKEND) {
                        yield Ok(identity);
                    }
                }

                match page.next_token {
                    Some(next) => token = Some(next),
                    None => break,
                }
            }
        };

        packages.boxed()
    }

    #[instrument(skip(self, data), fields(backend = "s3", bucket = %self.bucket, package = %identity))]
    async fn upload(
        &self,
        identity: &PackageIdentity,
        data: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<()> {
        let key = self.resolver.resolve(identity);
        let mut body = Vec::new();
        data.read_to_end(&mut body).await?;
        let size = body.len();
        debug!(%key, size, "Writing to S3");

        self.store
            .put_object(
                &self.bucket,
                &key,
                Bytes::from(body),
                Self::identity_metadata(identity),
            )
            .await?;

        debug!(%key, size, "Package uploaded");
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "s3", bucket = %self.bucket, package = %identity))]
    async fn delete(&self, identity: &PackageIdentity) -> Result<()> {
        let key = self.resolver.resolve(identity);
        debug!(%key, "Deleting from S3");
        self.store.delete_object(&self.bucket, &key).await
    }

    #[instrument(skip(self), fields(backend = "s3", bucket = %self.bucket, package = %identity))]
    async fn download_response(&self, identity: &PackageIdentity) -> Result<DownloadResponse> {
        let signer = self.signer.as_ref().ok_or_else(|| Error::SigningUnavailable {
            reason: "storage.access_key and storage.secret_key are not configured".to_string(),
        })?;
        let expiry = chrono::Duration::from_std(self.url_expiry)
            .map_err(|e| Error::config(format!("storage.url_expiry_secs out of range: {}", e)))?;
        let expires_at = Utc::now() + expiry;
        let location = signer.sign(&self.resolver.resolve(identity), expires_at)?;
        Ok(DownloadResponse::Redirect {
            location,
            expires_at,
        })
    }

    fn get_path(&self, identity: &PackageIdentity) -> String {
        self.resolver.resolve(identity)
    }
}
