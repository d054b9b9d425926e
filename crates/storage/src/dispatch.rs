//! Backend selection
//!
//! The configured backend is built once at startup and handed to callers
//! as a [`StorageHandle`]; nothing here is global.

use std::sync::Arc;

use pkgstash_core::{BackendKind, Result, StorageConfig};
use tracing::info;

use crate::backend::PackageStorage;
use crate::local::FileStorage;

/// Shared handle to the configured backend
pub type StorageHandle = Arc<dyn PackageStorage>;

/// Validate configuration and build the selected backend
///
/// Prepares the backend target (creating the directory or bucket when
/// missing) and fails fast on any configuration problem.
pub async fn configure_storage(config: &StorageConfig) -> Result<StorageHandle> {
    config.validate()?;
    let storage: StorageHandle = match config.backend_kind() {
        BackendKind::File => Arc::new(FileStorage::configure(config).await?),
        BackendKind::S3 => configure_s3(config).await?,
    };
    info!(
        backend = storage.backend_name(),
        prepend_hash = config.prepend_hash,
        "Storage backend configured"
    );
    Ok(storage)
}

#[cfg(feature = "s3")]
async fn configure_s3(config: &StorageConfig) -> Result<StorageHandle> {
    Ok(Arc::new(crate::s3::S3Storage::configure(config).await?))
}

#[cfg(not(feature = "s3"))]
async fn configure_s3(_config: &StorageConfig) -> Result<StorageHandle> {
    Err(pkgstash_core::Error::config(
        "the s3 backend requires the `s3` feature",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkgstash_core::{Error, PackageIdentity};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_configure_file_backend() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("packages");
        let storage = configure_storage(&StorageConfig::file(&root)).await.unwrap();

        assert_eq!(storage.backend_name(), "local");
        assert!(root.is_dir());

        let package = PackageIdentity::sdist("mypkg", "1.0").unwrap();
        storage.upload(&package, &mut &b"x"[..]).await.unwrap();
        assert!(std::path::Path::new(&storage.get_path(&package)).exists());
    }

    #[tokio::test]
    async fn test_configure_rejects_missing_settings() {
        let config = StorageConfig {
            backend: Some(BackendKind::S3),
            ..Default::default()
        };
        let err = configure_storage(&config).await.unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { .. }));
    }
}
