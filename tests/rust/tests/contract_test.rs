use anyhow::Result;
use futures::TryStreamExt;
use pkgstash_core::{PackageIdentity, StorageConfig};
use pkgstash_storage::{
    configure_storage, DownloadResponse, FileStorage, MemoryObjectStore, ObjectStore,
    PackageStorage, S3Options, S3Storage, StorageHandle,
};
use std::collections::HashSet;
use std::sync::Arc;
use tempfile::TempDir;

const BUCKET: &str = "mybucket";

/// One configured driver plus whatever must outlive it
struct Driver {
    storage: StorageHandle,
    _dir: Option<TempDir>,
}

async fn file_driver(prepend_hash: bool) -> Result<Driver> {
    let dir = TempDir::new()?;
    let storage = FileStorage::open(dir.path().join("packages"), prepend_hash).await?;
    Ok(Driver {
        storage: Arc::new(storage),
        _dir: Some(dir),
    })
}

async fn s3_driver(prepend_hash: bool) -> Result<Driver> {
    let store: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::with_page_size(2));
    let mut options = S3Options::new(BUCKET);
    options.prepend_hash = prepend_hash;
    options.credentials = Some(("abc".to_string(), "bcd".to_string()));
    let storage = S3Storage::with_store(store, options).await?;
    Ok(Driver {
        storage: Arc::new(storage),
        _dir: None,
    })
}

async fn all_drivers(prepend_hash: bool) -> Result<Vec<Driver>> {
    Ok(vec![
        file_driver(prepend_hash).await?,
        s3_driver(prepend_hash).await?,
    ])
}

async fn listed(storage: &dyn PackageStorage) -> Result<HashSet<PackageIdentity>> {
    Ok(storage.list().try_collect().await?)
}

fn packages() -> Result<Vec<PackageIdentity>> {
    Ok(vec![
        PackageIdentity::new("mypkg", "1.1", "mypkg-1.1.tar.gz")?,
        PackageIdentity::new("mypkg", "1.2", "mypkg-1.2.zip")?,
        PackageIdentity::new("my_pkg", "0.3.dev1", "my_pkg-0.3.dev1-py3-none-any.whl")?,
        PackageIdentity::new("other", "2.0", "other-2.0.tar.bz2")?,
    ])
}

#[tokio::test]
async fn test_upload_then_list() -> Result<()> {
    for prepend_hash in [false, true] {
        for driver in all_drivers(prepend_hash).await? {
            let storage = driver.storage.as_ref();
            for package in packages()? {
                storage.upload(&package, &mut &b"package data"[..]).await?;
            }

            let expected: HashSet<_> = packages()?.into_iter().collect();
            assert_eq!(
                listed(storage).await?,
                expected,
                "{} (prepend_hash={})",
                storage.backend_name(),
                prepend_hash
            );
        }
    }
    Ok(())
}

#[tokio::test]
async fn test_empty_storage_lists_nothing() -> Result<()> {
    for driver in all_drivers(false).await? {
        assert!(listed(driver.storage.as_ref()).await?.is_empty());
    }
    Ok(())
}

#[tokio::test]
async fn test_delete_removes_from_listing() -> Result<()> {
    for driver in all_drivers(true).await? {
        let storage = driver.storage.as_ref();
        let [keep, removed, ..] = <[PackageIdentity; 4]>::try_from(packages()?)
            .map_err(|_| anyhow::anyhow!("fixture size changed"))?;
        storage.upload(&keep, &mut &b"a"[..]).await?;
        storage.upload(&removed, &mut &b"b"[..]).await?;

        storage.delete(&removed).await?;
        assert_eq!(listed(storage).await?, HashSet::from([keep.clone()]));

        // A second delete of the same package is not an error
        storage.delete(&removed).await?;
        assert_eq!(listed(storage).await?, HashSet::from([keep]));
    }
    Ok(())
}

#[tokio::test]
async fn test_reupload_replaces_content() -> Result<()> {
    let dir = TempDir::new()?;
    let storage = FileStorage::open(dir.path(), false).await?;
    let package = PackageIdentity::sdist("mypkg", "1.1")?;

    storage.upload(&package, &mut &b"first"[..]).await?;
    storage.upload(&package, &mut &b"second"[..]).await?;

    assert_eq!(std::fs::read(storage.get_path(&package))?, b"second");
    assert_eq!(listed(&storage).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_uploads() -> Result<()> {
    for driver in all_drivers(true).await? {
        let mut tasks = Vec::new();
        for i in 0..16 {
            let storage = driver.storage.clone();
            tasks.push(tokio::spawn(async move {
                let package = PackageIdentity::sdist("mypkg", format!("1.{}", i))?;
                storage.upload(&package, &mut &b"data"[..]).await?;
                Ok::<_, pkgstash_core::Error>(package)
            }));
        }

        let mut expected = HashSet::new();
        for task in tasks {
            expected.insert(task.await??);
        }
        assert_eq!(listed(driver.storage.as_ref()).await?, expected);
    }
    Ok(())
}

#[tokio::test]
async fn test_download_responses() -> Result<()> {
    let package = PackageIdentity::sdist("mypkg", "1.1")?;

    let file = file_driver(false).await?;
    file.storage.upload(&package, &mut &b"data"[..]).await?;
    match file.storage.download_response(&package).await? {
        DownloadResponse::File { path, filename } => {
            assert_eq!(filename, "mypkg-1.1.tar.gz");
            assert_eq!(std::fs::read(path)?, b"data");
        }
        other => panic!("expected a local file, got {:?}", other),
    }

    let s3 = s3_driver(false).await?;
    s3.storage.upload(&package, &mut &b"data"[..]).await?;
    match s3.storage.download_response(&package).await? {
        DownloadResponse::Redirect { location, .. } => {
            let url = url::Url::parse(&location)?;
            assert_eq!(url.path(), "/mypkg/mypkg-1.1.tar.gz");
            assert_eq!(url.query_pairs().count(), 3);
        }
        other => panic!("expected a redirect, got {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_configure_creates_missing_directory() -> Result<()> {
    let dir = TempDir::new()?;
    let root = dir.path().join("nested").join("packages");
    let mut config = StorageConfig::file(&root);
    config.prepend_hash = true;

    let storage = configure_storage(&config).await?;
    assert!(root.is_dir());
    assert_eq!(storage.backend_name(), "local");

    let package = PackageIdentity::sdist("mypkg", "1.1")?;
    storage.upload(&package, &mut &b"data"[..]).await?;
    assert!(storage.get_path(&package).starts_with(root.to_str().unwrap_or_default()));
    assert_eq!(listed(storage.as_ref()).await?, HashSet::from([package]));
    Ok(())
}

#[tokio::test]
async fn test_configure_creates_missing_bucket() -> Result<()> {
    let memory = Arc::new(MemoryObjectStore::new());
    let store: Arc<dyn ObjectStore> = memory.clone();
    let storage = S3Storage::with_store(store, S3Options::new(BUCKET)).await?;

    assert!(memory.bucket_region(BUCKET).is_some());
    let package = PackageIdentity::sdist("mypkg", "1.1")?;
    storage.upload(&package, &mut &b"data"[..]).await?;
    assert_eq!(memory.keys(BUCKET), vec!["mypkg/mypkg-1.1.tar.gz".to_string()]);
    Ok(())
}

#[tokio::test]
async fn test_listing_tolerates_foreign_entries() -> Result<()> {
    let dir = TempDir::new()?;
    std::fs::create_dir_all(dir.path().join("mypkg"))?;
    std::fs::write(dir.path().join("mypkg").join("README.txt"), "not a package")?;
    std::fs::write(dir.path().join("stray.tar.gz"), "no directory")?;

    let storage = FileStorage::open(dir.path(), false).await?;
    let package = PackageIdentity::sdist("mypkg", "1.1")?;
    storage.upload(&package, &mut &b"data"[..]).await?;

    assert_eq!(listed(&storage).await?, HashSet::from([package]));
    Ok(())
}
