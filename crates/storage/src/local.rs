//! Local filesystem storage backend
//!
//! Packages live at `<root>/[hash/]name/filename`. Files carry no metadata,
//! so identity is always recovered from the directory and filename.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use pkgstash_core::{Error, PackageIdentity, Result, StorageConfig};
use tokio::fs;
use tokio::io::AsyncRead;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::backend::{DownloadResponse, PackageStorage, PackageStream};
use crate::legacy::{self, StorageEntry};
use crate::path::PathResolver;

const BACKEND: &str = "local";

/// Local filesystem storage backend
///
/// Stores packages in a local directory with support for:
/// - Atomic writes (write to a hidden temp file, then rename)
/// - Automatic directory creation
/// - Lazy recursive listing
#[derive(Debug, Clone)]
pub struct FileStorage {
    /// Root directory for all packages
    root: PathBuf,

    resolver: PathResolver,
}

impl FileStorage {
    /// Configure from storage settings
    ///
    /// Creates the root directory (and its parents) if it does not exist.
    pub async fn configure(config: &StorageConfig) -> Result<Self> {
        config.validate()?;
        let root = config
            .dir
            .clone()
            .ok_or_else(|| Error::config("storage.dir is required for the file backend"))?;
        Self::open(root, config.prepend_hash).await
    }

    /// Open a storage root, creating it if needed
    pub async fn open<P: AsRef<Path>>(root: P, prepend_hash: bool) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await.map_err(|e| {
            Error::config(format!(
                "cannot create package directory {}: {}",
                root.display(),
                e
            ))
        })?;
        if !fs::metadata(&root).await?.is_dir() {
            return Err(Error::config(format!(
                "package directory {} is not a directory",
                root.display()
            )));
        }
        debug!(root = %root.display(), prepend_hash, "Configured file storage");
        Ok(Self {
            root,
            resolver: PathResolver::new(prepend_hash),
        })
    }

    /// Get the root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of a package
    fn resolve_path(&self, identity: &PackageIdentity) -> PathBuf {
        self.resolver
            .resolve(identity)
            .split('/')
            .fold(self.root.clone(), |path, segment| path.join(segment))
    }

    /// Generate a unique hidden temporary path next to `full_path`
    fn temp_path(full_path: &Path) -> PathBuf {
        let temp_name = format!(
            ".{}.{}.tmp",
            full_path.file_name().unwrap_or_default().to_string_lossy(),
            Uuid::new_v4()
        );
        full_path.with_file_name(temp_name)
    }

    /// Ensure an identity survives a write/list round trip
    ///
    /// The filesystem keeps no metadata, so the version must be recoverable
    /// from the filename alone.
    fn check_round_trip(identity: &PackageIdentity) -> Result<()> {
        if identity.name().starts_with('.') || identity.filename().starts_with('.') {
            return Err(Error::identity(format!(
                "{} would be stored as a hidden file and never listed",
                identity
            )));
        }
        match legacy::parse_filename(identity.filename(), identity.name()) {
            Ok(version) if version == identity.version() => Ok(()),
            Ok(version) => Err(Error::identity(format!(
                "filename {:?} encodes version {:?}, not {:?}",
                identity.filename(),
                version,
                identity.version()
            ))),
            Err(failure) => Err(Error::identity(format!(
                "filename {:?} does not encode the package identity: {}",
                identity.filename(),
                failure
            ))),
        }
    }

    /// Copy `data` into `temp_path`, sync it and rename it over `full_path`
    async fn write_atomically(
        data: &mut (dyn AsyncRead + Send + Unpin),
        temp_path: &Path,
        full_path: &Path,
    ) -> Result<u64> {
        let mut file = fs::File::create(temp_path).await.map_err(|e| {
            Error::storage(format!("Failed to create temp file {:?}: {}", temp_path, e))
        })?;

        let written = tokio::io::copy(data, &mut file)
            .await
            .map_err(|e| Error::storage(format!("Failed to write package: {}", e)))?;

        file.sync_all()
            .await
            .map_err(|e| Error::storage(format!("Failed to sync file: {}", e)))?;
        drop(file);

        fs::rename(temp_path, full_path).await.map_err(|e| {
            Error::storage(format!(
                "Failed to rename {:?} to {:?}: {}",
                temp_path, full_path, e
            ))
        })?;
        Ok(written)
    }
}

/// Relative `/`-separated key of a file under `root`
fn entry_key(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let segments: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(segments.join("/"))
}

enum EntryKind {
    Dir,
    File,
    Other,
}

/// Classify a directory entry
///
/// Symlinks to files count as files; symlinked directories are not descended.
/// A dangling symlink reports `NotFound`.
async fn entry_kind(entry: &fs::DirEntry) -> std::io::Result<EntryKind> {
    let file_type = entry.file_type().await?;
    if file_type.is_dir() {
        return Ok(EntryKind::Dir);
    }
    if file_type.is_file() {
        return Ok(EntryKind::File);
    }
    if file_type.is_symlink() && fs::metadata(entry.path()).await?.is_file() {
        return Ok(EntryKind::File);
    }
    Ok(EntryKind::Other)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().starts_with('.'))
        .unwrap_or(false)
}

#[async_trait]
impl PackageStorage for FileStorage {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    fn list(&self) -> PackageStream<'_> {
        let root = self.root.clone();

        let packages = stream! {
            debug!(root = %root.display(), "Listing package files");
            let mut stack = vec![root.clone()];
            while let Some(dir) = stack.pop() {
                let mut entries = match fs::read_dir(&dir).await {
                    Ok(entries) => entries,
                    // Removed by a concurrent delete
                    Err(e) if dir != root && e.kind() == ErrorKind::NotFound => {
                        debug!(dir = %dir.display(), "Directory vanished during listing");
                        continue;
                    }
                    Err(e) => {
                        yield Err(Error::storage(format!(
                            "cannot read package directory {}: {}",
                            dir.display(),
                            e
                        )));
                        return;
                    }
                };

                loop {
                    let entry = match entries.next_entry().await {
                        Ok(Some(entry)) => entry,
                        Ok(None) => break,
                        Err(e) => {
                            yield Err(Error::storage(format!(
                                "cannot read package directory {}: {}",
                                dir.display(),
                                e
                            )));
                            return;
                        }
                    };
                    let entry_path = entry.path();
                    if is_hidden(&entry_path) {
                        continue;
                    }
                    let kind = match entry_kind(&entry).await {
                        Ok(kind) => kind,
                        Err(e) if e.kind() == ErrorKind::NotFound => continue,
                        Err(e) => {
                            yield Err(Error::storage(format!(
                                "cannot inspect {}: {}",
                                entry_path.display(),
                                e
                            )));
                            return;
                        }
                    };

                    match kind {
                        EntryKind::Dir => stack.push(entry_path),
                        EntryKind::File => {
                            let identity = entry_key(&root, &entry_path).and_then(|key| {
                                legacy::parse_or_skip(&StorageEntry::new(key), BACKEND)
                            });
                            if let Some(identity) = identity {
                                yield Ok(identity);
                            }
                        }
                        EntryKind::Other => {}
                    }
                }
            }
        };

        packages.boxed()
    }

    #[instrument(skip(self, data), fields(backend = "local", package = %identity))]
    async fn upload(
        &self,
        identity: &PackageIdentity,
        data: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<()> {
        Self::check_round_trip(identity)?;

        let full_path = self.resolve_path(identity);
        let temp_path = Self::temp_path(&full_path);
        debug!(?full_path, ?temp_path, "Writing package atomically");

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                Error::storage(format!("Failed to create directory {:?}: {}", parent, e))
            })?;
        }

        let result = Self::write_atomically(data, &temp_path, &full_path).await;
        if result.is_err() {
            let _ = fs::remove_file(&temp_path).await;
        }
        let written = result?;

        debug!(?full_path, size = written, "Package written successfully");
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "local", package = %identity))]
    async fn delete(&self, identity: &PackageIdentity) -> Result<()> {
        let full_path = self.resolve_path(identity);
        debug!(?full_path, "Deleting package");

        match fs::remove_file(&full_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(?full_path, "Package already absent");
                Ok(())
            }
            Err(e) => Err(Error::storage(format!(
                "Failed to delete {}: {}",
                full_path.display(),
                e
            ))),
        }
    }

    async fn download_response(&self, identity: &PackageIdentity) -> Result<DownloadResponse> {
        Ok(DownloadResponse::File {
            path: self.resolve_path(identity),
            filename: identity.filename().to_string(),
        })
    }

    fn get_path(&self, identity: &PackageIdentity) -> String {
        self.resolve_path(identity).to_string_lossy().into_owned()
    }
}
