//! Storage configuration types
//!
//! Configuration arrives either as a flat settings map (`storage.bucket`,
//! `storage.dir`, ...) or as a TOML document with a `[storage]` table.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::{Error, Result};

/// Region used when none is configured
pub const DEFAULT_REGION: &str = "us-east-1";

/// Lifetime of signed download URLs when none is configured
pub const DEFAULT_URL_EXPIRY: Duration = Duration::from_secs(300);

/// Storage backend type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Local filesystem directory tree
    File,

    /// S3-compatible object storage
    S3,
}

impl std::str::FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" | "local" | "filesystem" => Ok(BackendKind::File),
            "s3" => Ok(BackendKind::S3),
            other => Err(Error::config(format!(
                "unknown storage backend {:?} (expected \"file\" or \"s3\")",
                other
            ))),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend type; inferred from the other settings when absent
    pub backend: Option<BackendKind>,

    /// Prefix every location with a 4 hex character content hash
    pub prepend_hash: bool,

    /// Root directory (file backend)
    pub dir: Option<PathBuf>,

    /// Bucket name (s3 backend)
    pub bucket: Option<String>,

    /// Access key id (s3 backend)
    pub access_key: Option<String>,

    /// Secret access key (s3 backend)
    pub secret_key: Option<String>,

    /// Bucket region (s3 backend)
    pub region: String,

    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,

    /// Force path-style addressing (required for MinIO)
    pub force_path_style: bool,

    /// Lifetime of signed download URLs
    #[serde(with = "seconds_serde", rename = "url_expiry_secs")]
    pub url_expiry: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: None,
            prepend_hash: false,
            dir: None,
            bucket: None,
            access_key: None,
            secret_key: None,
            region: DEFAULT_REGION.to_string(),
            endpoint_url: None,
            force_path_style: false,
            url_expiry: DEFAULT_URL_EXPIRY,
        }
    }
}

/// Top-level shape of a TOML configuration file
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    storage: StorageConfig,
}

impl StorageConfig {
    /// Build a file backend configuration rooted at `dir`
    pub fn file(dir: impl Into<PathBuf>) -> Self {
        Self {
            backend: Some(BackendKind::File),
            dir: Some(dir.into()),
            ..Default::default()
        }
    }

    /// Build an s3 backend configuration for `bucket`
    pub fn s3(bucket: impl Into<String>) -> Self {
        Self {
            backend: Some(BackendKind::S3),
            bucket: Some(bucket.into()),
            ..Default::default()
        }
    }

    /// Parse a flat settings map
    ///
    /// Unknown keys are ignored so the map may carry settings for other
    /// components. The result is validated.
    pub fn from_settings(settings: &HashMap<String, String>) -> Result<Self> {
        let mut config = Self::default();
        for (key, value) in settings {
            config.apply(key, value)?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document with a `[storage]` table. The result is validated.
    pub fn from_toml_str(document: &str) -> Result<Self> {
        let config = Self::parse_toml(document)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document without validating, so later overrides can complete it
    pub fn parse_toml(document: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(document)?;
        Ok(file.storage)
    }

    /// Apply a single `storage.*` setting
    ///
    /// Returns an error for a recognized key carrying an unparsable value.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        let value = value.trim();
        let optional = || (!value.is_empty()).then(|| value.to_string());
        match key {
            "storage.backend" => self.backend = Some(value.parse()?),
            "storage.prepend_hash" | "prepend_hash" => {
                self.prepend_hash = parse_bool(key, value)?
            }
            "storage.dir" => self.dir = optional().map(PathBuf::from),
            "storage.bucket" => self.bucket = optional(),
            "storage.access_key" => self.access_key = optional(),
            "storage.secret_key" => self.secret_key = optional(),
            "storage.region" => {
                self.region = optional().unwrap_or_else(|| DEFAULT_REGION.to_string())
            }
            "storage.endpoint_url" => self.endpoint_url = optional(),
            "storage.force_path_style" => self.force_path_style = parse_bool(key, value)?,
            "storage.url_expiry_secs" => {
                let secs = value.parse::<u64>().map_err(|e| {
                    Error::config(format!("{} must be a number of seconds: {}", key, e))
                })?;
                self.url_expiry = Duration::from_secs(secs);
            }
            _ => {}
        }
        Ok(())
    }

    /// The backend this configuration selects
    ///
    /// An explicit `backend` wins; otherwise a configured bucket selects s3
    /// and anything else selects the filesystem.
    pub fn backend_kind(&self) -> BackendKind {
        match self.backend {
            Some(kind) => kind,
            None if self.bucket.is_some() => BackendKind::S3,
            None => BackendKind::File,
        }
    }

    /// Check that the settings required by the selected backend are present
    pub fn validate(&self) -> Result<()> {
        match self.backend_kind() {
            BackendKind::File => {
                if self.dir.is_none() {
                    return Err(Error::config("storage.dir is required for the file backend"));
                }
            }
            BackendKind::S3 => {
                match self.bucket.as_deref() {
                    None => {
                        return Err(Error::config(
                            "storage.bucket is required for the s3 backend",
                        ))
                    }
                    Some(bucket) if !is_valid_bucket_name(bucket) => {
                        return Err(Error::config(format!(
                            "storage.bucket {:?} is not a valid bucket name",
                            bucket
                        )))
                    }
                    Some(_) => {}
                }
                if self.access_key.is_some() != self.secret_key.is_some() {
                    return Err(Error::config(
                        "storage.access_key and storage.secret_key must be set together",
                    ));
                }
            }
        }
        if self.url_expiry.is_zero() {
            return Err(Error::config("storage.url_expiry_secs must be positive"));
        }
        Ok(())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" | "" => Ok(false),
        other => Err(Error::config(format!(
            "{} must be a boolean, got {:?}",
            key, other
        ))),
    }
}

/// Bucket names are 3-63 characters of lowercase letters, digits, `.`, `-` and `_`
fn is_valid_bucket_name(bucket: &str) -> bool {
    (3..=63).contains(&bucket.len())
        && bucket
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '-' | '_'))
        && !bucket.starts_with(['.', '-'])
        && !bucket.ends_with(['.', '-'])
}

/// Duration serialization helper using whole seconds
mod seconds_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
