//! Package identity recovery from raw storage entries
//!
//! Entries written with structured metadata carry `name` and `version`
//! directly. Legacy entries (and every filesystem entry) carry nothing but
//! their key, so the identity is rebuilt from the parent directory name and
//! the `name-version.ext` filename convention.
//!
//! Failures are returned as values. Listing skips a failed entry with a
//! warning and carries on with the rest.

use std::collections::HashMap;

use pkgstash_core::{normalize_name, PackageIdentity, METADATA_NAME, METADATA_VERSION};
use thiserror::Error;
use tracing::warn;

/// Recognized package extensions, longest first so `.tar.gz` wins over `.tar`
pub const PACKAGE_EXTENSIONS: &[&str] = &[
    ".tar.bz2", ".tar.gz", ".tar.xz", ".tgz", ".tbz", ".tar", ".zip", ".whl", ".egg", ".exe",
    ".msi", ".rpm", ".dmg", ".deb",
];

/// Raw record enumerated by a backend during listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageEntry {
    /// `/`-separated key relative to the storage root
    pub key: String,

    /// Attached metadata, if the backend supports it
    pub metadata: Option<HashMap<String, String>>,
}

impl StorageEntry {
    /// Entry without metadata
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            metadata: None,
        }
    }

    /// Entry with attached metadata
    pub fn with_metadata(key: impl Into<String>, metadata: HashMap<String, String>) -> Self {
        Self {
            key: key.into(),
            metadata: Some(metadata),
        }
    }
}

/// Why an entry could not be turned into a package identity
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseFailure {
    #[error("entry key is empty")]
    EmptyKey,

    #[error("entry {key:?} has no directory to take the package name from")]
    MissingDirectory { key: String },

    #[error("unrecognized package extension on {filename:?}")]
    UnknownExtension { filename: String },

    #[error("no version found in {filename:?}")]
    MissingVersion { filename: String },

    #[error("{filename:?} names package {embedded:?} but is stored under {directory:?}")]
    NameMismatch {
        directory: String,
        embedded: String,
        filename: String,
    },

    #[error("recovered identity is invalid: {reason}")]
    InvalidIdentity { reason: String },
}

/// Recover the package identity of a storage entry
///
/// Metadata is used when it carries both a non-empty `name` and `version`;
/// otherwise the key is parsed. The filename is always the last key segment.
pub fn parse_entry(entry: &StorageEntry) -> Result<PackageIdentity, ParseFailure> {
    let segments: Vec<&str> = entry.key.split('/').filter(|s| !s.is_empty()).collect();
    let filename = *segments.last().ok_or(ParseFailure::EmptyKey)?;

    if let Some((name, version)) = entry.metadata.as_ref().and_then(metadata_identity) {
        return PackageIdentity::new(name, version, filename).map_err(invalid);
    }

    let directory = match segments.len() {
        0 | 1 => {
            return Err(ParseFailure::MissingDirectory {
                key: entry.key.clone(),
            })
        }
        n => segments[n - 2],
    };
    let version = parse_filename(filename, directory)?;
    PackageIdentity::new(directory, version, filename).map_err(invalid)
}

/// Resolve an entry, logging and dropping it on failure
pub(crate) fn parse_or_skip(entry: &StorageEntry, backend: &'static str) -> Option<PackageIdentity> {
    match parse_entry(entry) {
        Ok(identity) => Some(identity),
        Err(failure) => {
            warn!(backend, key = %entry.key, reason = %failure, "Skipping unparsable storage entry");
            None
        }
    }
}

/// Extract the version from a package filename
///
/// `expected_name` is the name the file is stored under; the name embedded
/// in the filename must match it after normalization.
pub fn parse_filename(filename: &str, expected_name: &str) -> Result<String, ParseFailure> {
    let (stem, extension) =
        split_extension(filename).ok_or_else(|| ParseFailure::UnknownExtension {
            filename: filename.to_string(),
        })?;
    let expected = normalize_name(expected_name);
    let missing_version = || ParseFailure::MissingVersion {
        filename: filename.to_string(),
    };
    let mismatch = |embedded: &str| ParseFailure::NameMismatch {
        directory: expected_name.to_string(),
        embedded: embedded.to_string(),
        filename: filename.to_string(),
    };

    // Binary distributions escape dashes in the name, so the first field is the name
    if matches!(extension, ".whl" | ".egg") {
        let mut fields = stem.splitn(3, '-');
        let embedded = fields.next().unwrap_or_default();
        let version = fields
            .next()
            .filter(|v| !v.is_empty())
            .ok_or_else(missing_version)?;
        if normalize_name(embedded) != expected {
            return Err(mismatch(embedded));
        }
        return Ok(version.to_string());
    }

    for (idx, _) in stem.match_indices('-') {
        if normalize_name(&stem[..idx]) == expected {
            let version = &stem[idx + 1..];
            if version.is_empty() {
                return Err(missing_version());
            }
            return Ok(version.to_string());
        }
    }

    match embedded_name(stem) {
        Some(embedded) => Err(mismatch(embedded)),
        None => Err(missing_version()),
    }
}

/// Split a filename into stem and recognized extension (case-insensitive)
pub fn split_extension(filename: &str) -> Option<(&str, &'static str)> {
    let lower = filename.to_ascii_lowercase();
    PACKAGE_EXTENSIONS
        .iter()
        .find(|ext| lower.ends_with(*ext) && lower.len() > ext.len())
        .map(|ext| (&filename[..filename.len() - ext.len()], *ext))
}

/// Name portion of a stem: everything before the first dash followed by a digit
fn embedded_name(stem: &str) -> Option<&str> {
    stem.match_indices('-')
        .find(|(idx, _)| {
            stem[idx + 1..]
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_digit())
        })
        .map(|(idx, _)| &stem[..idx])
}

fn metadata_identity(metadata: &HashMap<String, String>) -> Option<(&str, &str)> {
    let name = metadata.get(METADATA_NAME)?.trim();
    let version = metadata.get(METADATA_VERSION)?.trim();
    (!name.is_empty() && !version.is_empty()).then_some((name, version))
}

fn invalid(e: pkgstash_core::Error) -> ParseFailure {
    ParseFailure::InvalidIdentity {
        reason: e.to_string(),
    }
}
