//! Core type definitions for the package artifact store

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Error, Result};

/// Metadata field carrying the package name on object storage entries
pub const METADATA_NAME: &str = "name";

/// Metadata field carrying the package version on object storage entries
pub const METADATA_VERSION: &str = "version";

/// Extension used by [`PackageIdentity::sdist`]
pub const DEFAULT_SDIST_EXTENSION: &str = ".tar.gz";

/// The (name, version, filename) triple identifying a stored artifact
///
/// Fields are validated on construction: none may be empty, and name and
/// filename must be usable as a single path segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "IdentityFields")]
pub struct PackageIdentity {
    name: String,
    version: String,
    filename: String,
}

impl PackageIdentity {
    /// Create a validated identity
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        filename: impl Into<String>,
    ) -> Result<Self> {
        let identity = Self {
            name: name.into(),
            version: version.into(),
            filename: filename.into(),
        };
        identity.validate()?;
        Ok(identity)
    }

    /// Create an identity whose filename follows the `name-version.tar.gz` convention
    pub fn sdist(name: impl Into<String>, version: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let version = version.into();
        let filename = format!("{}-{}{}", name, version, DEFAULT_SDIST_EXTENSION);
        Self::new(name, version, filename)
    }

    /// Package name as supplied by the caller
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Package version
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Stored filename (last location segment)
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Normalized form of the package name
    pub fn normalized_name(&self) -> String {
        normalize_name(&self.name)
    }

    fn validate(&self) -> Result<()> {
        check_segment("name", &self.name)?;
        check_segment("filename", &self.filename)?;
        if self.version.trim().is_empty() {
            return Err(Error::identity("version must not be empty"));
        }
        if self.version.contains('/') {
            return Err(Error::identity(format!(
                "version {:?} must not contain '/'",
                self.version
            )));
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct IdentityFields {
    name: String,
    version: String,
    filename: String,
}

impl TryFrom<IdentityFields> for PackageIdentity {
    type Error = Error;

    fn try_from(fields: IdentityFields) -> Result<Self> {
        Self::new(fields.name, fields.version, fields.filename)
    }
}

impl fmt::Display for PackageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}=={} ({})", self.name, self.version, self.filename)
    }
}

fn check_segment(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::identity(format!("{} must not be empty", field)));
    }
    if value == "." || value == ".." {
        return Err(Error::identity(format!(
            "{} {:?} is not a valid path segment",
            field, value
        )));
    }
    if value.contains('/') || value.contains('\\') {
        return Err(Error::identity(format!(
            "{} {:?} must not contain path separators",
            field, value
        )));
    }
    Ok(())
}

/// Normalize a package name for comparison
///
/// Lowercases and collapses every run of `-`, `_` and `.` into a single `-`,
/// so `My_Pkg`, `my.pkg` and `my--pkg` all compare equal.
pub fn normalize_name(name: &str) -> String {
    let mut normalized = String::with_capacity(name.len());
    let mut in_separator = false;
    for ch in name.chars() {
        if matches!(ch, '-' | '_' | '.') {
            if !in_separator {
                normalized.push('-');
                in_separator = true;
            }
        } else {
            normalized.extend(ch.to_lowercase());
            in_separator = false;
        }
    }
    normalized
}
