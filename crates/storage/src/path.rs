//! Package location resolution
//!
//! Maps a package identity to a `/`-separated location relative to the
//! storage root: `name/filename`, or `xxxx/name/filename` when hash
//! prefixing is enabled.

use pkgstash_core::PackageIdentity;
use sha2::{Digest, Sha256};

/// Number of hex characters in the optional hash prefix
pub const HASH_PREFIX_LEN: usize = 4;

/// Pure mapping from package identity to storage location
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PathResolver {
    prepend_hash: bool,
}

impl PathResolver {
    /// Create a resolver, optionally prefixing locations with a hash segment
    pub fn new(prepend_hash: bool) -> Self {
        Self { prepend_hash }
    }

    /// Whether locations carry a hash prefix
    pub fn prepend_hash(&self) -> bool {
        self.prepend_hash
    }

    /// Resolve the location of a package
    pub fn resolve(&self, identity: &PackageIdentity) -> String {
        resolve(identity, self.prepend_hash)
    }
}

/// Resolve the location of a package
///
/// Deterministic: the same identity and flag always produce the same location.
pub fn resolve(identity: &PackageIdentity, prepend_hash: bool) -> String {
    let base = format!("{}/{}", identity.name(), identity.filename());
    if prepend_hash {
        format!("{}/{}", hash_prefix(identity), base)
    } else {
        base
    }
}

/// First four hex characters of SHA-256 over name and filename
///
/// Spreads keys across prefixes; it carries no identity information.
pub fn hash_prefix(identity: &PackageIdentity) -> String {
    let mut hasher = Sha256::new();
    hasher.update(identity.name().as_bytes());
    hasher.update(identity.filename().as_bytes());
    let digest = hasher.finalize();
    let mut prefix = hex::encode(&digest[..HASH_PREFIX_LEN / 2]);
    prefix.truncate(HASH_PREFIX_LEN);
    prefix
}
