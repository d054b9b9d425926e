//! pkgstash core - Foundation for the package artifact store
//!
//! Provides the package identity model, error handling and backend
//! configuration shared by every storage driver.

pub mod config;
pub mod error;
pub mod types;

pub use config::{BackendKind, StorageConfig, DEFAULT_REGION, DEFAULT_URL_EXPIRY};
pub use error::{Error, Result};
pub use types::*;
