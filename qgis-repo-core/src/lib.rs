//! qgis-repo library exports
//!
//! Maintains a QGIS plugin repository: validates uploaded plugin archives,
//! stores them under the web directory, and keeps the `plugins.xml` catalog
//! that QGIS clients read in step with what is on disk.

pub mod archive;
pub mod catalog;
pub mod compat;
pub mod config;
pub mod error;
pub mod ingest;
pub mod manifest;
pub mod metadata;
pub mod mirror;
pub mod repo;
pub mod version;

pub use catalog::{CatalogRecord, CatalogStore, RecordIdentity, VersionSelector};
pub use config::{RepoConfig, Settings};
pub use error::{IngestError, RepoError, SetupError, StoreError, ValidationError};
pub use repo::{MirrorOptions, MirrorSummary, Repository, UpdateOptions};
pub use version::VersionKey;
