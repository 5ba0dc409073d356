//! Error types for repository operations with clear, actionable messages

use std::path::PathBuf;
use thiserror::Error;

/// A plugin archive or its metadata.txt failed validation.
///
/// Always recoverable: validation runs before anything is written, so no
/// repository state has changed when one of these is returned.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("ZIP archive can not be found in uploads directory: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("ZIP archive is too big at ({size}) Bytes. Max size is {max} Bytes")]
    TooLarge { size: u64, max: u64 },

    #[error("Could not unzip archive: {0}")]
    Unreadable(String),

    #[error("For security reasons, ZIP archive cannot contain paths: {entry}")]
    UnsafePath { entry: String },

    #[error("Bad ZIP (maybe a CRC error) on file {entry}")]
    CorruptEntry { entry: String },

    #[error("Cannot find a folder inside the compressed package: this does not seem a valid plugin")]
    NoPackageFolder,

    #[error("Cannot find __init__.py or metadata.txt in the ZIP package (searched for {init} and {metadata})")]
    NoPluginFiles { init: String, metadata: String },

    #[error("Cannot find __init__.py in plugin package")]
    MissingInit,

    #[error("Cannot find a valid metadata.txt for {archive}")]
    MissingMetadata { archive: String },

    #[error("Cannot find a section named 'general' in {source_name}")]
    MissingGeneralSection { source_name: String },

    #[error("Errors parsing {source_name}: {message}")]
    MetadataParse { source_name: String, message: String },

    #[error("Cannot find required metadata ({}) in metadata source {source_name} for {archive}", fields.join(" "))]
    MissingFields {
        fields: Vec<String>,
        source_name: String,
        archive: String,
    },

    #[error("The name of top level directory inside the zip package must start with an ASCII letter and can only contain ASCII letters, digits and the signs '-' and '_' (got '{0}')")]
    InvalidPackageName(String),

    #[error("Author name cannot contain slashes.")]
    InvalidAuthor,

    #[error("There was an error converting metadata '{field}' to UTF-8")]
    Encoding { field: String },
}

/// The persisted catalog document could not be read or written.
///
/// Fatal for the current operation; a missing or broken catalog never
/// degrades to an empty one.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Error accessing repo XML file '{}'", path.display())]
    NotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Error parsing repo XML file '{}': {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("Error writing repo XML file '{}'", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Repository settings or directories are unusable.
#[derive(Error, Debug)]
pub enum SetupError {
    #[error("Repo '{0}' has no settings defined")]
    UnknownRepo(String),

    #[error("Repo {setting} directory undefined or does not exist: {}", path.display())]
    MissingDirectory { setting: &'static str, path: PathBuf },

    #[error("Failed to read settings file {}", path.display())]
    ReadSettings {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse settings (invalid YAML)")]
    ParseSettings {
        #[source]
        source: serde_yaml_ng::Error,
    },

    #[error("Failed to read template {}", path.display())]
    ReadTemplate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create repo directory {}", path.display())]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Ingesting one archive failed.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Not a valid plugin ZIP archive: {0}")]
    Invalid(#[from] ValidationError),

    #[error("Failed to place plugin archive at {}", path.display())]
    Placement {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to update metadata.txt inside {}: {message}", path.display())]
    Patch { path: PathBuf, message: String },
}

/// Umbrella error for [`crate::repo::Repository`] operations.
#[derive(Error, Debug)]
pub enum RepoError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Setup(#[from] SetupError),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error("{0}")]
    Action(String),

    #[error("Failed to fetch archive for {file_name}")]
    Fetch {
        file_name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error on {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ValidationError {
    /// Log validation failures so operators see them even when a caller
    /// only maps the error to an exit code.
    pub fn log(&self) {
        tracing::warn!(target: "validation", "{}", self);
    }
}
