//! Plugin archive validation
//!
//! [`validate`] opens an uploaded ZIP, checks it is safe to publish, and
//! extracts its metadata.txt. Nothing on disk is modified here; the
//! returned [`UploadArtifact`] is the input to the ingestion pipeline.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;
use zip::ZipArchive;

use crate::error::ValidationError;
use crate::manifest::{Manifest, GENERAL_SECTION};
use crate::metadata::{self, BOOLEAN, OPTIONAL, RECOMMENDED, REQUIRED};

/// Largest archive accepted by default, in bytes
pub const DEFAULT_MAX_SIZE: u64 = 512_000_000;

/// Name of the manifest inside the package folder
pub const METADATA_FILE: &str = "metadata.txt";

const INIT_FILE: &str = "__init__.py";
const AUTHORIZATION_ROLE: &str = "authorization_role";

static PACKAGE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_-]+$").expect("valid package name pattern"));

#[derive(Debug, Clone)]
pub struct ValidateOptions {
    pub max_size: u64,
    /// Skip the recommended-field check (mirrored archives)
    pub invalid_fields_allowed: bool,
    /// Role recorded as `authorization_role` when set
    pub auth_role: Option<String>,
}

impl Default for ValidateOptions {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            invalid_fields_allowed: false,
            auth_role: None,
        }
    }
}

/// A validated upload, ready for ingestion
#[derive(Debug, Clone)]
pub struct UploadArtifact {
    /// Canonical path of the archive
    pub archive_path: PathBuf,
    /// File name as uploaded
    pub archive_name: String,
    /// Top-level folder inside the archive
    pub package_name: String,
    pub metadata_source: String,
    /// `[general]` values, trimmed, booleans rendered `True`/`False`
    pub fields: Vec<(String, String)>,
    /// Path of metadata.txt inside the archive
    pub manifest_path: String,
    pub manifest_bytes: Vec<u8>,
    /// Manifest with rewritten identifiers, when any were changed
    pub rewritten_manifest: Option<Vec<u8>>,
}

impl UploadArtifact {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value,
            None => self.fields.push((key.to_string(), value)),
        }
    }

    pub fn flag(&self, key: &str) -> bool {
        self.get(key).map(metadata::parse_flag).unwrap_or(false)
    }

    pub fn name(&self) -> &str {
        self.get("name").unwrap_or_default()
    }

    pub fn version(&self) -> &str {
        self.get("version").unwrap_or_default()
    }

    /// The manifest as it should be stored in the archive
    pub fn effective_manifest(&self) -> &[u8] {
        self.rewritten_manifest
            .as_deref()
            .unwrap_or(&self.manifest_bytes)
    }
}

fn open(path: &Path) -> Result<ZipArchive<File>, ValidationError> {
    let file = File::open(path).map_err(|e| ValidationError::Unreadable(e.to_string()))?;
    ZipArchive::new(file).map_err(|e| ValidationError::Unreadable(e.to_string()))
}

/// Entry names in central directory order, rejecting any that could
/// escape the extraction directory
fn entry_names(archive: &mut ZipArchive<File>) -> Result<Vec<String>, ValidationError> {
    let mut names = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let entry = archive
            .by_index_raw(i)
            .map_err(|e| ValidationError::Unreadable(e.to_string()))?;
        let name = String::from_utf8_lossy(entry.name_raw()).into_owned();
        if name.contains("..") || name.starts_with('/') {
            return Err(ValidationError::UnsafePath { entry: name });
        }
        names.push(name);
    }
    Ok(names)
}

/// Read every entry to the end so the CRC is checked
fn check_entries(archive: &mut ZipArchive<File>, names: &[String]) -> Result<(), ValidationError> {
    for (i, name) in names.iter().enumerate() {
        let corrupt = || ValidationError::CorruptEntry {
            entry: name.clone(),
        };
        let mut entry = archive.by_index(i).map_err(|_| corrupt())?;
        io::copy(&mut entry, &mut io::sink()).map_err(|_| corrupt())?;
    }
    Ok(())
}

/// Decode the manifest, naming the offending field when it is not UTF-8
fn decode_manifest(raw: &[u8], manifest_path: &str) -> Result<String, ValidationError> {
    let raw = raw.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(raw);
    match std::str::from_utf8(raw) {
        Ok(text) => Ok(text.to_string()),
        Err(_) => {
            let lossy = String::from_utf8_lossy(raw);
            let field = Manifest::parse(&lossy)
                .ok()
                .and_then(|m| {
                    m.items(GENERAL_SECTION)?
                        .iter()
                        .find(|(_, v)| v.contains('\u{FFFD}'))
                        .map(|(k, _)| k.clone())
                })
                .unwrap_or_else(|| manifest_path.to_string());
            Err(ValidationError::Encoding { field })
        }
    }
}

fn is_known_key(key: &str) -> bool {
    key == "icon"
        || REQUIRED.contains(&key)
        || RECOMMENDED.contains(&key)
        || OPTIONAL.contains(&key)
        || BOOLEAN.contains(&key)
}

/// Validate a plugin archive and read its metadata
pub fn validate(path: &Path, opts: &ValidateOptions) -> Result<UploadArtifact, ValidationError> {
    let archive_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let not_found = || ValidationError::NotFound {
        path: path.to_path_buf(),
    };
    let archive_path = fs::canonicalize(path).map_err(|_| not_found())?;
    if !archive_path.is_absolute() || !archive_path.is_file() {
        return Err(not_found());
    }

    let size = fs::metadata(&archive_path).map_err(|_| not_found())?.len();
    if size > opts.max_size {
        return Err(ValidationError::TooLarge {
            size,
            max: opts.max_size,
        });
    }

    let mut archive = open(&archive_path)?;
    let names = entry_names(&mut archive)?;
    check_entries(&mut archive, &names)?;

    let package_name = names
        .first()
        .and_then(|first| first.split_once('/'))
        .map(|(pkg, _)| pkg.to_string())
        .filter(|pkg| !pkg.is_empty())
        .ok_or(ValidationError::NoPackageFolder)?;

    let init_path = format!("{package_name}/{INIT_FILE}");
    let manifest_path = format!("{package_name}/{METADATA_FILE}");
    let has = |n: &str| names.iter().any(|name| name == n);
    if !has(&init_path) && !has(&manifest_path) {
        return Err(ValidationError::NoPluginFiles {
            init: init_path,
            metadata: manifest_path,
        });
    }
    if !has(&init_path) {
        return Err(ValidationError::MissingInit);
    }
    if !has(&manifest_path) {
        return Err(ValidationError::MissingMetadata {
            archive: archive_name,
        });
    }

    let mut manifest_bytes = Vec::new();
    archive
        .by_name(&manifest_path)
        .and_then(|mut entry| Ok(entry.read_to_end(&mut manifest_bytes)?))
        .map_err(|_| ValidationError::CorruptEntry {
            entry: manifest_path.clone(),
        })?;

    let text = decode_manifest(&manifest_bytes, &manifest_path)?;
    let manifest = Manifest::parse(&text).map_err(|e| ValidationError::MetadataParse {
        source_name: manifest_path.clone(),
        message: e.to_string(),
    })?;
    let general = manifest
        .items(GENERAL_SECTION)
        .ok_or_else(|| ValidationError::MissingGeneralSection {
            source_name: manifest_path.clone(),
        })?;

    let metadata_source = METADATA_FILE.to_string();
    let present = |key: &str| {
        general
            .iter()
            .any(|(k, v)| k == key && !v.trim().is_empty())
    };
    let mut checked: Vec<&str> = REQUIRED.to_vec();
    if !opts.invalid_fields_allowed {
        checked.extend_from_slice(RECOMMENDED);
    }
    let missing: Vec<String> = checked
        .into_iter()
        .filter(|key| !present(key))
        .map(str::to_string)
        .collect();
    if !missing.is_empty() {
        return Err(ValidationError::MissingFields {
            fields: missing,
            source_name: metadata_source,
            archive: archive_name,
        });
    }

    if !PACKAGE_NAME.is_match(&package_name) {
        return Err(ValidationError::InvalidPackageName(package_name));
    }

    let mut fields = Vec::with_capacity(general.len() + 1);
    for (key, value) in general {
        if key == "author" && value.contains('/') {
            return Err(ValidationError::InvalidAuthor);
        }
        if !is_known_key(key) {
            debug!(key = %key, "unrecognized metadata key");
        }
        let value = if metadata::is_boolean(key) {
            metadata::render_flag(metadata::parse_flag(value)).to_string()
        } else {
            value.trim().to_string()
        };
        fields.push((key.clone(), value));
    }
    if let Some(role) = &opts.auth_role {
        fields.push((AUTHORIZATION_ROLE.to_string(), role.clone()));
    }

    debug!(
        archive = %archive_name,
        package = %package_name,
        fields = fields.len(),
        "validated plugin archive"
    );

    Ok(UploadArtifact {
        archive_path,
        archive_name,
        package_name,
        metadata_source,
        fields,
        manifest_path,
        manifest_bytes,
        rewritten_manifest: None,
    })
}
