//! Archive ingestion: validated upload -> stored package, icon and record
//!
//! Ingestion runs in two phases so a batch can be checked before anything
//! on disk changes:
//!
//! 1. [`Ingestor::prepare`] validates the archive and rewrites identifiers
//!    in memory
//! 2. [`Ingestor::commit`] moves the archive into the packages directory,
//!    extracts its icon, patches metadata.txt in place and builds the
//!    catalog record

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::archive::{self, UploadArtifact, ValidateOptions};
use crate::catalog::record::{self as tags, CatalogRecord, Text};
use crate::config::{RepoConfig, DEFAULT_ICON, WEB_ICON_DIR};
use crate::error::IngestError;
use crate::manifest;
use crate::metadata::{self, Adjust};
use crate::version;

/// A dotted version embedded in a file name, with its leading dot
static EMBEDDED_VERSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\.?)(\d+\.)?(\d+\.)(\d+)").expect("valid version pattern"));

static DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("valid digit pattern"));

const UPDATE_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    /// Suffix appended to the plugin name; `None` uses the repo setting
    pub name_suffix: Option<String>,
    /// Store in the authenticated packages directory
    pub requires_auth: bool,
    /// Role required to download; implies `requires_auth`
    pub auth_role: Option<String>,
    /// HTML prepended to `about` for plugins that require a subscription
    pub auth_notice: Option<String>,
    /// Commit hash appended to suffixed versions
    pub git_hash: Option<String>,
    pub untrusted: bool,
    pub invalid_fields_allowed: bool,
}

impl IngestOptions {
    pub fn requires_auth(&self) -> bool {
        self.requires_auth || self.auth_role.is_some()
    }
}

/// An upload that passed validation, with its identifiers already
/// rewritten in memory
#[derive(Debug, Clone)]
pub struct PreparedUpload {
    pub artifact: UploadArtifact,
    /// Version before a name suffix forced a timestamped one
    pub orig_version: Option<String>,
    options: IngestOptions,
    timestamp: NaiveDateTime,
}

impl PreparedUpload {
    pub fn name(&self) -> &str {
        self.artifact.name()
    }

    pub fn version(&self) -> &str {
        self.artifact.version()
    }
}

/// Result of a committed upload
#[derive(Debug, Clone)]
pub struct IngestedPlugin {
    pub record: CatalogRecord,
    pub file_name: String,
    pub stored_path: PathBuf,
}

pub struct Ingestor<'a> {
    config: &'a RepoConfig,
    clock: Option<NaiveDateTime>,
}

impl<'a> Ingestor<'a> {
    pub fn new(config: &'a RepoConfig) -> Self {
        Self {
            config,
            clock: None,
        }
    }

    /// Use a fixed time for version stamps and dates
    pub fn at(mut self, now: NaiveDateTime) -> Self {
        self.clock = Some(now);
        self
    }

    fn now(&self) -> NaiveDateTime {
        self.clock.unwrap_or_else(|| Local::now().naive_local())
    }

    /// Validate an archive and compute its final identifiers.
    ///
    /// Touches nothing on disk.
    pub fn prepare(&self, path: &Path, opts: &IngestOptions) -> Result<PreparedUpload, IngestError> {
        let validate = ValidateOptions {
            max_size: self.config.max_upload_size,
            invalid_fields_allowed: opts.invalid_fields_allowed,
            auth_role: opts.auth_role.clone(),
        };
        let mut artifact = archive::validate(path, &validate).inspect_err(|e| e.log())?;

        let suffix = opts
            .name_suffix
            .as_deref()
            .unwrap_or(&self.config.plugin_name_suffix);
        let timestamp = self.now();
        let orig_version =
            rewrite_identifiers(&mut artifact, suffix, opts.git_hash.as_deref(), timestamp);

        Ok(PreparedUpload {
            artifact,
            orig_version,
            options: opts.clone(),
            timestamp,
        })
    }

    /// Place a prepared upload and build its catalog record
    pub fn commit(&self, prepared: PreparedUpload) -> Result<IngestedPlugin, IngestError> {
        let auth = prepared.options.requires_auth();
        let artifact = &prepared.artifact;

        let file_name = stored_file_name(
            &artifact.archive_name,
            artifact.version(),
            prepared.orig_version.as_deref(),
        );
        let stored_path = self.place(&artifact.archive_path, &file_name, auth)?;
        let download_url = self.config.download_url(&file_name, auth);

        let icon = self.extract_icon(artifact, &stored_path);

        if let Some(data) = &artifact.rewritten_manifest {
            patch_archive(&stored_path, &artifact.manifest_path, data)?;
        }

        let record = self.build_record(&prepared, &file_name, &icon, &download_url);
        info!(
            name = record.name(),
            version = record.version(),
            file = %file_name,
            "ingested plugin"
        );

        Ok(IngestedPlugin {
            record,
            file_name,
            stored_path,
        })
    }

    /// Validate, place and record a single archive
    pub fn ingest(&self, path: &Path, opts: &IngestOptions) -> Result<IngestedPlugin, IngestError> {
        let prepared = self.prepare(path, opts)?;
        self.commit(prepared)
    }

    fn place(&self, source: &Path, file_name: &str, auth: bool) -> Result<PathBuf, IngestError> {
        let dir = self.config.packages_dir(auth);
        let dest = dir.join(file_name);
        let placement = |source: io::Error| IngestError::Placement {
            path: dest.clone(),
            source,
        };

        fs::create_dir_all(&dir).map_err(placement)?;
        if dest.exists() {
            debug!("Replacing existing archive {}", dest.display());
            fs::remove_file(&dest).map_err(placement)?;
        }
        if fs::rename(source, &dest).is_err() {
            // Uploads may live on another filesystem
            fs::copy(source, &dest).map_err(placement)?;
            fs::remove_file(source).map_err(placement)?;
        }
        set_readable(&dest).map_err(placement)?;

        info!("Moved {} to {}", source.display(), dest.display());
        Ok(dest)
    }

    /// Copy the plugin icon next to the catalog; returns the icon reference
    /// for the record, falling back to the default icon on any failure
    fn extract_icon(&self, artifact: &UploadArtifact, stored: &Path) -> String {
        let Some(icon) = artifact.get("icon").filter(|i| !i.is_empty()) else {
            return DEFAULT_ICON.to_string();
        };
        let icon = icon.strip_prefix("./").unwrap_or(icon);

        match self.copy_icon(artifact, stored, icon) {
            Ok(reference) => reference,
            Err(e) => {
                warn!(
                    package = %artifact.package_name,
                    icon,
                    error = %e,
                    "could not extract icon; using default"
                );
                DEFAULT_ICON.to_string()
            }
        }
    }

    fn copy_icon(&self, artifact: &UploadArtifact, stored: &Path, icon: &str) -> io::Result<String> {
        let mut zip = ZipArchive::new(File::open(stored)?)?;
        let mut entry = zip.by_name(&format!("{}/{}", artifact.package_name, icon))?;
        if entry.is_dir() {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "icon is a directory"));
        }
        let mut data = Vec::new();
        entry.read_to_end(&mut data)?;

        let (_, ext) = splitext(icon.rsplit('/').next().unwrap_or(icon));
        let version = artifact.version().replace(|c: char| c == '/' || c == '\\', "_");
        let icon_name = format!("{version}{ext}");

        let dir = self.config.icons_dir.join(&artifact.package_name);
        fs::create_dir_all(&dir)?;
        let path = dir.join(&icon_name);
        if path.exists() {
            fs::remove_file(&path)?;
        }
        fs::write(&path, data)?;

        Ok(format!("{WEB_ICON_DIR}/{}/{icon_name}", artifact.package_name))
    }

    fn build_record(
        &self,
        prepared: &PreparedUpload,
        file_name: &str,
        icon: &str,
        download_url: &str,
    ) -> CatalogRecord {
        let md = &prepared.artifact;
        let opts = &prepared.options;
        let auth = opts.requires_auth();
        let now = prepared.timestamp.format(UPDATE_DATE_FORMAT).to_string();

        let mut record = CatalogRecord::new(md.name(), md.version());

        // Value copied from metadata.txt, adjusted the way the catalog expects
        let from_metadata = |tag: &str, default: Option<&str>| -> Option<String> {
            let (key, adjust) = metadata::mapping_for_tag(tag);
            let value = md.get(key).or(default)?;
            Some(match adjust {
                Adjust::None => value.to_string(),
                Adjust::EngineVersion => version::complete(value),
                Adjust::Tags => metadata::normalize_tags(value),
            })
        };

        let mut add = |tag: &str, value: Option<String>| {
            let value = value.map(|mut v| {
                if tag == tags::DESCRIPTION && auth {
                    v.push_str(&self.config.auth_dld_msg);
                }
                if tag == tags::ABOUT && auth {
                    if let Some(notice) = opts.auth_notice.as_deref() {
                        v.insert_str(0, notice);
                    }
                }
                Text::for_tag(tag, v)
            });
            record.push_field(tag, value);
        };

        let flag = |tag: &str| from_metadata(tag, Some(metadata::render_flag(false)));

        add(tags::DESCRIPTION, from_metadata(tags::DESCRIPTION, None));
        add(tags::ABOUT, from_metadata(tags::ABOUT, None));
        add("version", from_metadata("version", None));
        add(tags::AUTHORIZATION_ROLE, from_metadata(tags::AUTHORIZATION_ROLE, None));
        add(tags::TRUSTED, Some(metadata::render_flag(!opts.untrusted).to_string()));
        add(tags::MIN_VERSION, from_metadata(tags::MIN_VERSION, None));
        add(
            tags::MAX_VERSION,
            from_metadata(tags::MAX_VERSION, Some(self.config.default_max_version.as_str())),
        );
        add(tags::HOMEPAGE, from_metadata(tags::HOMEPAGE, None));
        add(tags::FILE_NAME, Some(file_name.to_string()));
        add(tags::ICON, Some(icon.to_string()));
        add(tags::AUTHOR_NAME, from_metadata(tags::AUTHOR_NAME, None));
        add(tags::DOWNLOAD_URL, Some(download_url.to_string()));
        add(tags::UPLOADED_BY, Some(self.config.uploaded_by.clone()));
        add(tags::CREATE_DATE, from_metadata(tags::CREATE_DATE, Some(now.as_str())));
        add(tags::UPDATE_DATE, Some(now.clone()));
        add(tags::EXPERIMENTAL, flag(tags::EXPERIMENTAL));
        add(tags::DEPRECATED, flag(tags::DEPRECATED));
        add(tags::TRACKER, from_metadata(tags::TRACKER, None));
        add(tags::REPOSITORY, from_metadata(tags::REPOSITORY, None));
        add(tags::CHANGELOG, from_metadata(tags::CHANGELOG, None));
        add(tags::TAGS, from_metadata(tags::TAGS, None));
        add(tags::DOWNLOADS, Some("0".to_string()));
        add(tags::AVERAGE_VOTE, Some("0.0".to_string()));
        add(tags::RATING_VOTES, Some("0".to_string()));
        add(
            tags::EXTERNAL_DEPENDENCIES,
            from_metadata(tags::EXTERNAL_DEPENDENCIES, None),
        );
        add(tags::SERVER, flag(tags::SERVER));

        record
    }
}

/// Normalize the version and apply a name suffix, rewriting metadata.txt
/// to match. Returns the pre-suffix version when a suffix applied.
fn rewrite_identifiers(
    artifact: &mut UploadArtifact,
    suffix: &str,
    git_hash: Option<&str>,
    now: NaiveDateTime,
) -> Option<String> {
    let current = artifact.version().to_string();
    let has_space = current.contains(char::is_whitespace);
    if !has_space && suffix.is_empty() {
        return None;
    }

    let mut raw = artifact.manifest_bytes.clone();
    let mut changed = false;
    let mut rewrite = |key: &str, old: &str, new: &str| match manifest::replace_value(&raw, key, old, new) {
        Some(updated) => {
            raw = updated;
            changed = true;
        }
        None => warn!(key, old, "could not find line to rewrite in metadata.txt"),
    };

    let mut version = current.clone();
    if has_space {
        // "name 1.2.3" or "version 1.2.3" -> "1.2.3"
        if let Some(last) = current.split_whitespace().last() {
            version = last.to_string();
            rewrite("version", &current, &version);
            debug!(from = %current, to = %version, "trimmed version");
        }
    }

    let mut orig_version = None;
    if !suffix.is_empty() {
        orig_version = Some(version.clone());

        let month = now.format("%Y%m").to_string();
        if !version.contains(&month) {
            let hash = git_hash
                .filter(|h| !h.is_empty() && !version.contains(h))
                .map(|h| format!("-{h}"))
                .unwrap_or_default();
            let stamped = format!("{version}-{}{hash}", now.format("%Y%m%d%H%M"));
            rewrite("version", &version, &stamped);
            version = stamped;
        }

        let name = artifact.name().to_string();
        if !name.ends_with(suffix) {
            let suffixed = format!("{name}{suffix}");
            rewrite("name", &name, &suffixed);
            artifact.set("name", suffixed);
        }
    }

    artifact.set("version", version);
    if changed {
        artifact.rewritten_manifest = Some(raw);
    }
    orig_version
}

/// Split a file name at its extension the way most tools do: a leading
/// dot does not start an extension
fn splitext(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(i) if name[..i].chars().any(|c| c != '.') => (&name[..i], &name[i..]),
        _ => (name, ""),
    }
}

/// File name an uploaded archive is stored under
pub fn stored_file_name(basename: &str, version: &str, orig_version: Option<&str>) -> String {
    let (stem, ext) = splitext(basename);

    if let Some(orig) = orig_version {
        let stem = if !orig.is_empty() && stem.contains(orig) {
            let pattern = format!(r"(\.?){}", regex::escape(orig));
            match Regex::new(&pattern) {
                Ok(re) => re.replace_all(stem, "").into_owned(),
                Err(_) => stem.to_string(),
            }
        } else {
            EMBEDDED_VERSION.replace_all(stem, "").into_owned()
        };
        let sep = if stem.ends_with('.') { "" } else { "." };
        return format!("{stem}{sep}{version}{ext}");
    }

    if DIGITS.is_match(stem) || stem.ends_with(version) {
        basename.to_string()
    } else {
        format!("{stem}.{version}{ext}")
    }
}

/// Replace metadata.txt inside a stored archive, keeping every other entry
/// and the archive comment byte for byte
fn patch_archive(path: &Path, manifest_path: &str, data: &[u8]) -> Result<(), IngestError> {
    let patch_err = |message: String| IngestError::Patch {
        path: path.to_path_buf(),
        message,
    };
    let dir = path.parent().unwrap_or_else(|| Path::new("."));

    let mut source = ZipArchive::new(File::open(path).map_err(|e| patch_err(e.to_string()))?)
        .map_err(|e| patch_err(e.to_string()))?;
    let tmp = NamedTempFile::new_in(dir).map_err(|e| patch_err(e.to_string()))?;

    let mut out = ZipWriter::new(tmp);
    out.set_raw_comment(source.comment().to_vec().into_boxed_slice());
    for i in 0..source.len() {
        let entry = source.by_index_raw(i).map_err(|e| patch_err(e.to_string()))?;
        if entry.name() == manifest_path {
            continue;
        }
        out.raw_copy_file(entry).map_err(|e| patch_err(e.to_string()))?;
    }

    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    out.start_file(manifest_path, options)
        .map_err(|e| patch_err(e.to_string()))?;
    out.write_all(data).map_err(|e| patch_err(e.to_string()))?;
    let tmp = out.finish().map_err(|e| patch_err(e.to_string()))?;
    drop(source);

    tmp.persist(path).map_err(|e| patch_err(e.error.to_string()))?;
    set_readable(path).map_err(|e| patch_err(e.to_string()))?;
    debug!("Rewrote {} in {}", manifest_path, path.display());
    Ok(())
}

#[cfg(unix)]
fn set_readable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn set_readable(_path: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_splitext() {
        assert_eq!(splitext("plugin.zip"), ("plugin", ".zip"));
        assert_eq!(splitext("plugin.1.0.zip"), ("plugin.1.0", ".zip"));
        assert_eq!(splitext("plugin"), ("plugin", ""));
        assert_eq!(splitext(".hidden"), (".hidden", ""));
    }

    #[test]
    fn test_stored_name_without_suffix() {
        assert_eq!(stored_file_name("tool-1.0.zip", "1.0", None), "tool-1.0.zip");
        assert_eq!(stored_file_name("plugin.zip", "1.2", None), "plugin.1.2.zip");
        assert_eq!(stored_file_name("plugin.1.2.zip", "1.2", None), "plugin.1.2.zip");
    }

    #[test]
    fn test_stored_name_with_suffix() {
        assert_eq!(
            stored_file_name("plugin.zip", "1.2-202610191200-abcdef1", Some("1.2")),
            "plugin.1.2-202610191200-abcdef1.zip"
        );
        assert_eq!(
            stored_file_name("plugin.1.2.zip", "1.2-202610191200", Some("1.2")),
            "plugin.1.2-202610191200.zip"
        );
        assert_eq!(
            stored_file_name("geoserverexplorer-0.2.zip", "0.2-202610191200", Some("0.2")),
            "geoserverexplorer-.0.2-202610191200.zip"
        );
        // A different version in the name is dropped
        assert_eq!(
            stored_file_name("tool-0.9.1.zip", "1.0-202610191200", Some("1.0")),
            "tool-.1.0-202610191200.zip"
        );
    }

    fn artifact(manifest: &str) -> UploadArtifact {
        let parsed = manifest::Manifest::parse(manifest).unwrap();
        UploadArtifact {
            archive_path: PathBuf::from("/tmp/plugin.zip"),
            archive_name: "plugin.zip".into(),
            package_name: "plugin".into(),
            metadata_source: "metadata.txt".into(),
            fields: parsed.items("general").unwrap().to_vec(),
            manifest_path: "plugin/metadata.txt".into(),
            manifest_bytes: manifest.as_bytes().to_vec(),
            rewritten_manifest: None,
        }
    }

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
    }

    #[test]
    fn test_rewrite_without_suffix_is_noop() {
        let mut a = artifact("[general]\nname=Tool\nversion=1.0\n");
        assert_eq!(rewrite_identifiers(&mut a, "", None, at("2026-10-19 12:00")), None);
        assert!(a.rewritten_manifest.is_none());
    }

    #[test]
    fn test_rewrite_trims_version_prefix() {
        let mut a = artifact("[general]\nname=Tool\nversion=version 1.3\n");
        assert_eq!(rewrite_identifiers(&mut a, "", None, at("2026-10-19 12:00")), None);
        assert_eq!(a.version(), "1.3");
        assert_eq!(
            a.rewritten_manifest.as_deref(),
            Some(&b"[general]\nname=Tool\nversion=1.3\n"[..])
        );
    }

    #[test]
    fn test_rewrite_with_suffix_and_hash() {
        let mut a = artifact("[general]\nname=Tool\nversion=1.2\n");
        let orig = rewrite_identifiers(&mut a, " DEV", Some("abcdef1"), at("2026-10-19 12:34"));
        assert_eq!(orig.as_deref(), Some("1.2"));
        assert_eq!(a.version(), "1.2-202610191234-abcdef1");
        assert_eq!(a.name(), "Tool DEV");
        assert_eq!(
            a.rewritten_manifest.as_deref(),
            Some(&b"[general]\nname=Tool DEV\nversion=1.2-202610191234-abcdef1\n"[..])
        );
    }

    #[test]
    fn test_rewrite_keeps_already_stamped_version() {
        let mut a = artifact("[general]\nname=Tool DEV\nversion=1.2-202610011200\n");
        let orig = rewrite_identifiers(&mut a, " DEV", Some("abcdef1"), at("2026-10-19 12:34"));
        assert_eq!(orig.as_deref(), Some("1.2-202610011200"));
        assert_eq!(a.version(), "1.2-202610011200");
        assert!(a.rewritten_manifest.is_none());
    }
}
