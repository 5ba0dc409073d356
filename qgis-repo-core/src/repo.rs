//! Repository operations
//!
//! A [`Repository`] ties the pieces together for one configured repo:
//! where uploads come from, where packages and icons go, and the catalog
//! that lists them. Each operation loads the catalog, changes it, and
//! writes it back once.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use regex::Regex;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::catalog::{CatalogRecord, CatalogStore, VersionSelector, DEFAULT_STYLESHEET};
use crate::config::{RepoConfig, DEFAULT_ICON, WEB_STYLESHEET};
use crate::error::{IngestError, RepoError, SetupError, StoreError};
use crate::ingest::{IngestOptions, IngestedPlugin, Ingestor};
use crate::mirror::{ArchiveSource, MirrorReconciler, ReconcileReport};

/// Placeholder in the authorization notice template
pub const SUBSCRIPTION_PLACEHOLDER: &str = "#SUBSCRIPTION_TEXT#";

/// Files kept when the web directory is cleared
const KEEP_FILES: &[&str] = &[".keep_me"];

#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    pub ingest: IngestOptions,
    /// Remove these versions of the same plugin before adding the new one
    pub replace: Option<VersionSelector>,
    /// Keep archives of replaced versions on disk
    pub keep_zip: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MirrorOptions {
    /// Suffix for mirrored plugin names; `None` uses the repo setting
    pub name_suffix: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct MirrorSummary {
    /// Stored file names of ingested archives
    pub ingested: Vec<String>,
    /// Foreign file names whose archives failed validation
    pub rejected: Vec<String>,
    pub reconcile: ReconcileReport,
}

/// Wrap each role in `<b>` and join them with ` or `, dropping the
/// `Desktop` qualifier
pub fn subscription_text(roles: &str) -> String {
    let cleaned: Vec<String> = roles
        .split(',')
        .map(|r| r.replace("Desktop", "").trim().to_string())
        .collect();
    format!("<b>{}</b>", cleaned.join("</b> or <b>"))
}

pub struct Repository {
    config: RepoConfig,
    clock: Option<NaiveDateTime>,
}

impl Repository {
    /// Open a repo, checking that its base directories exist
    pub fn open(config: RepoConfig) -> Result<Self, SetupError> {
        if !config.web_base.is_dir() {
            return Err(SetupError::MissingDirectory {
                setting: "web base",
                path: config.web_base.clone(),
            });
        }
        if !config.uploads_dir.is_dir() {
            return Err(SetupError::MissingDirectory {
                setting: "uploads",
                path: config.uploads_dir.clone(),
            });
        }
        Ok(Self {
            config,
            clock: None,
        })
    }

    /// Use a fixed time for version stamps of ingested archives
    pub fn at(mut self, now: NaiveDateTime) -> Self {
        self.clock = Some(now);
        self
    }

    pub fn config(&self) -> &RepoConfig {
        &self.config
    }

    fn ingestor(&self) -> Ingestor<'_> {
        let ingestor = Ingestor::new(&self.config);
        match self.clock {
            Some(now) => ingestor.at(now),
            None => ingestor,
        }
    }

    /// Create the directory layout and an empty catalog where missing
    pub fn setup(&self) -> Result<(), RepoError> {
        let dirs = [
            self.config.web_dir.clone(),
            self.config.plugins_dir.clone(),
            self.config.packages_dir(false),
            self.config.packages_dir(true),
            self.config.icons_dir.clone(),
        ];
        for dir in dirs {
            if !dir.exists() {
                info!("Making directory {}", dir.display());
                fs::create_dir_all(&dir)
                    .map_err(|source| SetupError::CreateDirectory { path: dir, source })?;
            }
        }

        if !self.config.catalog_path.exists() {
            info!("Writing empty catalog {}", self.config.catalog_path.display());
            CatalogStore::new(Some(DEFAULT_STYLESHEET)).save(&self.config.catalog_path)?;
        }
        Ok(())
    }

    pub fn load_catalog(&self) -> Result<CatalogStore, StoreError> {
        CatalogStore::load_with_stylesheet(&self.config.catalog_path, Some(WEB_STYLESHEET))
    }

    pub fn save_catalog(&self, store: &CatalogStore) -> Result<(), StoreError> {
        store.save(&self.config.catalog_path)
    }

    /// Archives named by `zip_name`; `all` lists every `.zip` in uploads
    pub fn uploads(&self, zip_name: &str) -> Result<Vec<PathBuf>, RepoError> {
        if !zip_name.eq_ignore_ascii_case("all") {
            return Ok(vec![self.config.uploads_dir.join(zip_name)]);
        }

        let mut zips = Vec::new();
        for entry in WalkDir::new(&self.config.uploads_dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| RepoError::Io {
                path: self.config.uploads_dir.clone(),
                source: e.into(),
            })?;
            let is_zip = entry
                .file_name()
                .to_string_lossy()
                .to_lowercase()
                .ends_with(".zip");
            if entry.file_type().is_file() && is_zip {
                zips.push(entry.into_path());
            }
        }
        Ok(zips)
    }

    /// Read the authorization notice template and fill in the roles
    pub fn authorization_notice(&self, roles: &str) -> Result<String, SetupError> {
        let path = self.config.auth_template();
        let template = fs::read_to_string(&path)
            .map_err(|source| SetupError::ReadTemplate { path, source })?;
        Ok(template.replace(SUBSCRIPTION_PLACEHOLDER, &subscription_text(roles)))
    }

    /// Ingest one upload, or all of them, and record them in the catalog.
    ///
    /// Every archive is validated before any is moved, so a bad archive in
    /// a batch leaves the repo untouched.
    pub fn update(&self, zip_name: &str, opts: &UpdateOptions) -> Result<Vec<IngestedPlugin>, RepoError> {
        if zip_name.is_empty() {
            return Err(RepoError::Action("Plugin .zip name or 'all' required".to_string()));
        }

        let mut ingest = opts.ingest.clone();
        if ingest.auth_notice.is_none() {
            if let Some(role) = &ingest.auth_role {
                ingest.auth_notice = Some(self.authorization_notice(role)?);
            }
        }

        let mut store = self.load_catalog()?;
        let zips = self.uploads(zip_name)?;
        info!("Updating {} plugins...", zips.len());

        let ingestor = self.ingestor();
        let prepared = zips
            .iter()
            .map(|zip| ingestor.prepare(zip, &ingest))
            .collect::<Result<Vec<_>, IngestError>>()?;

        let mut ingested = Vec::with_capacity(prepared.len());
        for upload in prepared {
            if let Some(selector) = &opts.replace {
                let name = upload.name().to_string();
                self.remove_records(&mut store, &name, selector, opts.keep_zip);
            }
            match ingestor.commit(upload) {
                Ok(plugin) => {
                    store.append(plugin.record.clone());
                    ingested.push(plugin);
                }
                Err(e) => {
                    // Keep what was already placed listed in the catalog
                    self.save_catalog(&store)?;
                    return Err(e.into());
                }
            }
        }

        self.save_catalog(&store)?;
        Ok(ingested)
    }

    /// Remove versions of a plugin from the catalog along with their icons
    /// and (unless `keep_zip`) archives. Returns how many were removed.
    pub fn remove(
        &self,
        name: &str,
        name_suffix: Option<&str>,
        selector: &VersionSelector,
        keep_zip: bool,
    ) -> Result<usize, RepoError> {
        if name.is_empty() {
            return Err(RepoError::Action("Plugin name required".to_string()));
        }

        let suffix = name_suffix.unwrap_or(&self.config.plugin_name_suffix);
        let plugin_name = if !suffix.is_empty() && !name.ends_with(suffix) {
            format!("{name}{suffix}")
        } else {
            name.to_string()
        };

        let mut store = self.load_catalog()?;
        let removed = self.remove_records(&mut store, &plugin_name, selector, keep_zip);
        if removed > 0 {
            self.save_catalog(&store)?;
        } else {
            info!("Could not find plugin '{}' in catalog", plugin_name);
        }
        Ok(removed)
    }

    fn remove_records(
        &self,
        store: &mut CatalogStore,
        name: &str,
        selector: &VersionSelector,
        keep_zip: bool,
    ) -> usize {
        let removed = store.remove_by_name(name, selector);
        for record in &removed {
            info!("Removing {} {}", record.name(), record.version());
            self.remove_icon(record);
            if !keep_zip {
                self.remove_archive(record);
            }
        }
        removed.len()
    }

    fn remove_icon(&self, record: &CatalogRecord) {
        let Some(icon) = record.icon().filter(|i| !i.is_empty() && *i != DEFAULT_ICON) else {
            return;
        };
        let path = self.config.plugins_dir.join(icon);
        if !path.is_file() {
            debug!("Icon file not found: {}", path.display());
            return;
        }
        if let Err(e) = fs::remove_file(&path) {
            warn!("Failed to remove icon {}: {}", path.display(), e);
            return;
        }
        if let Some(dir) = path.parent() {
            let empty = fs::read_dir(dir).map(|mut d| d.next().is_none()).unwrap_or(false);
            if empty && dir != self.config.icons_dir {
                let _ = fs::remove_dir(dir);
            }
        }
    }

    /// Archive path under the plugins directory, derived from the download
    /// URL so records from either packages directory resolve
    fn archive_path(&self, record: &CatalogRecord) -> Option<PathBuf> {
        let url = record.download_url()?;
        let pattern = format!(
            "/{}/({}.*)",
            regex::escape(&self.config.plugins_subdir),
            regex::escape(&self.config.packages_dir_name)
        );
        let re = Regex::new(&pattern).ok()?;
        let relative = re.captures(url)?.get(1)?.as_str().to_string();
        Some(self.config.plugins_dir.join(relative))
    }

    fn remove_archive(&self, record: &CatalogRecord) {
        let Some(path) = self.archive_path(record) else {
            return;
        };
        if !path.is_file() {
            debug!("Archive not found: {}", path.display());
            return;
        }
        match fs::remove_file(&path) {
            Ok(()) => info!("Removed archive {}", path.display()),
            Err(e) => warn!("Failed to remove archive {}: {}", path.display(), e),
        }
    }

    /// Mirror foreign catalogs with the default file name matcher
    pub fn mirror(
        &self,
        foreign_catalogs: &[PathBuf],
        source: &dyn ArchiveSource,
        opts: &MirrorOptions,
    ) -> Result<MirrorSummary, RepoError> {
        self.mirror_with(foreign_catalogs, source, opts, &MirrorReconciler::default())
    }

    /// Merge foreign catalogs, re-ingest every archive they list, then copy
    /// their descriptive fields onto the new local records.
    ///
    /// Archives that fail validation are skipped; a failed fetch aborts the
    /// pass before the local catalog is written.
    pub fn mirror_with(
        &self,
        foreign_catalogs: &[PathBuf],
        source: &dyn ArchiveSource,
        opts: &MirrorOptions,
        reconciler: &MirrorReconciler,
    ) -> Result<MirrorSummary, RepoError> {
        let mut merged = CatalogStore::new(None);
        for path in foreign_catalogs {
            merged.merge_file(path)?;
        }
        merged.save(&self.config.merged_catalog_path())?;
        info!("Merged {} foreign records", merged.len());

        let mut local = self.load_catalog()?;
        let scratch = tempfile::tempdir_in(&self.config.uploads_dir).map_err(|source| RepoError::Io {
            path: self.config.uploads_dir.clone(),
            source,
        })?;

        let ingest = IngestOptions {
            name_suffix: opts.name_suffix.clone(),
            untrusted: true,
            invalid_fields_allowed: true,
            ..Default::default()
        };
        let ingestor = self.ingestor();
        let mut summary = MirrorSummary::default();

        for record in merged.records() {
            let file_name = record.file_name().unwrap_or_default().to_string();
            let archive = source
                .fetch(record, scratch.path())
                .map_err(|source| RepoError::Fetch {
                    file_name: file_name.clone(),
                    source,
                })?;

            match ingestor.ingest(&archive, &ingest) {
                Ok(plugin) => {
                    self.drop_superseded(&mut local, reconciler, &file_name, &plugin);
                    local.append(plugin.record);
                    summary.ingested.push(plugin.file_name);
                }
                Err(IngestError::Invalid(e)) => {
                    warn!("Skipping mirrored archive {}: {}", file_name, e);
                    summary.rejected.push(file_name);
                }
                Err(e) => return Err(e.into()),
            }
        }

        let suffix = opts
            .name_suffix
            .as_deref()
            .unwrap_or(&self.config.plugin_name_suffix);
        summary.reconcile = reconciler.reconcile(&mut local, &merged.by_file_name(), suffix);

        self.save_catalog(&local)?;
        Ok(summary)
    }

    /// Remove local records an earlier mirror pass made from the same
    /// foreign archive. Suffixed repos stamp every pass differently, so the
    /// stored file name alone does not identify them.
    fn drop_superseded(
        &self,
        local: &mut CatalogStore,
        reconciler: &MirrorReconciler,
        foreign_file: &str,
        plugin: &IngestedPlugin,
    ) {
        let name = plugin.record.name();
        let mut indices: Vec<usize> = reconciler
            .matches(local, foreign_file)
            .into_iter()
            .filter(|&i| local.records()[i].name() == name)
            .collect();
        indices.extend(
            local
                .records()
                .iter()
                .enumerate()
                .filter(|(_, r)| r.file_name() == Some(plugin.file_name.as_str()))
                .map(|(i, _)| i),
        );

        for old in local.remove_at(indices) {
            debug!(name = old.name(), version = old.version(), "replacing mirrored record");
            if old.icon() != plugin.record.icon() {
                self.remove_icon(&old);
            }
            if old.file_name() != Some(plugin.file_name.as_str()) {
                self.remove_archive(&old);
            }
        }
    }

    /// Empty the web directory and set the repo up again
    pub fn clear(&self) -> Result<(), RepoError> {
        let web_dir = &self.config.web_dir;
        if web_dir.is_dir() {
            info!("Removing existing repo contents in {}", web_dir.display());
            remove_dir_contents(web_dir)?;
        }
        self.setup()
    }
}

fn remove_dir_contents(dir: &Path) -> Result<(), RepoError> {
    let io_err = |source| RepoError::Io {
        path: dir.to_path_buf(),
        source,
    };
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        if KEEP_FILES.iter().any(|k| entry.file_name() == *k) {
            continue;
        }
        let path = entry.path();
        let result = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        result.map_err(|source| RepoError::Io { path, source })?;
    }
    Ok(())
}
