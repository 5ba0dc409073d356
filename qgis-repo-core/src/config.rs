//! Repository settings
//!
//! Settings come from a YAML file shaped like:
//!
//! ```yaml
//! template_dir: ./templates
//! repo_defaults:
//!   web_base: ./www
//!   uploads_dir: ./uploads
//!   packages_host_name: localhost
//! repos:
//!   qgis-dev:
//!     plugin_name_suffix: " DEV"
//! ```
//!
//! `repo_defaults` apply to every repo; each entry under `repos` overrides
//! some of them. [`Settings::resolve`] merges the two and derives the
//! on-disk layout of one repo.
//!
//! Serving is left to the web server, so the `host_*` keys of older
//! settings files are accepted and ignored; only `packages_host_*` build
//! download URLs.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use crate::error::SetupError;

/// File name searched for during discovery
pub const SETTINGS_FILE: &str = "qgis-repo.yml";

/// Catalog file inside the plugins directory
pub const CATALOG_FILE: &str = "plugins.xml";

/// Snapshot of merged foreign catalogs written while mirroring
pub const MERGED_CATALOG_FILE: &str = "plugins-merged.xml";

/// Icons directory, relative to the catalog
pub const WEB_ICON_DIR: &str = "icons";

/// Icon reference used when a plugin ships none
pub const DEFAULT_ICON: &str = "icons/default.png";

/// Stylesheet href written into served catalogs
pub const WEB_STYLESHEET: &str = "./plugins.xsl";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoDefaults {
    /// Appended to the description of plugins that require a subscription
    pub auth_dld_msg: String,
    pub max_upload_size: u64,
    pub packages_dir: String,
    pub packages_dir_auth_suffix: String,
    pub packages_host_name: String,
    pub packages_host_port: String,
    pub packages_host_scheme: String,
    pub plugin_name_suffix: String,
    pub plugins_subdirectory: String,
    pub template_name_suffix: String,
    pub uploads_dir: PathBuf,
    pub uploaded_by: String,
    pub web_base: PathBuf,
    /// `qgis_maximum_version` for plugins that do not declare one
    pub default_max_version: String,
}

impl Default for RepoDefaults {
    fn default() -> Self {
        Self {
            auth_dld_msg: " (Requires Subscription)".to_string(),
            max_upload_size: crate::archive::DEFAULT_MAX_SIZE,
            packages_dir: "packages".to_string(),
            packages_dir_auth_suffix: "-auth".to_string(),
            packages_host_name: "localhost".to_string(),
            packages_host_port: "8008".to_string(),
            packages_host_scheme: "http".to_string(),
            plugin_name_suffix: String::new(),
            plugins_subdirectory: "plugins".to_string(),
            template_name_suffix: String::new(),
            uploads_dir: PathBuf::from("./uploads"),
            uploaded_by: "Administrator".to_string(),
            web_base: PathBuf::from("./www"),
            default_max_version: "2.99.0".to_string(),
        }
    }
}

/// Per-repo overrides of [`RepoDefaults`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_dld_msg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_upload_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packages_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packages_dir_auth_suffix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packages_host_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packages_host_port: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packages_host_scheme: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugin_name_suffix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugins_subdirectory: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_name_suffix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploads_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploaded_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub web_base: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_max_version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub template_dir: PathBuf,
    pub repo_defaults: RepoDefaults,
    pub repos: BTreeMap<String, RepoOverrides>,
}

impl Default for Settings {
    fn default() -> Self {
        let repo = |host: &str, suffix: Option<&str>, template: &str| RepoOverrides {
            packages_host_name: Some(host.to_string()),
            plugin_name_suffix: suffix.map(str::to_string),
            template_name_suffix: Some(template.to_string()),
            ..Default::default()
        };

        let mut repos = BTreeMap::new();
        repos.insert("qgis".to_string(), repo("qgis-repo.test", None, ""));
        repos.insert(
            "qgis-dev".to_string(),
            repo("dev.qgis-repo.test", Some(" DEV"), "-dev"),
        );
        repos.insert(
            "qgis-beta".to_string(),
            repo("beta.qgis-repo.test", Some(" BETA"), "-beta"),
        );
        repos.insert(
            "qgis-mirror".to_string(),
            repo("mirror.qgis-repo.test", None, "-mirror"),
        );

        Self {
            template_dir: PathBuf::from("./templates"),
            repo_defaults: RepoDefaults::default(),
            repos,
        }
    }
}

impl Settings {
    pub fn from_yaml(content: &str) -> Result<Self, SetupError> {
        serde_yaml_ng::from_str(content).map_err(|source| SetupError::ParseSettings { source })
    }

    pub fn from_file(path: &Path) -> Result<Self, SetupError> {
        let content = fs::read_to_string(path).map_err(|source| SetupError::ReadSettings {
            path: path.to_path_buf(),
            source,
        })?;
        let settings = Self::from_yaml(&content)?;
        info!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Find and load settings.
    ///
    /// Resolution order:
    /// 1. Explicit path (if provided)
    /// 2. `qgis-repo.yml` in the current directory
    /// 3. `qgis-repo.yml` in the platform config directory
    /// 4. Built-in defaults
    pub fn discover(explicit: Option<&Path>) -> Result<Self, SetupError> {
        trace!("Discovering repository settings");

        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        let local = PathBuf::from(SETTINGS_FILE);
        if local.is_file() {
            return Self::from_file(&local);
        }

        if let Some(dirs) = directories::ProjectDirs::from("", "", "qgis-repo") {
            let global = dirs.config_dir().join(SETTINGS_FILE);
            if global.is_file() {
                return Self::from_file(&global);
            }
            debug!("No settings at {:?}", global);
        }

        debug!("Using built-in settings");
        Ok(Self::default())
    }

    pub fn repo_names(&self) -> impl Iterator<Item = &str> {
        self.repos.keys().map(String::as_str)
    }

    /// Merge defaults with one repo's overrides and derive its layout
    pub fn resolve(&self, repo: &str) -> Result<RepoConfig, SetupError> {
        let o = self
            .repos
            .get(repo)
            .ok_or_else(|| SetupError::UnknownRepo(repo.to_string()))?;
        let d = &self.repo_defaults;

        fn pick<T: Clone>(over: &Option<T>, default: &T) -> T {
            over.clone().unwrap_or_else(|| default.clone())
        }

        let web_base = pick(&o.web_base, &d.web_base);
        let plugins_subdir = pick(&o.plugins_subdirectory, &d.plugins_subdirectory);
        let web_dir = web_base.join(repo);
        let plugins_dir = web_dir.join(&plugins_subdir);

        let scheme = pick(&o.packages_host_scheme, &d.packages_host_scheme);
        let host = pick(&o.packages_host_name, &d.packages_host_name);
        let port = pick(&o.packages_host_port, &d.packages_host_port);
        let repo_url = if port.is_empty() {
            format!("{scheme}://{host}")
        } else {
            format!("{scheme}://{host}:{port}")
        };

        Ok(RepoConfig {
            name: repo.to_string(),
            template_dir: self.template_dir.clone(),
            template_suffix: pick(&o.template_name_suffix, &d.template_name_suffix),
            auth_dld_msg: pick(&o.auth_dld_msg, &d.auth_dld_msg),
            max_upload_size: pick(&o.max_upload_size, &d.max_upload_size),
            plugin_name_suffix: pick(&o.plugin_name_suffix, &d.plugin_name_suffix),
            uploaded_by: pick(&o.uploaded_by, &d.uploaded_by),
            default_max_version: pick(&o.default_max_version, &d.default_max_version),
            packages_dir_name: pick(&o.packages_dir, &d.packages_dir),
            packages_dir_auth_suffix: pick(&o.packages_dir_auth_suffix, &d.packages_dir_auth_suffix),
            uploads_dir: pick(&o.uploads_dir, &d.uploads_dir),
            icons_dir: plugins_dir.join(WEB_ICON_DIR),
            catalog_path: plugins_dir.join(CATALOG_FILE),
            web_base,
            web_dir,
            plugins_dir,
            plugins_subdir,
            repo_url,
        })
    }
}

/// Fully resolved settings for one repo
#[derive(Debug, Clone)]
pub struct RepoConfig {
    pub name: String,
    pub template_dir: PathBuf,
    pub template_suffix: String,
    pub auth_dld_msg: String,
    pub max_upload_size: u64,
    pub plugin_name_suffix: String,
    pub uploaded_by: String,
    pub default_max_version: String,
    pub packages_dir_name: String,
    pub packages_dir_auth_suffix: String,
    pub uploads_dir: PathBuf,
    pub web_base: PathBuf,
    /// `<web_base>/<repo>`
    pub web_dir: PathBuf,
    /// Directory holding plugins.xml, packages and icons
    pub plugins_dir: PathBuf,
    pub plugins_subdir: String,
    pub icons_dir: PathBuf,
    pub catalog_path: PathBuf,
    /// `scheme://host[:port]` that download URLs are built on
    pub repo_url: String,
}

impl RepoConfig {
    /// Packages directory name, relative to the plugins directory
    pub fn packages_subdir(&self, auth: bool) -> String {
        if auth {
            format!("{}{}", self.packages_dir_name, self.packages_dir_auth_suffix)
        } else {
            self.packages_dir_name.clone()
        }
    }

    pub fn packages_dir(&self, auth: bool) -> PathBuf {
        self.plugins_dir.join(self.packages_subdir(auth))
    }

    pub fn merged_catalog_path(&self) -> PathBuf {
        self.plugins_dir.join(MERGED_CATALOG_FILE)
    }

    /// Public URL of a stored archive
    pub fn download_url(&self, file_name: &str, auth: bool) -> String {
        format!(
            "{}/{}/{}/{}",
            self.repo_url,
            self.plugins_subdir,
            self.packages_subdir(auth),
            file_name
        )
    }

    /// Authorization notice template for this repo
    pub fn auth_template(&self) -> PathBuf {
        self.template_dir
            .join(format!("auth-text{}.html", self.template_suffix))
    }
}
