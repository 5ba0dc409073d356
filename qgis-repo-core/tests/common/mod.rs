//! Test helper functions for integration tests
//!
//! Shared across test files using the tests/common/ pattern.

#![allow(dead_code)]

use anyhow::Result;
use qgis_repo_core::config::{RepoDefaults, RepoOverrides, Settings};
use qgis_repo_core::{RepoConfig, Repository};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Once;
use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

/// Initialize logging for tests (only once per test run)
static INIT: Once = Once::new();

pub fn init_test_logging() {
    INIT.call_once(|| {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_test_writer()
                    .with_target(true)
                    .with_level(true),
            )
            .with(tracing_subscriber::filter::EnvFilter::from_default_env())
            .try_init();
    });
}

/// metadata.txt with every required and recommended field
pub fn metadata(name: &str, version: &str) -> String {
    format!(
        "[general]\n\
         name={name}\n\
         qgisMinimumVersion=3.0\n\
         description=Test plugin {name}\n\
         about=Does testing things\n\
         version={version}\n\
         author=Test Author\n\
         email=author@example.com\n\
         repository=https://example.com/{name}\n\
         tags=Testing, Vector\n\
         icon=icon.png\n\
         experimental=no\n"
    )
}

/// Tiny bytes standing in for a PNG
pub const ICON_BYTES: &[u8] = b"\x89PNG\r\n\x1a\nfake";

/// Write a zip with the given entries, in order
pub fn write_zip(path: &Path, entries: &[(&str, &[u8])]) -> Result<()> {
    write_zip_with(path, entries, SimpleFileOptions::default(), None)
}

/// Write a zip with explicit entry options and an optional archive comment
pub fn write_zip_with(
    path: &Path,
    entries: &[(&str, &[u8])],
    options: SimpleFileOptions,
    comment: Option<&str>,
) -> Result<()> {
    let mut zip = ZipWriter::new(File::create(path)?);
    for (name, data) in entries {
        if name.ends_with('/') {
            zip.add_directory(name.trim_end_matches('/'), options)?;
        } else {
            zip.start_file(*name, options)?;
            zip.write_all(data)?;
        }
    }
    if let Some(comment) = comment {
        zip.set_comment(comment);
    }
    zip.finish()?;
    Ok(())
}

/// Entries of a well-formed plugin archive for `package`
pub fn plugin_entries(package: &str, metadata: &[u8]) -> Vec<(String, Vec<u8>)> {
    vec![
        (format!("{package}/"), Vec::new()),
        (
            format!("{package}/__init__.py"),
            b"def classFactory(iface):\n    pass\n".to_vec(),
        ),
        (format!("{package}/metadata.txt"), metadata.to_vec()),
        (format!("{package}/icon.png"), ICON_BYTES.to_vec()),
    ]
}

/// Write a well-formed plugin archive for `package`
pub fn write_plugin_zip(path: &Path, package: &str, metadata: &str) -> Result<()> {
    let entries = plugin_entries(package, metadata.as_bytes());
    let borrowed: Vec<(&str, &[u8])> = entries
        .iter()
        .map(|(name, data)| (name.as_str(), data.as_slice()))
        .collect();
    write_zip(path, &borrowed)
}

/// Read one entry of a zip as text
pub fn read_zip_entry(path: &Path, name: &str) -> Result<String> {
    use std::io::Read;
    let mut zip = zip::ZipArchive::new(File::open(path)?)?;
    let mut entry = zip.by_name(name)?;
    let mut text = String::new();
    entry.read_to_string(&mut text)?;
    Ok(text)
}

/// A repository rooted in a temporary directory
pub struct TestRepo {
    pub dir: TempDir,
    pub repo: Repository,
}

impl TestRepo {
    /// Set up the named repo with an optional plugin name suffix
    pub fn new(name: &str, suffix: Option<&str>) -> Result<Self> {
        init_test_logging();
        let dir = tempfile::tempdir()?;
        let web_base = dir.path().join("www");
        let uploads = dir.path().join("uploads");
        let templates = dir.path().join("templates");
        fs::create_dir_all(&web_base)?;
        fs::create_dir_all(&uploads)?;
        fs::create_dir_all(&templates)?;

        let mut repos = BTreeMap::new();
        repos.insert(
            name.to_string(),
            RepoOverrides {
                plugin_name_suffix: suffix.map(str::to_string),
                ..Default::default()
            },
        );
        let settings = Settings {
            template_dir: templates,
            repo_defaults: RepoDefaults {
                web_base,
                uploads_dir: uploads,
                packages_host_name: "repo.test".to_string(),
                packages_host_port: String::new(),
                ..Default::default()
            },
            repos,
        };

        let repo = Repository::open(settings.resolve(name)?)?;
        repo.setup()?;
        Ok(Self { dir, repo })
    }

    pub fn config(&self) -> &RepoConfig {
        self.repo.config()
    }

    /// Path of an upload by file name
    pub fn upload(&self, file_name: &str) -> PathBuf {
        self.config().uploads_dir.join(file_name)
    }

    /// Write a plugin archive into uploads and return its file name
    pub fn add_upload(&self, file_name: &str, package: &str, name: &str, version: &str) -> Result<String> {
        write_plugin_zip(&self.upload(file_name), package, &metadata(name, version))?;
        Ok(file_name.to_string())
    }

    pub fn catalog_text(&self) -> Result<String> {
        Ok(fs::read_to_string(&self.config().catalog_path)?)
    }
}
