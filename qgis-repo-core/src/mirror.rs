//! Mirroring: reconcile re-ingested archives with the catalog they came from
//!
//! Mirrored archives are ingested like any upload, which yields records
//! built only from metadata.txt. The foreign catalog knows more (download
//! counts, votes, trust, dates), so [`MirrorReconciler`] copies those
//! fields back onto the matching local records.
//!
//! Matching is by archive file name. Ingestion may rename archives, so a
//! [`FileNameMatcher`] supplies an alternate prefix when the plain one
//! finds nothing.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::catalog::{CatalogRecord, CatalogStore};

/// Fields copied from the foreign record onto the local one
pub const OVERLAY_FIELDS: &[&str] = &[
    "about",
    "description",
    "author_name",
    "homepage",
    "tracker",
    "repository",
    "changelog",
    "tags",
    "trusted",
    "create_date",
    "update_date",
    "downloads",
    "average_vote",
    "rating_votes",
    "experimental",
    "deprecated",
    "server",
    "external_dependencies",
];

static VERSION_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.?\d+(?:\.\d+)*").expect("valid version run pattern"));

/// Supplies a second file name prefix to try when the first finds nothing
pub trait FileNameMatcher {
    fn alternate_prefix(&self, stem: &str) -> Option<String>;
}

/// Toggles the dot in front of the first version in a file name.
///
/// Suffixed ingestion strips the original version out of the file name and
/// re-adds the stamped one after a dot, so `name-0.2.zip` is stored as
/// `name-.0.2-<stamp>.zip`.
#[derive(Debug, Clone, Copy, Default)]
pub struct VersionShiftMatcher;

impl FileNameMatcher for VersionShiftMatcher {
    fn alternate_prefix(&self, stem: &str) -> Option<String> {
        let m = VERSION_RUN.find(stem)?;
        let (head, run) = stem.split_at(m.start());
        let tail = &stem[m.end()..];
        let shifted = match run.strip_prefix('.') {
            Some(bare) => format!("{head}{bare}{tail}"),
            None => format!("{head}.{run}{tail}"),
        };
        Some(shifted)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Foreign file names whose fields were copied
    pub updated: Vec<String>,
    /// Foreign file names with no local counterpart
    pub missing: Vec<String>,
    /// Whether the local catalog was re-sorted after renames
    pub resorted: bool,
}

pub struct MirrorReconciler {
    matcher: Box<dyn FileNameMatcher>,
}

impl Default for MirrorReconciler {
    fn default() -> Self {
        Self::new(Box::new(VersionShiftMatcher))
    }
}

fn stem(file_name: &str) -> &str {
    match file_name.rfind('.') {
        Some(i) if i > 0 => &file_name[..i],
        _ => file_name,
    }
}

/// `rest` continues the version that the prefix ended in
fn continues_version(rest: &str) -> bool {
    rest.strip_prefix('.')
        .unwrap_or(rest)
        .starts_with(|c: char| c.is_ascii_digit())
}

impl MirrorReconciler {
    pub fn new(matcher: Box<dyn FileNameMatcher>) -> Self {
        Self { matcher }
    }

    /// Local records matching a foreign stem; an exact stem match wins over
    /// prefix matches
    fn find(&self, local: &CatalogStore, prefix: &str) -> Vec<usize> {
        let candidates: Vec<(usize, &str)> = local
            .records()
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.file_name().map(|f| (i, f)))
            .filter(|(_, f)| f.starts_with(prefix))
            .collect();

        let exact: Vec<usize> = candidates
            .iter()
            .filter(|(_, f)| stem(f) == prefix)
            .map(|(i, _)| *i)
            .collect();
        if !exact.is_empty() {
            return exact;
        }

        // A prefix ending in a digit must not match a longer version
        let versioned = prefix.ends_with(|c: char| c.is_ascii_digit());
        candidates
            .into_iter()
            .filter(|(_, f)| !versioned || !continues_version(&f[prefix.len()..]))
            .map(|(i, _)| i)
            .collect()
    }

    /// Local records that came from the foreign archive `file_name`,
    /// trying the matcher's alternate prefix when the plain one finds none
    pub fn matches(&self, local: &CatalogStore, file_name: &str) -> Vec<usize> {
        let prefix = stem(file_name);
        let found = self.find(local, prefix);
        if !found.is_empty() {
            return found;
        }
        match self.matcher.alternate_prefix(prefix) {
            Some(alt) => {
                debug!(file = %file_name, alternate = %alt, "retrying with alternate prefix");
                self.find(local, &alt)
            }
            None => found,
        }
    }

    /// Copy descriptive fields from foreign records onto matching local
    /// ones. Never fails; unmatched foreign files are reported.
    pub fn reconcile(
        &self,
        local: &mut CatalogStore,
        foreign_by_file: &BTreeMap<&str, &CatalogRecord>,
        name_suffix: &str,
    ) -> ReconcileReport {
        local.sort_by_name(false);
        let mut report = ReconcileReport::default();
        let mut renamed = false;

        for (file_name, foreign) in foreign_by_file {
            let matches = self.matches(local, file_name);
            if matches.is_empty() {
                warn!(file = %file_name, "no local record matches mirrored file");
                report.missing.push(file_name.to_string());
                continue;
            }

            for i in matches {
                let record = &mut local.records_mut()[i];
                record.overlay(foreign, OVERLAY_FIELDS);
                if !name_suffix.is_empty() && !record.name().ends_with(name_suffix) {
                    let name = format!("{}{}", record.name(), name_suffix);
                    record.set_name(name);
                    renamed = true;
                }
            }
            report.updated.push(file_name.to_string());
        }

        if renamed {
            local.sort_by_name(false);
            report.resorted = true;
        }

        info!(
            updated = report.updated.len(),
            missing = report.missing.len(),
            "reconciled mirrored records"
        );
        report
    }
}

/// Where mirrored archives come from
pub trait ArchiveSource {
    /// Make the archive for `record` available under `dest_dir` and return
    /// its path
    fn fetch(&self, record: &CatalogRecord, dest_dir: &Path) -> io::Result<PathBuf>;
}

/// Archives already on disk, looked up by file name
#[derive(Debug, Clone)]
pub struct LocalArchiveSource {
    root: PathBuf,
}

impl LocalArchiveSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ArchiveSource for LocalArchiveSource {
    fn fetch(&self, record: &CatalogRecord, dest_dir: &Path) -> io::Result<PathBuf> {
        let file_name = record
            .file_name()
            .filter(|f| !f.is_empty())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "record has no file_name"))?;
        let source = self.root.join(file_name);
        let dest = dest_dir.join(file_name);
        fs::copy(&source, &dest)?;
        debug!("Fetched {} to {}", source.display(), dest.display());
        Ok(dest)
    }
}
