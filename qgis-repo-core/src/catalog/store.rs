//! The in-memory catalog document
//!
//! A [`CatalogStore`] is the whole of plugins.xml: an ordered list of
//! records plus the stylesheet reference. It is loaded once, mutated in
//! place, and written back whole.

use std::collections::{BTreeMap, HashSet};
use std::convert::Infallible;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use tracing::{debug, info, warn};

use super::record::{CatalogRecord, RecordIdentity};
use super::xml;
use crate::error::StoreError;
use crate::version::VersionKey;

/// Stylesheet referenced by a fresh catalog
pub const DEFAULT_STYLESHEET: &str = "plugins.xsl";

/// Which versions of a named plugin a lookup returns
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSelector {
    All,
    Latest,
    Oldest,
    /// Any of these exact version strings
    Exact(Vec<String>),
}

impl FromStr for VersionSelector {
    type Err = Infallible;

    /// `all`, `latest`, `oldest` (any case) or a comma separated list of
    /// versions. Spaces are ignored; an empty string selects nothing.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "all" => VersionSelector::All,
            "latest" => VersionSelector::Latest,
            "oldest" => VersionSelector::Oldest,
            _ => VersionSelector::Exact(
                s.replace(' ', "")
                    .split(',')
                    .filter(|v| !v.is_empty())
                    .map(str::to_string)
                    .collect(),
            ),
        })
    }
}

impl fmt::Display for VersionSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionSelector::All => f.write_str("all"),
            VersionSelector::Latest => f.write_str("latest"),
            VersionSelector::Oldest => f.write_str("oldest"),
            VersionSelector::Exact(v) => f.write_str(&v.join(",")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogStore {
    stylesheet: Option<String>,
    records: Vec<CatalogRecord>,
}

impl Default for CatalogStore {
    fn default() -> Self {
        Self::new(Some(DEFAULT_STYLESHEET))
    }
}

impl CatalogStore {
    /// An empty catalog
    pub fn new(stylesheet: Option<&str>) -> Self {
        Self {
            stylesheet: stylesheet.map(str::to_string),
            records: Vec::new(),
        }
    }

    /// Load a catalog from disk; a missing file is an error, never an
    /// empty catalog
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let bytes = fs::read(path).map_err(|source| StoreError::NotFound {
            path: path.to_path_buf(),
            source,
        })?;
        let text = String::from_utf8(bytes).map_err(|e| StoreError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let store = Self::from_xml(&text, path)?;
        debug!(path = %path.display(), records = store.len(), "loaded catalog");
        Ok(store)
    }

    /// Load a catalog, replacing its stylesheet reference when one is given
    pub fn load_with_stylesheet(path: &Path, stylesheet: Option<&str>) -> Result<Self, StoreError> {
        let mut store = Self::load(path)?;
        if let Some(href) = stylesheet {
            store.set_stylesheet(Some(href));
        }
        Ok(store)
    }

    /// Parse a catalog document; `origin` is only used in error messages
    pub fn from_xml(text: &str, origin: &Path) -> Result<Self, StoreError> {
        let doc = xml::parse(text).map_err(|e| StoreError::Parse {
            path: origin.to_path_buf(),
            message: e.to_string(),
        })?;
        Ok(Self {
            stylesheet: doc.stylesheet,
            records: doc.records,
        })
    }

    pub fn stylesheet(&self) -> Option<&str> {
        self.stylesheet.as_deref()
    }

    /// Set or drop the `xml-stylesheet` processing instruction
    pub fn set_stylesheet(&mut self, href: Option<&str>) {
        self.stylesheet = href.map(str::to_string);
    }

    pub fn records(&self) -> &[CatalogRecord] {
        &self.records
    }

    pub fn records_mut(&mut self) -> &mut Vec<CatalogRecord> {
        &mut self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn append(&mut self, record: CatalogRecord) {
        info!(name = record.name(), version = record.version(), "appending record");
        self.records.push(record);
    }

    /// Replace every record
    pub fn set_all(&mut self, records: Vec<CatalogRecord>) {
        self.records = records;
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    fn indices_by_name(&self, name: &str, selector: &VersionSelector, reverse: bool) -> Vec<usize> {
        let named = self
            .records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.name() == name);

        match selector {
            VersionSelector::All => named.map(|(i, _)| i).collect(),
            VersionSelector::Exact(versions) => named
                .filter(|(_, r)| versions.iter().any(|v| v == r.version()))
                .map(|(i, _)| i)
                .collect(),
            VersionSelector::Latest | VersionSelector::Oldest => {
                let want_latest = matches!(selector, VersionSelector::Latest) != reverse;
                let mut best: Option<(usize, VersionKey)> = None;
                for (i, r) in named {
                    let key = VersionKey::new(r.version());
                    let better = match &best {
                        None => true,
                        Some((_, b)) if want_latest => key > *b,
                        Some((_, b)) => key < *b,
                    };
                    if better {
                        best = Some((i, key));
                    }
                }
                best.map(|(i, _)| vec![i]).unwrap_or_default()
            }
        }
    }

    /// Find records by display name.
    ///
    /// `sort` orders an `All`/`Exact` result by ascending version;
    /// `reverse` flips that order, and swaps latest with oldest.
    pub fn find_by_name(
        &self,
        name: &str,
        selector: &VersionSelector,
        sort: bool,
        reverse: bool,
    ) -> Vec<&CatalogRecord> {
        let found: Vec<&CatalogRecord> = self
            .indices_by_name(name, selector, reverse)
            .into_iter()
            .map(|i| &self.records[i])
            .collect();
        debug!(name, selector = %selector, found = found.len(), "lookup by name");

        let single = matches!(selector, VersionSelector::Latest | VersionSelector::Oldest);
        if sort && !single {
            Self::sorted_by_version(&found, reverse)
        } else {
            found
        }
    }

    /// Find records by archive file name, exactly (case-sensitive) or by
    /// prefix
    pub fn find_by_file_name(&self, name: &str, prefix: bool) -> Vec<&CatalogRecord> {
        self.records
            .iter()
            .filter(|r| match r.file_name() {
                Some(f) if prefix => f.starts_with(name),
                Some(f) => f == name,
                None => false,
            })
            .collect()
    }

    /// Remove every record whose identity is listed; returns the count
    pub fn remove(&mut self, identities: &[RecordIdentity]) -> usize {
        let before = self.records.len();
        self.records
            .retain(|r| !r.identity().is_some_and(|id| identities.contains(&id)));
        before - self.records.len()
    }

    /// Remove records by position, returning them in document order
    pub fn remove_at(&mut self, indices: Vec<usize>) -> Vec<CatalogRecord> {
        self.take_indices(indices)
    }

    fn take_indices(&mut self, mut indices: Vec<usize>) -> Vec<CatalogRecord> {
        indices.sort_unstable();
        indices.dedup();
        indices.retain(|&i| i < self.records.len());
        let mut removed: Vec<CatalogRecord> = indices
            .into_iter()
            .rev()
            .map(|i| self.records.remove(i))
            .collect();
        removed.reverse();
        removed
    }

    /// Remove records by display name, returning them in document order
    pub fn remove_by_name(&mut self, name: &str, selector: &VersionSelector) -> Vec<CatalogRecord> {
        let indices = self.indices_by_name(name, selector, false);
        let removed = self.take_indices(indices);
        if !removed.is_empty() {
            info!(name, selector = %selector, count = removed.len(), "removed records");
        }
        removed
    }

    /// Remove records whose archive file name matches exactly
    pub fn remove_by_file_name(&mut self, file_name: &str) -> Vec<CatalogRecord> {
        let indices = self
            .records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.file_name() == Some(file_name))
            .map(|(i, _)| i)
            .collect();
        self.take_indices(indices)
    }

    pub fn contains(&self, identity: &RecordIdentity) -> bool {
        self.records
            .iter()
            .any(|r| r.identity().as_ref() == Some(identity))
    }

    /// Append foreign records not already present by
    /// `(name, version, file_name)`. Existing records are never touched.
    pub fn merge(&mut self, other: CatalogStore) -> usize {
        let mut known: HashSet<RecordIdentity> =
            self.records.iter().filter_map(CatalogRecord::identity).collect();
        let mut added = 0;

        for record in other.records {
            let Some(identity) = record.identity() else {
                warn!(
                    name = record.name(),
                    version = record.version(),
                    "record to merge lacks name, version or file_name"
                );
                continue;
            };
            if !known.insert(identity) {
                debug!(name = record.name(), version = record.version(), "record exists already");
                continue;
            }
            self.records.push(record);
            added += 1;
        }

        info!(added, "merged catalog");
        added
    }

    /// Merge a catalog file into this one
    pub fn merge_file(&mut self, path: &Path) -> Result<usize, StoreError> {
        let other = Self::load(path)?;
        Ok(self.merge(other))
    }

    /// Stable sort by version key, ascending unless `reverse`
    pub fn sorted_by_version<'a>(records: &[&'a CatalogRecord], reverse: bool) -> Vec<&'a CatalogRecord> {
        let mut keyed: Vec<(VersionKey, &CatalogRecord)> = records
            .iter()
            .map(|r| (VersionKey::new(r.version()), *r))
            .collect();
        if reverse {
            keyed.sort_by(|(a, _), (b, _)| b.cmp(a));
        } else {
            keyed.sort_by(|(a, _), (b, _)| a.cmp(b));
        }
        keyed.into_iter().map(|(_, r)| r).collect()
    }

    /// Stable sort by name, then version key
    pub fn sorted_by_name<'a>(records: &[&'a CatalogRecord], reverse: bool) -> Vec<&'a CatalogRecord> {
        let mut keyed: Vec<((String, VersionKey), &CatalogRecord)> = records
            .iter()
            .map(|r| ((r.name().to_string(), VersionKey::new(r.version())), *r))
            .collect();
        if reverse {
            keyed.sort_by(|(a, _), (b, _)| b.cmp(a));
        } else {
            keyed.sort_by(|(a, _), (b, _)| a.cmp(b));
        }
        keyed.into_iter().map(|(_, r)| r).collect()
    }

    /// Reorder the document by name, then version
    pub fn sort_by_name(&mut self, reverse: bool) {
        let refs: Vec<&CatalogRecord> = self.records.iter().collect();
        let sorted: Vec<CatalogRecord> = Self::sorted_by_name(&refs, reverse)
            .into_iter()
            .cloned()
            .collect();
        self.records = sorted;
    }

    /// Records keyed by archive file name; records without one are left out
    pub fn by_file_name(&self) -> BTreeMap<&str, &CatalogRecord> {
        self.records
            .iter()
            .filter_map(|r| r.file_name().map(|f| (f, r)))
            .collect()
    }

    pub fn to_xml(&self) -> String {
        xml::write(self.stylesheet(), &self.records)
    }

    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        fs::write(path, self.to_xml()).map_err(|source| StoreError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), records = self.len(), "wrote catalog");
        Ok(())
    }
}
