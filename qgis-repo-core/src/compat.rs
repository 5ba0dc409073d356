//! Engine compatibility filtering
//!
//! A QGIS client asks for the catalog with its own version (`?qgis=3.16`)
//! and should only see plugins whose `[qgis_minimum_version,
//! qgis_maximum_version]` range contains it.

use crate::catalog::{CatalogRecord, CatalogStore};
use crate::version::{Normalize, VersionError, VersionKey};

/// Whether a record accepts the given engine version key.
///
/// An empty maximum is unbounded. So is a maximum lower than the minimum,
/// which is a metadata error; equal bounds pin a single version.
pub fn is_compatible(record: &CatalogRecord, engine: &VersionKey) -> bool {
    let opts = Normalize::zero_padded();
    let min = VersionKey::with_options(record.min_engine_version().unwrap_or_default(), opts);
    let max = record
        .max_engine_version()
        .filter(|m| !m.trim().is_empty())
        .map(|m| VersionKey::with_options(m, opts))
        .filter(|max| *max >= min);

    if min > *engine {
        return false;
    }
    !matches!(max, Some(max) if max < *engine)
}

/// Copy of `store` without records incompatible with `engine_version`
pub fn filter_for_engine(store: &CatalogStore, engine_version: &str) -> Result<CatalogStore, VersionError> {
    let engine = VersionKey::strict(engine_version, Normalize::zero_padded())?;

    let mut filtered = store.clone();
    filtered
        .records_mut()
        .retain(|record| is_compatible(record, &engine));
    tracing::debug!(
        engine = engine_version,
        kept = filtered.len(),
        dropped = store.len() - filtered.len(),
        "filtered catalog for engine version"
    );
    Ok(filtered)
}
