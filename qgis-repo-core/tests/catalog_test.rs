//! plugins.xml loading, lookup, merging and serialization against fixture
//! catalogs

mod common;

use anyhow::Result;
use pretty_assertions::assert_eq;
use qgis_repo_core::compat::filter_for_engine;
use qgis_repo_core::{CatalogRecord, CatalogStore, StoreError, VersionSelector};
use std::fs;
use std::path::{Path, PathBuf};

fn data(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/data").join(name)
}

fn versions(records: &[&CatalogRecord]) -> Vec<String> {
    records.iter().map(|r| r.version().to_string()).collect()
}

#[test]
fn test_load_save_round_trip_is_byte_identical() -> Result<()> {
    common::init_test_logging();
    let original = fs::read_to_string(data("find_sort.xml"))?;
    let store = CatalogStore::load(&data("find_sort.xml"))?;
    assert_eq!(store.len(), 4);
    assert_eq!(store.stylesheet(), Some("plugins.xsl"));

    let dir = tempfile::tempdir()?;
    let out = dir.path().join("plugins.xml");
    store.save(&out)?;
    assert_eq!(fs::read_to_string(&out)?, original);
    Ok(())
}

#[test]
fn test_find_latest_oldest_and_sorted() -> Result<()> {
    let store = CatalogStore::load(&data("find_sort.xml"))?;
    let name = "GeoServer Explorer";

    let latest = store.find_by_name(name, &VersionSelector::Latest, false, false);
    assert_eq!(versions(&latest), ["1.0"]);
    assert_eq!(latest[0].downloads(), 3400);

    let oldest = store.find_by_name(name, &VersionSelector::Oldest, false, false);
    assert_eq!(versions(&oldest), ["0.2"]);

    let in_doc_order = store.find_by_name(name, &VersionSelector::All, false, false);
    assert_eq!(versions(&in_doc_order), ["0.3", "1.0", "0.2"]);

    let sorted = store.find_by_name(name, &VersionSelector::All, true, false);
    assert_eq!(versions(&sorted), ["0.2", "0.3", "1.0"]);

    let newest_first = store.find_by_name(name, &VersionSelector::All, true, true);
    assert_eq!(versions(&newest_first), ["1.0", "0.3", "0.2"]);

    let picked = store.find_by_name(name, &"1.0, 0.2".parse()?, true, false);
    assert_eq!(versions(&picked), ["0.2", "1.0"]);
    Ok(())
}

#[test]
fn test_find_by_file_name_prefix() -> Result<()> {
    let store = CatalogStore::load(&data("find_sort.xml"))?;
    assert_eq!(store.find_by_file_name("geoserverexplorer-", true).len(), 3);
    assert_eq!(store.find_by_file_name("connect-0.9.1.zip", false).len(), 1);
    assert!(store.find_by_file_name("GEOSERVEREXPLORER-1.0.zip", false).is_empty());
    Ok(())
}

#[test]
fn test_sort_by_name_rewrites_document_order() -> Result<()> {
    let mut store = CatalogStore::load(&data("find_sort.xml"))?;
    store.sort_by_name(false);
    let order: Vec<(&str, &str)> = store
        .records()
        .iter()
        .map(|r| (r.name(), r.version()))
        .collect();
    assert_eq!(
        order,
        [
            ("Boundless Connect", "0.9.1"),
            ("GeoServer Explorer", "0.2"),
            ("GeoServer Explorer", "0.3"),
            ("GeoServer Explorer", "1.0"),
        ]
    );
    Ok(())
}

#[test]
fn test_merge_is_idempotent() -> Result<()> {
    let mut merged = CatalogStore::new(None);
    assert_eq!(merged.merge_file(&data("merge_a.xml"))?, 2);
    assert_eq!(merged.merge_file(&data("merge_b.xml"))?, 1);
    let once = merged.to_xml();

    assert_eq!(merged.merge_file(&data("merge_a.xml"))?, 0);
    assert_eq!(merged.merge_file(&data("merge_b.xml"))?, 0);
    assert_eq!(merged.to_xml(), once);

    // The first copy of a duplicated record wins
    let lessons = merged.find_by_name("Lessons", &"1.1".parse()?, false, false);
    assert_eq!(lessons.len(), 1);
    assert_eq!(lessons[0].downloads(), 20);
    Ok(())
}

#[test]
fn test_remove_then_reload() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("plugins.xml");
    fs::copy(data("find_sort.xml"), &path)?;

    let mut store = CatalogStore::load(&path)?;
    let removed = store.remove_by_name("GeoServer Explorer", &VersionSelector::Oldest);
    assert_eq!(versions(&removed.iter().collect::<Vec<_>>()), ["0.2"]);
    store.save(&path)?;

    let reloaded = CatalogStore::load(&path)?;
    assert_eq!(reloaded.len(), 3);
    assert!(reloaded
        .find_by_file_name("geoserverexplorer-0.2.zip", false)
        .is_empty());
    Ok(())
}

#[test]
fn test_engine_filter_on_fixture() -> Result<()> {
    let store = CatalogStore::load(&data("find_sort.xml"))?;
    assert_eq!(filter_for_engine(&store, "2.18")?.len(), 4);
    assert!(filter_for_engine(&store, "3.16")?.is_empty());
    Ok(())
}

#[test]
fn test_load_errors() {
    let missing = CatalogStore::load(Path::new("/nonexistent/plugins.xml")).unwrap_err();
    assert!(matches!(missing, StoreError::NotFound { .. }));

    let dir = tempfile::tempdir().unwrap();
    let bad = dir.path().join("bad.xml");
    fs::write(&bad, "<?xml version='1.0'?>\n<repository/>\n").unwrap();
    let err = CatalogStore::load(&bad).unwrap_err();
    assert!(matches!(err, StoreError::Parse { .. }));
}

#[test]
fn test_non_utf8_catalog_is_a_parse_error() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("latin1.xml");
    fs::write(
        &path,
        b"<?xml version='1.0'?>\n<plugins>\n  <pyqgis_plugin name=\"Caf\xe9\" version=\"1.0\"/>\n</plugins>\n",
    )?;

    let err = CatalogStore::load(&path).unwrap_err();
    assert!(
        matches!(err, StoreError::Parse { ref path, .. } if path.ends_with("latin1.xml")),
        "unexpected error: {err}"
    );
    Ok(())
}
