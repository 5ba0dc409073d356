//! Repository lifecycle: setup, update, remove, clear

mod common;

use anyhow::Result;
use common::TestRepo;
use pretty_assertions::assert_eq;
use qgis_repo_core::config::Settings;
use qgis_repo_core::{RepoError, Repository, SetupError, UpdateOptions, VersionSelector};
use std::fs;

#[test]
fn test_setup_creates_layout_and_empty_catalog() -> Result<()> {
    let t = TestRepo::new("qgis", None)?;
    let c = t.config();
    assert!(c.packages_dir(false).is_dir());
    assert!(c.packages_dir(true).is_dir());
    assert!(c.icons_dir.is_dir());
    assert_eq!(
        t.catalog_text()?,
        "<?xml version='1.0' encoding='UTF-8'?>\n\
         <?xml-stylesheet type=\"text/xsl\" href=\"plugins.xsl\" ?>\n\
         <plugins/>\n"
    );

    // Running setup again leaves the catalog alone
    t.add_upload("tool-1.0.zip", "tool", "Tool", "1.0")?;
    t.repo.update("tool-1.0.zip", &UpdateOptions::default())?;
    t.repo.setup()?;
    assert_eq!(t.repo.load_catalog()?.len(), 1);
    Ok(())
}

#[test]
fn test_open_requires_base_directories() -> Result<()> {
    let mut settings = Settings::default();
    settings.repo_defaults.web_base = "/nonexistent/www".into();
    let config = settings.resolve("qgis")?;
    let err = Repository::open(config).err().expect("open should fail");
    assert!(matches!(err, SetupError::MissingDirectory { setting: "web base", .. }));

    assert!(matches!(
        settings.resolve("nope"),
        Err(SetupError::UnknownRepo(_))
    ));
    Ok(())
}

#[test]
fn test_update_all_then_replace_previous_versions() -> Result<()> {
    let t = TestRepo::new("qgis", None)?;
    t.add_upload("tool-1.0.zip", "tool", "Tool", "1.0")?;
    t.add_upload("other-0.1.zip", "other", "Other", "0.1")?;

    let ingested = t.repo.update("all", &UpdateOptions::default())?;
    let files: Vec<&str> = ingested.iter().map(|p| p.file_name.as_str()).collect();
    assert_eq!(files, ["other-0.1.zip", "tool-1.0.zip"]);

    let packages = t.config().packages_dir(false);
    assert!(packages.join("tool-1.0.zip").is_file());

    t.add_upload("tool-1.1.zip", "tool", "Tool", "1.1")?;
    let opts = UpdateOptions {
        replace: Some(VersionSelector::All),
        ..Default::default()
    };
    t.repo.update("tool-1.1.zip", &opts)?;

    let catalog = t.repo.load_catalog()?;
    let tools = catalog.find_by_name("Tool", &VersionSelector::All, false, false);
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].version(), "1.1");
    assert!(!packages.join("tool-1.0.zip").exists());
    assert!(packages.join("tool-1.1.zip").is_file());
    assert_eq!(catalog.len(), 2);
    Ok(())
}

#[test]
fn test_update_requires_name() -> Result<()> {
    let t = TestRepo::new("qgis", None)?;
    let err = t.repo.update("", &UpdateOptions::default()).unwrap_err();
    assert!(matches!(err, RepoError::Action(_)));
    Ok(())
}

#[test]
fn test_remove_deletes_icons_and_archives() -> Result<()> {
    let t = TestRepo::new("qgis", None)?;
    t.add_upload("tool-1.0.zip", "tool", "Tool", "1.0")?;
    t.add_upload("tool-1.1.zip", "tool", "Tool", "1.1")?;
    t.repo.update("all", &UpdateOptions::default())?;

    let packages = t.config().packages_dir(false);
    let icons = t.config().icons_dir.join("tool");
    assert!(icons.join("1.0.png").is_file());
    assert!(icons.join("1.1.png").is_file());

    assert_eq!(t.repo.remove("Tool", None, &VersionSelector::Oldest, false)?, 1);
    assert!(!packages.join("tool-1.0.zip").exists());
    assert!(!icons.join("1.0.png").exists());
    assert!(icons.is_dir());

    // keep_zip leaves the archive but still drops the icon and its folder
    assert_eq!(t.repo.remove("Tool", None, &VersionSelector::All, true)?, 1);
    assert!(packages.join("tool-1.1.zip").is_file());
    assert!(!icons.exists());
    assert!(t.repo.load_catalog()?.is_empty());

    let before = t.catalog_text()?;
    assert_eq!(t.repo.remove("Tool", None, &VersionSelector::All, false)?, 0);
    assert_eq!(t.catalog_text()?, before);
    Ok(())
}

#[test]
fn test_remove_applies_repo_name_suffix() -> Result<()> {
    let t = TestRepo::new("qgis-dev", Some(" DEV"))?;
    t.add_upload("tool.zip", "tool", "Tool", "1.0")?;
    t.repo.update("tool.zip", &UpdateOptions::default())?;
    assert_eq!(t.repo.load_catalog()?.records()[0].name(), "Tool DEV");

    assert_eq!(t.repo.remove("Tool", None, &VersionSelector::Latest, false)?, 1);
    assert!(t.repo.load_catalog()?.is_empty());

    let err = t.repo.remove("", None, &VersionSelector::All, false).unwrap_err();
    assert!(matches!(err, RepoError::Action(_)));
    Ok(())
}

#[test]
fn test_clear_keeps_marker_file() -> Result<()> {
    let t = TestRepo::new("qgis", None)?;
    let web = &t.config().web_dir;
    fs::write(web.join(".keep_me"), "")?;
    fs::write(web.join("stray.html"), "<html/>")?;
    t.add_upload("tool-1.0.zip", "tool", "Tool", "1.0")?;
    t.repo.update("tool-1.0.zip", &UpdateOptions::default())?;

    t.repo.clear()?;
    assert!(web.join(".keep_me").is_file());
    assert!(!web.join("stray.html").exists());
    assert!(!t.config().packages_dir(false).join("tool-1.0.zip").exists());
    assert!(t.repo.load_catalog()?.is_empty());
    Ok(())
}
