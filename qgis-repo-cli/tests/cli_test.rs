//! Integration tests for the qgis-repo binary

use serde_json::Value;
use std::fs;
use std::path::Path;
use std::process::Output;
use tempfile::TempDir;

const SETTINGS: &str = "\
template_dir: ./templates
repo_defaults:
  web_base: ./www
  uploads_dir: ./uploads
  packages_host_name: repo.test
repos:
  qgis: {}
  qgis-dev:
    plugin_name_suffix: \" DEV\"
";

/// Run qgis-repo in `dir` with its settings file
fn run(dir: &Path, args: &[&str]) -> Output {
    std::process::Command::new(env!("CARGO_BIN_EXE_qgis-repo"))
        .current_dir(dir)
        .arg("--config")
        .arg(dir.join("qgis-repo.yml"))
        .args(args)
        .output()
        .expect("Failed to run qgis-repo")
}

fn project() -> TempDir {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    fs::write(dir.join("qgis-repo.yml"), SETTINGS).unwrap();
    fs::create_dir_all(dir.join("www")).unwrap();
    fs::create_dir_all(dir.join("uploads")).unwrap();
    temp_dir
}

#[test]
fn test_setup_then_list_json() {
    let temp_dir = project();
    let dir = temp_dir.path();

    let output = run(dir, &["setup"]);
    assert!(
        output.status.success(),
        "setup failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(dir.join("www/qgis/plugins/plugins.xml").is_file());
    assert!(dir.join("www/qgis/plugins/packages-auth").is_dir());

    let output = run(dir, &["list", "--json"]);
    assert!(output.status.success());
    let listed: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(listed, Value::Array(vec![]));
}

#[test]
fn test_setup_named_repo() {
    let temp_dir = project();
    let dir = temp_dir.path();

    let output = run(dir, &["--repo", "qgis-dev", "setup"]);
    assert!(output.status.success());
    assert!(dir.join("www/qgis-dev/plugins/plugins.xml").is_file());
}

#[test]
fn test_unknown_repo_fails() {
    let temp_dir = project();
    let output = run(temp_dir.path(), &["--repo", "nope", "setup"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("nope"));
}

#[test]
fn test_sort_catalog_file() {
    let temp_dir = project();
    let dir = temp_dir.path();
    fs::write(
        dir.join("in.xml"),
        "<?xml version='1.0' encoding='UTF-8'?>\n<plugins>\n\
         <pyqgis_plugin name=\"Zeta\" version=\"1.0\"><file_name>z.zip</file_name></pyqgis_plugin>\n\
         <pyqgis_plugin name=\"Alpha\" version=\"2.0\"><file_name>a2.zip</file_name></pyqgis_plugin>\n\
         <pyqgis_plugin name=\"Alpha\" version=\"1.10\"><file_name>a1.zip</file_name></pyqgis_plugin>\n\
         </plugins>\n",
    )
    .unwrap();

    let output = run(dir, &["sort", "in.xml", "out.xml"]);
    assert!(
        output.status.success(),
        "sort failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let sorted = fs::read_to_string(dir.join("out.xml")).unwrap();
    let a1 = sorted.find("a1.zip").unwrap();
    let a2 = sorted.find("a2.zip").unwrap();
    let z = sorted.find("z.zip").unwrap();
    assert!(a1 < a2 && a2 < z, "{sorted}");
}

#[test]
fn test_remove_missing_plugin_reports_zero() {
    let temp_dir = project();
    let dir = temp_dir.path();
    assert!(run(dir, &["setup"]).status.success());

    let output = run(dir, &["remove", "Nothing"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("Removed 0 record(s)"));
}
