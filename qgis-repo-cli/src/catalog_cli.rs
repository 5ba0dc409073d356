//! Catalog file commands
//!
//! Read-only views and offline transforms of plugins.xml. These default to
//! the configured repo's catalog but never need its directories to exist.

use anyhow::{Context, Result};
use clap::Subcommand;
use std::path::{Path, PathBuf};
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

use qgis_repo_core::compat::filter_for_engine;
use qgis_repo_core::{CatalogRecord, CatalogStore, RepoConfig, VersionSelector};

#[derive(Subcommand, Debug)]
pub enum CatalogCommand {
    /// Sort a catalog by plugin name, then version
    Sort {
        /// Catalog to read
        input: PathBuf,

        /// Where to write the sorted catalog
        output: PathBuf,

        /// Sort descending
        #[clap(long)]
        reverse: bool,
    },

    /// Print the catalog as a QGIS client of the given version sees it
    Filter {
        /// QGIS version, e.g. 3.16
        #[clap(long)]
        qgis: String,

        /// Catalog to read (defaults to the repo catalog)
        #[clap(long)]
        catalog: Option<PathBuf>,
    },

    /// List catalog records
    List {
        /// Only records with this display name
        #[clap(long)]
        name: Option<String>,

        /// Versions to show with --name: all, latest, oldest or a list
        #[clap(long, default_value = "all")]
        versions: String,

        /// Catalog to read (defaults to the repo catalog)
        #[clap(long)]
        catalog: Option<PathBuf>,

        /// Output as JSON
        #[clap(long)]
        json: bool,
    },
}

impl CatalogCommand {
    pub fn execute(self, config: &RepoConfig) -> Result<()> {
        match self {
            CatalogCommand::Sort {
                input,
                output,
                reverse,
            } => execute_sort(&input, &output, reverse),
            CatalogCommand::Filter { qgis, catalog } => {
                let path = catalog.unwrap_or_else(|| config.catalog_path.clone());
                execute_filter(&path, &qgis)
            }
            CatalogCommand::List {
                name,
                versions,
                catalog,
                json,
            } => {
                let path = catalog.unwrap_or_else(|| config.catalog_path.clone());
                execute_list(&path, name.as_deref(), &versions, json)
            }
        }
    }
}

fn load(path: &Path) -> Result<CatalogStore> {
    CatalogStore::load(path).with_context(|| format!("Failed to load catalog {}", path.display()))
}

fn execute_sort(input: &Path, output: &Path, reverse: bool) -> Result<()> {
    let mut store = load(input)?;
    store.sort_by_name(reverse);
    store
        .save(output)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!("Sorted {} record(s) into {}", store.len(), output.display());
    Ok(())
}

fn execute_filter(path: &Path, qgis: &str) -> Result<()> {
    let store = load(path)?;
    let filtered = filter_for_engine(&store, qgis)
        .with_context(|| format!("Invalid QGIS version '{qgis}'"))?;
    print!("{}", filtered.to_xml());
    Ok(())
}

/// Table row for catalog listings
#[derive(Tabled)]
struct RecordRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Version")]
    version: String,
    #[tabled(rename = "QGIS")]
    qgis: String,
    #[tabled(rename = "File")]
    file_name: String,
    #[tabled(rename = "Downloads")]
    downloads: u64,
    #[tabled(rename = "Flags")]
    flags: String,
}

fn flags(record: &CatalogRecord) -> String {
    let mut out = Vec::new();
    if record.trusted() {
        out.push("trusted");
    }
    if record.experimental() {
        out.push("experimental");
    }
    if record.deprecated() {
        out.push("deprecated");
    }
    if record.authorization_role().is_some() {
        out.push("auth");
    }
    out.join(",")
}

fn execute_list(path: &Path, name: Option<&str>, versions: &str, json_output: bool) -> Result<()> {
    let store = load(path)?;
    let records: Vec<&CatalogRecord> = match name {
        Some(name) => {
            let selector: VersionSelector = versions.parse()?;
            store.find_by_name(name, &selector, true, false)
        }
        None => CatalogStore::sorted_by_name(&store.records().iter().collect::<Vec<_>>(), false),
    };

    if json_output {
        let json_records: Vec<serde_json::Value> = records
            .iter()
            .map(|r| {
                serde_json::json!({
                    "name": r.name(),
                    "version": r.version(),
                    "file_name": r.file_name(),
                    "download_url": r.download_url(),
                    "qgis_minimum_version": r.min_engine_version(),
                    "qgis_maximum_version": r.max_engine_version(),
                    "downloads": r.downloads(),
                    "trusted": r.trusted(),
                    "experimental": r.experimental(),
                    "deprecated": r.deprecated(),
                    "authorization_role": r.authorization_role(),
                    "tags": r.tags(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&json_records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No plugins found.");
        return Ok(());
    }

    let rows: Vec<RecordRow> = records
        .iter()
        .map(|r| RecordRow {
            name: r.name().to_string(),
            version: r.version().to_string(),
            qgis: format!(
                "{} - {}",
                r.min_engine_version().unwrap_or("?"),
                r.max_engine_version().unwrap_or("")
            ),
            file_name: r.file_name().unwrap_or_default().to_string(),
            downloads: r.downloads(),
            flags: flags(r),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()))
        .to_string();

    println!("Found {} plugin(s)\n", rows.len());
    println!("{table}");
    Ok(())
}
