//! qgis-repo - maintain a QGIS plugin repository
//!
//! Thin front end over `qgis_repo_core`: every command resolves one
//! configured repo and runs a single repository operation against it.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use qgis_repo_core::ingest::IngestOptions;
use qgis_repo_core::mirror::LocalArchiveSource;
use qgis_repo_core::{MirrorOptions, Repository, Settings, UpdateOptions, VersionSelector};

mod catalog_cli;

/// Log levels
#[derive(Debug, Clone, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_filter_directive(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Parser, Debug)]
#[clap(
    name = "qgis-repo",
    about = "Maintain a plugins.xml-based QGIS plugin repository",
    version
)]
struct Cli {
    #[clap(subcommand)]
    command: Command,

    /// Repository to operate on, as named in the settings file
    #[clap(long, short, default_value = "qgis", global = true)]
    repo: String,

    /// Settings file (defaults to ./qgis-repo.yml, then the user config dir)
    #[clap(long, global = true)]
    config: Option<PathBuf>,

    /// Set log level
    #[clap(long, default_value = "info", global = true)]
    log_level: LogLevel,
}

#[derive(Parser, Debug)]
enum Command {
    /// Create the repository directories and an empty catalog
    Setup,

    /// Add uploaded plugin archives to the repository
    Update {
        /// Archive file name in the uploads directory, or 'all'
        zip_name: String,

        /// Store in the protected packages directory
        #[clap(long)]
        auth: bool,

        /// Authorization role(s), comma separated; implies --auth
        #[clap(long)]
        role: Option<String>,

        /// Commit hash appended to suffixed versions
        #[clap(long)]
        git_hash: Option<String>,

        /// Name suffix, overriding the repo setting
        #[clap(long)]
        name_suffix: Option<String>,

        /// Previous versions to remove first: none, all, latest, oldest or
        /// a comma separated list
        #[clap(long, default_value = "none")]
        versions: String,

        /// Keep archives of removed versions
        #[clap(long)]
        keep_zip: bool,

        /// Mark the plugin untrusted
        #[clap(long)]
        untrusted: bool,

        /// Accept archives missing recommended metadata
        #[clap(long)]
        invalid_fields: bool,
    },

    /// Remove plugin versions from the repository
    Remove {
        /// Plugin display name, without the repo suffix
        name: String,

        /// Versions to remove: all, latest, oldest or a comma separated list
        #[clap(long, default_value = "all")]
        versions: String,

        /// Name suffix, overriding the repo setting
        #[clap(long)]
        name_suffix: Option<String>,

        /// Keep the archives on disk
        #[clap(long)]
        keep_zip: bool,
    },

    /// Mirror plugins listed in foreign catalogs
    Mirror {
        /// Foreign plugins.xml files
        #[clap(long = "catalog", required = true)]
        catalogs: Vec<PathBuf>,

        /// Directory holding the archives those catalogs list
        #[clap(long)]
        archives: PathBuf,

        /// Name suffix, overriding the repo setting
        #[clap(long)]
        name_suffix: Option<String>,
    },

    /// Remove everything from the repository web directory and set it up
    /// again
    Clear,

    #[clap(flatten)]
    Catalog(catalog_cli::CatalogCommand),
}

fn initialize_tracing(log_level: &LogLevel) {
    let filter = EnvFilter::new(log_level.to_filter_directive());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    initialize_tracing(&cli.log_level);

    let settings = Settings::discover(cli.config.as_deref()).context("Failed to load settings")?;
    let config = settings
        .resolve(&cli.repo)
        .with_context(|| format!("Unknown repo '{}'", cli.repo))?;
    debug!(repo = %config.name, web_dir = %config.web_dir.display(), "resolved repo");

    match cli.command {
        Command::Catalog(command) => command.execute(&config),
        command => {
            let repo = Repository::open(config).context("Repository is not set up")?;
            run(&repo, command)
        }
    }
}

fn run(repo: &Repository, command: Command) -> Result<()> {
    match command {
        Command::Setup => {
            repo.setup()?;
            println!("Repository '{}' is set up", repo.config().name);
        }
        Command::Update {
            zip_name,
            auth,
            role,
            git_hash,
            name_suffix,
            versions,
            keep_zip,
            untrusted,
            invalid_fields,
        } => {
            let replace = match versions.trim().to_lowercase().as_str() {
                "none" | "" => None,
                _ => Some(versions.parse::<VersionSelector>()?),
            };
            let opts = UpdateOptions {
                ingest: IngestOptions {
                    name_suffix,
                    requires_auth: auth,
                    auth_role: role,
                    git_hash,
                    untrusted,
                    invalid_fields_allowed: invalid_fields,
                    ..Default::default()
                },
                replace,
                keep_zip,
            };
            let ingested = repo
                .update(&zip_name, &opts)
                .with_context(|| format!("Failed to update from '{zip_name}'"))?;
            for plugin in &ingested {
                println!(
                    "Added {} {} as {}",
                    plugin.record.name(),
                    plugin.record.version(),
                    plugin.file_name
                );
            }
        }
        Command::Remove {
            name,
            versions,
            name_suffix,
            keep_zip,
        } => {
            let selector: VersionSelector = versions.parse()?;
            let removed = repo
                .remove(&name, name_suffix.as_deref(), &selector, keep_zip)
                .with_context(|| format!("Failed to remove '{name}'"))?;
            println!("Removed {removed} record(s)");
        }
        Command::Mirror {
            catalogs,
            archives,
            name_suffix,
        } => {
            let source = LocalArchiveSource::new(archives);
            let summary = repo
                .mirror(&catalogs, &source, &MirrorOptions { name_suffix })
                .context("Mirroring failed")?;
            info!(
                ingested = summary.ingested.len(),
                rejected = summary.rejected.len(),
                "mirror complete"
            );
            println!(
                "Mirrored {} archive(s), rejected {}, {} without a local match",
                summary.ingested.len(),
                summary.rejected.len(),
                summary.reconcile.missing.len()
            );
            for file in &summary.rejected {
                println!("  rejected: {file}");
            }
        }
        Command::Clear => {
            repo.clear()?;
            println!("Repository '{}' cleared", repo.config().name);
        }
        Command::Catalog(command) => command.execute(repo.config())?,
    }
    Ok(())
}
