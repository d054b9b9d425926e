//! pkgstash binary entry point
//!
//! Loads storage configuration, builds the configured backend once and runs
//! a single storage operation against it.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use futures::TryStreamExt;
use pkgstash_core::{PackageIdentity, StorageConfig};
use pkgstash_storage::{configure_storage, DownloadResponse, StorageHandle};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "pkgstash", version, about = "Inspect and maintain stored package artifacts")]
struct Cli {
    /// TOML configuration file with a [storage] table
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override a setting, e.g. --set storage.dir=/srv/packages
    #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_setting)]
    settings: Vec<(String, String)>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List stored packages as JSON lines
    List,

    /// Upload a package file
    Upload {
        #[command(flatten)]
        package: PackageArgs,

        /// File to upload; its name is the default stored filename
        file: PathBuf,
    },

    /// Delete a stored package
    Delete(PackageArgs),

    /// Print the download URL (or local file) for a package
    Url(PackageArgs),

    /// Print the resolved storage location of a package
    Path(PackageArgs),
}

#[derive(Debug, Args)]
struct PackageArgs {
    /// Package name
    #[arg(long)]
    name: String,

    /// Package version
    #[arg(long)]
    version: String,

    /// Stored filename (defaults to NAME-VERSION.tar.gz)
    #[arg(long)]
    filename: Option<String>,
}

impl PackageArgs {
    fn identity(&self, fallback_filename: Option<&str>) -> anyhow::Result<PackageIdentity> {
        let identity = match self.filename.as_deref().or(fallback_filename) {
            Some(filename) => PackageIdentity::new(&self.name, &self.version, filename)?,
            None => PackageIdentity::sdist(&self.name, &self.version)?,
        };
        Ok(identity)
    }
}

fn parse_setting(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got {:?}", raw)),
    }
}

/// Merge the configuration file and command-line overrides
fn load_config(path: Option<&Path>, overrides: &[(String, String)]) -> anyhow::Result<StorageConfig> {
    let mut config = match path {
        Some(path) => {
            let document = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            StorageConfig::parse_toml(&document)?
        }
        None => StorageConfig::default(),
    };
    for (key, value) in overrides {
        config.apply(key, value)?;
    }
    config.validate()?;
    Ok(config)
}

async fn run(storage: StorageHandle, command: Command) -> anyhow::Result<()> {
    match command {
        Command::List => {
            let mut packages = storage.list();
            while let Some(package) = packages.try_next().await? {
                println!("{}", serde_json::to_string(&package)?);
            }
        }
        Command::Upload { package, file } => {
            let default_name = file.file_name().and_then(|n| n.to_str()).map(String::from);
            let identity = package.identity(default_name.as_deref())?;
            let mut reader = tokio::fs::File::open(&file)
                .await
                .with_context(|| format!("opening {}", file.display()))?;
            storage.upload(&identity, &mut reader).await?;
            tracing::info!(package = %identity, location = %storage.get_path(&identity), "Uploaded");
        }
        Command::Delete(package) => {
            let identity = package.identity(None)?;
            storage.delete(&identity).await?;
            tracing::info!(package = %identity, "Deleted");
        }
        Command::Url(package) => {
            let identity = package.identity(None)?;
            match storage.download_response(&identity).await? {
                DownloadResponse::Redirect { location, .. } => println!("{}", location),
                DownloadResponse::File { path, .. } => println!("{}", path.display()),
            }
        }
        Command::Path(package) => {
            let identity = package.identity(None)?;
            println!("{}", storage.get_path(&identity));
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pkgstash=info,pkgstash_storage=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref(), &cli.settings)?;
    if cli.settings.iter().any(|(key, _)| key.ends_with("secret_key")) {
        tracing::warn!("Secret key passed on the command line; prefer the configuration file");
    }

    let storage = configure_storage(&config).await?;
    run(storage, cli.command).await
}
