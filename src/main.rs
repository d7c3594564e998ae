mod error;
mod model;
mod package;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use model::config::AppConfig;
use package::PackageManager;
use package::vcs::GitCli;

#[derive(Parser)]
#[command(name = "fx", version, about = "Fetches resource packs and registers them with a server")]
struct Cli {
    /// Directory fetched repositories are stored under
    #[arg(long, global = true)]
    storage_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Gets a resource and installs it into the resource tree
    Get {
        /// Repository to fetch
        reference: Option<String>,
        /// Force update, even if unclean
        #[arg(short, long)]
        force: bool,
    },
    /// Adds a resource to the server
    Add {
        /// Repository to fetch
        reference: Option<String>,
        /// Force update, even if unclean
        #[arg(short, long)]
        force: bool,
        /// The resource configuration file to add to
        #[arg(short, long)]
        config_file: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_dir = directories::ProjectDirs::from("", "", "fx")
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(std::env::temp_dir);
    let _guard = match std::fs::create_dir_all(&log_dir) {
        Ok(()) => {
            let file_appender = tracing_appender::rolling::daily(&log_dir, "fx.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            tracing_subscriber::fmt()
                .with_writer(non_blocking)
                .with_env_filter(
                    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("fx=info")),
                )
                .init();
            Some(guard)
        }
        Err(err) => {
            eprintln!("fx: logging disabled, cannot create {}: {err}", log_dir.display());
            None
        }
    };

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{err:#}");
            eprintln!("fx: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config = AppConfig::load()?;
    if let Some(root) = cli.storage_root.as_deref() {
        config = config.with_storage_root(root);
    }

    let mut manager = PackageManager::new(GitCli::default(), &config);

    match cli.command {
        Command::Get { reference, force } => {
            let reference = reference.unwrap_or_default();
            let outcome = manager
                .fetch_only(&reference, force)
                .with_context(|| format!("fetching {reference}"))?;

            report_skipped(&outcome.skipped);
            for resource in &outcome.resources {
                println!("- {} ({})", resource.name, resource.path.display());
            }
        }
        Command::Add {
            reference,
            force,
            config_file,
        } => {
            let reference = reference.unwrap_or_default();
            let registry_file = config_file.unwrap_or_else(|| config.registry_path());
            let outcome = manager
                .fetch_and_register(&reference, force, &registry_file)
                .with_context(|| format!("adding {reference}"))?;

            tracing::info!(
                "{reference}: {} resources resolved, {} new",
                outcome.resources.len(),
                outcome.added.len()
            );
            report_skipped(&outcome.skipped);
            for name in &outcome.added {
                println!("+ {name}");
            }
        }
    }

    Ok(())
}

fn report_skipped(skipped: &[error::ManifestError]) {
    for err in skipped {
        let path = err.path().as_path();
        let dir = path.parent().unwrap_or(path);
        eprintln!("warning: skipped {}: {err}", dir.display());
    }
}
