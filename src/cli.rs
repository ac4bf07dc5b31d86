use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::core::observer::TracingObserver;
use crate::core::service::Orchestrator;
use crate::core::settings_store::SettingsStore;

#[derive(Parser, Debug)]
#[command(name = "cv-harvester")]
#[command(about = "Harvest candidate CVs from the recruiter portal into a dated Google Drive folder")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Path to the settings JSON. Defaults to the per-user data directory.
    #[arg(long, global = true)]
    pub settings: Option<PathBuf>,

    /// Override log level (trace/debug/info/warn/error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Emit log records as JSON lines.
    #[arg(long, global = true)]
    pub json_logs: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Harvest CVs, upload them, then clear the staging folder.
    Run {},
    /// Harvest CVs into the staging folder only.
    Harvest {},
    /// Upload an existing staging folder.
    Upload {
        #[arg(long)]
        folder: Option<PathBuf>,
    },
    /// Make sure a Google Drive token is stored, asking for consent if needed.
    Auth {
        #[arg(long)]
        status: bool,
    },
    /// Write a settings file with default values to edit.
    Init {
        /// Replace an existing settings file.
        #[arg(long)]
        force: bool,
    },
}

pub fn dispatch(args: Args) -> Result<()> {
    init_logging(&args)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;

    runtime.block_on(execute(args))
}

async fn execute(args: Args) -> Result<()> {
    let store = match &args.settings {
        Some(path) => SettingsStore::with_path(path.clone()),
        None => SettingsStore::new(),
    };

    match args.cmd {
        Command::Run {} => {
            let summary = orchestrator(&store).await?.run().await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Harvest {} => {
            let report = orchestrator(&store).await?.harvest().await?;
            info!(
                pages = report.pages_processed,
                reason = ?report.done_reason,
                downloaded = report.downloaded(),
                failed = report.failed(),
                staging = %report.staging_dir.display(),
                "harvest finished"
            );
        }
        Command::Upload { folder } => {
            let orchestrator = orchestrator(&store).await?;
            let folder = folder.unwrap_or_else(|| orchestrator.settings().staging_dir.clone());
            let summary = orchestrator.upload(&folder).await?;
            info!(
                uploaded = summary.uploaded,
                total = summary.total,
                link = summary.destination_link.as_deref().unwrap_or("-"),
                "upload finished"
            );
        }
        Command::Auth { status } => {
            let orchestrator = orchestrator(&store).await?;
            let status = if status {
                orchestrator.auth_status().await?
            } else {
                orchestrator.ensure_authorized().await?
            };
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Command::Init { force } => {
            if !store.write_defaults(force).await? {
                println!(
                    "{} already exists, pass --force to replace it",
                    store.path().display()
                );
            }
        }
    }

    Ok(())
}

async fn orchestrator(store: &SettingsStore) -> Result<Orchestrator> {
    let settings = store.load_with_env().await?;
    info!(settings = %store.path().display(), "settings loaded");
    Orchestrator::new(settings, Arc::new(TracingObserver))
}

fn init_logging(args: &Args) -> Result<()> {
    let filter = match &args.log_level {
        Some(level) => EnvFilter::try_new(level)
            .map_err(|e| anyhow!("invalid log level {level:?}: {e}"))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let stdout_layer = if args.json_logs {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer().with_target(false).boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {e}"))?;

    Ok(())
}
