use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use benos::config::{BenConfig, LogFormat};

mod cmd;

#[derive(Parser)]
#[command(name = "benos")]
#[command(version, about = "Ben OS: areas, projects, boards and PRDs in one place")]
pub struct Cli {
    /// Debug-level logging for every crate
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Directory holding `.benos/` (defaults to the current directory)
    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Log output format: pretty or json
    #[arg(long, global = true)]
    pub log_format: Option<LogFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP API server
    Serve {
        /// Port to serve on
        #[arg(short, long)]
        port: Option<u16>,

        /// Address to bind
        #[arg(long)]
        host: Option<String>,

        /// Database path
        #[arg(long)]
        db_path: Option<PathBuf>,

        /// Enable dev mode (CORS permissive for a separately served frontend)
        #[arg(long)]
        dev: bool,

        /// Open the browser once the server is listening
        #[arg(long)]
        open: bool,
    },
    /// Create `.benos/` with a default config and an empty database
    Init {
        /// Database path
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
    /// Print the OpenAPI document
    Openapi,
}

fn init_tracing(
    verbose: bool,
    format: LogFormat,
    log_dir: Option<&Path>,
) -> Result<Option<WorkerGuard>> {
    let default_filter = if verbose {
        "debug"
    } else {
        "info,benos=debug,tower_http=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "benos.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry().with(filter).with(file_layer);
    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    // File, then environment, then flags.
    let mut config = BenConfig::load_or_default(&project_dir)?;
    config.apply_env(|key| std::env::var(key).ok())?;
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }

    let _log_guard = init_tracing(
        cli.verbose,
        config.logging.format,
        config.log_dir(&project_dir).as_deref(),
    )?;

    match cli.command {
        Commands::Serve {
            port,
            host,
            db_path,
            dev,
            open,
        } => {
            cmd::cmd_serve(
                &project_dir,
                config,
                cmd::ServeOverrides {
                    port,
                    host,
                    db_path,
                    dev,
                    open,
                },
            )
            .await?;
        }
        Commands::Init { db_path } => cmd::cmd_init(&project_dir, config, db_path)?,
        Commands::Openapi => cmd::cmd_openapi()?,
    }

    Ok(())
}
