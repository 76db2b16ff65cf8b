//! # chart-sync CLI
//!
//! ## Usage
//!
//! ```bash
//! chart-sync --config ./config/chart-sync.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `chart-sync init` | Create the SQLite database and run schema migrations |
//! | `chart-sync sources` | List configured chart sources |
//! | `chart-sync sync [SELECTOR]` | Run one reconciliation pass (the default command) |
//!
//! ## Examples
//!
//! ```bash
//! # Every configured source
//! chart-sync
//!
//! # Only OCI registries
//! chart-sync sync oci
//!
//! # One chart repository
//! chart-sync sync http:bitnami
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::{fmt, EnvFilter};

use chart_sync::config::{self, LogConfig};
use chart_sync::{migrate, sources, sync};

/// Incrementally mirror Helm chart catalogs into SQLite.
#[derive(Parser)]
#[command(name = "chart-sync", version)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/chart-sync.toml`. See
    /// `config/chart-sync.example.toml` for every setting.
    #[arg(
        long,
        global = true,
        env = "CHART_SYNC_CONFIG",
        default_value = "./config/chart-sync.toml"
    )]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the applications and
    /// application_versions tables. Running it again is harmless.
    Init,

    /// List configured chart sources.
    Sources,

    /// Run one reconciliation pass.
    ///
    /// Selector format: `*`/`all`, a kind (`http`, `oci`), `<kind>:<id>`, or
    /// a bare id unique across kinds. Defaults to `sync.provider`.
    Sync {
        /// Which sources to sync.
        selector: Option<String>,
    },
}

fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&log.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(filter).with_writer(std::io::stderr);
    let result = if log.format == "json" {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if let Err(e) = result {
        eprintln!("tracing init failed: {}", e);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    init_tracing(&cfg.log);

    match cli.command.unwrap_or(Commands::Sync { selector: None }) {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Sources => {
            sources::list_sources(&cfg)?;
        }
        Commands::Sync { selector } => {
            let summary = sync::run_sync(&cfg, selector.as_deref()).await?;
            if !summary.failed.is_empty() {
                warn!(failed = summary.failed.len(), "some sources failed");
            }
        }
    }

    Ok(())
}
