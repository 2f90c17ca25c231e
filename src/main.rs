//! # Dripline: marketing automation poller
//!
//! Usage:
//!   dripline poll                 # Run one poll cycle and print the report
//!   dripline run                  # Poll on an interval until Ctrl-C
//!   dripline serve --port 8080    # Expose the HTTP cron trigger
//!   dripline init-db              # Create the database schema

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use dripline_core::DriplineConfig;
use dripline_scheduler::{Poller, SqliteStore};

#[derive(Parser)]
#[command(
    name = "dripline",
    version,
    about = "📬 Dripline: drip automations and scheduled campaigns"
)]
struct Cli {
    /// Config file (default: ~/.dripline/config.toml, or $DRIPLINE_CONFIG)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one poll cycle and print the JSON report
    Poll,
    /// Poll on a fixed interval
    Run {
        /// Seconds between polls (overrides poller.interval_secs)
        #[arg(long)]
        interval: Option<u64>,
    },
    /// Serve the HTTP cron trigger
    Serve {
        /// Listen port (overrides gateway.port)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Create the database schema and exit
    InitDb,
}

fn expand_path(p: &str) -> String {
    shellexpand::tilde(p).to_string()
}

fn load_config(cli: &Cli) -> Result<DriplineConfig> {
    let explicit = cli
        .config
        .clone()
        .or_else(|| std::env::var("DRIPLINE_CONFIG").ok());
    let mut config = match explicit {
        Some(path) => DriplineConfig::load_from(&PathBuf::from(expand_path(&path)))?,
        None => DriplineConfig::load()?,
    };
    config.apply_env();
    Ok(config)
}

fn open_store(config: &DriplineConfig) -> Result<Arc<SqliteStore>> {
    let db_path = PathBuf::from(expand_path(&config.database.path));
    let store = SqliteStore::open(&db_path)?;
    tracing::info!("💾 Marketing DB: {}", db_path.display());
    Ok(Arc::new(store))
}

fn build_poller(config: &DriplineConfig, store: Arc<SqliteStore>) -> Result<Arc<Poller>> {
    let gateways = dripline_channels::gateways_from_config(&config.channels)?;
    Ok(Arc::new(Poller::new(store, gateways, config.poller.clone())))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "dripline=debug,dripline_scheduler=debug,dripline_channels=debug,dripline_gateway=debug,tower_http=debug"
    } else {
        "dripline=info,dripline_scheduler=info,dripline_channels=info,dripline_gateway=info"
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    let config = load_config(&cli)?;

    match cli.command {
        Command::InitDb => {
            open_store(&config)?;
            println!("✅ Database ready: {}", expand_path(&config.database.path));
        }
        Command::Poll => {
            let poller = build_poller(&config, open_store(&config)?)?;
            let report = poller.poll_once().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Run { interval } => {
            let poller = build_poller(&config, open_store(&config)?)?;
            let every = interval.unwrap_or(config.poller.interval_secs);
            tokio::select! {
                _ = dripline_scheduler::spawn_poller(poller, every) => {}
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("👋 Shutting down poller");
                }
            }
        }
        Command::Serve { port } => {
            let poller = build_poller(&config, open_store(&config)?)?;
            let mut gateway = config.gateway.clone();
            if let Some(port) = port {
                gateway.port = port;
            }
            dripline_gateway::start(&gateway, poller).await?;
        }
    }

    Ok(())
}
