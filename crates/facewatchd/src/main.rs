use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod dispatcher;
mod engine;
mod store;

use config::Config;
use dispatcher::{Dispatcher, SupabaseSink};

#[derive(Parser)]
#[command(name = "facewatch", about = "Camera face recognition with deduplicated event logging")]
struct Cli {
    /// TOML config file (falls back to FACEWATCH_CONFIG)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the recognition loop (default)
    Run,
    /// Build the registry from the enrollment folders and list identities
    Enrolled {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    if let Err(e) = dotenv::dotenv() {
        tracing::debug!(error = %e, "no .env loaded");
    }

    let cli = Cli::parse();
    let config_path = cli
        .config
        .or_else(|| std::env::var_os("FACEWATCH_CONFIG").map(PathBuf::from));
    let config = Config::load(config_path.as_deref())?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config).await,
        Commands::Enrolled { json } => enrolled(config, json).await,
    }
}

async fn run(config: Config) -> Result<()> {
    tracing::info!(device = %config.camera_device, "facewatch starting");

    let sink = match config.supabase.credentials() {
        Some((url, key)) => {
            let sink = SupabaseSink::new(
                &url,
                &key,
                config.supabase.table(),
                config.dispatch_max_in_flight,
                tokio::runtime::Handle::current(),
            )
            .context("failed to build HTTP client")?;
            tracing::info!(endpoint = sink.endpoint(), "event store enabled");
            Dispatcher::Supabase(sink)
        }
        None => {
            tracing::warn!("SUPABASE_URL/SUPABASE_KEY not set; events will not be stored");
            Dispatcher::Disabled
        }
    };

    let stop = Arc::new(AtomicBool::new(false));
    let signal_stop = Arc::clone(&stop);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, stopping");
            signal_stop.store(true, Ordering::Relaxed);
        }
    });

    let stats = sink.stats();
    tokio::task::spawn_blocking(move || engine::run(&config, sink, &stop))
        .await
        .context("recognition loop panicked")??;

    if let Some(stats) = stats {
        tracing::info!(stored = stats.stored(), failed = stats.failed(), "event delivery totals");
    }

    tracing::info!("facewatch shutting down");
    Ok(())
}

async fn enrolled(config: Config, json: bool) -> Result<()> {
    let faces_dir = config.faces_dir.clone();
    let registry = tokio::task::spawn_blocking(move || {
        let mut analyzer = engine::load_analyzer(&config)?;
        engine::load_registry(&config, &mut analyzer)
    })
    .await
    .context("enrollment loader panicked")??;

    if json {
        let rows: Vec<_> = registry
            .identities()
            .iter()
            .map(|id| serde_json::json!({ "name": id.name, "samples": id.samples }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else if registry.is_empty() {
        println!("No identities enrolled in {}", faces_dir.display());
    } else {
        for id in registry.identities() {
            println!("{:<24} {} sample(s)", id.name, id.samples);
        }
    }
    Ok(())
}
