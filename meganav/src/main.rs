use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use meganav::config::CacheSettings;
use meganav::{ApiServer, AppConfig, AppState};
use meganav_cache::{CachePreset, NAVIGATION_KEY};

#[derive(Parser)]
#[command(name = "meganav")]
#[command(about = "Navigation API with stale-while-revalidate caching", long_about = None)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start API server
    Serve {
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Port to bind to
        #[arg(short, long)]
        port: Option<u16>,

        /// Cache preset (realtime, hourly, static_content)
        #[arg(long)]
        preset: Option<CachePreset>,

        /// Seconds before a cached value turns stale
        #[arg(long)]
        soft_ttl: Option<u64>,

        /// Seconds after which a cached value must not be served
        #[arg(long)]
        hard_ttl: Option<u64>,

        /// Artificial navigation source latency in milliseconds
        #[arg(long)]
        source_latency_ms: Option<u64>,
    },

    /// Run reads and simulated updates in-process and print what the cache does
    Demo {
        /// Number of simulated product updates
        #[arg(short, long, default_value = "3")]
        updates: usize,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "meganav=info,meganav_cache=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve {
            host,
            port,
            preset,
            soft_ttl,
            hard_ttl,
            source_latency_ms,
        } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(preset) = preset {
                config.cache = CacheSettings::from_preset(preset);
            }
            if let Some(soft_ttl) = soft_ttl {
                config.cache.soft_ttl_secs = soft_ttl;
            }
            if hard_ttl.is_some() {
                config.cache.hard_ttl_secs = hard_ttl;
            }
            if let Some(latency) = source_latency_ms {
                config.source.latency_ms = latency;
            }
            config.validate()?;

            println!("Starting API server on {}", config.bind_addr());
            ApiServer::new(config)?.start().await?;
        }

        Commands::Demo { updates } => {
            run_demo(&config, updates).await?;
        }

        Commands::Config => {
            print!("{}", serde_yaml::to_string(&config)?);
        }
    }

    Ok(())
}

async fn run_demo(config: &AppConfig, updates: usize) -> Result<()> {
    let state = Arc::new(AppState::from_config(config)?);
    let controller = &state.controller;

    let read = controller.get_default(NAVIGATION_KEY).await?;
    println!("initial read: v{} {:?}", read.version, read.outcome);

    for round in 1..=updates {
        let ack = state.simulator.simulate_update().await?;
        println!("update {}: {}", round, ack.message);

        let read = controller.get_default(NAVIGATION_KEY).await?;
        println!("  read after update: v{} {:?} ({})", read.version, read.outcome, read.state);

        while controller.store().is_refreshing(NAVIGATION_KEY).await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let read = controller.get_default(NAVIGATION_KEY).await?;
        println!("  read after refresh: v{} {:?} ({})", read.version, read.outcome, read.state);
    }

    println!("{}", controller.stats().await);
    Ok(())
}
