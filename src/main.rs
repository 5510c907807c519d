//! APIBAN blocklist CLI.

use anyhow::{Context, Result};
use apiban_store::{Config, OfficialStore, RamCacheStore, Store};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "apiban")]
#[command(about = "Query the APIBAN IP blocklist through a throttled in-memory cache")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "apiban.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: String,

    /// Print example configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check whether a single address is blocked
    Check {
        /// Address to look up
        address: IpAddr,
    },

    /// Print listed networks, one per line
    List {
        /// Only entries listed after this Unix timestamp
        #[arg(long, conflicts_with = "from_id")]
        since: Option<i64>,

        /// Start from a raw feed cursor (last known ID)
        #[arg(long)]
        from_id: Option<String>,
    },

    /// Keep a cache warm and print networks as they get listed
    Watch {
        /// Seconds between polls of the cache
        #[arg(long, default_value_t = 60)]
        poll_seconds: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle --print-config
    if args.print_config {
        println!("{}", Config::example());
        return Ok(());
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    info!(config = %args.config.display(), "Loading configuration");
    let config = Config::load(&args.config)?;

    // Handle --validate
    if args.validate {
        info!("Configuration is valid");
        return Ok(());
    }

    let Some(command) = args.command else {
        anyhow::bail!("no command given; try --help");
    };

    match command {
        Command::Check { address } => {
            let store = OfficialStore::new(config.feed)?;
            let blocked = store.check(address).await?;
            println!("{}", if blocked { "blocked" } else { "not blocked" });
        }
        Command::List { since, from_id } => {
            let store = OfficialStore::new(config.feed)?;
            let listings = match (since, from_id) {
                (Some(secs), _) => {
                    let t = DateTime::<Utc>::from_timestamp(secs, 0)
                        .with_context(|| format!("--since {secs} is out of range"))?;
                    store.list_from_time(t).await?
                }
                (None, Some(id)) => store.banned(Some(&id)).await?,
                (None, None) => store.list().await?,
            };

            info!(listings = listings.len(), "Listing complete");
            for listing in listings {
                println!("{}", listing.network);
            }
        }
        Command::Watch { poll_seconds } => watch(&config, poll_seconds).await?,
    }

    Ok(())
}

async fn watch(config: &Config, poll_seconds: u64) -> Result<()> {
    let cache = RamCacheStore::from_config(config).await?;

    let initial = cache.list().await?;
    let mut last_seen = initial.last().map(|l| l.timestamp).unwrap_or_else(Utc::now);
    for listing in &initial {
        println!("{}", listing.network);
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(poll_seconds.max(1)));
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, exiting");
                return Ok(());
            }
        }

        match cache.list_from_time(last_seen).await {
            Ok(fresh) => {
                for listing in &fresh {
                    println!("{}", listing.network);
                }
                if let Some(newest) = fresh.last() {
                    last_seen = newest.timestamp;
                }
            }
            // The cache keeps its contents; the next tick retries.
            Err(e) => warn!(error = %e, "Refresh failed"),
        }
    }
}
