use anyhow::Result;
use fieldmon_notify::plugin::ChannelRegistry;
use fieldmon_storage::memory::MemoryStore;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use fieldmon_server::app::{self, Repositories, Service};
use fieldmon_server::config::{SeedFile, ServerConfig};
use fieldmon_server::{ingest, seed};

#[allow(clippy::print_stderr)]
fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  fieldmon-server [config.toml]                 Start the alerting service (readings as NDJSON on stdin)");
    eprintln!("  fieldmon-server check-config <config.toml>    Validate configuration, channels and seed rules");
}

fn init_tracing(log_format: &str) -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("fieldmon=info".parse()?);
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if log_format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    fieldmon_common::id::init(1, 1);

    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(|s| s.as_str()) {
        Some("check-config") => {
            let config_path = args.get(2).ok_or_else(|| {
                print_usage();
                anyhow::anyhow!("check-config requires <config.toml> argument")
            })?;
            run_check_config(config_path)
        }
        Some("--help" | "-h") => {
            print_usage();
            Ok(())
        }
        _ => {
            let config_path = args
                .get(1)
                .map(|s| s.as_str())
                .unwrap_or("config/server.toml");
            run_server(config_path).await
        }
    }
}

#[allow(clippy::print_stdout)]
fn run_check_config(config_path: &str) -> Result<()> {
    init_tracing("text")?;

    let config = ServerConfig::load(config_path)?;
    let plugins = ChannelRegistry::default();
    config.validate(&plugins)?;
    println!("config: ok ({} channel(s))", config.channels.len().max(1));

    if let Some(seed_path) = &config.seed_path {
        let seed = SeedFile::load(seed_path)?;
        let check = seed::check_seed(&seed, config.sweep_interval());
        println!(
            "seed: {} device(s), {} rule(s), {} rejected",
            seed.devices.len(),
            seed.rules.len(),
            check.rejected.len()
        );
        for reason in &check.rejected {
            println!("  rejected: {reason}");
        }
        if check.sweep_too_slow {
            println!("  warning: sweep_interval_secs exceeds the smallest DEVICE_OFFLINE window");
        }
        if !check.rejected.is_empty() {
            anyhow::bail!("{} seed rule(s) rejected", check.rejected.len());
        }
    }
    Ok(())
}

async fn run_server(config_path: &str) -> Result<()> {
    let config = ServerConfig::load(config_path)?;
    init_tracing(&config.log_format)?;

    let plugins = ChannelRegistry::default();
    config.validate(&plugins)?;

    let store = Arc::new(MemoryStore::new());
    if let Some(seed_path) = &config.seed_path {
        seed::apply_seed(&store, SeedFile::load(seed_path)?);
    }

    let senders = app::build_senders(&config, &plugins)?;
    let cancel = CancellationToken::new();
    let service = Service::start(&config, Repositories::memory(&store), senders, cancel.clone()).await?;

    let intake = {
        let store = Arc::clone(&store);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let stdin = BufReader::new(tokio::io::stdin());
            ingest::run_lines(stdin, &store, cancel).await
        })
    };

    tracing::info!(config = config_path, "Server started");

    signal::ctrl_c().await?;
    tracing::info!("Shutting down gracefully");

    let stats = service.shutdown().await;
    // Reading stdin may block in a worker thread; do not wait for it
    intake.abort();
    tracing::info!(
        alerts_written = stats.alerts_written,
        write_failures = stats.write_failures,
        unacknowledged = store.unacknowledged(),
        "Server stopped"
    );

    Ok(())
}
