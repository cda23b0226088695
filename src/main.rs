use anyhow::{Context, Result};
use clap::Parser;
use resilidb::client::{Fault, MemoryConnection, MemoryPool, PoolOptions, StoreError};
use resilidb::{BoxError, FailoverStats, ResilienceConfig, ResilientExecutor, RetryStats};
use serde::Serialize;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

/// Drive a simulated cluster through outages and transient errors
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// JSON configuration file (retry and failover sections)
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// Nodes to simulate, in order of preference, when the configuration names none
    #[clap(long, value_delimiter = ',', default_value = "primary,replica-1,replica-2")]
    nodes: Vec<String>,

    /// Number of operations to run
    #[clap(short, long, default_value = "20")]
    operations: usize,

    /// Take the first node offline before this operation
    #[clap(long)]
    outage_at: Option<usize>,

    /// Inject a serialization failure on the active node every N operations (0 disables)
    #[clap(long, default_value = "5")]
    transient_every: usize,

    /// Write the effective configuration to this file and exit
    #[clap(long)]
    write_config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[clap(long, default_value = "info")]
    log_level: String,
}

#[derive(Serialize)]
struct Report {
    succeeded: usize,
    failed: usize,
    retry: RetryStats,
    failover: FailoverStats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set tracing subscriber")?;

    info!("Starting resilidb drill v{}", env!("CARGO_PKG_VERSION"));

    let mut config = match &args.config {
        Some(path) => ResilienceConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => ResilienceConfig::default(),
    };
    if config.failover.fallback_nodes.is_empty() {
        config.failover.fallback_nodes = args.nodes.clone();
        config.failover.enabled = true;
    }
    config.validate().context("Invalid configuration")?;

    if let Some(path) = &args.write_config {
        config
            .to_file(path)
            .with_context(|| format!("Failed to write configuration to {}", path.display()))?;
        info!("Configuration written to {}", path.display());
        return Ok(());
    }

    let nodes = config.failover.fallback_nodes.clone();
    info!("Simulating nodes: {:?}", nodes);
    let pool = MemoryPool::new(nodes.iter().cloned(), PoolOptions::default());
    let executor = ResilientExecutor::from_config(&config, pool.clone())?;

    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling in-flight operations");
            token.cancel();
        }
    });

    let mut succeeded = 0;
    let mut failed = 0;
    for op in 0..args.operations {
        if cancel.is_cancelled() {
            break;
        }
        if args.outage_at == Some(op) {
            if let Some(first) = nodes.first() {
                warn!("Taking node '{}' offline", first);
                pool.set_online(first, false);
            }
        }
        if args.transient_every > 0 && (op + 1) % args.transient_every == 0 {
            if let Some(active) = executor.failover().active_node() {
                pool.inject(
                    &active,
                    Fault::Store(StoreError::new("40001", "could not serialize access due to concurrent update")),
                );
            }
        }

        let result = executor
            .execute(&cancel, |conn: &mut MemoryConnection| {
                Box::pin(async move {
                    conn.execute("UPDATE accounts SET balance = balance - 1 WHERE id = 1").await?;
                    Ok::<_, BoxError>(conn.node().to_string())
                })
            })
            .await;

        match result {
            Ok(node) => {
                info!("Operation {} completed on {}", op + 1, node);
                succeeded += 1;
            }
            Err(err) => {
                warn!("Operation {} failed: {}", op + 1, err);
                failed += 1;
            }
        }
    }

    let report = Report {
        succeeded,
        failed,
        retry: executor.retry().stats(),
        failover: executor.failover().stats(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    executor.failover().stop();
    Ok(())
}
