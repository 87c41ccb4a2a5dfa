use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use file_engine::{config, EngineConfig, FileEngine};
use tracing_subscriber::EnvFilter;

use fileward::server;

/// Local file-access engine for assistant tool layers.
#[derive(Debug, Parser)]
#[command(name = "fileward", version)]
struct Args {
    /// Directory operations may touch. Repeatable; none means open mode.
    #[arg(long = "allow", value_name = "DIR")]
    allow: Vec<PathBuf>,

    /// File-content cache capacity in mebibytes.
    #[arg(long, default_value_t = 64)]
    cache_mb: u64,

    /// Maximum number of concurrently executing operations.
    #[arg(long, default_value_t = config::DEFAULT_PARALLELISM)]
    parallelism: usize,

    /// Payload size in bytes above which responses use binary framing.
    #[arg(long, default_value_t = config::DEFAULT_BINARY_THRESHOLD)]
    binary_threshold: usize,

    /// Verbose diagnostics.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if args.debug { "debug" } else { "info" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = EngineConfig {
        cache_capacity_bytes: args.cache_mb * 1024 * 1024,
        parallelism: args.parallelism,
        binary_threshold: args.binary_threshold,
        allowed_roots: args.allow.clone(),
        debug: args.debug,
    };
    let engine = FileEngine::new(config)?;

    // External changes under the allowed roots drop stale cache entries.
    for root in &args.allow {
        if let Err(error) = engine.watch_for_invalidation(root) {
            tracing::warn!("could not watch {}: {error}", root.display());
        }
    }

    tracing::info!("fileward ready");
    let result = server::run(engine.clone()).await;
    engine.shutdown();
    result
}
