//! safe-exec daemon
//!
//! Screens submitted Python scripts, runs their `main()` under nsjail (or a
//! restricted fallback when nsjail cannot launch) and returns the result as
//! JSON. Serves HTTP by default, or MCP over stdio with `--stdio`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use safe_exec_daemon::{config::Config, coordinator::ExecutionCoordinator, http, mcp};

#[derive(Parser, Debug)]
#[command(name = "safe-exec-daemon")]
#[command(about = "Sandboxed execution service for untrusted Python scripts")]
struct Args {
    /// Run in stdio mode (for MCP clients)
    #[arg(long)]
    stdio: bool,

    /// HTTP listen address
    #[arg(long, default_value = "0.0.0.0:8080", conflicts_with = "stdio")]
    listen: SocketAddr,

    /// JSON config file (overrides SAFE_EXEC_CONFIG)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging (stderr so stdout is free for MCP protocol)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match &args.config {
        Some(path) => Config::from_file(path),
        None => Config::from_env(),
    }
    .context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    info!(
        sandbox = %config.sandbox.exec.display(),
        interpreter = %config.interpreter,
        timeout_seconds = config.timeout_seconds,
        max_concurrent = config.max_concurrent_executions,
        "Loaded configuration"
    );

    let coordinator = Arc::new(ExecutionCoordinator::from_config(&config));

    if args.stdio {
        mcp::serve_stdio(coordinator).await?;
    } else {
        let listener = tokio::net::TcpListener::bind(args.listen)
            .await
            .with_context(|| format!("Failed to bind {}", args.listen))?;
        http::serve(listener, coordinator).await?;
    }

    Ok(())
}
