//! stdio-proxy - share one stdio JSON-RPC server over HTTP/SSE.
//!
//! Starts the given command once and serves it to any number of SSE
//! clients. Prints `SSE_PORT=<port>` on stdout once listening.

use anyhow::Result;
use bridge_core::config::{BackendDefaults, EnvVars, HttpDefaults};
use bridge_core::{Backend, BackendConfig, CommandSpec};
use bridge_sse::start_server;
use clap::Parser;
use std::io::Write;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "stdio-proxy")]
#[command(about = "Share one stdio JSON-RPC server between many HTTP/SSE clients")]
struct Args {
    /// Port to listen on (0 = auto-assign)
    #[arg(short, long, env = EnvVars::PORT, default_value_t = HttpDefaults::PORT)]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = HttpDefaults::HOST)]
    host: String,

    /// Path serving the event stream (GET) and accepting requests (POST)
    #[arg(long, default_value = HttpDefaults::SSE_PATH)]
    path: String,

    /// Lines buffered per client before new lines are dropped for it
    #[arg(long, default_value_t = BackendDefaults::QUEUE_CAPACITY)]
    queue_capacity: usize,

    /// Longest backend output line forwarded to clients
    #[arg(long, default_value_t = BackendDefaults::MAX_LINE_BYTES)]
    max_line_bytes: usize,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Backend command and its arguments
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr; stdout carries the port announcement.
    let default_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    let command = CommandSpec::from_argv(args.command)?;
    let config = BackendConfig::from_command(command)
        .with_queue_capacity(args.queue_capacity)
        .with_max_line_bytes(args.max_line_bytes);
    let backend = Backend::start(config)?;
    info!("Started backend '{}'", backend.command());

    let addr = start_server(backend.clone(), &args.host, args.port, &args.path).await?;

    // Print port for callers to discover
    println!("SSE_PORT={}", addr.port());
    std::io::stdout().flush()?;

    let watcher = backend.clone();
    tokio::spawn(async move {
        watcher.closed().await;
        warn!("Backend '{}' exited; new clients will get 502", watcher.command());
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    backend.kill().await?;

    Ok(())
}
