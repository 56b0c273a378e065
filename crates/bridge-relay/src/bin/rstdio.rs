//! rstdio - relay a command's stdio over TCP.
//!
//! `rstdio <cmd> [args...]` serves a fresh instance of the command to every
//! TCP connection. `rstdio <host|host:port|tcp://host:port>` connects to such
//! a server and relays this process's stdin/stdout.

use anyhow::Result;
use bridge_core::config::{EnvVars, RelayDefaults};
use bridge_core::relay::{self, RelayConfig, RelayServer};
use bridge_relay::{init_tracing, TcpRole};
use clap::Parser;
use std::io::Write;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "rstdio")]
#[command(about = "Serve a stdio command over TCP, or connect to one")]
struct Args {
    /// Listen port (server) or default remote port (client)
    #[arg(short, long, env = EnvVars::PORT, default_value_t = RelayDefaults::PORT)]
    port: u16,

    /// Host to bind to in server mode
    #[arg(long, default_value = RelayDefaults::HOST)]
    host: String,

    /// Maximum concurrent connections in server mode
    #[arg(long, default_value_t = RelayDefaults::MAX_CONNECTIONS)]
    max_connections: usize,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Command to serve, or a single address to connect to
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.debug);

    match TcpRole::from_args(args.args)? {
        TcpRole::Client { addr } => {
            let stream = relay::connect(&addr, args.port).await?;
            relay::run_client(stream, tokio::io::stdin(), tokio::io::stdout()).await?;
        }
        TcpRole::Server { command } => {
            let config = RelayConfig::new(command).with_max_connections(args.max_connections);
            let mut handle = RelayServer::start((args.host.as_str(), args.port), config).await?;

            // Print port for callers to discover
            println!("RELAY_PORT={}", handle.port);
            std::io::stdout().flush()?;

            tokio::signal::ctrl_c().await?;
            info!("Shutting down");
            handle.shutdown();
        }
    }

    Ok(())
}
