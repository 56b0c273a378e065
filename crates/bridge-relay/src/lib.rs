//! Shared plumbing for the point-to-point relay binaries.
//!
//! `rstdio` relays a command's stdio over TCP and `stdio-fifo-proxy` over a
//! pair of named pipes. Both pick their role (server or client) from the
//! positional arguments; that decision and logging setup live here.

use bridge_core::{BridgeError, CommandSpec, Result};
use tracing_subscriber::EnvFilter;

/// Role of an `rstdio` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TcpRole {
    /// Serve `command` to every connection.
    Server { command: CommandSpec },
    /// Connect to a relay server at `addr`.
    Client { addr: String },
}

impl TcpRole {
    /// One argument is an address; two or more are a command line.
    ///
    /// A command without arguments cannot be served this way; wrap it
    /// (`sh -c cmd`) if needed.
    pub fn from_args(mut args: Vec<String>) -> Result<Self> {
        match args.len() {
            0 => Err(BridgeError::Config {
                message: "expected a command to serve or an address to connect to".to_string(),
            }),
            1 => Ok(TcpRole::Client {
                addr: args.remove(0),
            }),
            _ => Ok(TcpRole::Server {
                command: CommandSpec::from_argv(args)?,
            }),
        }
    }
}

/// Role of a `stdio-fifo-proxy` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FifoRole {
    /// Run `command` on the pipe pair.
    Server { command: CommandSpec },
    /// Talk to whatever runs on the pipe pair.
    Client,
}

impl FifoRole {
    /// No arguments means client; anything else is the command to run.
    pub fn from_args(args: Vec<String>) -> Result<Self> {
        if args.is_empty() {
            Ok(FifoRole::Client)
        } else {
            Ok(FifoRole::Server {
                command: CommandSpec::from_argv(args)?,
            })
        }
    }
}

/// Install the stderr log subscriber. `RUST_LOG` overrides the level.
///
/// Stdout is reserved for relayed data, so nothing is logged there.
pub fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}
