//! Stdio Bridge Core - share one line-delimited JSON-RPC child process.
//!
//! Many MCP servers only speak JSON-RPC over stdin/stdout. This crate runs
//! such a server as a [`Backend`], lets any number of clients write to it and
//! fans every output line out to all of them. It also provides the plumbing
//! behind the thinner front ends (a per-connection TCP relay and a named-pipe
//! duplex) and a client that discovers a server's tools and maps their input
//! schemas onto typed signatures.
//!
//! # Example
//!
//! ```rust,no_run
//! use bridge_core::{Backend, BackendConfig, CancellationToken};
//!
//! #[tokio::main]
//! async fn main() -> bridge_core::Result<()> {
//!     let backend = Backend::start(BackendConfig::new("my-mcp-server"))?;
//!
//!     let tools = bridge_core::discovery::list_backend_tools(
//!         &backend,
//!         &CancellationToken::new(),
//!     )
//!     .await?;
//!     println!("Found {} tools", tools.len());
//!
//!     let mapped = bridge_core::schema::map_tools(&tools);
//!     for (tool, err) in &mapped.failures {
//!         eprintln!("{}: {}", tool, err);
//!     }
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod broadcast;
pub mod cancel;
pub mod codec;
pub mod command;
pub mod config;
pub mod discovery;
pub mod error;
#[cfg(unix)]
pub mod fifo;
pub mod protocol;
pub mod relay;
pub mod schema;

// Re-export commonly used types
pub use backend::{Backend, BackendConfig};
pub use broadcast::{Broadcaster, Delivery, Subscription};
pub use cancel::{CancellationToken, CancelledError};
pub use command::CommandSpec;
pub use discovery::{RpcChannel, StreamChannel, SubscriptionChannel, ToolDiscoveryClient};
pub use error::{BridgeError, Result};
pub use protocol::Tool;
pub use schema::{FunctionArg, FunctionDef, TypeDef};
