//! TCP relay: one fresh command instance per connection.
//!
//! The server side spawns the configured command for every accepted
//! connection and pipes the socket into its stdin and its stdout back into
//! the socket. There is no sharing between connections. The client side
//! connects to such a server and relays local stdin/stdout over the socket.

use crate::command::CommandSpec;
use crate::config::RelayDefaults;
use crate::error::{BridgeError, Result};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};

/// Handle to a running relay server. Dropping shuts it down.
pub struct RelayServerHandle {
    pub addr: SocketAddr,
    pub port: u16,
    shutdown_tx: Option<oneshot::Sender<()>>,
    conn_shutdown_tx: watch::Sender<bool>,
    task_handle: Option<tokio::task::JoinHandle<()>>,
}

impl RelayServerHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting and terminate every running command.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = self.conn_shutdown_tx.send(true);
    }

    /// Wait for the accept loop to finish.
    pub async fn wait(mut self) {
        if let Some(handle) = self.task_handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for RelayServerHandle {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

/// Relay server configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub command: CommandSpec,
    pub max_connections: usize,
}

impl RelayConfig {
    pub fn new(command: CommandSpec) -> Self {
        Self {
            command,
            max_connections: RelayDefaults::MAX_CONNECTIONS,
        }
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }
}

/// TCP server spawning one command per connection.
pub struct RelayServer;

impl RelayServer {
    /// Bind `addr` and start accepting in the background.
    pub async fn start<A: ToSocketAddrs>(addr: A, config: RelayConfig) -> Result<RelayServerHandle> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;

        info!(
            "Relay listening on {} for '{}'",
            addr,
            config.command.display()
        );

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (conn_shutdown_tx, conn_shutdown_rx) = watch::channel(false);
        let active_connections = Arc::new(AtomicUsize::new(0));

        let task_handle = tokio::spawn(Self::accept_loop(
            listener,
            Arc::new(config),
            shutdown_rx,
            conn_shutdown_rx,
            active_connections,
        ));

        Ok(RelayServerHandle {
            addr,
            port: addr.port(),
            shutdown_tx: Some(shutdown_tx),
            conn_shutdown_tx,
            task_handle: Some(task_handle),
        })
    }

    async fn accept_loop(
        listener: TcpListener,
        config: Arc<RelayConfig>,
        mut shutdown_rx: oneshot::Receiver<()>,
        conn_shutdown_rx: watch::Receiver<bool>,
        active_connections: Arc<AtomicUsize>,
    ) {
        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("Relay shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => {
                            let current = active_connections.load(Ordering::Relaxed);
                            if current >= config.max_connections {
                                warn!(
                                    "Rejecting relay connection from {}: at max capacity ({})",
                                    peer_addr, config.max_connections
                                );
                                continue;
                            }

                            active_connections.fetch_add(1, Ordering::Relaxed);
                            let config = Arc::clone(&config);
                            let conns = Arc::clone(&active_connections);
                            let conn_shutdown = conn_shutdown_rx.clone();

                            tokio::spawn(async move {
                                debug!("Relay connection from {}", peer_addr);
                                match Self::handle_connection(stream, &config.command, conn_shutdown).await {
                                    Ok(()) => debug!("Relay connection {} closed", peer_addr),
                                    Err(e) => warn!("Relay connection {} failed: {}", peer_addr, e),
                                }
                                conns.fetch_sub(1, Ordering::Relaxed);
                            });
                        }
                        Err(e) => {
                            error!("Relay accept error: {}", e);
                        }
                    }
                }
            }
        }
    }

    async fn handle_connection(
        stream: TcpStream,
        command: &CommandSpec,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> Result<()> {
        let mut child = command.spawn_piped()?;
        let (mut child_in, mut child_out) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                return Err(BridgeError::Spawn {
                    command: command.display(),
                    message: "child stdio was not captured".to_string(),
                    source: None,
                })
            }
        };
        let (mut sock_read, mut sock_write) = stream.into_split();

        // Socket -> stdin. Dropping `child_in` at socket EOF closes the
        // command's input.
        let upstream = tokio::spawn(async move {
            let copied = tokio::io::copy(&mut sock_read, &mut child_in).await;
            drop(child_in);
            copied
        });

        let downstream = async {
            tokio::io::copy(&mut child_out, &mut sock_write).await?;
            child.wait().await
        };

        let outcome = tokio::select! {
            status = downstream => Some(status),
            _ = shutdown_rx.changed() => None,
        };
        upstream.abort();

        match outcome {
            Some(status) => {
                let status = status?;
                debug!("'{}' exited: {}", command.program, status);
                sock_write.shutdown().await?;
            }
            // `child` is dropped with kill_on_drop set.
            None => debug!("Relay connection interrupted by shutdown"),
        }
        Ok(())
    }
}

/// Normalize a relay address to `host:port`.
///
/// Accepts `host`, `host:port` and `tcp://host[:port]`; a missing port is
/// filled with `default_port`.
pub fn normalize_addr(addr: &str, default_port: u16) -> Result<String> {
    let addr = addr.trim();
    if addr.is_empty() {
        return Err(BridgeError::Config {
            message: "empty relay address".to_string(),
        });
    }

    if addr.starts_with("tcp://") {
        let url = url::Url::parse(addr).map_err(|e| BridgeError::Config {
            message: format!("invalid relay address '{}': {}", addr, e),
        })?;
        let host = url.host_str().filter(|h| !h.is_empty()).ok_or_else(|| BridgeError::Config {
            message: format!("relay address '{}' has no host", addr),
        })?;
        return Ok(format!("{}:{}", host, url.port().unwrap_or(default_port)));
    }

    if addr.contains(':') {
        Ok(addr.to_string())
    } else {
        Ok(format!("{}:{}", addr, default_port))
    }
}

/// Connect to a relay server, bounded by [`RelayDefaults::CONNECT_TIMEOUT`].
pub async fn connect(addr: &str, default_port: u16) -> Result<TcpStream> {
    let target = normalize_addr(addr, default_port)?;
    debug!("Connecting to relay at {}", target);
    match tokio::time::timeout(RelayDefaults::CONNECT_TIMEOUT, TcpStream::connect(&target)).await {
        Ok(stream) => Ok(stream?),
        Err(_) => Err(BridgeError::Timeout(RelayDefaults::CONNECT_TIMEOUT)),
    }
}

/// Relay `input` to the server and the server's output to `output`.
///
/// The socket's write side is half-closed once `input` ends; the call
/// finishes when the server closes the connection.
pub async fn run_client<R, W>(stream: TcpStream, mut input: R, mut output: W) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (mut sock_read, mut sock_write) = stream.into_split();

    let upstream = async {
        tokio::io::copy(&mut input, &mut sock_write).await?;
        sock_write.shutdown().await
    };
    let downstream = async {
        tokio::io::copy(&mut sock_read, &mut output).await?;
        output.flush().await
    };

    tokio::try_join!(upstream, downstream)?;
    Ok(())
}
