//! The multiplexed backend process.
//!
//! A [`Backend`] owns one child process. Writes from any number of callers
//! are serialized onto the child's stdin; every line the child prints on
//! stdout is fanned out to all current subscribers through a
//! [`Broadcaster`]. When stdout ends the backend closes for good: pending
//! subscriptions drain and finish, and new subscriptions or writes fail with
//! [`BridgeError::BackendClosed`].

use crate::broadcast::{Broadcaster, Subscription};
use crate::codec::{Line, LineCodec};
use crate::command::CommandSpec;
use crate::config::BackendDefaults;
use crate::error::{BridgeError, Result};
use futures::StreamExt;
use std::path::Path;
use std::sync::{Arc, Weak};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::Mutex;
use tokio_util::codec::FramedRead;
use tracing::{debug, error, info, warn};

/// Configuration for starting a backend.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// The program to run.
    pub command: CommandSpec,
    /// Lines buffered per subscriber before new lines are dropped.
    pub queue_capacity: usize,
    /// Longest stdout line forwarded to subscribers.
    pub max_line_bytes: usize,
}

impl BackendConfig {
    /// Create a config for `program` with default limits.
    pub fn new(program: impl Into<String>) -> Self {
        Self::from_command(CommandSpec::new(program))
    }

    /// Create a config from a prepared command.
    pub fn from_command(command: CommandSpec) -> Self {
        Self {
            command,
            queue_capacity: BackendDefaults::QUEUE_CAPACITY,
            max_line_bytes: BackendDefaults::MAX_LINE_BYTES,
        }
    }

    /// Append arguments.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = self.command.with_args(args);
        self
    }

    /// Append one argument.
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.command = self.command.with_arg(arg);
        self
    }

    /// Add an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.command = self.command.with_env(key, value);
        self
    }

    /// Set the working directory.
    pub fn with_working_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.command = self.command.with_working_dir(dir);
        self
    }

    /// Set the per-subscriber queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the stdout line limit.
    pub fn with_max_line_bytes(mut self, limit: usize) -> Self {
        self.max_line_bytes = limit;
        self
    }
}

#[derive(Debug)]
struct Shared {
    command: String,
    pid: Option<u32>,
    stdin: Mutex<ChildStdin>,
    child: Mutex<Child>,
    broadcaster: Arc<Broadcaster>,
    max_line_bytes: usize,
}

/// Handle to a running backend. Cheap to clone; the child is killed when
/// the last clone is dropped.
#[derive(Debug, Clone)]
pub struct Backend {
    shared: Arc<Shared>,
}

impl Backend {
    /// Spawn the backend and start fanning out its output.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: BackendConfig) -> Result<Self> {
        let mut child = config.command.spawn_piped()?;
        let missing_pipe = |what: &str| BridgeError::Spawn {
            command: config.command.display(),
            message: format!("child {} was not captured", what),
            source: None,
        };
        let stdin = child.stdin.take().ok_or_else(|| missing_pipe("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;

        let broadcaster = Broadcaster::new(config.queue_capacity);
        let shared = Arc::new(Shared {
            command: config.command.display(),
            pid: child.id(),
            stdin: Mutex::new(stdin),
            child: Mutex::new(child),
            broadcaster: Arc::clone(&broadcaster),
            max_line_bytes: config.max_line_bytes,
        });

        tokio::spawn(fan_out(
            stdout,
            broadcaster,
            Arc::downgrade(&shared),
            config.max_line_bytes,
        ));

        Ok(Self { shared })
    }

    /// Write raw bytes to the backend's stdin.
    ///
    /// Concurrent writers are serialized, so each call's bytes reach the
    /// child contiguously. Bytes are forwarded as given; callers supply their
    /// own newline framing.
    pub async fn write(&self, bytes: &[u8]) -> Result<()> {
        if self.is_closed() {
            return Err(BridgeError::BackendClosed);
        }
        let mut stdin = self.shared.stdin.lock().await;
        stdin.write_all(bytes).await.map_err(BridgeError::write)?;
        stdin.flush().await.map_err(BridgeError::write)?;
        Ok(())
    }

    /// Subscribe to lines printed from now on.
    pub fn subscribe(&self) -> Result<Subscription> {
        self.shared.broadcaster.subscribe()
    }

    /// Remove a subscriber by id. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: u64) {
        self.shared.broadcaster.unsubscribe(id);
    }

    /// The broadcaster carrying this backend's output.
    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.shared.broadcaster
    }

    /// Whether the backend's output has ended.
    pub fn is_closed(&self) -> bool {
        self.shared.broadcaster.is_closed()
    }

    /// Resolve once the backend's output has ended.
    pub async fn closed(&self) {
        self.shared.broadcaster.closed().await
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.shared.broadcaster.subscriber_count()
    }

    /// Longest stdout line forwarded to subscribers.
    pub fn max_line_bytes(&self) -> usize {
        self.shared.max_line_bytes
    }

    /// OS process id, if the child was still running at spawn time.
    pub fn pid(&self) -> Option<u32> {
        self.shared.pid
    }

    /// The command line the backend was started with.
    pub fn command(&self) -> &str {
        &self.shared.command
    }

    /// Ask the child to terminate. The backend closes once its stdout ends.
    pub async fn kill(&self) -> Result<()> {
        let mut child = self.shared.child.lock().await;
        match child.start_kill() {
            Ok(()) => {
                info!("Sent kill to backend '{}'", self.shared.command);
                Ok(())
            }
            // Already reaped.
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Read stdout line by line and publish each line until end of stream.
async fn fan_out(
    stdout: ChildStdout,
    broadcaster: Arc<Broadcaster>,
    shared: Weak<Shared>,
    max_line_bytes: usize,
) {
    let mut lines = FramedRead::with_capacity(
        stdout,
        LineCodec::new(max_line_bytes),
        BackendDefaults::READ_BUFFER_BYTES.min(max_line_bytes.max(1)),
    );

    while let Some(item) = lines.next().await {
        match item {
            Ok(Line::Complete(line)) => {
                let delivery = broadcaster.publish(&line);
                if delivery.dropped > 0 {
                    debug!(
                        "Line dropped for {} slow subscriber(s)",
                        delivery.dropped
                    );
                }
            }
            Ok(Line::Oversized { size }) => {
                warn!(
                    "Dropping {} byte backend line (limit {} bytes)",
                    size, max_line_bytes
                );
                broadcaster.publish_oversized(size);
            }
            Err(e) => {
                error!("Reading backend stdout failed: {}", e);
                break;
            }
        }
    }

    let Some(shared) = shared.upgrade() else {
        broadcaster.close();
        debug!("Backend output ended after all handles were dropped");
        return;
    };

    // Lock before closing so anyone woken by the close finds the child reaped.
    let mut child = shared.child.lock().await;
    broadcaster.close();
    match tokio::time::timeout(BackendDefaults::EXIT_GRACE, child.wait()).await {
        Ok(Ok(status)) => info!("Backend '{}' exited: {}", shared.command, status),
        Ok(Err(e)) => warn!("Could not query backend exit status: {}", e),
        Err(_) => warn!(
            "Backend '{}' closed stdout but is still running",
            shared.command
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::time::Duration;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    async fn next(sub: &mut Subscription) -> Option<Bytes> {
        timeout(WAIT, sub.recv()).await.expect("timed out waiting for line")
    }

    fn sh(script: &str) -> BackendConfig {
        BackendConfig::new("sh").with_args(["-c", script])
    }

    #[tokio::test]
    async fn test_lines_reach_every_subscriber_in_order() {
        let backend = Backend::start(BackendConfig::new("cat")).unwrap();
        let mut a = backend.subscribe().unwrap();
        let mut b = backend.subscribe().unwrap();

        backend.write(b"{\"id\":1}\n").await.unwrap();
        backend.write(b"{\"id\":2}\n").await.unwrap();

        for sub in [&mut a, &mut b] {
            assert_eq!(next(sub).await, Some(Bytes::from_static(b"{\"id\":1}\n")));
            assert_eq!(next(sub).await, Some(Bytes::from_static(b"{\"id\":2}\n")));
        }
    }

    #[tokio::test]
    async fn test_resubscribe_sees_only_new_lines() {
        let backend = Backend::start(BackendConfig::new("cat")).unwrap();
        let mut first = backend.subscribe().unwrap();
        backend.write(b"before\n").await.unwrap();
        assert_eq!(next(&mut first).await, Some(Bytes::from_static(b"before\n")));
        drop(first);

        let mut second = backend.subscribe().unwrap();
        backend.write(b"after\n").await.unwrap();
        assert_eq!(next(&mut second).await, Some(Bytes::from_static(b"after\n")));
    }

    #[tokio::test]
    async fn test_backend_exit_closes_subscriptions() {
        let backend = Backend::start(sh("read line; echo \"$line\"")).unwrap();
        let mut sub = backend.subscribe().unwrap();

        backend.write(b"bye\n").await.unwrap();
        assert_eq!(next(&mut sub).await, Some(Bytes::from_static(b"bye\n")));
        assert_eq!(next(&mut sub).await, None);

        timeout(WAIT, backend.closed()).await.unwrap();
        assert!(backend.is_closed());
        assert!(matches!(backend.subscribe(), Err(BridgeError::BackendClosed)));
        assert!(matches!(
            backend.write(b"late\n").await,
            Err(BridgeError::BackendClosed)
        ));
    }

    #[tokio::test]
    async fn test_kill_closes_backend() {
        let backend = Backend::start(BackendConfig::new("cat")).unwrap();
        let mut sub = backend.subscribe().unwrap();

        backend.kill().await.unwrap();
        assert_eq!(next(&mut sub).await, None);
        timeout(WAIT, backend.closed()).await.unwrap();
        assert_eq!(backend.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_oversized_line_is_dropped() {
        let config = BackendConfig::new("cat").with_max_line_bytes(8);
        let backend = Backend::start(config).unwrap();
        let mut sub = backend.subscribe().unwrap();

        backend.write(b"0123456789abcdef\nok\n").await.unwrap();
        assert_eq!(next(&mut sub).await, Some(Bytes::from_static(b"ok\n")));
    }

    #[tokio::test]
    async fn test_exit_status_collected_by_close() {
        let backend = Backend::start(sh("exit 3")).unwrap();
        timeout(WAIT, backend.closed()).await.unwrap();

        let status = backend.shared.child.lock().await.try_wait().unwrap();
        assert_eq!(status.and_then(|s| s.code()), Some(3));
    }

    #[tokio::test]
    async fn test_undrained_subscriber_keeps_first_lines() {
        let config = sh("read -r go; printf 'a\\nb\\nc\\n'").with_queue_capacity(2);
        let backend = Backend::start(config).unwrap();
        let mut stalled = backend.subscribe().unwrap();
        let mut reader = backend.subscribe().unwrap();

        backend.write(b"go\n").await.unwrap();
        for expected in [&b"a\n"[..], &b"b\n"[..]] {
            assert_eq!(next(&mut reader).await.as_deref(), Some(expected));
        }
        timeout(WAIT, backend.closed()).await.unwrap();

        let kept: Vec<Bytes> = std::iter::from_fn(|| stalled.try_recv()).collect();
        assert_eq!(kept, vec![Bytes::from_static(b"a\n"), Bytes::from_static(b"b\n")]);
    }

    #[tokio::test]
    async fn test_oversized_line_reaches_recv_line_as_marker() {
        let config = BackendConfig::new("cat").with_max_line_bytes(8);
        let backend = Backend::start(config).unwrap();
        let mut sub = backend.subscribe().unwrap();

        backend.write(b"0123456789abcdef\nok\n").await.unwrap();
        let marker = timeout(WAIT, sub.recv_line()).await.unwrap();
        assert!(matches!(marker, Some(Line::Oversized { size }) if size > 8));
        assert_eq!(next(&mut sub).await, Some(Bytes::from_static(b"ok\n")));
    }

    #[tokio::test]
    async fn test_start_missing_program_fails() {
        let err = Backend::start(BackendConfig::new("/nonexistent/backend")).unwrap_err();
        assert!(matches!(err, BridgeError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_config_builder() {
        let config = BackendConfig::new("node")
            .with_arg("server.js")
            .with_env("DEBUG", "1")
            .with_queue_capacity(4)
            .with_max_line_bytes(1024);
        assert_eq!(config.command.display(), "node server.js");
        assert_eq!(config.queue_capacity, 4);
        assert_eq!(config.max_line_bytes, 1024);
    }
}
