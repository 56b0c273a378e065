//! Named-pipe duplex: expose a command's stdio through a pair of FIFOs.
//!
//! The server side runs the command with stdin read from `<prefix>/in` and
//! stdout written to `<prefix>/out`. A client on the other end writes to
//! `in` and reads from `out`. Opening a FIFO blocks until the peer opens the
//! other end, so both roles open in the same order (`in` first) to avoid a
//! deadlock.

use crate::command::CommandSpec;
use crate::config::{fifo_prefix_from_env, FifoDefaults};
use crate::error::{BridgeError, Result};
use nix::sys::stat::Mode;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

/// Locations of the `in`/`out` pipe pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FifoPaths {
    /// Client writes, command reads.
    pub input: PathBuf,
    /// Command writes, client reads.
    pub output: PathBuf,
}

impl FifoPaths {
    pub fn new(prefix: impl AsRef<Path>) -> Self {
        let prefix = prefix.as_ref();
        Self {
            input: prefix.join(FifoDefaults::IN_NAME),
            output: prefix.join(FifoDefaults::OUT_NAME),
        }
    }

    /// Paths under `$FIFO_PREFIX` (default: current directory).
    pub fn from_env() -> Self {
        Self::new(fifo_prefix_from_env())
    }

    /// Create both pipes if they do not exist yet.
    pub fn ensure(&self) -> Result<()> {
        ensure_fifo(&self.input)?;
        ensure_fifo(&self.output)
    }
}

/// Create a FIFO at `path` unless one already exists there.
///
/// A regular file or directory at `path` is an error; it is never replaced.
pub fn ensure_fifo(path: &Path) -> Result<()> {
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_fifo() => return Ok(()),
        Ok(_) => {
            return Err(BridgeError::Config {
                message: format!("{} exists and is not a FIFO", path.display()),
            })
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(BridgeError::io_with_path(e, path)),
    }

    let mode = Mode::from_bits_truncate(FifoDefaults::MODE as nix::libc::mode_t);
    match nix::unistd::mkfifo(path, mode) {
        Ok(()) => {
            debug!("Created FIFO {}", path.display());
            Ok(())
        }
        // Lost a race with another process creating the same pipe.
        Err(nix::errno::Errno::EEXIST) => Ok(()),
        Err(errno) => Err(BridgeError::io_with_path(errno.into(), path)),
    }
}

/// Open a FIFO on the blocking pool; the open waits for the peer.
async fn open_blocking(path: &Path, write: bool) -> Result<File> {
    let owned = path.to_path_buf();
    let opened = tokio::task::spawn_blocking(move || {
        OpenOptions::new().read(!write).write(write).open(&owned)
    })
    .await
    .map_err(|e| BridgeError::Io {
        message: format!("FIFO open task failed: {}", e),
        path: Some(path.to_path_buf()),
        source: None,
    })?;
    opened.map_err(|e| BridgeError::io_with_path(e, path))
}

/// Run `command` with its stdio attached to the pipe pair.
///
/// Returns once the command exits; a non-zero status is returned, not
/// turned into an error, so the caller can propagate the exit code.
pub async fn serve(paths: &FifoPaths, command: &CommandSpec) -> Result<ExitStatus> {
    paths.ensure()?;

    info!("Waiting for a client on {}", paths.input.display());
    let input = open_blocking(&paths.input, false).await?;
    let output = open_blocking(&paths.output, true).await?;

    let mut child = {
        let mut cmd = command.to_command();
        cmd.stdin(Stdio::from(input)).stdout(Stdio::from(output));
        // Dropping `cmd` releases our copies of the pipe ends.
        command.spawn(&mut cmd)?
    };

    let status = child.wait().await?;
    info!("'{}' exited: {}", command.display(), status);
    Ok(status)
}

/// Client role: relay `input` into the `in` pipe and the `out` pipe into
/// `output` until the server side closes `out`.
pub async fn run_client<R, W>(paths: &FifoPaths, mut input: R, mut output: W) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    // Either side may start first.
    paths.ensure()?;
    let to_server = open_blocking(&paths.input, true).await?;
    let from_server = open_blocking(&paths.output, false).await?;
    let mut to_server = tokio::fs::File::from_std(to_server);
    let mut from_server = tokio::fs::File::from_std(from_server);

    let upstream = async move {
        let sent = tokio::io::copy(&mut input, &mut to_server).await?;
        to_server.shutdown().await?;
        debug!("Sent {} bytes, closing {}", sent, FifoDefaults::IN_NAME);
        Ok::<_, std::io::Error>(())
    };
    let downstream = async {
        tokio::io::copy(&mut from_server, &mut output).await?;
        output.flush().await
    };

    tokio::try_join!(upstream, downstream)?;
    Ok(())
}
