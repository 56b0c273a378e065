//! Child process command descriptions.
//!
//! `CommandSpec` is the program plus arguments every front end launches: the
//! SSE multiplexer starts one long-lived backend, the TCP relay starts one per
//! connection, and the FIFO proxy starts one wired to named pipes.

use crate::error::{BridgeError, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::{debug, info};

/// A program to run, with its arguments and environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Program name or path, resolved through `PATH` when relative.
    pub program: String,
    /// Arguments passed verbatim.
    pub args: Vec<String>,
    /// Extra environment variables layered over the inherited environment.
    pub env_vars: HashMap<String, String>,
    /// Working directory (defaults to the caller's).
    pub working_dir: Option<PathBuf>,
}

impl CommandSpec {
    /// Create a spec for `program` with no arguments.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env_vars: HashMap::new(),
            working_dir: None,
        }
    }

    /// Build a spec from an argv-style list (`[program, args...]`).
    pub fn from_argv<I, S>(argv: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut iter = argv.into_iter().map(Into::<String>::into);
        let program = iter.next().filter(|p| !p.is_empty()).ok_or_else(|| {
            BridgeError::Config {
                message: "no command given".to_string(),
            }
        })?;
        Ok(Self::new(program).with_args(iter))
    }

    /// Append several arguments.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Append one argument.
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.insert(key.into(), value.into());
        self
    }

    /// Set the working directory.
    pub fn with_working_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.working_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Human-readable command line for logs and errors.
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }

    /// A tokio `Command` configured from this spec.
    ///
    /// Stderr is inherited so backend diagnostics reach the operator. The
    /// child is killed when its handle is dropped.
    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(&self.env_vars)
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }

    /// Spawn with piped stdin and stdout.
    pub fn spawn_piped(&self) -> Result<Child> {
        let mut cmd = self.to_command();
        cmd.stdin(Stdio::piped()).stdout(Stdio::piped());
        self.spawn(&mut cmd)
    }

    /// Spawn a command previously produced by [`to_command`](Self::to_command),
    /// mapping failures to [`BridgeError::Spawn`].
    pub fn spawn(&self, cmd: &mut Command) -> Result<Child> {
        debug!("Spawning: {}", self.display());
        let child = cmd.spawn().map_err(|e| BridgeError::Spawn {
            command: self.display(),
            message: e.to_string(),
            source: Some(e),
        })?;
        info!(
            "Started '{}' with PID {}",
            self.program,
            child.id().map_or_else(|| "?".to_string(), |p| p.to_string())
        );
        Ok(child)
    }
}
