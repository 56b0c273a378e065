//! stdio-fifo-proxy - expose a command's stdio through named pipes.
//!
//! With a command, creates `$FIFO_PREFIX/in` and `$FIFO_PREFIX/out` and runs
//! the command on them. Without arguments, acts as the client: stdin goes to
//! `in`, `out` comes back on stdout.

#[cfg(unix)]
mod unix {
    use anyhow::Result;
    use bridge_core::config::{EnvVars, FifoDefaults};
    use bridge_core::fifo::{self, FifoPaths};
    use bridge_relay::{init_tracing, FifoRole};
    use clap::Parser;
    use std::path::PathBuf;
    use tracing::warn;

    #[derive(Parser, Debug)]
    #[command(name = "stdio-fifo-proxy")]
    #[command(about = "Run a stdio command on a FIFO pair, or talk to one")]
    struct Args {
        /// Directory holding the `in` and `out` pipes
        #[arg(long, env = EnvVars::FIFO_PREFIX, default_value = FifoDefaults::PREFIX)]
        prefix: PathBuf,

        /// Enable debug logging
        #[arg(short, long)]
        debug: bool,

        /// Command to run (omit for client mode)
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    }

    pub async fn run() -> Result<i32> {
        let args = Args::parse();
        init_tracing(args.debug);

        let paths = FifoPaths::new(&args.prefix);
        match FifoRole::from_args(args.command)? {
            FifoRole::Client => {
                fifo::run_client(&paths, tokio::io::stdin(), tokio::io::stdout()).await?;
                Ok(0)
            }
            FifoRole::Server { command } => {
                let status = fifo::serve(&paths, &command).await?;
                if status.success() {
                    Ok(0)
                } else {
                    warn!("'{}' failed: {}", command.display(), status);
                    Ok(status.code().unwrap_or(1))
                }
            }
        }
    }
}

#[cfg(unix)]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let code = unix::run().await?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

#[cfg(not(unix))]
fn main() {
    eprintln!("stdio-fifo-proxy requires a Unix platform with named pipes");
    std::process::exit(1);
}
