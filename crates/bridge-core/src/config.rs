//! Centralized configuration for the stdio bridge.
//!
//! Constant groups for each front end plus helpers that read the environment
//! variables shared by all binaries (`PORT`, `FIFO_PREFIX`).

use std::path::PathBuf;
use std::time::Duration;

/// Backend process and fan-out defaults.
pub struct BackendDefaults;

impl BackendDefaults {
    /// Per-subscriber queue capacity, in lines.
    pub const QUEUE_CAPACITY: usize = 32;
    /// Longest backend output line accepted by the fan-out loop.
    pub const MAX_LINE_BYTES: usize = 4 * 1024 * 1024; // 4MB
    /// Initial read buffer for the fan-out loop.
    pub const READ_BUFFER_BYTES: usize = 64 * 1024;
    /// How long to wait for the child to be reaped after stdout ends.
    pub const EXIT_GRACE: Duration = Duration::from_secs(2);
}

/// HTTP/SSE front end defaults.
pub struct HttpDefaults;

impl HttpDefaults {
    pub const PORT: u16 = 4242;
    pub const HOST: &'static str = "0.0.0.0";
    pub const SSE_PATH: &'static str = "/sse";
    pub const HEALTH_PATH: &'static str = "/health";
    pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);
}

/// TCP relay defaults.
pub struct RelayDefaults;

impl RelayDefaults {
    pub const PORT: u16 = 8000;
    pub const HOST: &'static str = "0.0.0.0";
    pub const MAX_CONNECTIONS: usize = 64;
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
}

/// FIFO pair defaults.
pub struct FifoDefaults;

impl FifoDefaults {
    pub const PREFIX: &'static str = ".";
    pub const IN_NAME: &'static str = "in";
    pub const OUT_NAME: &'static str = "out";
    /// World read/write, subject to the process umask.
    pub const MODE: u32 = 0o666;
}

/// Tool discovery defaults.
pub struct DiscoveryDefaults;

impl DiscoveryDefaults {
    pub const MAX_MESSAGE_BYTES: usize = 4 * 1024 * 1024; // 4MB
    pub const METHOD: &'static str = "tools/list";
}

/// Environment variable names.
pub struct EnvVars;

impl EnvVars {
    pub const PORT: &'static str = "PORT";
    pub const FIFO_PREFIX: &'static str = "FIFO_PREFIX";
}

/// Read `PORT` from the environment, falling back to `default` when it is
/// unset or not a valid port number.
pub fn port_from_env(default: u16) -> u16 {
    parse_port(std::env::var(EnvVars::PORT).ok().as_deref(), default)
}

fn parse_port(value: Option<&str>, default: u16) -> u16 {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .and_then(|v| v.parse::<u16>().ok())
        .unwrap_or(default)
}

/// Read `FIFO_PREFIX` from the environment (default: current directory).
pub fn fifo_prefix_from_env() -> PathBuf {
    parse_prefix(std::env::var(EnvVars::FIFO_PREFIX).ok().as_deref())
}

fn parse_prefix(value: Option<&str>) -> PathBuf {
    match value {
        Some(v) if !v.is_empty() => PathBuf::from(v),
        _ => PathBuf::from(FifoDefaults::PREFIX),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_port() {
        assert_eq!(parse_port(Some("9000"), 8000), 9000);
        assert_eq!(parse_port(Some(" 9001 "), 8000), 9001);
        assert_eq!(parse_port(Some("not-a-port"), 8000), 8000);
        assert_eq!(parse_port(Some("70000"), 8000), 8000);
        assert_eq!(parse_port(Some(""), 8000), 8000);
        assert_eq!(parse_port(None, 4242), 4242);
    }

    #[test]
    fn test_parse_prefix() {
        assert_eq!(parse_prefix(None), PathBuf::from("."));
        assert_eq!(parse_prefix(Some("")), PathBuf::from("."));
        assert_eq!(parse_prefix(Some("/fifo")), PathBuf::from("/fifo"));
    }

    #[test]
    fn test_limits_are_reasonable() {
        assert!(BackendDefaults::QUEUE_CAPACITY > 0);
        assert!(BackendDefaults::MAX_LINE_BYTES >= BackendDefaults::READ_BUFFER_BYTES);
        assert!(DiscoveryDefaults::MAX_MESSAGE_BYTES > 0);
    }
}
