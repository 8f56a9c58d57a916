//! Server options — the configuration the core consumes.
//!
//! Everything *upstream* of this struct (credential loading, config files,
//! secret managers) is out of scope here; this module only layers `clap`
//! CLI flags over environment variables over the documented defaults.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Options consumed by `server()`.
#[derive(Debug, Clone)]
pub struct Options {
    pub bind: String,
    pub port: u16,
    pub tls_certificate: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    /// Forced to bytes during normalization, even though it's configured as text.
    pub token: Option<Vec<u8>>,
    pub max_line_size: usize,
    pub recv_size: usize,
    pub cleanup_timeout: Duration,
    pub qsize: usize,
    pub batch_size: usize,
    pub batch_timeout: Duration,
    pub retry_max_attempts: u32,
    pub retry_max_wait: Duration,
    pub retry_multiplier: Duration,
    pub api_timeout: Duration,
    pub api_max_connections: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 512,
            tls_certificate: None,
            tls_key: None,
            token: None,
            max_line_size: 16_384,
            recv_size: 8_192,
            cleanup_timeout: Duration::from_secs(30),
            qsize: 10_000,
            batch_size: 500,
            batch_timeout: Duration::from_secs(30),
            retry_max_attempts: 10,
            retry_max_wait: Duration::from_secs(60),
            retry_multiplier: Duration::from_millis(500),
            api_timeout: Duration::from_secs(30),
            api_max_connections: 30,
        }
    }
}

impl Options {
    /// Normalize/validate options; forces `token` to bytes.
    pub fn normalize(mut self, token: Option<&str>) -> Self {
        if let Some(t) = token {
            self.token = Some(t.as_bytes().to_vec());
        }
        self
    }

    pub fn from_cli(cli: &CliArgs) -> Self {
        let mut opts = Options::default();
        if let Some(v) = &cli.bind {
            opts.bind = v.clone();
        }
        if let Some(v) = cli.port {
            opts.port = v;
        }
        opts.tls_certificate = cli.tls_certificate.clone();
        opts.tls_key = cli.tls_key.clone();
        if let Some(v) = cli.max_line_size {
            opts.max_line_size = v;
        }
        if let Some(v) = cli.recv_size {
            opts.recv_size = v;
        }
        if let Some(v) = cli.cleanup_timeout {
            opts.cleanup_timeout = Duration::from_secs(v);
        }
        if let Some(v) = cli.qsize {
            opts.qsize = v;
        }
        if let Some(v) = cli.batch_size {
            opts.batch_size = v;
        }
        if let Some(v) = cli.batch_timeout {
            opts.batch_timeout = Duration::from_secs(v);
        }
        if let Some(v) = cli.retry_max_attempts {
            opts.retry_max_attempts = v;
        }
        if let Some(v) = cli.retry_max_wait {
            opts.retry_max_wait = Duration::from_secs(v);
        }
        if let Some(v) = cli.retry_multiplier {
            opts.retry_multiplier = Duration::from_secs_f64(v);
        }
        if let Some(v) = cli.api_timeout {
            opts.api_timeout = Duration::from_secs(v);
        }
        if let Some(v) = cli.api_max_connections {
            opts.api_max_connections = v;
        }
        opts.normalize(cli.token.as_deref())
    }
}

/// CLI flags, layered with env vars via clap's `env` feature.
#[derive(Debug, Parser)]
pub struct CliArgs {
    #[arg(long, env = "LINEHAUL_BIND")]
    pub bind: Option<String>,
    #[arg(long, env = "LINEHAUL_PORT")]
    pub port: Option<u16>,
    #[arg(long, env = "LINEHAUL_TLS_CERTIFICATE")]
    pub tls_certificate: Option<PathBuf>,
    #[arg(long, env = "LINEHAUL_TLS_KEY")]
    pub tls_key: Option<PathBuf>,
    #[arg(long, env = "LINEHAUL_TOKEN")]
    pub token: Option<String>,
    #[arg(long, env = "LINEHAUL_MAX_LINE_SIZE")]
    pub max_line_size: Option<usize>,
    #[arg(long, env = "LINEHAUL_RECV_SIZE")]
    pub recv_size: Option<usize>,
    #[arg(long, env = "LINEHAUL_CLEANUP_TIMEOUT")]
    pub cleanup_timeout: Option<u64>,
    #[arg(long, env = "LINEHAUL_QSIZE")]
    pub qsize: Option<usize>,
    #[arg(long, env = "LINEHAUL_BATCH_SIZE")]
    pub batch_size: Option<usize>,
    #[arg(long, env = "LINEHAUL_BATCH_TIMEOUT")]
    pub batch_timeout: Option<u64>,
    #[arg(long, env = "LINEHAUL_RETRY_MAX_ATTEMPTS")]
    pub retry_max_attempts: Option<u32>,
    #[arg(long, env = "LINEHAUL_RETRY_MAX_WAIT")]
    pub retry_max_wait: Option<u64>,
    #[arg(long, env = "LINEHAUL_RETRY_MULTIPLIER")]
    pub retry_multiplier: Option<f64>,
    #[arg(long, env = "LINEHAUL_API_TIMEOUT")]
    pub api_timeout: Option<u64>,
    #[arg(long, env = "LINEHAUL_API_MAX_CONNECTIONS")]
    pub api_max_connections: Option<usize>,
}

/// Constant-time comparison of a wire-prefix against the configured token.
///
/// Unequal lengths short-circuit (there is no secret-dependent timing to
/// protect once lengths differ, since the attacker already learns the
/// length from the line itself), but a length-matched comparison always
/// walks every byte.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_matches_equal_slices() {
        assert!(constant_time_eq(b"secret-token", b"secret-token"));
    }

    #[test]
    fn constant_time_eq_rejects_different_content_or_length() {
        assert!(!constant_time_eq(b"secret-token", b"secret-tokex"));
        assert!(!constant_time_eq(b"short", b"longer-token"));
    }

    #[test]
    fn defaults_match_documented_values() {
        let opts = Options::default();
        assert_eq!(opts.bind, "0.0.0.0");
        assert_eq!(opts.port, 512);
        assert_eq!(opts.max_line_size, 16_384);
        assert_eq!(opts.qsize, 10_000);
        assert_eq!(opts.batch_size, 500);
        assert_eq!(opts.retry_max_attempts, 10);
    }
}
