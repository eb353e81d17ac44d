//! Server configuration loaded from environment variables.
//!
//! Every setting has a default so a development server starts with no
//! configuration at all.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use veilchat_store::database::DEFAULT_BUSY_TIMEOUT;

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP API.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: none, meaning the platform data directory.
    pub database_path: Option<PathBuf>,

    /// How long a request waits on a locked database.
    /// Env: `BUSY_TIMEOUT_MS`
    /// Default: 5000
    pub busy_timeout: Duration,

    /// Bearer token for `/admin/*`. Session minting lives there, so without
    /// it nobody can log in.
    /// Env: `ADMIN_TOKEN`
    /// Default: empty (admin API disabled).
    pub admin_token: Option<String>,

    /// Sustained requests per second allowed per client address.
    /// Env: `RATE_LIMIT_PER_SEC`
    /// Default: 20
    pub rate_per_sec: f64,

    /// Burst size per client address.
    /// Env: `RATE_LIMIT_BURST`
    /// Default: 60
    pub rate_burst: f64,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("http_addr", &self.http_addr)
            .field("database_path", &self.database_path)
            .field("busy_timeout", &self.busy_timeout)
            .field("admin_token", &self.admin_token.as_ref().map(|_| "<redacted>"))
            .field("rate_per_sec", &self.rate_per_sec)
            .field("rate_burst", &self.rate_burst)
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], 8080).into(),
            database_path: None,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            admin_token: None,
            rate_per_sec: 20.0,
            rate_burst: 60.0,
        }
    }
}

impl ServerConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, falling back to defaults for
    /// missing or malformed values.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(parsed) => config.http_addr = parsed,
                Err(_) => tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default"),
            }
        }

        if let Some(path) = lookup("DATABASE_PATH").filter(|p| !p.trim().is_empty()) {
            config.database_path = Some(PathBuf::from(path));
        }

        if let Some(val) = lookup("BUSY_TIMEOUT_MS") {
            match val.parse::<u64>() {
                Ok(ms) => config.busy_timeout = Duration::from_millis(ms),
                Err(_) => tracing::warn!(value = %val, "Invalid BUSY_TIMEOUT_MS, using default"),
            }
        }

        if let Some(token) = lookup("ADMIN_TOKEN") {
            if !token.is_empty() {
                config.admin_token = Some(token);
            }
        }

        if let Some(val) = lookup("RATE_LIMIT_PER_SEC") {
            match at_least(&val, f64::MIN_POSITIVE) {
                Some(rate) => config.rate_per_sec = rate,
                None => tracing::warn!(value = %val, "Invalid RATE_LIMIT_PER_SEC, using default"),
            }
        }
        // A bucket that cannot hold one whole token never admits anything.
        if let Some(val) = lookup("RATE_LIMIT_BURST") {
            match at_least(&val, 1.0) {
                Some(burst) => config.rate_burst = burst,
                None => tracing::warn!(value = %val, "Invalid RATE_LIMIT_BURST, using default"),
            }
        }

        config
    }
}

fn at_least(value: &str, min: f64) -> Option<f64> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= min)
}
