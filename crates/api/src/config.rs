//! Application configuration loaded from environment variables.

use std::time::Duration;

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        }
    }
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` — bind address (default: `"0.0.0.0"`)
/// - `PORT` — listen port (default: `3000`)
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT` — `pretty` or `json` (default: `pretty`)
/// - `DATABASE_URL` — PostgreSQL offer store; in-memory when unset
/// - `PAYMENT_FUNCTIONS_URL`, `PAYMENT_FUNCTIONS_KEY` — hosted intent function
/// - `LOCK_TTL_SECS` — in-memory lock expiry (default: `600`)
/// - `RELEASE_ON_ABORT` — release locks of abandoned attempts (default: `true`)
/// - `SESSION_IDLE_SECS` — close sessions untouched this long (default: `1800`)
/// - `SYNC_IDLE_SECS` — drop unbound, unread event syncs (default: `300`)
/// - `REAP_INTERVAL_SECS` — how often idle state is reaped (default: `30`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub payment_functions_url: Option<String>,
    pub payment_functions_key: Option<String>,
    pub lock_ttl: Duration,
    pub release_on_abort: bool,
    pub session_idle: Duration,
    pub sync_idle: Duration,
    pub reap_interval: Duration,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let seconds = |key: &str, default: Duration| {
            lookup(key)
                .and_then(|s| s.parse().ok())
                .filter(|secs: &u64| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(default)
        };

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: lookup("LOG_FORMAT")
                .map(|f| LogFormat::parse(&f))
                .unwrap_or_default(),
            database_url: non_empty("DATABASE_URL"),
            payment_functions_url: non_empty("PAYMENT_FUNCTIONS_URL"),
            payment_functions_key: non_empty("PAYMENT_FUNCTIONS_KEY"),
            lock_ttl: seconds("LOCK_TTL_SECS", defaults.lock_ttl),
            release_on_abort: lookup("RELEASE_ON_ABORT")
                .and_then(|v| parse_bool(&v))
                .unwrap_or(defaults.release_on_abort),
            session_idle: seconds("SESSION_IDLE_SECS", defaults.session_idle),
            sync_idle: seconds("SYNC_IDLE_SECS", defaults.sync_idle),
            reap_interval: seconds("REAP_INTERVAL_SECS", defaults.reap_interval),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            database_url: None,
            payment_functions_url: None,
            payment_functions_key: None,
            lock_ttl: Duration::from_secs(600),
            release_on_abort: true,
            session_idle: Duration::from_secs(1800),
            sync_idle: Duration::from_secs(300),
            reap_interval: Duration::from_secs(30),
        }
    }
}
