//! Configuration loaded from environment variables.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// How checkout persists the order, payment and shipment records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommitMode {
    /// All three records in one atomic append.
    #[default]
    Transactional,
    /// One record per step, with compensating writes on failure.
    Saga,
}

impl CommitMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommitMode::Transactional => "transactional",
            CommitMode::Saga => "saga",
        }
    }
}

impl fmt::Display for CommitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommitMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "transactional" | "atomic" => Ok(CommitMode::Transactional),
            "saga" => Ok(CommitMode::Saga),
            other => Err(format!("unknown commit mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// Fulfillment configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `RESERVATION_TIMEOUT_MS` — give up on a contended reservation after this long (default: `2000`)
/// - `RESERVATION_RETRY_BACKOFF_MS` — first backoff after a write conflict (default: `2`)
/// - `RESERVATION_MAX_BACKOFF_MS` — backoff ceiling (default: `50`)
/// - `ORDER_TRANSITION_RETRIES` — conflict retries for status changes (default: `5`)
/// - `ORDER_COMMIT_MODE` — `transactional` or `saga` (default: `transactional`)
/// - `ORDER_CURRENCY` — ISO currency recorded on payments (default: `"USD"`)
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT` — `text` or `json` (default: `text`)
/// - `DATABASE_URL` — PostgreSQL connection string; in-memory store when unset
///
/// Unparseable values fall back to the default.
#[derive(Debug, Clone)]
pub struct FulfillmentConfig {
    pub reservation_timeout: Duration,
    pub reservation_backoff: Duration,
    pub reservation_max_backoff: Duration,
    pub transition_retries: u32,
    pub commit_mode: CommitMode,
    pub currency: String,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
}

impl FulfillmentConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let millis = |key: &str, default: Duration| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(default)
        };

        Self {
            reservation_timeout: millis("RESERVATION_TIMEOUT_MS", defaults.reservation_timeout),
            reservation_backoff: millis("RESERVATION_RETRY_BACKOFF_MS", defaults.reservation_backoff),
            reservation_max_backoff: millis(
                "RESERVATION_MAX_BACKOFF_MS",
                defaults.reservation_max_backoff,
            ),
            transition_retries: lookup("ORDER_TRANSITION_RETRIES")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.transition_retries),
            commit_mode: lookup("ORDER_COMMIT_MODE")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.commit_mode),
            currency: lookup("ORDER_CURRENCY")
                .map(|v| v.trim().to_ascii_uppercase())
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.currency),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: lookup("LOG_FORMAT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.log_format),
            database_url: lookup("DATABASE_URL").filter(|v| !v.trim().is_empty()),
        }
    }

    pub fn with_commit_mode(mut self, commit_mode: CommitMode) -> Self {
        self.commit_mode = commit_mode;
        self
    }

    pub fn with_reservation_timeout(mut self, timeout: Duration) -> Self {
        self.reservation_timeout = timeout;
        self
    }
}

impl Default for FulfillmentConfig {
    fn default() -> Self {
        Self {
            reservation_timeout: Duration::from_millis(2000),
            reservation_backoff: Duration::from_millis(2),
            reservation_max_backoff: Duration::from_millis(50),
            transition_retries: 5,
            commit_mode: CommitMode::Transactional,
            currency: "USD".to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> FulfillmentConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        FulfillmentConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = FulfillmentConfig::default();
        assert_eq!(config.reservation_timeout, Duration::from_secs(2));
        assert_eq!(config.reservation_backoff, Duration::from_millis(2));
        assert_eq!(config.reservation_max_backoff, Duration::from_millis(50));
        assert_eq!(config.commit_mode, CommitMode::Transactional);
        assert_eq!(config.currency, "USD");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Text);
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_reads_overrides() {
        let config = config_from(&[
            ("RESERVATION_TIMEOUT_MS", "500"),
            ("ORDER_COMMIT_MODE", "Saga"),
            ("ORDER_CURRENCY", "eur"),
            ("LOG_FORMAT", "json"),
            ("DATABASE_URL", "postgres://localhost/shop"),
        ]);
        assert_eq!(config.reservation_timeout, Duration::from_millis(500));
        assert_eq!(config.commit_mode, CommitMode::Saga);
        assert_eq!(config.currency, "EUR");
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/shop")
        );
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = config_from(&[
            ("RESERVATION_TIMEOUT_MS", "soon"),
            ("ORDER_COMMIT_MODE", "two-phase"),
            ("ORDER_CURRENCY", "  "),
            ("DATABASE_URL", ""),
        ]);
        assert_eq!(config.reservation_timeout, Duration::from_secs(2));
        assert_eq!(config.commit_mode, CommitMode::Transactional);
        assert_eq!(config.currency, "USD");
        assert!(config.database_url.is_none());
    }
}
