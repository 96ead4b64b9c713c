//! Core configuration.
//!
//! Loaded from environment variables or built in code, then validated once
//! at startup.

use std::env;
use std::fmt;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::feed::{FeedConfig, DEFAULT_FETCH_TIMEOUT, DEFAULT_MARK_READ_TIMEOUT, DEFAULT_PAGE_SIZE};

/// Base64 message key
pub const ENV_MESSAGE_KEY: &str = "XONGROH_MESSAGE_KEY";
/// Items per feed page
pub const ENV_PAGE_SIZE: &str = "XONGROH_PAGE_SIZE";
/// Page fetch timeout in milliseconds
pub const ENV_FETCH_TIMEOUT_MS: &str = "XONGROH_FETCH_TIMEOUT_MS";
/// Mark-read timeout in milliseconds
pub const ENV_MARK_READ_TIMEOUT_MS: &str = "XONGROH_MARK_READ_TIMEOUT_MS";
/// SQLite file path; unset means in-memory
pub const ENV_DATABASE_PATH: &str = "XONGROH_DATABASE_PATH";

/// Largest accepted page size
pub const MAX_PAGE_SIZE: usize = 100;

/// Configuration for [`XongrohCore`](crate::XongrohCore)
#[derive(Clone, PartialEq, Eq)]
pub struct CoreConfig {
    /// Base64-encoded 256-bit message key
    pub message_key: String,
    /// Items per feed page (1..=100)
    pub page_size: usize,
    /// Bound on each page fetch
    pub fetch_timeout: Duration,
    /// Bound on each mark-read call
    pub mark_read_timeout: Duration,
    /// SQLite file path; `None` for in-memory
    pub database_path: Option<String>,
}

impl CoreConfig {
    /// Defaults around the given key
    pub fn new(message_key: impl Into<String>) -> Self {
        Self {
            message_key: message_key.into(),
            page_size: DEFAULT_PAGE_SIZE,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            mark_read_timeout: DEFAULT_MARK_READ_TIMEOUT,
            database_path: None,
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::new(lookup(ENV_MESSAGE_KEY).unwrap_or_default());

        if let Some(raw) = lookup(ENV_PAGE_SIZE) {
            config.page_size = parse_number(ENV_PAGE_SIZE, &raw)? as usize;
        }
        if let Some(raw) = lookup(ENV_FETCH_TIMEOUT_MS) {
            config.fetch_timeout = Duration::from_millis(parse_number(ENV_FETCH_TIMEOUT_MS, &raw)?);
        }
        if let Some(raw) = lookup(ENV_MARK_READ_TIMEOUT_MS) {
            config.mark_read_timeout =
                Duration::from_millis(parse_number(ENV_MARK_READ_TIMEOUT_MS, &raw)?);
        }
        config.database_path = lookup(ENV_DATABASE_PATH).filter(|p| !p.trim().is_empty());

        Ok(config)
    }

    /// Reject out-of-range values
    ///
    /// The key itself is checked when it is imported.
    pub fn validate(&self) -> Result<()> {
        if self.message_key.trim().is_empty() {
            return Err(Error::InvalidConfig(format!("{} is not set", ENV_MESSAGE_KEY)));
        }
        if !(1..=MAX_PAGE_SIZE).contains(&self.page_size) {
            return Err(Error::InvalidConfig(format!(
                "page size {} is outside 1..={}",
                self.page_size, MAX_PAGE_SIZE
            )));
        }
        if self.fetch_timeout.is_zero() {
            return Err(Error::InvalidConfig("fetch timeout must be positive".into()));
        }
        if self.mark_read_timeout.is_zero() {
            return Err(Error::InvalidConfig("mark-read timeout must be positive".into()));
        }
        Ok(())
    }

    /// Feed tuning derived from this configuration
    pub fn feed_config(&self) -> FeedConfig {
        FeedConfig {
            page_size: self.page_size,
            fetch_timeout: self.fetch_timeout,
            mark_read_timeout: self.mark_read_timeout,
        }
    }
}

impl fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoreConfig")
            .field("message_key", &"[REDACTED]")
            .field("page_size", &self.page_size)
            .field("fetch_timeout", &self.fetch_timeout)
            .field("mark_read_timeout", &self.mark_read_timeout)
            .field("database_path", &self.database_path)
            .finish()
    }
}

fn parse_number(name: &str, raw: &str) -> Result<u64> {
    raw.trim()
        .parse::<u64>()
        .map_err(|e| Error::InvalidConfig(format!("{}={:?}: {}", name, raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = CoreConfig::from_lookup(lookup(&[(ENV_MESSAGE_KEY, "a2V5")])).unwrap();

        assert_eq!(config.message_key, "a2V5");
        assert_eq!(config.page_size, 20);
        assert_eq!(config.fetch_timeout, Duration::from_secs(5));
        assert_eq!(config.mark_read_timeout, Duration::from_secs(5));
        assert!(config.database_path.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides() {
        let config = CoreConfig::from_lookup(lookup(&[
            (ENV_MESSAGE_KEY, "a2V5"),
            (ENV_PAGE_SIZE, "50"),
            (ENV_FETCH_TIMEOUT_MS, "1500"),
            (ENV_MARK_READ_TIMEOUT_MS, "250"),
            (ENV_DATABASE_PATH, "/tmp/x.db"),
        ]))
        .unwrap();

        assert_eq!(config.page_size, 50);
        assert_eq!(config.fetch_timeout, Duration::from_millis(1500));
        assert_eq!(config.mark_read_timeout, Duration::from_millis(250));
        assert_eq!(config.database_path.as_deref(), Some("/tmp/x.db"));
        assert_eq!(config.feed_config().page_size, 50);
    }

    #[test]
    fn test_bad_number_is_invalid_config() {
        let err = CoreConfig::from_lookup(lookup(&[(ENV_PAGE_SIZE, "lots")])).unwrap_err();
        assert_eq!(err.code(), 100);
    }

    #[test]
    fn test_validate_ranges() {
        assert!(CoreConfig::new("").validate().is_err());

        let mut config = CoreConfig::new("a2V5");
        config.page_size = 0;
        assert!(config.validate().is_err());
        config.page_size = MAX_PAGE_SIZE + 1;
        assert!(config.validate().is_err());
        config.page_size = MAX_PAGE_SIZE;
        assert!(config.validate().is_ok());

        config.fetch_timeout = Duration::ZERO;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_debug_redacts_key() {
        let config = CoreConfig::new("c2VjcmV0");
        assert!(!format!("{:?}", config).contains("c2VjcmV0"));
    }
}
