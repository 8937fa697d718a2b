//! Engine configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::CacheOptions;
use crate::error::{RedirectError, Result};
use crate::sync::SyncOptions;

/// Configuration of a [`RedirectEngine`](crate::engine::RedirectEngine).
///
/// Every key is optional in the JSON form; missing keys take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// GraphQL server base URL; `/graphql` is appended when missing
    pub server_url: String,
    /// Client identifier sent with every query
    pub host_id: String,
    /// JSON file holding the synchronized redirects
    pub store_path: PathBuf,
    pub sync_interval_secs: u64,
    pub fetch_timeout_secs: u64,
    /// Redirects per page; 0 fetches everything in one request
    pub page_size: usize,
    pub page_delay_ms: u64,
    pub sync_on_start: bool,
    pub allow_empty_sync: bool,
    pub cache_ttl_secs: u64,
    pub cache_sweep_interval_secs: u64,
    /// Maximum cached URLs; 0 disables the result cache
    pub cache_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            server_url: String::new(),
            host_id: String::new(),
            store_path: PathBuf::from("redirects.json"),
            sync_interval_secs: 36_000,
            fetch_timeout_secs: 30,
            page_size: 100,
            page_delay_ms: 100,
            sync_on_start: true,
            allow_empty_sync: false,
            cache_ttl_secs: 300,
            cache_sweep_interval_secs: 60,
            cache_capacity: 10_000,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON document and validate it
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON config file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            RedirectError::Config(format!("Cannot read '{}': {}", path.display(), e))
        })?;
        Self::from_json_str(&content)
    }

    #[must_use]
    pub fn with_server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = url.into();
        self
    }

    #[must_use]
    pub fn with_host_id(mut self, host_id: impl Into<String>) -> Self {
        self.host_id = host_id.into();
        self
    }

    #[must_use]
    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = path.into();
        self
    }

    #[must_use]
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval_secs = interval.as_secs();
        self
    }

    #[must_use]
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout_secs = timeout.as_secs();
        self
    }

    #[must_use]
    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = size;
        self
    }

    #[must_use]
    pub fn with_page_delay(mut self, delay: Duration) -> Self {
        self.page_delay_ms = delay.as_millis() as u64;
        self
    }

    #[must_use]
    pub fn with_sync_on_start(mut self, enabled: bool) -> Self {
        self.sync_on_start = enabled;
        self
    }

    #[must_use]
    pub fn with_allow_empty_sync(mut self, allowed: bool) -> Self {
        self.allow_empty_sync = allowed;
        self
    }

    #[must_use]
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl_secs = ttl.as_secs();
        self
    }

    #[must_use]
    pub fn with_cache_sweep_interval(mut self, interval: Duration) -> Self {
        self.cache_sweep_interval_secs = interval.as_secs();
        self
    }

    #[must_use]
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn cache_enabled(&self) -> bool {
        self.cache_capacity > 0
    }

    /// Check the values that would make the engine spin or never expire
    pub fn validate(&self) -> Result<()> {
        if self.sync_interval_secs == 0 {
            return Err(RedirectError::Config(
                "syncIntervalSecs must be greater than zero".into(),
            ));
        }
        if self.fetch_timeout_secs == 0 {
            return Err(RedirectError::Config(
                "fetchTimeoutSecs must be greater than zero".into(),
            ));
        }
        if self.cache_enabled() && self.cache_sweep_interval_secs == 0 {
            return Err(RedirectError::Config(
                "cacheSweepIntervalSecs must be greater than zero when caching".into(),
            ));
        }
        Ok(())
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions::new()
            .with_interval(Duration::from_secs(self.sync_interval_secs))
            .with_fetch_timeout(Duration::from_secs(self.fetch_timeout_secs))
            .with_page_delay(Duration::from_millis(self.page_delay_ms))
            .with_sync_on_start(self.sync_on_start)
            .with_allow_empty_sync(self.allow_empty_sync)
    }

    pub fn cache_options(&self) -> CacheOptions {
        CacheOptions::new()
            .with_ttl(Duration::from_secs(self.cache_ttl_secs))
            .with_sweep_interval(Duration::from_secs(self.cache_sweep_interval_secs))
            .with_capacity(self.cache_capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_from_empty_object() {
        let config = EngineConfig::from_json_str("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.sync_interval_secs, 36_000);
        assert_eq!(config.page_size, 100);
        assert!(config.cache_enabled());
    }

    #[test]
    fn test_camel_case_keys() {
        let config = EngineConfig::from_json_str(
            r#"{
                "serverUrl": "https://api.example.com",
                "hostId": "site-1",
                "storePath": "/var/lib/redirects.json",
                "syncIntervalSecs": 5,
                "pageSize": 0,
                "cacheCapacity": 0
            }"#,
        )
        .unwrap();
        assert_eq!(config.server_url, "https://api.example.com");
        assert_eq!(config.host_id, "site-1");
        assert_eq!(config.store_path, PathBuf::from("/var/lib/redirects.json"));
        assert_eq!(config.sync_options().interval, Duration::from_secs(5));
        assert_eq!(config.page_size, 0);
        assert!(!config.cache_enabled());
    }

    #[test]
    fn test_validate() {
        assert!(EngineConfig::new()
            .with_sync_interval(Duration::ZERO)
            .validate()
            .is_err());
        assert!(EngineConfig::new()
            .with_fetch_timeout(Duration::ZERO)
            .validate()
            .is_err());
        assert!(EngineConfig::new()
            .with_cache_sweep_interval(Duration::ZERO)
            .validate()
            .is_err());
        assert!(EngineConfig::new()
            .with_cache_sweep_interval(Duration::ZERO)
            .with_cache_capacity(0)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_invalid_json_is_rejected() {
        let err = EngineConfig::from_json_str(r#"{"pageSize": "many"}"#).unwrap_err();
        assert!(matches!(err, RedirectError::Json(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"hostId": "from-file", "cacheTtlSecs": 10}}"#).unwrap();

        let config = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.host_id, "from-file");
        assert_eq!(config.cache_options().ttl, Duration::from_secs(10));

        let err = EngineConfig::from_file("/nonexistent/redirects.json").unwrap_err();
        assert!(matches!(err, RedirectError::Config(_)));
    }
}
