//! Application configuration with layered loading.
//!
//! Configuration is loaded with figment from multiple sources:
//!
//! 1. Environment variables (WEBFLOW_*, nested keys split on `__`)
//! 2. TOML config file (`--config` or WEBFLOW_CONFIG_FILE)
//! 3. Built-in defaults
//!
//! Collections are a map from local name to Webflow collection id, e.g.
//! `WEBFLOW_COLLECTIONS__BANDS=66594971465c86eb74b1d898` or the older flat
//! form `WEBFLOW_COLLECTION_ID_BANDS=66594971465c86eb74b1d898` (the nested
//! form wins when both are set), or
//!
//! ```toml
//! [collections]
//! bands = "66594971465c86eb74b1d898"
//! albums = "665fb5a92a7824458817d3c8"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

mod validation;

pub use validation::{is_valid_collection_name, ConfigError};

use crate::cache::SnapshotStore;
use crate::data::webflow::{WebflowConfig, DEFAULT_BASE_URL};
use crate::manager::CacheSettings;
use crate::retry::RetryPolicy;

/// Environment variable naming an optional TOML config file
pub const CONFIG_FILE_ENV: &str = "WEBFLOW_CONFIG_FILE";

/// Prefix for environment overrides
const ENV_PREFIX: &str = "WEBFLOW_";

/// Prefix of the flat per-collection id variables
const LEGACY_COLLECTION_PREFIX: &str = "WEBFLOW_COLLECTION_ID_";

/// Application configuration with layered loading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Webflow site API token.
    ///
    /// Set via WEBFLOW_API_TOKEN. Required only for commands that reach the network.
    #[serde(default)]
    pub api_token: Option<String>,

    /// Webflow site id, used by the connection test.
    #[serde(default)]
    pub site_id: Option<String>,

    /// Base URL of the Webflow Data API.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Whether refreshing is enabled at all. Reads keep working when disabled.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Cache directory; defaults to the XDG cache dir for flowcache.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// Staleness window in seconds.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,

    /// Ceiling for retry backoff in seconds.
    #[serde(default = "default_retry_backoff_max_secs")]
    pub retry_backoff_max_secs: u64,

    /// First retry delay in milliseconds.
    #[serde(default = "default_retry_initial_backoff_ms")]
    pub retry_initial_backoff_ms: u64,

    /// Attempts per page, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Items requested per page (Webflow maximum is 100).
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Request budget per minute.
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,

    /// HTTP request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// How often the background worker checks for stale collections.
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,

    /// Local collection name to Webflow collection id.
    #[serde(default)]
    pub collections: BTreeMap<String, String>,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_true() -> bool {
    true
}

fn default_stale_after_secs() -> u64 {
    86_400 // 24 hours
}

fn default_retry_backoff_max_secs() -> u64 {
    300
}

fn default_retry_initial_backoff_ms() -> u64 {
    1_000
}

fn default_max_attempts() -> u32 {
    5
}

fn default_page_size() -> u32 {
    100
}

fn default_requests_per_minute() -> u32 {
    60
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_refresh_interval_secs() -> u64 {
    900
}

/// Maps `WEBFLOW_COLLECTION_ID_<NAME>` onto `collections.<name>`
fn legacy_collection_env() -> Env {
    Env::prefixed(LEGACY_COLLECTION_PREFIX)
        .map(|key| format!("collections.{}", key.as_str().to_lowercase()).into())
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_token: None,
            site_id: None,
            base_url: default_base_url(),
            enabled: true,
            cache_dir: None,
            stale_after_secs: default_stale_after_secs(),
            retry_backoff_max_secs: default_retry_backoff_max_secs(),
            retry_initial_backoff_ms: default_retry_initial_backoff_ms(),
            max_attempts: default_max_attempts(),
            page_size: default_page_size(),
            requests_per_minute: default_requests_per_minute(),
            timeout_secs: default_timeout_secs(),
            refresh_interval_secs: default_refresh_interval_secs(),
            collections: BTreeMap::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration from all sources with layered precedence.
    ///
    /// `config_file` takes priority over WEBFLOW_CONFIG_FILE.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file or environment cannot be parsed,
    /// or if validation fails after loading.
    pub fn load(config_file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        let env_file = std::env::var(CONFIG_FILE_ENV).ok().map(PathBuf::from);
        if let Some(path) = config_file.map(Path::to_path_buf).or(env_file) {
            if !path.exists() {
                return Err(ConfigError::LoadFailed(format!(
                    "config file {} does not exist",
                    path.display()
                )));
            }
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(legacy_collection_env()).merge(
            Env::prefixed(ENV_PREFIX)
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        Self::from_figment(figment)
    }

    /// Extract and validate from an already layered figment.
    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// Check if the API token is available (for deferred validation).
    pub fn require_api_token(&self) -> Result<&str, ConfigError> {
        self.api_token
            .as_deref()
            .filter(|token| !token.is_empty())
            .ok_or_else(|| ConfigError::Missing {
                field: "api_token".into(),
                hint: "Set WEBFLOW_API_TOKEN environment variable".into(),
            })
    }

    /// Staleness window as a chrono duration.
    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.stale_after_secs).unwrap_or(i64::MAX))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.retry_initial_backoff_ms),
            Duration::from_secs(self.retry_backoff_max_secs),
        )
    }

    /// Settings the cache manager runs with.
    pub fn cache_settings(&self) -> CacheSettings {
        CacheSettings {
            collections: self.collections.clone(),
            stale_after: self.stale_after(),
            page_size: self.page_size,
            retry: self.retry_policy(),
        }
    }

    /// API client configuration; fails if no token is configured.
    pub fn webflow_config(&self) -> Result<WebflowConfig, ConfigError> {
        let api_token = self.require_api_token()?.to_string();
        Ok(WebflowConfig {
            api_token,
            site_id: self.site_id.clone(),
            base_url: self.base_url.trim_end_matches('/').to_string(),
            timeout: self.timeout(),
            requests_per_minute: self.requests_per_minute,
            ..Default::default()
        })
    }

    /// Store for the configured cache directory, or the XDG default.
    pub fn snapshot_store(&self) -> Result<SnapshotStore, ConfigError> {
        match &self.cache_dir {
            Some(dir) => Ok(SnapshotStore::with_dir(dir.clone())),
            None => SnapshotStore::new().ok_or_else(|| ConfigError::Missing {
                field: "cache_dir".into(),
                hint: "No home directory found; set WEBFLOW_CACHE_DIR".into(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layered(toml: &str) -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default())).merge(Toml::string(toml))
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert!(config.api_token.is_none());
        assert_eq!(config.base_url, "https://api.webflow.com/v2");
        assert!(config.enabled);
        assert_eq!(config.stale_after_secs, 86_400);
        assert_eq!(config.retry_backoff_max_secs, 300);
        assert_eq!(config.page_size, 100);
        assert_eq!(config.requests_per_minute, 60);
        assert!(config.collections.is_empty());
    }

    #[test]
    fn test_durations() {
        let config = AppConfig::default();
        assert_eq!(config.stale_after(), chrono::Duration::hours(24));
        assert_eq!(config.timeout(), Duration::from_secs(10));
        assert_eq!(config.refresh_interval(), Duration::from_secs(900));

        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.initial_backoff, Duration::from_secs(1));
        assert_eq!(policy.max_backoff, Duration::from_secs(300));
    }

    #[test]
    fn test_toml_layer_overrides_defaults() {
        let config = AppConfig::from_figment(layered(
            r#"
            api_token = "tok"
            stale_after_secs = 3600
            page_size = 50

            [collections]
            bands = "66594971465c86eb74b1d898"
            albums = "665fb5a92a7824458817d3c8"
            "#,
        ))
        .expect("config should load");

        assert_eq!(config.require_api_token().unwrap(), "tok");
        assert_eq!(config.stale_after_secs, 3600);
        assert_eq!(config.page_size, 50);
        assert_eq!(config.timeout_secs, 10, "untouched keys keep defaults");
        assert_eq!(config.collections.len(), 2);
        assert_eq!(config.collections["bands"], "66594971465c86eb74b1d898");

        let settings = config.cache_settings();
        assert_eq!(settings.page_size, 50);
        assert_eq!(settings.stale_after, chrono::Duration::hours(1));
        assert!(settings.collections.contains_key("albums"));
    }

    #[test]
    fn test_flat_collection_id_variables() {
        std::env::set_var("WEBFLOW_COLLECTION_ID_FLATBANDS", "66594971465c86eb74b1d898");
        std::env::set_var("WEBFLOW_COLLECTION_ID_FLATSONGS", "6659b3d6fda1a5d0e3f1e2a1");

        let result = AppConfig::from_figment(layered("").merge(legacy_collection_env()));

        std::env::remove_var("WEBFLOW_COLLECTION_ID_FLATBANDS");
        std::env::remove_var("WEBFLOW_COLLECTION_ID_FLATSONGS");

        let config = result.expect("config should load");
        assert_eq!(config.collections["flatbands"], "66594971465c86eb74b1d898");
        assert_eq!(config.collections["flatsongs"], "6659b3d6fda1a5d0e3f1e2a1");
    }

    #[test]
    fn test_invalid_values_fail_to_load() {
        let result = AppConfig::from_figment(layered("page_size = 500"));
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "page_size"));

        let result = AppConfig::from_figment(layered("page_size = \"lots\""));
        assert!(matches!(result, Err(ConfigError::LoadFailed(_))));
    }

    #[test]
    fn test_require_api_token_missing() {
        let config = AppConfig::default();
        assert!(matches!(config.require_api_token(), Err(ConfigError::Missing { .. })));

        let config = AppConfig {
            api_token: Some(String::new()),
            ..Default::default()
        };
        assert!(matches!(config.require_api_token(), Err(ConfigError::Missing { .. })));
        assert!(config.webflow_config().is_err());
    }

    #[test]
    fn test_webflow_config_trims_trailing_slash() {
        let config = AppConfig {
            api_token: Some("tok".into()),
            site_id: Some("site".into()),
            base_url: "https://api.webflow.com/v2/".into(),
            requests_per_minute: 30,
            ..Default::default()
        };

        let webflow = config.webflow_config().unwrap();
        assert_eq!(webflow.base_url, "https://api.webflow.com/v2");
        assert_eq!(webflow.api_token, "tok");
        assert_eq!(webflow.site_id.as_deref(), Some("site"));
        assert_eq!(webflow.requests_per_minute, 30);
    }

    #[test]
    fn test_snapshot_store_uses_configured_dir() {
        let config = AppConfig {
            cache_dir: Some(PathBuf::from("/tmp/flowcache-test")),
            ..Default::default()
        };
        let store = config.snapshot_store().unwrap();
        assert_eq!(store.dir(), Path::new("/tmp/flowcache-test"));
    }
}
