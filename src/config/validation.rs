//! Configuration validation rules.
//!
//! Checks `AppConfig` values after they have been loaded from environment,
//! files, or defaults.

use thiserror::Error;

use crate::config::AppConfig;
use crate::data::webflow::MAX_PAGE_SIZE;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },

    #[error("missing required configuration: {field} ({hint})")]
    Missing { field: String, hint: String },
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field: field.into(),
        reason: reason.into(),
    }
}

/// Collection names become file names, so keep them to a safe alphabet
pub fn is_valid_collection_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `page_size` is 0 or above the API maximum (100)
    /// - `requests_per_minute`, `timeout_secs`, `max_attempts` or `refresh_interval_secs` is 0
    /// - the backoff ceiling is 0 or below the initial backoff
    /// - `base_url` is empty
    /// - a collection name is not `[a-z0-9_-]+` or its id is empty
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(invalid("page_size", "must be between 1 and 100"));
        }

        if self.requests_per_minute == 0 {
            return Err(invalid("requests_per_minute", "must be greater than 0"));
        }

        if self.timeout_secs == 0 {
            return Err(invalid("timeout_secs", "must be greater than 0"));
        }

        if self.max_attempts == 0 {
            return Err(invalid("max_attempts", "must be at least 1"));
        }

        if self.refresh_interval_secs == 0 {
            return Err(invalid("refresh_interval_secs", "must be greater than 0"));
        }

        if self.retry_backoff_max_secs == 0 {
            return Err(invalid("retry_backoff_max_secs", "must be greater than 0"));
        }
        if self.retry_initial_backoff_ms > self.retry_backoff_max_secs.saturating_mul(1000) {
            return Err(invalid(
                "retry_initial_backoff_ms",
                "must not exceed retry_backoff_max_secs",
            ));
        }

        if self.base_url.trim().is_empty() {
            return Err(invalid("base_url", "must not be empty"));
        }

        for (name, id) in &self.collections {
            if !is_valid_collection_name(name) {
                return Err(ConfigError::Invalid {
                    field: format!("collections.{}", name),
                    reason: "name must only contain a-z, 0-9, '-' or '_'".into(),
                });
            }
            if id.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    field: format!("collections.{}", name),
                    reason: "collection id must not be empty".into(),
                });
            }
        }

        if self.enabled && self.collections.is_empty() {
            tracing::warn!("no collections configured; refresh will have nothing to do");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_collection(name: &str, id: &str) -> AppConfig {
        let mut config = AppConfig::default();
        config.collections.insert(name.into(), id.into());
        config
    }

    #[test]
    fn test_validate_default_config() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_page_size_bounds() {
        let config = AppConfig {
            page_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field, .. }) if field == "page_size"
        ));

        let config = AppConfig {
            page_size: 101,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field, .. }) if field == "page_size"
        ));

        let config = AppConfig {
            page_size: 1,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_zero_rate() {
        let config = AppConfig {
            requests_per_minute: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field, .. }) if field == "requests_per_minute"
        ));
    }

    #[test]
    fn test_validate_backoff_ordering() {
        let config = AppConfig {
            retry_backoff_max_secs: 1,
            retry_initial_backoff_ms: 1_500,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field, .. }) if field == "retry_initial_backoff_ms"
        ));

        let config = AppConfig {
            retry_backoff_max_secs: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field, .. }) if field == "retry_backoff_max_secs"
        ));
    }

    #[test]
    fn test_validate_empty_base_url() {
        let config = AppConfig {
            base_url: "  ".into(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field, .. }) if field == "base_url"
        ));
    }

    #[test]
    fn test_validate_collection_names() {
        assert!(with_collection("bands", "66594971465c86eb74b1d898").validate().is_ok());
        assert!(with_collection("nr-38_list", "abc").validate().is_ok());
        assert!(with_collection("../etc", "abc").validate().is_err());
        assert!(with_collection("Bands", "abc").validate().is_err());
        assert!(with_collection("bands", "").validate().is_err());
    }

    #[test]
    fn test_collection_name_alphabet() {
        assert!(is_valid_collection_name("albums"));
        assert!(!is_valid_collection_name(""));
        assert!(!is_valid_collection_name("a/b"));
        assert!(!is_valid_collection_name("a.json"));
    }
}
