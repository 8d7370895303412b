//! Advisor configuration.
//!
//! Loaded from `<config dir>/pgadvise/config.toml` unless a path is given:
//!
//! ```toml
//! database_url = "postgres://localhost/app"
//! auto_enable_extensions = true
//! validate_with_hypopg = true
//!
//! [slow_queries]
//! top = 20
//!
//! [n_plus_one]
//! min_calls = 20
//! max_avg_rows = 3.0
//! min_mean_ms = 0.5
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{AdvisorError, AdvisorResult};
use crate::stats::NPlusOneThresholds;

/// Main advisor configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AdvisorConfig {
    /// Connection URL used when none is passed explicitly.
    pub database_url: Option<String>,

    /// Create `pg_stat_statements` / `hypopg` on connect when available.
    pub auto_enable_extensions: bool,

    /// Default for index suggestion validation.
    pub validate_with_hypopg: bool,

    pub slow_queries: SlowQueryConfig,

    pub n_plus_one: NPlusOneThresholds,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SlowQueryConfig {
    pub top: i64,
}

impl Default for SlowQueryConfig {
    fn default() -> Self {
        Self { top: 20 }
    }
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            auto_enable_extensions: true,
            validate_with_hypopg: true,
            slow_queries: SlowQueryConfig::default(),
            n_plus_one: NPlusOneThresholds::default(),
        }
    }
}

impl AdvisorConfig {
    /// Create a new configuration builder
    pub fn builder() -> AdvisorConfigBuilder {
        AdvisorConfigBuilder::default()
    }

    /// Default config file location, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("pgadvise").join("config.toml"))
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(text: &str) -> AdvisorResult<Self> {
        toml::from_str(text).map_err(|e| AdvisorError::Config(e.to_string()))
    }

    /// Load from `path`, or from [`Self::default_path`] when `None`.
    ///
    /// A missing default file yields the defaults; a missing explicit file
    /// is an error.
    pub fn load(path: Option<&Path>) -> AdvisorResult<Self> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => match Self::default_path() {
                Some(p) => (p, false),
                None => return Ok(Self::default()),
            },
        };

        match std::fs::read_to_string(&path) {
            Ok(text) => Self::from_toml(&text),
            Err(e) if !explicit && e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(AdvisorError::Config(format!(
                "failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

/// Builder for AdvisorConfig
#[derive(Debug, Default)]
pub struct AdvisorConfigBuilder {
    config: AdvisorConfig,
}

impl AdvisorConfigBuilder {
    /// Set the database URL
    pub fn database(mut self, url: impl Into<String>) -> Self {
        self.config.database_url = Some(url.into());
        self
    }

    pub fn auto_enable_extensions(mut self, enabled: bool) -> Self {
        self.config.auto_enable_extensions = enabled;
        self
    }

    pub fn validate_with_hypopg(mut self, enabled: bool) -> Self {
        self.config.validate_with_hypopg = enabled;
        self
    }

    pub fn slow_query_top(mut self, top: i64) -> Self {
        self.config.slow_queries.top = top;
        self
    }

    pub fn n_plus_one(mut self, thresholds: NPlusOneThresholds) -> Self {
        self.config.n_plus_one = thresholds;
        self
    }

    /// Build the configuration
    pub fn build(self) -> AdvisorConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_is_default() {
        assert_eq!(AdvisorConfig::from_toml("").unwrap(), AdvisorConfig::default());
    }

    #[test]
    fn test_partial_toml() {
        let config = AdvisorConfig::from_toml(
            r#"
            database_url = "postgres://localhost/shop"
            validate_with_hypopg = false

            [n_plus_one]
            min_calls = 100
            "#,
        )
        .unwrap();

        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/shop"));
        assert!(!config.validate_with_hypopg);
        assert!(config.auto_enable_extensions);
        assert_eq!(config.n_plus_one.min_calls, 100);
        assert_eq!(config.n_plus_one.max_avg_rows, 3.0);
        assert_eq!(config.slow_queries.top, 20);
    }

    #[test]
    fn test_bad_toml() {
        let err = AdvisorConfig::from_toml("top = [").unwrap_err();
        assert!(matches!(err, AdvisorError::Config(_)));
    }

    #[test]
    fn test_missing_explicit_file() {
        let err = AdvisorConfig::load(Some(Path::new("/nonexistent/pgadvise.toml"))).unwrap_err();
        assert!(matches!(err, AdvisorError::Config(_)));
    }

    #[test]
    fn test_builder() {
        let config = AdvisorConfig::builder()
            .database("postgres://db/app")
            .slow_query_top(5)
            .auto_enable_extensions(false)
            .build();
        assert_eq!(config.database_url.as_deref(), Some("postgres://db/app"));
        assert_eq!(config.slow_queries.top, 5);
        assert!(!config.auto_enable_extensions);
    }
}
