// quillbase-core/src/config.rs
// Store configuration: defaults, JSON file loading, environment override

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{QuillError, Result};
use crate::logging::LogLevel;

/// Environment variable overriding `log_level`
pub const LOG_ENV_VAR: &str = "QUILLBASE_LOG";

/// Configuration for a QuillBase client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Logical database name
    pub database: String,

    /// Default collection opened by the CLI
    pub collection: String,

    /// Upper bound for a single scan / backend call, in milliseconds.
    /// `None` disables the deadline.
    pub operation_timeout_ms: Option<u64>,

    /// ERROR, WARN, INFO, DEBUG or TRACE
    pub log_level: String,

    /// Reject filters naming fields outside the collection schema
    pub validate_fields: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            database: "plp_bookstore".to_string(),
            collection: "books".to_string(),
            operation_timeout_ms: Some(5_000),
            log_level: LogLevel::Warn.as_str().to_string(),
            validate_fields: true,
        }
    }
}

impl StoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a config from a JSON file; missing keys fall back to defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            QuillError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: StoreConfig = serde_json::from_str(&content).map_err(|e| {
            QuillError::Config(format!("invalid config {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `QUILLBASE_LOG` if set; an unknown level is a `Config` error
    pub fn with_env_overrides(self) -> Result<Self> {
        let level = std::env::var(LOG_ENV_VAR).ok();
        self.with_log_override(level.as_deref())
    }

    fn with_log_override(mut self, level: Option<&str>) -> Result<Self> {
        if let Some(level) = level {
            if LogLevel::parse(level).is_none() {
                return Err(QuillError::Config(format!(
                    "{} names an unknown log level '{}'",
                    LOG_ENV_VAR, level
                )));
            }
            self.log_level = level.to_string();
        }
        Ok(self)
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.operation_timeout_ms = timeout.map(|d| d.as_millis() as u64);
        self
    }

    pub fn with_log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level.as_str().to_string();
        self
    }

    pub fn with_field_validation(mut self, enabled: bool) -> Self {
        self.validate_fields = enabled;
        self
    }

    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout_ms.map(Duration::from_millis)
    }

    pub fn log_level(&self) -> LogLevel {
        LogLevel::parse(&self.log_level).unwrap_or(LogLevel::Warn)
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.is_empty() {
            return Err(QuillError::Config("database name must not be empty".into()));
        }
        if self.collection.is_empty() {
            return Err(QuillError::Config("collection name must not be empty".into()));
        }
        if LogLevel::parse(&self.log_level).is_none() {
            return Err(QuillError::Config(format!(
                "unknown log level '{}'",
                self.log_level
            )));
        }
        if self.operation_timeout_ms == Some(0) {
            return Err(QuillError::Config(
                "operation_timeout_ms must be positive; use null to disable it".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.database, "plp_bookstore");
        assert_eq!(config.collection, "books");
        assert_eq!(config.operation_timeout(), Some(Duration::from_secs(5)));
        assert_eq!(config.log_level(), LogLevel::Warn);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_partial() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"collection": "novels", "log_level": "debug"}}"#).unwrap();

        let config = StoreConfig::from_file(file.path()).unwrap();
        assert_eq!(config.collection, "novels");
        assert_eq!(config.database, "plp_bookstore");
        assert_eq!(config.log_level(), LogLevel::Debug);
    }

    #[test]
    fn test_from_file_rejects_bad_level() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"log_level": "chatty"}}"#).unwrap();

        let err = StoreConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, QuillError::Config(_)));
    }

    #[test]
    fn test_from_missing_file() {
        let err = StoreConfig::from_file("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, QuillError::Config(_)));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = StoreConfig::new().with_timeout(Some(Duration::ZERO));
        assert!(matches!(config.validate(), Err(QuillError::Config(_))));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"operation_timeout_ms": 0}}"#).unwrap();
        assert!(matches!(StoreConfig::from_file(file.path()), Err(QuillError::Config(_))));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"operation_timeout_ms": null}}"#).unwrap();
        assert_eq!(StoreConfig::from_file(file.path()).unwrap().operation_timeout(), None);
    }

    #[test]
    fn test_log_override() {
        let config = StoreConfig::new().with_log_override(Some("trace")).unwrap();
        assert_eq!(config.log_level(), LogLevel::Trace);

        let untouched = StoreConfig::new().with_log_override(None).unwrap();
        assert_eq!(untouched.log_level(), LogLevel::Warn);

        let err = StoreConfig::new().with_log_override(Some("chatty")).unwrap_err();
        assert!(matches!(err, QuillError::Config(msg) if msg.contains("chatty")));
    }

    #[test]
    fn test_builders() {
        let config = StoreConfig::new()
            .with_timeout(None)
            .with_log_level(LogLevel::Trace)
            .with_field_validation(false);
        assert_eq!(config.operation_timeout(), None);
        assert_eq!(config.log_level(), LogLevel::Trace);
        assert!(!config.validate_fields);
    }
}
