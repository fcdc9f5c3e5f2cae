use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Top-level application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ReportflowConfig {
    pub ingestion: IngestionConfig,
    pub retry: RetrySettings,
    pub database: DatabaseConfig,
}

/// Ingestion pipeline knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestionConfig {
    /// Hard cap on attachment size in bytes.
    pub max_file_size: u64,
    /// Days a seen digest keeps blocking identical content.
    pub dedup_window_days: i64,
    /// Whether duplicate checking is on by default for new requests.
    pub check_duplicates: bool,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            max_file_size: 50 * 1024 * 1024,
            dedup_window_days: 60,
            check_duplicates: true,
        }
    }
}

/// Retry executor defaults; individual call sites may override.
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySettings {
    pub retries: u32,
    pub initial_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            retries: 3,
            initial_delay_ms: 1000,
            backoff_factor: 2.0,
            max_delay_ms: 30_000,
            jitter: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl ReportflowConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_env("REPORTFLOW")
    }

    /// Load configuration from environment with a custom prefix.
    pub fn load_from_env(prefix: &str) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(
                Environment::with_prefix(prefix)
                    .separator("__")
                    .try_parsing(true),
            )
            .set_default("ingestion.max_file_size", 50 * 1024 * 1024)?
            .set_default("ingestion.dedup_window_days", 60)?
            .set_default("ingestion.check_duplicates", true)?
            .set_default("retry.retries", 3)?
            .set_default("retry.initial_delay_ms", 1000)?
            .set_default("retry.backoff_factor", 2.0)?
            .set_default("retry.max_delay_ms", 30_000)?
            .set_default("retry.jitter", true)?
            .set_default("database.url", "postgres://localhost/reportflow")?
            .set_default("database.max_connections", 10)?;

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load configuration from a file with environment overrides.
    pub fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("REPORTFLOW").separator("__"));

        let config = builder.build()?;
        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_load_without_env() {
        let config = ReportflowConfig::load_from_env("REPORTFLOW_TEST_UNSET").unwrap();
        assert_eq!(config.ingestion.dedup_window_days, 60);
        assert_eq!(config.retry.retries, 3);
        assert_eq!(config.retry.initial_delay_ms, 1000);
        assert!(config.retry.jitter);
        assert_eq!(config.database.max_connections, 10);
    }

    #[test]
    fn test_struct_defaults_match_env_defaults() {
        let loaded = ReportflowConfig::load_from_env("REPORTFLOW_TEST_UNSET").unwrap();
        let ingestion = IngestionConfig::default();
        let retry = RetrySettings::default();
        assert_eq!(loaded.ingestion.max_file_size, ingestion.max_file_size);
        assert_eq!(loaded.retry.max_delay_ms, retry.max_delay_ms);
        assert_eq!(loaded.retry.backoff_factor, retry.backoff_factor);
    }
}
