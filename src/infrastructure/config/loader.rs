//! Hierarchical configuration loading.

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;

use crate::domain::models::Config;

/// Configuration loader with hierarchical merging.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging.
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .levers/config.yaml (project config)
    /// 3. .levers/local.yaml (local overrides, optional)
    /// 4. Environment variables (LEVERS_* prefix, highest priority)
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".levers/config.yaml"))
            .merge(Yaml::file(".levers/local.yaml"))
            .merge(Env::prefixed("LEVERS_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    fn validate(config: &Config) -> Result<()> {
        anyhow::ensure!(!config.database.path.is_empty(), "database path cannot be empty");
        anyhow::ensure!(
            config.database.max_connections >= 1,
            "database max_connections must be at least 1"
        );
        anyhow::ensure!(
            matches!(config.logging.level.as_str(), "trace" | "debug" | "info" | "warn" | "error"),
            "invalid log level: {}",
            config.logging.level
        );
        anyhow::ensure!(
            matches!(config.logging.format.as_str(), "json" | "pretty"),
            "invalid log format: {}",
            config.logging.format
        );
        anyhow::ensure!(
            config.serve.policy_deadline_ms > 0
                && config.serve.policy_deadline_ms <= config.serve.total_deadline_ms,
            "policy deadline must be positive and within the total deadline"
        );
        anyhow::ensure!(
            config.serve.cache_ttl_secs <= 60,
            "cache TTL must not exceed 60s (bounded staleness)"
        );
        anyhow::ensure!(config.attribution.max_attempts >= 1, "max_attempts must be at least 1");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Config;

    #[test]
    fn test_defaults_pass_validation() {
        let config = Config::default();
        assert!(ConfigLoader::validate(&config).is_ok());
    }

    #[test]
    fn test_oversized_cache_ttl_rejected() {
        let mut config = Config::default();
        config.serve.cache_ttl_secs = 3600;
        assert!(ConfigLoader::validate(&config).is_err());
    }

    #[test]
    fn test_bad_log_level_rejected() {
        let mut config = Config::default();
        config.logging.level = "loud".to_string();
        assert!(ConfigLoader::validate(&config).is_err());
    }
}
