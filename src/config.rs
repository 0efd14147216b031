//! Host configuration and loader.

use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use echobeats_beats::BeatsConfig;
use echobeats_scheduler::SchedulerConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Environment variable not set: {0}")]
    EnvVarNotSet(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    #[serde(default = "default_level")]
    pub level: String,

    /// Directory for daily-rolling log files. Console only when unset.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            log_dir: None,
        }
    }
}

/// Root configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub beats: BeatsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Configuration loader with environment variable substitution.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<AppConfig, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::load_str(&content)
    }

    /// Load configuration, falling back to defaults when the file is missing.
    ///
    /// The flag is `false` when defaults were used.
    pub fn load_or_default(path: &Path) -> Result<(AppConfig, bool), ConfigError> {
        if !path.exists() {
            return Ok((Self::expand_paths(AppConfig::default()), false));
        }
        Ok((Self::load(path)?, true))
    }

    /// Load configuration from a string.
    pub fn load_str(content: &str) -> Result<AppConfig, ConfigError> {
        let expanded = Self::expand_env_vars(content)?;
        let config: AppConfig = toml::from_str(&expanded)?;
        Ok(Self::expand_paths(config))
    }

    /// Expand environment variables in the format `${VAR}`.
    fn expand_env_vars(content: &str) -> Result<String, ConfigError> {
        let mut result = content.to_string();
        let re = Regex::new(r"\$\{([^}]+)\}")?;

        for cap in re.captures_iter(content) {
            let var_name = &cap[1];
            let var_value = std::env::var(var_name)
                .map_err(|_| ConfigError::EnvVarNotSet(var_name.to_string()))?;
            result = result.replace(&cap[0], &var_value);
        }

        Ok(result)
    }

    fn expand_paths(mut config: AppConfig) -> AppConfig {
        config.scheduler.store_path = Self::expand_path_buf(&config.scheduler.store_path);
        config.logging.log_dir = config.logging.log_dir.map(|dir| Self::expand_path_buf(&dir));
        config
    }

    fn expand_path_buf(path: &Path) -> PathBuf {
        PathBuf::from(Self::expand_path(&path.to_string_lossy()))
    }

    /// Expand shell-style paths (e.g., `~/.echobeats`).
    pub fn expand_path(path: &str) -> String {
        shellexpand::tilde(path).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_empty_config() {
        let config = ConfigLoader::load_str("").unwrap();
        assert_eq!(config.scheduler.tick_interval_ms, 1000);
        assert_eq!(config.scheduler.max_consecutive_failures, 3);
        assert_eq!(config.logging.level, "info");
        assert!(config.beats.cognitive_beat.enabled);
    }

    #[test]
    fn test_load_full_config() {
        let content = r#"
            [scheduler]
            store_path = "/var/lib/echobeats/jobs"
            tick_interval_ms = 250
            execution_timeout_secs = 30
            max_concurrent_jobs = 4

            [beats.wisdom_cultivation]
            enabled = false
            interval_secs = 1800

            [logging]
            level = "debug"
            log_dir = "/var/log/echobeats"
        "#;
        let config = ConfigLoader::load_str(content).unwrap();

        assert_eq!(config.scheduler.store_path, PathBuf::from("/var/lib/echobeats/jobs"));
        assert_eq!(config.scheduler.tick_interval(), Duration::from_millis(250));
        assert_eq!(config.scheduler.max_concurrent_jobs, 4);
        assert_eq!(config.scheduler.retry_backoff_secs, 60);
        assert!(!config.beats.wisdom_cultivation.enabled);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.log_dir, Some(PathBuf::from("/var/log/echobeats")));
    }

    #[test]
    fn test_bundled_config_parses() {
        let config = ConfigLoader::load_str(include_str!("../config/echobeats.toml")).unwrap();
        assert_eq!(config.beats.enabled_beats().len(), 5);
        assert!(config.logging.log_dir.is_none());
    }

    #[test]
    fn test_store_path_tilde_expanded() {
        let config =
            ConfigLoader::load_str("[scheduler]\nstore_path = \"~/.echobeats/jobs\"").unwrap();
        assert!(!config.scheduler.store_path.to_string_lossy().starts_with('~'));
        assert!(config.scheduler.store_path.ends_with(".echobeats/jobs"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[scheduler]").unwrap();
        writeln!(file, "retry_backoff_secs = 5").unwrap();

        let (config, found) = ConfigLoader::load_or_default(file.path()).unwrap();
        assert!(found);
        assert_eq!(config.scheduler.retry_backoff_secs, 5);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let missing = Path::new("/nonexistent/echobeats.toml");
        let (config, found) = ConfigLoader::load_or_default(missing).unwrap();
        assert!(!found);
        assert_eq!(config.scheduler.execution_timeout_secs, 300);
        assert!(ConfigLoader::load(missing).is_err());
    }

    #[test]
    fn test_load_invalid_toml() {
        let result = ConfigLoader::load_str("[scheduler\ntick_interval_ms = ");
        assert!(matches!(result, Err(ConfigError::TomlParse(_))));
    }

    #[test]
    fn test_expand_env_vars() {
        // SAFETY: unique test-only variable
        unsafe {
            std::env::set_var("ECHOBEATS_TEST_STORE", "/srv/echobeats");
        }
        let content = "[scheduler]\nstore_path = \"${ECHOBEATS_TEST_STORE}/jobs\"";
        let config = ConfigLoader::load_str(content).unwrap();
        assert_eq!(config.scheduler.store_path, PathBuf::from("/srv/echobeats/jobs"));
        unsafe {
            std::env::remove_var("ECHOBEATS_TEST_STORE");
        }
    }

    #[test]
    fn test_expand_env_vars_not_set() {
        let result = ConfigLoader::load_str("[logging]\nlevel = \"${ECHOBEATS_UNSET_VAR_12345}\"");
        assert!(matches!(
            result,
            Err(ConfigError::EnvVarNotSet(name)) if name == "ECHOBEATS_UNSET_VAR_12345"
        ));
    }
}
