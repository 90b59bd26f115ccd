//! Engine configuration.
//!
//! Supports YAML file and environment variable overrides.

use serde::Deserialize;
use std::path::Path;

/// Engine configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Referral program tunables.
    pub referral: ReferralConfig,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage type (memory, sqlite, postgres).
    #[serde(rename = "type")]
    pub storage_type: String,
    /// Database path or connection URL.
    pub url: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_type: "sqlite".to_string(),
            url: "./data/affiliates.db".to_string(),
        }
    }
}

/// Referral program tunables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReferralConfig {
    /// Length of generated referral codes.
    pub code_length: u32,
    /// Collision retry budget for code generation.
    pub code_retries: u32,
    /// Depth limit for downline statistics traversal.
    pub downline_depth: u32,
}

impl Default for ReferralConfig {
    fn default() -> Self {
        Self {
            code_length: 8,
            code_retries: 5,
            downline_depth: 10,
        }
    }
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. Config file
    /// 3. Defaults
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("AFFILIATE_CONFIG").unwrap_or_else(|_| "config.yaml".to_string());

        let mut config = if Path::new(&config_path).exists() {
            Self::from_file(&config_path)?
        } else {
            Self::default()
        };

        config.apply_env_overrides();

        Ok(config)
    }

    /// Load configuration from a YAML file.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(path.to_string(), e.to_string()))?;

        serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(storage_type) = std::env::var("STORAGE_TYPE") {
            self.storage.storage_type = storage_type;
        }

        if let Ok(url) = std::env::var("STORAGE_URL") {
            self.storage.url = url;
        }

        if let Ok(length) = std::env::var("REFERRAL_CODE_LENGTH") {
            if let Ok(l) = length.parse() {
                self.referral.code_length = l;
            }
        }

        if let Ok(depth) = std::env::var("DOWNLINE_DEPTH") {
            if let Ok(d) = depth.parse() {
                self.referral.downline_depth = d;
            }
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{0}': {1}")]
    FileRead(String, String),

    #[error("Failed to parse config: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.storage.storage_type, "sqlite");
        assert_eq!(config.storage.url, "./data/affiliates.db");
        assert_eq!(config.referral.code_length, 8);
        assert_eq!(config.referral.downline_depth, 10);
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
storage:
  type: postgres
  url: postgres://localhost/affiliates

referral:
  code_length: 10
  code_retries: 3
  downline_depth: 6
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.storage.storage_type, "postgres");
        assert_eq!(config.storage.url, "postgres://localhost/affiliates");
        assert_eq!(config.referral.code_length, 10);
        assert_eq!(config.referral.code_retries, 3);
        assert_eq!(config.referral.downline_depth, 6);
    }
}
