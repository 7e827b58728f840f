//! Configuration file management.

use std::fs;
use std::path::{Path, PathBuf};

use fleetsync_core::{SyncConfig, ValidationError};
use serde::{Deserialize, Serialize};

/// Environment variable that overrides `cloud.api_token`.
pub const TOKEN_ENV: &str = "FLEETSYNC_TOKEN";

/// Error type for configuration operations.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    Read(std::io::Error),
    /// Failed to parse the TOML.
    Parse(toml::de::Error),
    /// Failed to serialize the configuration.
    Serialize(toml::ser::Error),
    /// Failed to write the configuration file.
    Write(std::io::Error),
    /// The configuration has invalid values.
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read(e) => write!(f, "Failed to read config: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
            ConfigError::Serialize(e) => write!(f, "Failed to serialize config: {}", e),
            ConfigError::Write(e) => write!(f, "Failed to write config: {}", e),
            ConfigError::Validation(errors) => {
                writeln!(f, "Configuration validation failed:")?;
                for error in errors {
                    writeln!(f, "  - {}", error)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Configuration file structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Cloud endpoint and credentials.
    #[serde(default)]
    pub cloud: CloudConfig,

    /// Local database and picture cache locations.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Sync engine settings.
    #[serde(default)]
    pub sync: SyncConfig,
}

/// Cloud connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudConfig {
    /// Base URL of the cloud API.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Bearer token. `FLEETSYNC_TOKEN` takes precedence when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_token: None,
        }
    }
}

fn default_base_url() -> String {
    "https://cloud.fleetsync.dev/api".to_string()
}

/// Storage locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database.
    #[serde(default = "fleetsync_store::default_db_path")]
    pub path: PathBuf,

    /// Directory for downloaded sensor pictures. Pictures are not fetched when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pictures_dir: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: fleetsync_store::default_db_path(),
            pictures_dir: None,
        }
    }
}

impl Config {
    /// Get the default config file path
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("fleetsync")
            .join("config.toml")
    }

    /// Load config from a file, or return the default if it does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).map_err(ConfigError::Read)?;
        toml::from_str(&content).map_err(ConfigError::Parse)
    }

    /// Load config and validate it.
    pub fn load_validated(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to a file, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(ConfigError::Write)?;
        }
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        fs::write(path, content).map_err(ConfigError::Write)
    }

    /// Validate the configuration, collecting every problem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        let url = self.cloud.base_url.trim();
        if url.is_empty() {
            errors.push(field_error("cloud.base_url", "must not be empty"));
        } else if !url.starts_with("http://") && !url.starts_with("https://") {
            errors.push(field_error(
                "cloud.base_url",
                format!("'{}' must start with http:// or https://", url),
            ));
        }

        if self.storage.path.as_os_str().is_empty() {
            errors.push(field_error("storage.path", "must not be empty"));
        }

        errors.extend(self.sync.validate("sync"));

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// The API token, preferring the environment over the file.
    pub fn api_token(&self) -> Option<String> {
        token_from(std::env::var(TOKEN_ENV).ok(), self.cloud.api_token.as_deref())
    }
}

fn token_from(env: Option<String>, file: Option<&str>) -> Option<String> {
    env.filter(|t| !t.trim().is_empty())
        .or_else(|| file.map(str::to_string))
        .filter(|t| !t.trim().is_empty())
}

fn field_error(field: &str, message: impl Into<String>) -> ValidationError {
    ValidationError {
        field: field.to_string(),
        message: message.into(),
    }
}
