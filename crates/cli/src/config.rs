use std::{
    fs,
    path::{Path, PathBuf},
};

use campaigns_core::config::CampaignsConfig;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::CliError;

/// Default configuration file name
pub const DEFAULT_CONFIG_FILENAME: &str = ".campaigns.toml";

/// Environment variable holding the GitHub token when none is configured
pub const DEFAULT_TOKEN_ENV: &str = "GITHUB_TOKEN";

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

/// Configuration for the campaigns CLI
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Code host connection settings
    #[serde(default)]
    pub github: GitHubConfig,

    /// Settings of the campaigns engine
    #[serde(default)]
    pub campaigns: CampaignsConfig,
}

impl AppConfig {
    /// Load configuration from the specified file
    pub fn load(path: &Path) -> Result<Self, CliError> {
        debug!("Loading configuration from {:?}", path);

        if !path.exists() {
            return Err(CliError::ConfigError(format!(
                "Configuration file not found: {:?}",
                path
            )));
        }

        let content = fs::read_to_string(path).map_err(|e| {
            CliError::ConfigError(format!("Failed to read configuration file: {}", e))
        })?;

        let config: AppConfig = toml::from_str(&content).map_err(|e| {
            CliError::ConfigError(format!("Failed to parse configuration file: {}", e))
        })?;
        config.campaigns.validate()?;

        Ok(config)
    }

    /// Load the configuration file if there is one, the defaults otherwise
    pub fn load_or_default(path: &Path) -> Result<Self, CliError> {
        if path.exists() {
            Self::load(path)
        } else {
            debug!("No configuration at {:?}, using defaults", path);
            Ok(Self::default())
        }
    }

    /// Save configuration to the specified file
    pub fn save(&self, path: &Path) -> Result<(), CliError> {
        debug!("Saving configuration to {:?}", path);

        let content = toml::to_string_pretty(self).map_err(|e| {
            CliError::ConfigError(format!("Failed to serialize configuration: {}", e))
        })?;

        // Create parent directories if they don't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                CliError::ConfigError(format!("Failed to create directory: {}", e))
            })?;
        }

        fs::write(path, content).map_err(|e| {
            CliError::ConfigError(format!("Failed to write configuration file: {}", e))
        })?;

        info!("Configuration saved to {:?}", path);
        Ok(())
    }
}

/// Settings for reaching GitHub
#[derive(Debug, Serialize, Deserialize)]
pub struct GitHubConfig {
    /// API root for GitHub Enterprise installations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    /// Name of the environment variable that holds the access token
    #[serde(default = "GitHubConfig::default_token_env")]
    pub token_env: String,
}

impl GitHubConfig {
    fn default_token_env() -> String {
        DEFAULT_TOKEN_ENV.to_string()
    }

    /// Reads the access token from the configured environment variable
    pub fn token(&self) -> Result<String, CliError> {
        match std::env::var(&self.token_env) {
            Ok(token) if !token.trim().is_empty() => Ok(token),
            _ => Err(CliError::AuthError(format!(
                "No GitHub token found in environment variable {}",
                self.token_env
            ))),
        }
    }
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            token_env: GitHubConfig::default_token_env(),
        }
    }
}

/// Get the path to the configuration file
pub fn get_config_path(config_path: Option<&str>) -> PathBuf {
    if let Some(path) = config_path {
        PathBuf::from(path)
    } else {
        // Look for config in current directory
        let current_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        current_dir.join(DEFAULT_CONFIG_FILENAME)
    }
}
