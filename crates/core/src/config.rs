//! Configuration settings for the campaigns engine.
//!
//! Every field has a default so an empty file, or no file at all, yields a
//! working configuration.
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::errors::ConfigLoadError;

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

/// Shortest delay between two syncs of the same changeset
pub const DEFAULT_MIN_SYNC_DELAY_SECONDS: u64 = 2 * 60;

/// Longest delay between two syncs of the same changeset
pub const DEFAULT_MAX_SYNC_DELAY_SECONDS: u64 = 8 * 60 * 60;

/// How often the worker looks for changesets that are due
pub const DEFAULT_SCHEDULE_INTERVAL_SECONDS: u64 = 30;

/// How long an unapplied patch set stays usable
pub const DEFAULT_PATCH_SET_EXPIRY_HOURS: u64 = 7 * 24;

/// Top-level configuration of the campaigns engine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CampaignsConfig {
    /// When false the engine is not constructed and every operation reports
    /// that campaigns are unavailable
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Lets users without site admin privileges read campaigns
    #[serde(default)]
    pub read_access_enabled: bool,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub patch_sets: PatchSetConfig,
}

impl Default for CampaignsConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            read_access_enabled: false,
            sync: SyncConfig::default(),
            patch_sets: PatchSetConfig::default(),
        }
    }
}

impl CampaignsConfig {
    /// Checks the relationships between fields that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        let sync = &self.sync;
        if sync.min_sync_delay_seconds == 0 {
            return Err(ConfigLoadError::Invalid(
                "min_sync_delay_seconds must be positive".to_string(),
            ));
        }
        if sync.max_sync_delay_seconds < sync.min_sync_delay_seconds {
            return Err(ConfigLoadError::Invalid(format!(
                "max_sync_delay_seconds ({}) is smaller than min_sync_delay_seconds ({})",
                sync.max_sync_delay_seconds, sync.min_sync_delay_seconds
            )));
        }
        if sync.schedule_interval_seconds == 0 {
            return Err(ConfigLoadError::Invalid(
                "schedule_interval_seconds must be positive".to_string(),
            ));
        }
        if self.patch_sets.expiry_hours == 0 {
            return Err(ConfigLoadError::Invalid(
                "patch_sets.expiry_hours must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Background synchronization settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncConfig {
    #[serde(default = "default_min_sync_delay_seconds")]
    pub min_sync_delay_seconds: u64,

    #[serde(default = "default_max_sync_delay_seconds")]
    pub max_sync_delay_seconds: u64,

    #[serde(default = "default_schedule_interval_seconds")]
    pub schedule_interval_seconds: u64,
}

impl SyncConfig {
    pub fn min_sync_delay(&self) -> Duration {
        seconds(self.min_sync_delay_seconds)
    }

    pub fn max_sync_delay(&self) -> Duration {
        seconds(self.max_sync_delay_seconds)
    }

    pub fn schedule_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.schedule_interval_seconds)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            min_sync_delay_seconds: default_min_sync_delay_seconds(),
            max_sync_delay_seconds: default_max_sync_delay_seconds(),
            schedule_interval_seconds: default_schedule_interval_seconds(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PatchSetConfig {
    #[serde(default = "default_patch_set_expiry_hours")]
    pub expiry_hours: u64,
}

impl PatchSetConfig {
    pub fn expiry(&self) -> Duration {
        seconds(self.expiry_hours.saturating_mul(3600))
    }
}

impl Default for PatchSetConfig {
    fn default() -> Self {
        Self {
            expiry_hours: default_patch_set_expiry_hours(),
        }
    }
}

// chrono panics past i64::MAX milliseconds.
fn seconds(value: u64) -> Duration {
    let max = (i64::MAX / 1000) as u64;
    Duration::seconds(value.min(max) as i64)
}

fn default_enabled() -> bool {
    true
}

fn default_min_sync_delay_seconds() -> u64 {
    DEFAULT_MIN_SYNC_DELAY_SECONDS
}

fn default_max_sync_delay_seconds() -> u64 {
    DEFAULT_MAX_SYNC_DELAY_SECONDS
}

fn default_schedule_interval_seconds() -> u64 {
    DEFAULT_SCHEDULE_INTERVAL_SECONDS
}

fn default_patch_set_expiry_hours() -> u64 {
    DEFAULT_PATCH_SET_EXPIRY_HOURS
}

/// Parses a configuration from TOML text and validates it.
pub fn parse_campaigns_config(content: &str) -> Result<CampaignsConfig, ConfigLoadError> {
    let config: CampaignsConfig =
        toml::from_str(content).map_err(|e| ConfigLoadError::Parse(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

/// Loads the campaigns configuration from the given path.
///
/// # Arguments
/// * `path` - Path to the configuration file
///
/// # Returns
/// * `Ok(CampaignsConfig)` if loaded and valid
/// * `Err(ConfigLoadError)` if the file cannot be read, parsed or validated
pub fn load_campaigns_config<P: AsRef<Path>>(path: P) -> Result<CampaignsConfig, ConfigLoadError> {
    let content = fs::read_to_string(path.as_ref())?;
    parse_campaigns_config(&content)
}
