use campaigns_core::errors::{CampaignsError, ConfigLoadError};
use campaigns_developer_platforms::errors::Error as PlatformError;
use thiserror::Error;

#[cfg(test)]
#[path = "errors_tests.rs"]
mod tests;

/// CLI-specific errors
#[derive(Error, Debug)]
pub enum CliError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Authentication error
    #[error("Authentication error: {0}")]
    AuthError(String),

    /// Network error
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Invalid arguments
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// Reading or writing a local file failed
    #[error("I/O error: {0}")]
    IoError(String),

    /// Some changesets could not be synchronized
    #[error("Sync failed: {0}")]
    SyncFailed(String),

    /// Other errors
    #[error("Error: {0}")]
    Other(String),
}

impl From<anyhow::Error> for CliError {
    fn from(err: anyhow::Error) -> Self {
        CliError::Other(err.to_string())
    }
}

impl From<ConfigLoadError> for CliError {
    fn from(err: ConfigLoadError) -> Self {
        CliError::ConfigError(err.to_string())
    }
}

impl From<CampaignsError> for CliError {
    fn from(err: CampaignsError) -> Self {
        match err {
            CampaignsError::Unavailable => CliError::ConfigError(err.to_string()),
            CampaignsError::Validation(_) => CliError::ConfigError(err.to_string()),
            CampaignsError::InvalidId { .. } | CampaignsError::IdIsZero => {
                CliError::InvalidArguments(err.to_string())
            }
            CampaignsError::CodeHost {
                source: PlatformError::AuthError(_),
                ..
            } => CliError::AuthError(err.to_string()),
            CampaignsError::CodeHost { .. } => CliError::NetworkError(err.to_string()),
            other => CliError::Other(other.to_string()),
        }
    }
}

impl std::process::Termination for CliError {
    fn report(self) -> std::process::ExitCode {
        match self {
            CliError::ConfigError(_) => std::process::ExitCode::from(2),
            CliError::AuthError(_) => std::process::ExitCode::from(3),
            CliError::NetworkError(_) => std::process::ExitCode::from(4),
            CliError::InvalidArguments(_) => std::process::ExitCode::from(5),
            CliError::IoError(_) => std::process::ExitCode::from(6),
            CliError::SyncFailed(_) => std::process::ExitCode::from(1),
            CliError::Other(_) => std::process::ExitCode::FAILURE,
        }
    }
}
