use campaigns_developer_platforms::errors::Error as PlatformError;
use thiserror::Error;

use crate::diff::DiffParseError;
use crate::models::ChangesetId;
use crate::store::StoreError;

#[cfg(test)]
#[path = "errors_tests.rs"]
mod tests;

/// Errors returned by the campaigns engine.
///
/// Authorization and validation failures are produced at the request boundary
/// and are returned unchanged. Failures of the collaborators (store, code host)
/// are wrapped with the name of the operation that hit them and keep the
/// original error as their source.
#[derive(Error, Debug)]
pub enum CampaignsError {
    #[error("campaigns and changesets are not available on this instance")]
    Unavailable,

    #[error("Must be authenticated")]
    NotAuthenticated,

    #[error("Must be site admin")]
    MustBeSiteAdmin,

    #[error("Insufficient authorization: {0}")]
    Unauthorized(String),

    #[error("invalid node id")]
    IdIsZero,

    #[error("Invalid id '{token}': {reason}")]
    InvalidId { token: String, reason: String },

    /// Both the zero id and ids without a stored changeset end up here, so a
    /// caller cannot tell the two apart.
    #[error("invalid changeset id: {0}")]
    UnknownChangeset(ChangesetId),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Failed to parse diff: {0}")]
    DiffParse(#[from] DiffParseError),

    #[error("Data integrity failure: {0}")]
    Integrity(String),

    #[error("Store operation '{operation}' failed")]
    Store {
        operation: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("Code host operation '{operation}' failed")]
    CodeHost {
        operation: &'static str,
        #[source]
        source: PlatformError,
    },

    #[error("The changeset sync queue is not running")]
    QueueClosed,

    #[error("The request was cancelled")]
    Cancelled,
}

impl CampaignsError {
    /// Returns a closure wrapping a store failure with the operation name.
    pub(crate) fn store(operation: &'static str) -> impl FnOnce(StoreError) -> CampaignsError {
        move |source| CampaignsError::Store { operation, source }
    }

    /// Returns a closure wrapping a code host failure with the operation name.
    pub(crate) fn code_host(
        operation: &'static str,
    ) -> impl FnOnce(PlatformError) -> CampaignsError {
        move |source| CampaignsError::CodeHost { operation, source }
    }

    /// Whether the error was caused by the caller's input or privileges
    /// rather than by a collaborator or a defect.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            CampaignsError::NotAuthenticated
                | CampaignsError::MustBeSiteAdmin
                | CampaignsError::Unauthorized(_)
                | CampaignsError::IdIsZero
                | CampaignsError::InvalidId { .. }
                | CampaignsError::UnknownChangeset(_)
                | CampaignsError::Validation(_)
        )
    }
}

/// Errors raised while loading configuration files.
#[derive(Error, Debug)]
pub enum ConfigLoadError {
    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
