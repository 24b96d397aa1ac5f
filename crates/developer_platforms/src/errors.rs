#[cfg(test)]
#[path = "errors_tests.rs"]
mod tests;

/// Error types for code host operations.
///
/// This enum represents all possible errors that can occur when interacting
/// with code hosts like GitHub. Each variant provides specific context about
/// the type of failure encountered so that the campaigns core can decide
/// whether an item should be retried, marked as deleted or reported.
///
/// # Examples
///
/// ```rust
/// use campaigns_developer_platforms::errors::Error;
///
/// let auth_error = Error::AuthError("Invalid token".to_string());
/// println!("{}", auth_error);
///
/// let rate_limit = Error::RateLimitExceeded;
/// assert_eq!(rate_limit.to_string(), "Rate limit exceeded");
/// ```
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Generic API request failure.
    ///
    /// Used as a fallback when the host did not report anything more specific.
    #[error("API request failed")]
    ApiError(),

    /// Authentication failed with the code host.
    ///
    /// The string parameter contains additional details about the failure,
    /// e.g. an unparsable token or a rejected credential.
    #[error("Authentication failed: {0}")]
    AuthError(String),

    /// The changeset no longer exists on the code host.
    ///
    /// Parameters: repository owner, repository name, external id
    #[error("Changeset {2} was not found in repository: {0}/{1}")]
    ChangesetNotFound(String, String, String),

    /// Failed to update a changeset on the code host.
    ///
    /// The string parameter contains specific details about what operation failed.
    #[error("Failed to update the changeset: {0}")]
    FailedToUpdateChangeset(String),

    /// The external id does not identify a changeset on this code host.
    #[error("Invalid external changeset id: '{0}'")]
    InvalidExternalId(String),

    /// Invalid response format from the code host API.
    ///
    /// This could happen due to API version changes, malformed JSON or missing
    /// fields in the response.
    #[error("Invalid response format")]
    InvalidResponse,

    /// Code host rate limit exceeded.
    ///
    /// The sync worker leaves the item eligible for the next scheduling pass.
    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    /// A host string did not match any value of a fixed state set.
    ///
    /// Parameters: the kind of state, the rejected value
    #[error("Unknown {0} value: '{1}'")]
    UnknownState(&'static str, String),
}
