use async_trait::async_trait;

pub mod errors;

pub mod github;

pub mod models;
use errors::Error;
use models::{ChangesetUpdate, ExternalChangeset, NewChangeset};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

/// Trait for code hosts that carry changesets (e.g., GitHub pull requests,
/// GitLab merge requests).
///
/// The campaigns engine never treats its own copy of a changeset as the truth:
/// implementations of this trait are the only way state flows in from the
/// host, and the only way campaign decisions (publish, update, close) flow out.
///
/// # Example Implementation
///
/// ```rust,no_run
/// use campaigns_developer_platforms::{ChangesetSource, errors::Error};
/// use campaigns_developer_platforms::models::{ChangesetUpdate, ExternalChangeset, NewChangeset};
/// use async_trait::async_trait;
///
/// #[derive(Debug)]
/// struct GitLabSource {
///     token: String,
/// }
///
/// #[async_trait]
/// impl ChangesetSource for GitLabSource {
///     async fn load_changeset(
///         &self,
///         repo_owner: &str,
///         repo_name: &str,
///         external_id: &str,
///     ) -> Result<ExternalChangeset, Error> {
///         // Fetch the merge request and its approvals/pipelines
///         # unimplemented!()
///     }
///
///     # async fn create_changeset(&self, _: &str, _: &str, _: &NewChangeset) -> Result<ExternalChangeset, Error> { unimplemented!() }
///     # async fn update_changeset(&self, _: &str, _: &str, _: &str, _: &ChangesetUpdate) -> Result<ExternalChangeset, Error> { unimplemented!() }
///     # async fn close_changeset(&self, _: &str, _: &str, _: &str) -> Result<(), Error> { unimplemented!() }
/// }
/// ```
#[async_trait]
pub trait ChangesetSource: Send + Sync {
    /// Retrieves the current state of a changeset from the code host.
    ///
    /// # Arguments
    ///
    /// * `repo_owner` - The owner of the repository
    /// * `repo_name` - The name of the repository
    /// * `external_id` - The host's identifier of the changeset
    ///
    /// # Errors
    ///
    /// Returns `Error::ChangesetNotFound` when the host no longer knows the
    /// changeset.
    async fn load_changeset(
        &self,
        repo_owner: &str,
        repo_name: &str,
        external_id: &str,
    ) -> Result<ExternalChangeset, Error>;

    /// Opens a new changeset on the code host.
    ///
    /// # Arguments
    ///
    /// * `repo_owner` - The owner of the repository
    /// * `repo_name` - The name of the repository
    /// * `changeset` - Title, body and the head/base branches
    ///
    /// # Returns
    ///
    /// The host's view of the freshly created changeset
    async fn create_changeset(
        &self,
        repo_owner: &str,
        repo_name: &str,
        changeset: &NewChangeset,
    ) -> Result<ExternalChangeset, Error>;

    /// Overwrites the given fields of an existing changeset.
    ///
    /// # Arguments
    ///
    /// * `repo_owner` - The owner of the repository
    /// * `repo_name` - The name of the repository
    /// * `external_id` - The host's identifier of the changeset
    /// * `update` - The fields to change
    async fn update_changeset(
        &self,
        repo_owner: &str,
        repo_name: &str,
        external_id: &str,
        update: &ChangesetUpdate,
    ) -> Result<ExternalChangeset, Error>;

    /// Closes a changeset on the code host without merging it.
    ///
    /// # Arguments
    ///
    /// * `repo_owner` - The owner of the repository
    /// * `repo_name` - The name of the repository
    /// * `external_id` - The host's identifier of the changeset
    async fn close_changeset(
        &self,
        repo_owner: &str,
        repo_name: &str,
        external_id: &str,
    ) -> Result<(), Error>;
}
