use async_trait::async_trait;
use chrono::{DateTime, Utc};
use octocrab::Octocrab;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};
use urlencoding::encode;

use crate::{
    errors::Error,
    models::{
        ChangesetCheckState, ChangesetReviewState, ChangesetState, ChangesetUpdate,
        ExternalChangeset, ExternalEvent, NewChangeset,
    },
    ChangesetSource,
};

#[cfg(test)]
#[path = "github_tests.rs"]
mod tests;

/// The subset of the GitHub pull request payload the campaigns engine reads.
#[derive(Debug, Deserialize)]
struct PullRequestPayload {
    number: u64,
    state: String,
    #[serde(default)]
    merged: Option<bool>,
    #[serde(default)]
    merged_at: Option<DateTime<Utc>>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    body: Option<String>,
    updated_at: DateTime<Utc>,
    head: GitRefPayload,
    base: GitRefPayload,
}

#[derive(Debug, Deserialize)]
struct GitRefPayload {
    #[serde(rename = "ref")]
    ref_name: String,
    sha: String,
}

#[derive(Debug, Deserialize)]
struct ReviewPayload {
    id: u64,
    state: String,
    #[serde(default)]
    submitted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    user: Option<UserPayload>,
}

#[derive(Debug, Deserialize)]
struct UserPayload {
    login: String,
}

#[derive(Debug, Deserialize)]
struct CombinedStatusPayload {
    state: String,
    #[serde(default)]
    total_count: u64,
}

#[derive(Debug, Serialize)]
struct PageParams {
    per_page: u8,
}

/// Creates an `Octocrab` client authenticated with a personal access token.
///
/// # Arguments
///
/// * `token` - The personal access token
/// * `api_url` - An alternative API root (GitHub Enterprise, test servers).
///   `None` uses `https://api.github.com`.
///
/// # Errors
///
/// Returns `Error::AuthError` if the API root is not a valid URI and
/// `Error::ApiError` if the client cannot be built.
#[instrument(skip(token))]
pub fn create_token_client(token: &str, api_url: Option<&str>) -> Result<Octocrab, Error> {
    let mut builder = Octocrab::builder().personal_token(token.to_string());
    if let Some(url) = api_url {
        builder = builder
            .base_uri(url)
            .map_err(|e| Error::AuthError(format!("Invalid GitHub API url '{}': {}", url, e)))?;
    }

    builder.build().map_err(|_| Error::ApiError())
}

fn log_octocrab_error(message: &str, e: &octocrab::Error) {
    match e {
        octocrab::Error::GitHub { source, .. } => error!(
            error_message = source.message,
            status_code = source.status_code.as_u16(),
            "{}. Received an error from GitHub",
            message
        ),
        octocrab::Error::UriParse { source, .. } => error!(
            error_message = source.to_string(),
            "{}. Failed to parse URI.",
            message
        ),
        octocrab::Error::Uri { source, .. } => error!(
            error_message = source.to_string(),
            "{}, Failed to parse URI.",
            message
        ),
        _ => error!(error_message = e.to_string(), message),
    };
}

/// Translates an `octocrab` failure into the code host error taxonomy.
fn map_octocrab_error(
    message: &str,
    e: octocrab::Error,
    repo_owner: &str,
    repo_name: &str,
    external_id: &str,
) -> Error {
    log_octocrab_error(message, &e);

    match &e {
        octocrab::Error::GitHub { source, .. } => match source.status_code.as_u16() {
            404 | 410 => Error::ChangesetNotFound(
                repo_owner.to_string(),
                repo_name.to_string(),
                external_id.to_string(),
            ),
            401 => Error::AuthError(source.message.clone()),
            403 | 429 if source.message.to_lowercase().contains("rate limit") => {
                Error::RateLimitExceeded
            }
            _ => Error::ApiError(),
        },
        _ => Error::InvalidResponse,
    }
}

fn parse_pr_number(external_id: &str) -> Result<u64, Error> {
    external_id
        .parse::<u64>()
        .map_err(|_| Error::InvalidExternalId(external_id.to_string()))
}

fn pull_requests_route(repo_owner: &str, repo_name: &str) -> String {
    format!("/repos/{}/{}/pulls", encode(repo_owner), encode(repo_name))
}

fn changeset_state(pr: &PullRequestPayload) -> ChangesetState {
    if pr.merged.unwrap_or(false) || pr.merged_at.is_some() {
        ChangesetState::Merged
    } else if pr.state == "closed" {
        ChangesetState::Closed
    } else {
        ChangesetState::Open
    }
}

/// Maps a GitHub review state onto the host-neutral review state.
fn review_state(state: &str) -> Option<ChangesetReviewState> {
    match state {
        "APPROVED" => Some(ChangesetReviewState::Approved),
        "CHANGES_REQUESTED" => Some(ChangesetReviewState::ChangesRequested),
        "COMMENTED" => Some(ChangesetReviewState::Commented),
        "DISMISSED" => Some(ChangesetReviewState::Dismissed),
        "PENDING" => Some(ChangesetReviewState::Pending),
        _ => None,
    }
}

/// A [`ChangesetSource`] backed by GitHub pull requests.
///
/// External ids are pull request numbers rendered as strings.
#[derive(Debug)]
pub struct GitHubSource {
    client: Octocrab,
}

impl GitHubSource {
    pub fn new(client: Octocrab) -> Self {
        Self { client }
    }

    async fn fetch_pull_request(
        &self,
        repo_owner: &str,
        repo_name: &str,
        external_id: &str,
    ) -> Result<PullRequestPayload, Error> {
        let number = parse_pr_number(external_id)?;
        let route = format!("{}/{}", pull_requests_route(repo_owner, repo_name), number);

        self.client
            .get(route, None::<&()>)
            .await
            .map_err(|e| {
                map_octocrab_error(
                    "Failed to get pull request information",
                    e,
                    repo_owner,
                    repo_name,
                    external_id,
                )
            })
    }

    async fn fetch_reviews(
        &self,
        repo_owner: &str,
        repo_name: &str,
        number: u64,
    ) -> Result<Vec<ReviewPayload>, Error> {
        let route = format!(
            "{}/{}/reviews",
            pull_requests_route(repo_owner, repo_name),
            number
        );

        let reviews: Vec<ReviewPayload> = self
            .client
            .get(route, Some(&PageParams { per_page: 100 }))
            .await
            .map_err(|e| {
                map_octocrab_error(
                    "Failed to list reviews for pull request",
                    e,
                    repo_owner,
                    repo_name,
                    &number.to_string(),
                )
            })?;

        debug!(
            repository_owner = repo_owner,
            repository = repo_name,
            pull_request = number,
            count = reviews.len(),
            "Fetched pull request reviews",
        );

        Ok(reviews)
    }

    async fn fetch_check_state(
        &self,
        repo_owner: &str,
        repo_name: &str,
        sha: &str,
    ) -> Result<ChangesetCheckState, Error> {
        let route = format!(
            "/repos/{}/{}/commits/{}/status",
            encode(repo_owner),
            encode(repo_name),
            encode(sha)
        );

        match self
            .client
            .get::<CombinedStatusPayload, _, ()>(route, None)
            .await
        {
            Ok(status) => Ok(ChangesetCheckState::from_combined_status(
                &status.state,
                status.total_count,
            )),
            Err(e) => {
                // A missing status is not fatal for the sync, the checks are simply unknown.
                warn!(
                    repository_owner = repo_owner,
                    repository = repo_name,
                    sha,
                    error_message = e.to_string(),
                    "Failed to get combined commit status",
                );
                Ok(ChangesetCheckState::Unknown)
            }
        }
    }

    async fn to_external_changeset(
        &self,
        repo_owner: &str,
        repo_name: &str,
        pr: PullRequestPayload,
    ) -> Result<ExternalChangeset, Error> {
        let reviews = self.fetch_reviews(repo_owner, repo_name, pr.number).await?;
        let check_state = self
            .fetch_check_state(repo_owner, repo_name, &pr.head.sha)
            .await?;

        let review_state = ChangesetReviewState::aggregate(reviews.iter().filter_map(|r| {
            let author = r.user.as_ref().map(|u| u.login.as_str()).unwrap_or("");
            review_state(&r.state).map(|s| (author, s))
        }));

        let events = reviews
            .iter()
            .filter_map(|r| {
                r.submitted_at.map(|submitted_at| ExternalEvent {
                    key: format!("review:{}", r.id),
                    kind: "review".to_string(),
                    created_at: submitted_at,
                    payload: json!({
                        "state": r.state,
                        "author": r.user.as_ref().map(|u| u.login.clone()),
                    }),
                })
            })
            .collect();

        Ok(ExternalChangeset {
            external_id: pr.number.to_string(),
            state: changeset_state(&pr),
            title: pr.title.unwrap_or_default(),
            body: pr.body,
            review_state,
            check_state,
            head_ref: pr.head.ref_name,
            base_ref: pr.base.ref_name,
            updated_at: pr.updated_at,
            events,
        })
    }
}

#[async_trait]
impl ChangesetSource for GitHubSource {
    #[instrument(skip(self))]
    async fn load_changeset(
        &self,
        repo_owner: &str,
        repo_name: &str,
        external_id: &str,
    ) -> Result<ExternalChangeset, Error> {
        let pr = self
            .fetch_pull_request(repo_owner, repo_name, external_id)
            .await?;
        self.to_external_changeset(repo_owner, repo_name, pr).await
    }

    #[instrument(skip(self))]
    async fn create_changeset(
        &self,
        repo_owner: &str,
        repo_name: &str,
        changeset: &NewChangeset,
    ) -> Result<ExternalChangeset, Error> {
        let payload = json!({
            "title": changeset.title,
            "body": changeset.body,
            "head": changeset.head_ref,
            "base": changeset.base_ref,
        });

        let pr: PullRequestPayload = self
            .client
            .post(pull_requests_route(repo_owner, repo_name), Some(&payload))
            .await
            .map_err(|e| {
                log_octocrab_error("Failed to create pull request", &e);
                Error::FailedToUpdateChangeset(format!(
                    "Failed to create pull request from {}",
                    changeset.head_ref
                ))
            })?;

        info!(
            repository_owner = repo_owner,
            repository = repo_name,
            pull_request = pr.number,
            "Created pull request",
        );

        self.to_external_changeset(repo_owner, repo_name, pr).await
    }

    #[instrument(skip(self))]
    async fn update_changeset(
        &self,
        repo_owner: &str,
        repo_name: &str,
        external_id: &str,
        update: &ChangesetUpdate,
    ) -> Result<ExternalChangeset, Error> {
        let number = parse_pr_number(external_id)?;
        let route = format!("{}/{}", pull_requests_route(repo_owner, repo_name), number);

        let mut payload = serde_json::Map::new();
        if let Some(title) = &update.title {
            payload.insert("title".to_string(), json!(title));
        }
        if let Some(body) = &update.body {
            payload.insert("body".to_string(), json!(body));
        }
        if let Some(base_ref) = &update.base_ref {
            payload.insert("base".to_string(), json!(base_ref));
        }

        let pr: PullRequestPayload = self
            .client
            .patch(route, Some(&payload))
            .await
            .map_err(|e| {
                log_octocrab_error("Failed to update pull request", &e);
                Error::FailedToUpdateChangeset(format!(
                    "Failed to update pull request {}",
                    number
                ))
            })?;

        self.to_external_changeset(repo_owner, repo_name, pr).await
    }

    #[instrument(skip(self))]
    async fn close_changeset(
        &self,
        repo_owner: &str,
        repo_name: &str,
        external_id: &str,
    ) -> Result<(), Error> {
        let number = parse_pr_number(external_id)?;
        let route = format!("{}/{}", pull_requests_route(repo_owner, repo_name), number);

        let pr: PullRequestPayload = self
            .client
            .patch(route, Some(&json!({ "state": "closed" })))
            .await
            .map_err(|e| {
                log_octocrab_error("Failed to close pull request", &e);
                Error::FailedToUpdateChangeset(format!("Failed to close pull request {}", number))
            })?;

        info!(
            repository_owner = repo_owner,
            repository = repo_name,
            pull_request = pr.number,
            "Closed pull request",
        );

        Ok(())
    }
}
