//! # Models
//!
//! This module contains the data models exchanged with code hosts.
//!
//! The state enums are host-neutral: every code host maps its own vocabulary
//! onto the fixed sets below, and strings arriving from outside (query
//! arguments, stored rows, host payloads) are validated with [`std::str::FromStr`].

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::Error;

#[cfg(test)]
#[path = "models_tests.rs"]
mod tests;

/// The lifecycle state of a changeset on its code host.
///
/// # Examples
///
/// ```
/// use campaigns_developer_platforms::models::ChangesetState;
///
/// let state: ChangesetState = "MERGED".parse().unwrap();
/// assert_eq!(state, ChangesetState::Merged);
/// assert!("REOPENED".parse::<ChangesetState>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangesetState {
    /// The changeset is open for review
    Open,
    /// The changeset was closed without merging
    Closed,
    /// The changeset was merged
    Merged,
    /// The changeset no longer exists on the code host
    Deleted,
}

impl ChangesetState {
    /// All values, in declaration order.
    pub const ALL: [ChangesetState; 4] = [
        ChangesetState::Open,
        ChangesetState::Closed,
        ChangesetState::Merged,
        ChangesetState::Deleted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChangesetState::Open => "OPEN",
            ChangesetState::Closed => "CLOSED",
            ChangesetState::Merged => "MERGED",
            ChangesetState::Deleted => "DELETED",
        }
    }
}

impl fmt::Display for ChangesetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangesetState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChangesetState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| Error::UnknownState("changeset state", s.to_string()))
    }
}

/// The aggregated review state of a changeset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangesetReviewState {
    Approved,
    ChangesRequested,
    Pending,
    Commented,
    Dismissed,
}

impl ChangesetReviewState {
    pub const ALL: [ChangesetReviewState; 5] = [
        ChangesetReviewState::Approved,
        ChangesetReviewState::ChangesRequested,
        ChangesetReviewState::Pending,
        ChangesetReviewState::Commented,
        ChangesetReviewState::Dismissed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChangesetReviewState::Approved => "APPROVED",
            ChangesetReviewState::ChangesRequested => "CHANGES_REQUESTED",
            ChangesetReviewState::Pending => "PENDING",
            ChangesetReviewState::Commented => "COMMENTED",
            ChangesetReviewState::Dismissed => "DISMISSED",
        }
    }

    /// Reduces individual reviews to one state for the changeset.
    ///
    /// Only the latest decisive review (approved, changes requested, dismissed)
    /// of each reviewer counts. Any outstanding change request wins over
    /// approvals. Without decisive reviews a changeset with comments is
    /// `Commented`, otherwise `Pending`.
    ///
    /// `reviews` must be in chronological order.
    ///
    /// # Examples
    ///
    /// ```
    /// use campaigns_developer_platforms::models::ChangesetReviewState;
    ///
    /// let state = ChangesetReviewState::aggregate([
    ///     ("alice", ChangesetReviewState::ChangesRequested),
    ///     ("alice", ChangesetReviewState::Approved),
    ///     ("bob", ChangesetReviewState::Commented),
    /// ]);
    /// assert_eq!(state, ChangesetReviewState::Approved);
    /// ```
    pub fn aggregate<'a, I>(reviews: I) -> ChangesetReviewState
    where
        I: IntoIterator<Item = (&'a str, ChangesetReviewState)>,
    {
        let mut latest: Vec<(&'a str, ChangesetReviewState)> = Vec::new();
        let mut commented = false;

        for (author, state) in reviews {
            match state {
                ChangesetReviewState::Approved
                | ChangesetReviewState::ChangesRequested
                | ChangesetReviewState::Dismissed => {
                    match latest.iter_mut().find(|(a, _)| *a == author) {
                        Some(entry) => entry.1 = state,
                        None => latest.push((author, state)),
                    }
                }
                ChangesetReviewState::Commented => commented = true,
                ChangesetReviewState::Pending => {}
            }
        }

        let has = |wanted: ChangesetReviewState| latest.iter().any(|(_, s)| *s == wanted);
        if has(ChangesetReviewState::ChangesRequested) {
            ChangesetReviewState::ChangesRequested
        } else if has(ChangesetReviewState::Approved) {
            ChangesetReviewState::Approved
        } else if has(ChangesetReviewState::Dismissed) {
            ChangesetReviewState::Dismissed
        } else if commented {
            ChangesetReviewState::Commented
        } else {
            ChangesetReviewState::Pending
        }
    }
}

impl fmt::Display for ChangesetReviewState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangesetReviewState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChangesetReviewState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| Error::UnknownState("changeset review state", s.to_string()))
    }
}

/// The combined CI state of the changeset head commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangesetCheckState {
    Unknown,
    Pending,
    Passed,
    Failed,
}

impl ChangesetCheckState {
    pub const ALL: [ChangesetCheckState; 4] = [
        ChangesetCheckState::Unknown,
        ChangesetCheckState::Pending,
        ChangesetCheckState::Passed,
        ChangesetCheckState::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChangesetCheckState::Unknown => "UNKNOWN",
            ChangesetCheckState::Pending => "PENDING",
            ChangesetCheckState::Passed => "PASSED",
            ChangesetCheckState::Failed => "FAILED",
        }
    }

    /// Maps a combined commit status (`success`, `failure`, `error`, `pending`)
    /// onto a check state. A pending status with no contexts at all means no
    /// CI is configured, which is reported as `Unknown`.
    pub fn from_combined_status(state: &str, total_count: u64) -> ChangesetCheckState {
        match state {
            "success" => ChangesetCheckState::Passed,
            "failure" | "error" => ChangesetCheckState::Failed,
            "pending" if total_count > 0 => ChangesetCheckState::Pending,
            _ => ChangesetCheckState::Unknown,
        }
    }
}

impl fmt::Display for ChangesetCheckState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangesetCheckState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChangesetCheckState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| Error::UnknownState("changeset check state", s.to_string()))
    }
}

/// A piece of review or CI activity reported by the code host.
///
/// `key` is unique per changeset on the host and is used to append each event
/// exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalEvent {
    pub key: String,
    pub kind: String,
    pub created_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

/// The authoritative state of one changeset as reported by its code host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalChangeset {
    /// The host's identifier for the changeset (e.g. a pull request number)
    pub external_id: String,

    pub title: String,

    pub body: Option<String>,

    pub state: ChangesetState,

    pub review_state: ChangesetReviewState,

    pub check_state: ChangesetCheckState,

    /// The branch the changes live on
    pub head_ref: String,

    /// The branch the changes target
    pub base_ref: String,

    /// When the host last modified the changeset
    pub updated_at: DateTime<Utc>,

    /// Review/CI activity, oldest first
    pub events: Vec<ExternalEvent>,
}

impl ExternalChangeset {
    /// The creation time of the most recent event, if any.
    pub fn latest_event_at(&self) -> Option<DateTime<Utc>> {
        self.events.iter().map(|e| e.created_at).max()
    }
}

/// The request to open a new changeset on a code host.
///
/// The head branch must already exist on the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewChangeset {
    pub title: String,
    pub body: Option<String>,
    pub head_ref: String,
    pub base_ref: String,
}

/// Fields of an existing changeset to overwrite. `None` keeps the host value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangesetUpdate {
    pub title: Option<String>,
    pub body: Option<String>,
    pub base_ref: Option<String>,
}
