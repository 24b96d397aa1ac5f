//! # Models
//!
//! The persisted entities of the campaigns engine. The store owns identity and
//! lifecycle fields; everything else only ever holds snapshots of these values.

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::CampaignsError;
use crate::ids::{unmarshal_id, unmarshal_kind, EntityKind};

pub use campaigns_developer_platforms::models::{
    ChangesetCheckState, ChangesetReviewState, ChangesetState,
};

#[cfg(test)]
#[path = "models_tests.rs"]
mod tests;

pub type CampaignId = i64;
pub type ChangesetId = i64;
pub type ChangesetEventId = i64;
pub type PatchSetId = i64;
pub type PatchId = i64;
pub type RepoId = i64;
pub type UserId = i64;
pub type OrgId = i64;

/// The owner of a campaign. Exactly one of a user or an organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Namespace {
    User(UserId),
    Org(OrgId),
}

impl Namespace {
    /// Resolves an opaque namespace token.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the token is neither a user nor an
    /// organization id, or when it encodes the zero id.
    pub fn from_id(token: &str) -> Result<Namespace, CampaignsError> {
        let namespace = match unmarshal_kind(token)? {
            EntityKind::User => Namespace::User(unmarshal_id(EntityKind::User, token)?),
            EntityKind::Org => Namespace::Org(unmarshal_id(EntityKind::Org, token)?),
            other => {
                return Err(CampaignsError::Validation(format!(
                    "invalid namespace '{}': expected a User or Org id, got a {} id",
                    token, other
                )))
            }
        };

        match namespace {
            Namespace::User(0) | Namespace::Org(0) => Err(CampaignsError::IdIsZero),
            namespace => Ok(namespace),
        }
    }

    pub fn user_id(&self) -> Option<UserId> {
        match self {
            Namespace::User(id) => Some(*id),
            Namespace::Org(_) => None,
        }
    }
}

/// A repository on a code host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoRef {
    pub id: RepoId,
    pub owner: String,
    pub name: String,
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// The lifecycle of a campaign.
///
/// `Draft → Open → Closed`. Every state except `Deleted` may move to
/// `Deleted`, and nothing leaves `Deleted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CampaignState {
    Draft,
    Open,
    Closed,
    Deleted,
}

impl CampaignState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignState::Draft => "DRAFT",
            CampaignState::Open => "OPEN",
            CampaignState::Closed => "CLOSED",
            CampaignState::Deleted => "DELETED",
        }
    }

    pub fn can_transition_to(&self, next: CampaignState) -> bool {
        matches!(
            (self, next),
            (CampaignState::Draft, CampaignState::Open)
                | (CampaignState::Open, CampaignState::Closed)
                | (CampaignState::Draft, CampaignState::Deleted)
                | (CampaignState::Open, CampaignState::Deleted)
                | (CampaignState::Closed, CampaignState::Deleted)
        )
    }
}

impl fmt::Display for CampaignState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named batch of changes proposed across repositories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub name: String,
    pub description: Option<String>,

    /// The head branch every changeset of the campaign is published from
    pub branch: Option<String>,

    pub author_id: UserId,
    pub namespace: Namespace,
    pub patch_set_id: Option<PatchSetId>,
    pub state: CampaignState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Set by the close transition and never cleared
    pub closed_at: Option<DateTime<Utc>>,

    pub deleted_at: Option<DateTime<Utc>>,
}

/// An ordered collection of per-repository patches seeding a campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchSet {
    pub id: PatchSetId,
    pub user_id: UserId,
    pub expires_at: DateTime<Utc>,

    /// The campaign that applied the patch set. Once set the patch set and its
    /// patches are immutable.
    pub consumed_by: Option<CampaignId>,

    pub created_at: DateTime<Utc>,
}

impl PatchSet {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// A unified diff against one repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    pub id: PatchId,
    pub patch_set_id: PatchSetId,
    pub repo: RepoRef,
    pub base_ref: String,
    pub diff: String,

    /// `None` means the diff was never parsed, not that it is empty.
    pub diff_stat: Option<DiffStat>,
}

/// The engine's record of one pull/merge request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Changeset {
    pub id: ChangesetId,
    pub repo: RepoRef,

    /// Assigned once the code host has accepted the changeset
    pub external_id: Option<String>,

    /// The patch the changeset was published from
    pub patch_id: Option<PatchId>,

    pub campaign_ids: Vec<CampaignId>,
    pub state: ChangesetState,
    pub review_state: ChangesetReviewState,
    pub check_state: ChangesetCheckState,
    pub title: String,
    pub body: Option<String>,
    pub external_updated_at: Option<DateTime<Utc>>,
    pub next_sync_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Review or CI activity on a changeset. Never mutated once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangesetEvent {
    pub id: ChangesetEventId,
    pub changeset_id: ChangesetId,

    /// Host-assigned key, unique per changeset
    pub key: String,

    pub kind: String,
    pub created_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

/// Added, changed and deleted line counts of a diff.
///
/// # Examples
///
/// ```
/// use campaigns_core::models::DiffStat;
///
/// let total: DiffStat = [DiffStat::new(1, 2, 3), DiffStat::new(4, 0, 1)]
///     .into_iter()
///     .sum();
/// assert_eq!(total, DiffStat::new(5, 2, 4));
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiffStat {
    pub added: u32,
    pub changed: u32,
    pub deleted: u32,
}

impl DiffStat {
    pub fn new(added: u32, changed: u32, deleted: u32) -> Self {
        DiffStat {
            added,
            changed,
            deleted,
        }
    }
}

impl Add for DiffStat {
    type Output = DiffStat;

    fn add(self, rhs: DiffStat) -> DiffStat {
        DiffStat {
            added: self.added.saturating_add(rhs.added),
            changed: self.changed.saturating_add(rhs.changed),
            deleted: self.deleted.saturating_add(rhs.deleted),
        }
    }
}

impl AddAssign for DiffStat {
    fn add_assign(&mut self, rhs: DiffStat) {
        *self = *self + rhs;
    }
}

impl Sum for DiffStat {
    fn sum<I: Iterator<Item = DiffStat>>(iter: I) -> DiffStat {
        iter.fold(DiffStat::default(), Add::add)
    }
}

/// The state filter accepted when listing campaigns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CampaignStateFilter {
    #[default]
    Any,
    Open,
    Closed,
}

impl CampaignStateFilter {
    pub fn matches(&self, state: CampaignState) -> bool {
        match self {
            CampaignStateFilter::Any => state != CampaignState::Deleted,
            CampaignStateFilter::Open => state == CampaignState::Open,
            CampaignStateFilter::Closed => state == CampaignState::Closed,
        }
    }
}

/// Parses the optional campaign state argument of a listing.
///
/// # Errors
///
/// Anything other than `OPEN` or `CLOSED` is a validation error.
pub fn parse_campaign_state(state: Option<&str>) -> Result<CampaignStateFilter, CampaignsError> {
    match state {
        None => Ok(CampaignStateFilter::Any),
        Some("OPEN") => Ok(CampaignStateFilter::Open),
        Some("CLOSED") => Ok(CampaignStateFilter::Closed),
        Some(other) => Err(CampaignsError::Validation(format!(
            "unknown campaign state '{}'",
            other
        ))),
    }
}
