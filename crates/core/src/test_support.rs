//! Fixtures and fakes shared by the unit tests of this crate.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use campaigns_developer_platforms::errors::Error as PlatformError;
use campaigns_developer_platforms::models::{
    ChangesetUpdate, ExternalChangeset, ExternalEvent, NewChangeset,
};
use campaigns_developer_platforms::ChangesetSource;
use chrono::{DateTime, TimeZone, Utc};

use crate::access::RepoVisibility;
use crate::context::{Actor, ManualClock};
use crate::models::{
    Changeset, ChangesetCheckState, ChangesetReviewState, ChangesetState, Patch, RepoId, RepoRef,
};
use crate::store::StoreError;

pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(epoch()))
}

pub fn repo(id: RepoId) -> RepoRef {
    RepoRef {
        id,
        owner: "acme".to_string(),
        name: format!("repo-{}", id),
    }
}

pub fn changeset(repo_id: RepoId, external_id: &str) -> Changeset {
    Changeset {
        id: 0,
        repo: repo(repo_id),
        external_id: Some(external_id.to_string()),
        patch_id: None,
        campaign_ids: Vec::new(),
        state: ChangesetState::Open,
        review_state: ChangesetReviewState::Pending,
        check_state: ChangesetCheckState::Unknown,
        title: format!("Changeset {}", external_id),
        body: None,
        external_updated_at: None,
        next_sync_at: None,
        created_at: epoch(),
        updated_at: epoch(),
    }
}

pub fn one_file_diff(path: &str) -> String {
    format!(
        "diff --git a/{p} b/{p}\n--- a/{p}\n+++ b/{p}\n@@ -1,2 +1,2 @@\n-old\n+new\n context\n",
        p = path
    )
}

pub fn patch(repo_id: RepoId, diff: &str) -> Patch {
    Patch {
        id: 0,
        patch_set_id: 0,
        repo: repo(repo_id),
        base_ref: "refs/heads/main".to_string(),
        diff: diff.to_string(),
        diff_stat: None,
    }
}

/// Grants every viewer the same set of repositories.
#[derive(Debug, Default)]
pub struct FakeVisibility {
    visible: Mutex<HashSet<RepoId>>,
}

impl FakeVisibility {
    pub fn new(visible: impl IntoIterator<Item = RepoId>) -> Self {
        FakeVisibility {
            visible: Mutex::new(visible.into_iter().collect()),
        }
    }

    pub fn set(&self, visible: impl IntoIterator<Item = RepoId>) {
        *self.visible.lock().unwrap() = visible.into_iter().collect();
    }
}

#[async_trait]
impl RepoVisibility for FakeVisibility {
    async fn visible_repos(
        &self,
        _viewer: Option<&Actor>,
        repo_ids: &[RepoId],
    ) -> Result<HashSet<RepoId>, StoreError> {
        let visible = self.visible.lock().unwrap();
        Ok(repo_ids
            .iter()
            .copied()
            .filter(|id| visible.contains(id))
            .collect())
    }
}

/// What a [`FakeSource`] was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCall {
    Load(String, String),
    Create(String, String),
    Update(String, String),
    Close(String, String),
}

/// An in-memory code host.
#[derive(Debug, Default)]
pub struct FakeSource {
    changesets: Mutex<HashMap<(String, String), ExternalChangeset>>,
    failing: Mutex<HashSet<String>>,
    calls: Mutex<Vec<HostCall>>,
    next_number: Mutex<u64>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn external(external_id: &str, state: ChangesetState) -> ExternalChangeset {
        ExternalChangeset {
            external_id: external_id.to_string(),
            title: format!("Changeset {}", external_id),
            body: None,
            state,
            review_state: ChangesetReviewState::Pending,
            check_state: ChangesetCheckState::Unknown,
            head_ref: "campaigns/test".to_string(),
            base_ref: "main".to_string(),
            updated_at: epoch(),
            events: Vec::new(),
        }
    }

    pub fn event(key: &str, minutes_after_epoch: i64) -> ExternalEvent {
        ExternalEvent {
            key: key.to_string(),
            kind: "review".to_string(),
            created_at: epoch() + chrono::Duration::minutes(minutes_after_epoch),
            payload: serde_json::json!({ "key": key }),
        }
    }

    /// Stores a changeset for the repository called `repo_name`.
    pub fn put(&self, repo_name: &str, changeset: ExternalChangeset) {
        self.changesets.lock().unwrap().insert(
            (repo_name.to_string(), changeset.external_id.clone()),
            changeset,
        );
    }

    pub fn remove(&self, repo_name: &str, external_id: &str) {
        self.changesets
            .lock()
            .unwrap()
            .remove(&(repo_name.to_string(), external_id.to_string()));
    }

    /// Makes every call for `external_id` fail with a rate limit error.
    pub fn fail(&self, external_id: &str) {
        self.failing.lock().unwrap().insert(external_id.to_string());
    }

    pub fn calls(&self) -> Vec<HostCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn closed(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                HostCall::Close(_, id) => Some(id),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: HostCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn check_failing(&self, external_id: &str) -> Result<(), PlatformError> {
        if self.failing.lock().unwrap().contains(external_id) {
            return Err(PlatformError::RateLimitExceeded);
        }
        Ok(())
    }

    fn get(&self, repo_owner: &str, repo_name: &str, external_id: &str) -> Result<ExternalChangeset, PlatformError> {
        self.changesets
            .lock()
            .unwrap()
            .get(&(repo_name.to_string(), external_id.to_string()))
            .cloned()
            .ok_or_else(|| {
                PlatformError::ChangesetNotFound(
                    repo_owner.to_string(),
                    repo_name.to_string(),
                    external_id.to_string(),
                )
            })
    }
}

#[async_trait]
impl ChangesetSource for FakeSource {
    async fn load_changeset(
        &self,
        repo_owner: &str,
        repo_name: &str,
        external_id: &str,
    ) -> Result<ExternalChangeset, PlatformError> {
        self.record(HostCall::Load(repo_name.to_string(), external_id.to_string()));
        self.check_failing(external_id)?;
        self.get(repo_owner, repo_name, external_id)
    }

    async fn create_changeset(
        &self,
        _repo_owner: &str,
        repo_name: &str,
        changeset: &NewChangeset,
    ) -> Result<ExternalChangeset, PlatformError> {
        let number = {
            let mut next = self.next_number.lock().unwrap();
            *next += 1;
            *next
        };
        let external_id = format!("{}", 100 + number);
        self.record(HostCall::Create(repo_name.to_string(), external_id.clone()));

        let mut created = FakeSource::external(&external_id, ChangesetState::Open);
        created.title = changeset.title.clone();
        created.body = changeset.body.clone();
        created.head_ref = changeset.head_ref.clone();
        created.base_ref = changeset.base_ref.clone();
        self.put(repo_name, created.clone());
        Ok(created)
    }

    async fn update_changeset(
        &self,
        repo_owner: &str,
        repo_name: &str,
        external_id: &str,
        update: &ChangesetUpdate,
    ) -> Result<ExternalChangeset, PlatformError> {
        self.record(HostCall::Update(repo_name.to_string(), external_id.to_string()));
        self.check_failing(external_id)?;
        let mut changeset = self.get(repo_owner, repo_name, external_id)?;
        if let Some(title) = &update.title {
            changeset.title = title.clone();
        }
        if let Some(body) = &update.body {
            changeset.body = Some(body.clone());
        }
        if let Some(base_ref) = &update.base_ref {
            changeset.base_ref = base_ref.clone();
        }
        self.put(repo_name, changeset.clone());
        Ok(changeset)
    }

    async fn close_changeset(
        &self,
        repo_owner: &str,
        repo_name: &str,
        external_id: &str,
    ) -> Result<(), PlatformError> {
        self.record(HostCall::Close(repo_name.to_string(), external_id.to_string()));
        self.check_failing(external_id)?;
        let mut changeset = self.get(repo_owner, repo_name, external_id)?;
        changeset.state = ChangesetState::Closed;
        self.put(repo_name, changeset);
        Ok(())
    }
}
