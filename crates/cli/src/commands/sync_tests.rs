use super::*;
use async_trait::async_trait;
use campaigns_core::models::{
    Changeset, ChangesetCheckState, ChangesetReviewState, ChangesetState, RepoRef,
};
use campaigns_developer_platforms::errors::Error;
use campaigns_developer_platforms::models::{ChangesetUpdate, ExternalChangeset, NewChangeset};
use chrono::{Duration, Utc};
use tempfile::{tempdir, TempDir};

/// Reports every changeset as merged.
struct MergedEverywhere;

#[async_trait]
impl ChangesetSource for MergedEverywhere {
    async fn load_changeset(
        &self,
        _repo_owner: &str,
        _repo_name: &str,
        external_id: &str,
    ) -> Result<ExternalChangeset, Error> {
        Ok(ExternalChangeset {
            external_id: external_id.to_string(),
            title: format!("Merged {}", external_id),
            body: None,
            state: ChangesetState::Merged,
            review_state: ChangesetReviewState::Approved,
            check_state: ChangesetCheckState::Passed,
            head_ref: "campaigns/upgrade".to_string(),
            base_ref: "main".to_string(),
            updated_at: Utc::now() - Duration::hours(1),
            events: Vec::new(),
        })
    }

    async fn create_changeset(
        &self,
        _repo_owner: &str,
        _repo_name: &str,
        _changeset: &NewChangeset,
    ) -> Result<ExternalChangeset, Error> {
        Err(Error::ApiError())
    }

    async fn update_changeset(
        &self,
        _repo_owner: &str,
        _repo_name: &str,
        _external_id: &str,
        _update: &ChangesetUpdate,
    ) -> Result<ExternalChangeset, Error> {
        Err(Error::ApiError())
    }

    async fn close_changeset(
        &self,
        _repo_owner: &str,
        _repo_name: &str,
        _external_id: &str,
    ) -> Result<(), Error> {
        Err(Error::ApiError())
    }
}

fn changeset(id: i64, next_sync_in: Duration) -> Changeset {
    Changeset {
        id,
        repo: RepoRef {
            id,
            owner: "acme".to_string(),
            name: format!("repo-{}", id),
        },
        external_id: Some(id.to_string()),
        patch_id: None,
        campaign_ids: Vec::new(),
        state: ChangesetState::Open,
        review_state: ChangesetReviewState::Pending,
        check_state: ChangesetCheckState::Unknown,
        title: format!("Changeset {}", id),
        body: None,
        external_updated_at: None,
        next_sync_at: Some(Utc::now() + next_sync_in),
        created_at: Utc::now() - Duration::days(1),
        updated_at: Utc::now() - Duration::days(1),
    }
}

fn snapshot_file() -> (TempDir, PathBuf) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("campaigns.json");
    let snapshot = Snapshot {
        changesets: vec![
            changeset(1, Duration::hours(-1)),
            changeset(2, Duration::days(1)),
        ],
        ..Default::default()
    };
    fs::write(&path, serde_json::to_string(&snapshot).unwrap()).unwrap();
    (dir, path)
}

fn states(path: &Path) -> Vec<ChangesetState> {
    read_snapshot(path)
        .unwrap()
        .changesets
        .iter()
        .map(|c| c.state)
        .collect()
}

#[tokio::test]
async fn test_due_sync_only_touches_due_changesets() {
    let (_dir, path) = snapshot_file();

    let summary = run_sync(
        &path,
        SyncMode::Due,
        CampaignsConfig::default(),
        Arc::new(MergedEverywhere),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(summary, SyncSummary { synced: 1, failed: 0 });
    assert_eq!(
        states(&path),
        vec![ChangesetState::Merged, ChangesetState::Open]
    );
}

#[tokio::test]
async fn test_full_sync_touches_every_changeset() {
    let (_dir, path) = snapshot_file();

    let summary = run_sync(
        &path,
        SyncMode::All,
        CampaignsConfig::default(),
        Arc::new(MergedEverywhere),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(summary.synced, 2);
    assert_eq!(
        states(&path),
        vec![ChangesetState::Merged, ChangesetState::Merged]
    );
}

#[tokio::test]
async fn test_disabled_campaigns_leave_snapshot_alone() {
    let (_dir, path) = snapshot_file();
    let before = fs::read_to_string(&path).unwrap();
    let config = CampaignsConfig {
        enabled: false,
        ..Default::default()
    };

    let result = run_sync(
        &path,
        SyncMode::All,
        config,
        Arc::new(MergedEverywhere),
        CancellationToken::new(),
    )
    .await;

    assert!(matches!(result, Err(CliError::ConfigError(_))));
    assert_eq!(fs::read_to_string(&path).unwrap(), before);
}

#[tokio::test]
async fn test_watch_stops_when_cancelled() {
    let (_dir, path) = snapshot_file();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let summary = run_sync(
        &path,
        SyncMode::Watch,
        CampaignsConfig::default(),
        Arc::new(MergedEverywhere),
        cancel,
    )
    .await
    .unwrap();

    assert_eq!(summary, SyncSummary::default());
    assert_eq!(read_snapshot(&path).unwrap().changesets.len(), 2);
}

#[tokio::test]
async fn test_missing_snapshot_is_an_io_error() {
    let dir = tempdir().unwrap();

    let result = run_sync(
        &dir.path().join("absent.json"),
        SyncMode::Due,
        CampaignsConfig::default(),
        Arc::new(MergedEverywhere),
        CancellationToken::new(),
    )
    .await;

    assert!(matches!(result, Err(CliError::IoError(_))));
}
