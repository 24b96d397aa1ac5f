use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use campaigns_core::access::AllReposVisible;
use campaigns_core::build_campaign_service;
use campaigns_core::config::CampaignsConfig;
use campaigns_core::context::{RequestContext, SystemClock};
use campaigns_core::memory_store::{MemoryStore, Snapshot};
use campaigns_core::sync::SyncSummary;
use campaigns_developer_platforms::github::{create_token_client, GitHubSource};
use campaigns_developer_platforms::ChangesetSource;
use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::{get_config_path, AppConfig};
use crate::errors::CliError;

#[cfg(test)]
#[path = "sync_tests.rs"]
mod tests;

/// Arguments for the sync command
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// JSON snapshot of the campaign store, rewritten after the sync
    #[arg(long)]
    pub snapshot: PathBuf,

    /// Path to the configuration file
    #[arg(short, long)]
    pub config: Option<String>,

    /// Sync every published changeset, not only the ones that are due
    #[arg(long, conflicts_with = "watch")]
    pub all: bool,

    /// Keep syncing on schedule until interrupted
    #[arg(long)]
    pub watch: bool,
}

/// Which changesets a sync run covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Changesets whose next sync time has passed
    Due,
    /// Every published changeset
    All,
    /// Run the background worker until cancelled
    Watch,
}

impl SyncArgs {
    fn mode(&self) -> SyncMode {
        if self.watch {
            SyncMode::Watch
        } else if self.all {
            SyncMode::All
        } else {
            SyncMode::Due
        }
    }
}

/// Execute the sync command
#[instrument(skip(args), fields(snapshot = ?args.snapshot))]
pub async fn execute(args: SyncArgs) -> Result<(), CliError> {
    let config_path = get_config_path(args.config.as_deref());
    let config = AppConfig::load_or_default(&config_path)?;

    let token = config.github.token()?;
    let client = create_token_client(&token, config.github.api_url.as_deref())
        .map_err(|e| CliError::AuthError(e.to_string()))?;
    let source = Arc::new(GitHubSource::new(client));

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, stopping sync");
            on_interrupt.cancel();
        }
    });

    let summary = run_sync(
        &args.snapshot,
        args.mode(),
        config.campaigns,
        source,
        cancel,
    )
    .await?;

    println!(
        "Synced {} changesets, {} failed",
        summary.synced, summary.failed
    );
    if summary.failed > 0 {
        return Err(CliError::SyncFailed(format!(
            "{} of {} changesets could not be synchronized",
            summary.failed,
            summary.synced + summary.failed
        )));
    }
    Ok(())
}

/// Syncs the changesets stored in a snapshot file and writes the result back.
///
/// In [`SyncMode::Watch`] the sync worker runs until `cancel` fires and the
/// returned summary is empty.
pub async fn run_sync(
    snapshot_path: &Path,
    mode: SyncMode,
    config: CampaignsConfig,
    source: Arc<dyn ChangesetSource>,
    cancel: CancellationToken,
) -> Result<SyncSummary, CliError> {
    let store = Arc::new(MemoryStore::from_snapshot(read_snapshot(snapshot_path)?));
    let (_service, worker) = build_campaign_service(
        config,
        store.clone(),
        source,
        Arc::new(AllReposVisible),
        Arc::new(SystemClock),
    )?;

    let ctx = RequestContext::anonymous().with_cancellation(cancel.clone());
    let summary = match mode {
        SyncMode::Due => worker.sync_due(&ctx).await?,
        SyncMode::All => worker.sync_all(&ctx).await?,
        SyncMode::Watch => {
            info!("Watching changesets until interrupted");
            worker.run(cancel).await;
            SyncSummary::default()
        }
    };

    if summary.failed > 0 {
        warn!(failed = summary.failed, "Some changesets failed to sync");
    }
    write_snapshot(snapshot_path, &store.snapshot())?;
    info!(synced = summary.synced, failed = summary.failed, "Sync finished");

    Ok(summary)
}

fn read_snapshot(path: &Path) -> Result<Snapshot, CliError> {
    debug!("Reading snapshot from {:?}", path);
    let content = fs::read_to_string(path)
        .map_err(|e| CliError::IoError(format!("Failed to read snapshot {:?}: {}", path, e)))?;

    serde_json::from_str(&content)
        .map_err(|e| CliError::IoError(format!("Failed to parse snapshot {:?}: {}", path, e)))
}

fn write_snapshot(path: &Path, snapshot: &Snapshot) -> Result<(), CliError> {
    debug!("Writing snapshot to {:?}", path);
    let content = serde_json::to_string_pretty(snapshot)
        .map_err(|e| CliError::IoError(format!("Failed to serialize snapshot: {}", e)))?;

    fs::write(path, content)
        .map_err(|e| CliError::IoError(format!("Failed to write snapshot {:?}: {}", path, e)))
}
