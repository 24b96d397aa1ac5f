//! # Campaigns Core
//!
//! The engine behind campaigns: bulk, cross-repository change proposals made
//! of one changeset (pull or merge request) per repository.
//!
//! The engine:
//! - parses stored multi-file diffs, pages through them and previews patched
//!   files ([`diff`], [`resolvers`])
//! - hides changesets and patches in repositories a viewer cannot access
//!   ([`access`])
//! - creates, applies, moves, closes and deletes campaigns ([`service`])
//! - keeps changesets in step with their code hosts in the background
//!   ([`sync`])
//!
//! Persistence sits behind the [`store::Store`] trait and code hosts behind
//! [`campaigns_developer_platforms::ChangesetSource`].
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use campaigns_core::access::AllReposVisible;
//! use campaigns_core::config::CampaignsConfig;
//! use campaigns_core::context::{RequestContext, SystemClock};
//! use campaigns_core::memory_store::MemoryStore;
//! use campaigns_core::build_campaign_service;
//! use campaigns_developer_platforms::ChangesetSource;
//! use tokio_util::sync::CancellationToken;
//!
//! async fn run(source: Arc<dyn ChangesetSource>) -> anyhow::Result<()> {
//!     let (service, worker) = build_campaign_service(
//!         CampaignsConfig::default(),
//!         Arc::new(MemoryStore::new()),
//!         source,
//!         Arc::new(AllReposVisible),
//!         Arc::new(SystemClock),
//!     )?;
//!
//!     let cancel = CancellationToken::new();
//!     tokio::spawn(worker.run(cancel.clone()));
//!
//!     let ctx = RequestContext::for_site_admin(1);
//!     let campaign = service.campaign_by_id(&ctx, "Q2FtcGFpZ246MQ==").await?;
//!     println!("{:?}", campaign);
//!
//!     cancel.cancel();
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use campaigns_developer_platforms::ChangesetSource;
use tracing::info;

pub mod access;
pub mod config;
pub mod context;
pub mod diff;
pub mod errors;
pub mod ids;
pub mod memory_store;
pub mod models;
pub mod resolvers;
pub mod service;
pub mod store;
pub mod sync;

use access::RepoVisibility;
use config::CampaignsConfig;
use context::Clock;
use errors::CampaignsError;
use service::CampaignService;
use store::Store;
use sync::{SyncQueue, SyncWorker};

#[cfg(test)]
mod test_support;

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

/// Wires the campaign service and its sync worker together.
///
/// This is the single place deciding whether campaigns are available. The
/// returned worker must be run (see [`SyncWorker::run`]) for queued syncs to
/// happen.
///
/// # Errors
///
/// Returns [`CampaignsError::Unavailable`] when campaigns are disabled and a
/// validation error when the configuration is inconsistent.
pub fn build_campaign_service(
    config: CampaignsConfig,
    store: Arc<dyn Store>,
    source: Arc<dyn ChangesetSource>,
    visibility: Arc<dyn RepoVisibility>,
    clock: Arc<dyn Clock>,
) -> Result<(CampaignService, SyncWorker), CampaignsError> {
    if !config.enabled {
        info!("Campaigns are disabled");
        return Err(CampaignsError::Unavailable);
    }
    config
        .validate()
        .map_err(|e| CampaignsError::Validation(e.to_string()))?;

    let (queue, receiver) = SyncQueue::new(Arc::clone(&store));
    let worker = SyncWorker::new(
        Arc::clone(&store),
        Arc::clone(&source),
        receiver,
        config.sync.clone(),
        Arc::clone(&clock),
    );
    let service = CampaignService::new(store, source, visibility, queue, config, clock);

    Ok((service, worker))
}
