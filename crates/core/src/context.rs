//! Request scoped state: who is calling, and whether the caller gave up.

use std::future::Future;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::errors::CampaignsError;
use crate::models::UserId;

#[cfg(test)]
#[path = "context_tests.rs"]
mod tests;

/// The authenticated user behind a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: UserId,
    pub site_admin: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub actor: Option<Actor>,
    pub cancel: CancellationToken,
}

impl RequestContext {
    pub fn new(actor: Option<Actor>) -> Self {
        RequestContext {
            actor,
            cancel: CancellationToken::new(),
        }
    }

    pub fn anonymous() -> Self {
        RequestContext::new(None)
    }

    pub fn for_user(user_id: UserId) -> Self {
        RequestContext::new(Some(Actor {
            user_id,
            site_admin: false,
        }))
    }

    pub fn for_site_admin(user_id: UserId) -> Self {
        RequestContext::new(Some(Actor {
            user_id,
            site_admin: true,
        }))
    }

    /// Uses `cancel` instead of a fresh token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Runs a store or code host call, abandoning it as soon as the request is
    /// cancelled.
    ///
    /// A call that was already cancelled never starts.
    pub async fn guard<F, T>(&self, call: F) -> Result<T, CampaignsError>
    where
        F: Future<Output = T>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(CampaignsError::Cancelled),
            out = call => Ok(out),
        }
    }

    pub fn require_actor(&self) -> Result<Actor, CampaignsError> {
        self.actor.ok_or(CampaignsError::NotAuthenticated)
    }

    pub fn check_site_admin(&self) -> Result<Actor, CampaignsError> {
        let actor = self.require_actor()?;
        if !actor.site_admin {
            return Err(CampaignsError::MustBeSiteAdmin);
        }
        Ok(actor)
    }

    /// Succeeds for site admins and for the user `owner`.
    pub fn check_site_admin_or_same_user(&self, owner: UserId) -> Result<Actor, CampaignsError> {
        let actor = self.require_actor()?;
        if actor.site_admin || actor.user_id == owner {
            return Ok(actor);
        }
        Err(CampaignsError::Unauthorized(
            "must be authenticated as the authorized user or as an admin".to_string(),
        ))
    }
}

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        ManualClock {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        match self.now.lock() {
            Ok(mut guard) => *guard = now,
            Err(poisoned) => *poisoned.into_inner() = now,
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        let next = self.now() + by;
        self.set(next);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}
