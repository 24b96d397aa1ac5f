//! # Opaque Identifiers
//!
//! Entities are stored under synthetic integer ids, but everything above the
//! engine only ever sees opaque tokens. A token is the standard base64 encoding
//! of `"<Kind>:<id>"`, so it carries the kind of entity it refers to and can be
//! rejected when it is used for the wrong kind.

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::errors::CampaignsError;

#[cfg(test)]
#[path = "ids_tests.rs"]
mod tests;

/// The kind tag embedded in an opaque id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Campaign,
    Changeset,
    ChangesetEvent,
    PatchSet,
    Patch,
    User,
    Org,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Campaign => "Campaign",
            EntityKind::Changeset => "ExternalChangeset",
            EntityKind::ChangesetEvent => "ChangesetEvent",
            EntityKind::PatchSet => "PatchSet",
            EntityKind::Patch => "Patch",
            EntityKind::User => "User",
            EntityKind::Org => "Org",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = CampaignsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            EntityKind::Campaign,
            EntityKind::Changeset,
            EntityKind::ChangesetEvent,
            EntityKind::PatchSet,
            EntityKind::Patch,
            EntityKind::User,
            EntityKind::Org,
        ]
        .into_iter()
        .find(|kind| kind.as_str() == s)
        .ok_or_else(|| CampaignsError::Validation(format!("unknown entity kind '{}'", s)))
    }
}

/// Encodes an entity id as an opaque token.
///
/// # Examples
///
/// ```
/// use campaigns_core::ids::{marshal_id, unmarshal_id, EntityKind};
///
/// let token = marshal_id(EntityKind::Campaign, 42);
/// assert_eq!(unmarshal_id(EntityKind::Campaign, &token).unwrap(), 42);
/// assert!(unmarshal_id(EntityKind::PatchSet, &token).is_err());
/// ```
pub fn marshal_id(kind: EntityKind, id: i64) -> String {
    STANDARD.encode(format!("{}:{}", kind.as_str(), id))
}

fn decode(token: &str) -> Result<(EntityKind, String), CampaignsError> {
    let invalid = |reason: &str| CampaignsError::InvalidId {
        token: token.to_string(),
        reason: reason.to_string(),
    };

    let bytes = STANDARD
        .decode(token)
        .map_err(|_| invalid("not a valid base64 token"))?;
    let text = String::from_utf8(bytes).map_err(|_| invalid("not valid UTF-8"))?;
    let (kind, raw_id) = text
        .split_once(':')
        .ok_or_else(|| invalid("missing kind separator"))?;
    let kind = EntityKind::from_str(kind).map_err(|_| invalid("unknown kind"))?;

    Ok((kind, raw_id.to_string()))
}

/// Returns the kind tag of an opaque token.
pub fn unmarshal_kind(token: &str) -> Result<EntityKind, CampaignsError> {
    decode(token).map(|(kind, _)| kind)
}

/// Decodes an opaque token that must refer to an entity of `expected` kind.
///
/// Zero is returned as-is so that callers can decide between "absent" and
/// [`CampaignsError::IdIsZero`]. Negative and non-numeric ids are rejected.
///
/// # Errors
///
/// Returns [`CampaignsError::InvalidId`] for undecodable tokens, tokens of
/// another kind, and ids that are not non-negative integers.
pub fn unmarshal_id(expected: EntityKind, token: &str) -> Result<i64, CampaignsError> {
    let (kind, raw_id) = decode(token)?;
    if kind != expected {
        return Err(CampaignsError::InvalidId {
            token: token.to_string(),
            reason: format!("expected a {} id, got a {} id", expected, kind),
        });
    }

    match raw_id.parse::<i64>() {
        Ok(id) if id >= 0 => Ok(id),
        _ => Err(CampaignsError::InvalidId {
            token: token.to_string(),
            reason: format!("'{}' is not a valid identifier", raw_id),
        }),
    }
}
