//! Item model representing one linked access grant at a financial institution

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Internal identifier of an item (database primary key)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemId(pub i64);

impl ItemId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ItemId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Link status of an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    /// Credential is valid and the item can be synced
    Linked,
    /// The provider rejected the credential; the user must re-link
    Error,
    /// The user or provider revoked access; never synced again
    Revoked,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Linked => "linked",
            ItemStatus::Error => "error",
            ItemStatus::Revoked => "revoked",
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "linked" => Ok(ItemStatus::Linked),
            "error" => Ok(ItemStatus::Error),
            "revoked" => Ok(ItemStatus::Revoked),
            other => anyhow::bail!("Unknown item status: {}", other),
        }
    }
}

/// A linked item
///
/// Exactly one item exists per (user, external item id) pair. The
/// transactions cursor is only ever written by the sync engine.
#[derive(Clone, PartialEq, Serialize)]
pub struct Item {
    /// Internal identifier (database primary key)
    pub id: ItemId,
    /// Owning user
    pub user_id: i64,
    /// Provider access token
    #[serde(skip_serializing)]
    pub access_token: String,
    /// Provider-assigned item identifier
    pub external_id: String,
    /// Provider institution identifier, when known
    pub institution_id: Option<String>,
    pub status: ItemStatus,
    /// Opaque transactions sync cursor (None = full resync from start)
    pub cursor: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Item {
    /// Create a new item (id will be assigned by the store)
    pub fn new(
        user_id: i64,
        external_id: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ItemId(0),
            user_id,
            access_token: access_token.into(),
            external_id: external_id.into(),
            institution_id: None,
            status: ItemStatus::Linked,
            cursor: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the institution identifier
    pub fn with_institution(mut self, institution_id: impl Into<String>) -> Self {
        self.institution_id = Some(institution_id.into());
        self
    }

    /// Whether the item may be synced at all
    pub fn is_syncable(&self) -> bool {
        self.status != ItemStatus::Revoked
    }
}

impl fmt::Debug for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Item")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("access_token", &"<redacted>")
            .field("external_id", &self.external_id)
            .field("institution_id", &self.institution_id)
            .field("status", &self.status)
            .field("cursor", &self.cursor)
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}
