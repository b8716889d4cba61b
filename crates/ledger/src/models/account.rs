//! Account model representing a financial account discovered under an item

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ItemId;

/// A stored financial account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Internal identifier (database primary key)
    pub id: i64,
    /// Owning item
    pub item_id: ItemId,
    /// Provider account identifier (globally unique, upsert key)
    pub external_id: String,
    pub name: String,
    /// Last digits of the account number
    pub mask: Option<String>,
    /// Account type (e.g. "depository", "credit")
    pub kind: String,
    pub subtype: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An account as reported by the provider during discovery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub external_id: String,
    pub name: String,
    pub mask: Option<String>,
    pub kind: String,
    pub subtype: Option<String>,
}

impl AccountRecord {
    pub fn new(external_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            name: name.into(),
            mask: None,
            kind: "depository".to_string(),
            subtype: None,
        }
    }

    pub fn with_mask(mut self, mask: impl Into<String>) -> Self {
        self.mask = Some(mask.into());
        self
    }

    pub fn with_kind(mut self, kind: impl Into<String>, subtype: Option<String>) -> Self {
        self.kind = kind.into();
        self.subtype = subtype;
        self
    }
}
