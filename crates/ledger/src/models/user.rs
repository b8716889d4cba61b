//! User model: the owner of linked items

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A registered user
///
/// Usernames are unique. Deleting a user removes their items, accounts and
/// transactions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Internal identifier (database primary key)
    pub id: i64,
    pub username: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Create a new user (id will be assigned by the store)
    pub fn new(username: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            username: username.into(),
            created_at: now,
            updated_at: now,
        }
    }
}
