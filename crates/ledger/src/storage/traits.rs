//! Storage trait definitions

use crate::models::{
    Account, AccountRecord, Item, ItemId, ItemStatus, Transaction, TransactionRecord, User,
};
use anyhow::Result;

/// Result of upserting a transaction by its natural key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    /// Internal identifier of the stored row
    pub id: i64,
    /// Whether the row was inserted (false = an existing row was overwritten)
    pub created: bool,
    /// Pending flag of the row before this write, if it existed
    pub previous_pending: Option<bool>,
}

/// Trait for ledger storage operations
///
/// Every method is atomic on its own: a concurrent reader sees either the
/// state before the call or the state after it, never a partial write.
/// Writes are visible to the next read on any handle to the same store.
pub trait LedgerStore: Send + Sync {
    // === Users ===

    /// Register a user. Errors if the username is taken.
    fn create_user(&self, username: &str) -> Result<User>;

    /// Get a user by internal ID
    fn get_user(&self, id: i64) -> Result<Option<User>>;

    /// Get a user by username
    fn get_user_by_username(&self, username: &str) -> Result<Option<User>>;

    /// Delete a user with all of their items, accounts and transactions.
    /// Returns false if there was nothing to delete.
    fn delete_user(&self, id: i64) -> Result<bool>;

    // === Items ===

    /// Store a newly linked item. Errors if the owning user does not exist.
    ///
    /// Linking the same (user, external id) pair again refreshes the access
    /// token, resets the status to linked and keeps the existing cursor.
    fn create_item(&self, item: Item) -> Result<Item>;

    /// Get an item by internal ID
    fn get_item(&self, id: ItemId) -> Result<Option<Item>>;

    /// List all items owned by a user
    fn list_items_for_user(&self, user_id: i64) -> Result<Vec<Item>>;

    /// Update an item's link status. Errors if the item does not exist.
    fn update_item_status(&self, id: ItemId, status: ItemStatus) -> Result<()>;

    /// Set the item's status to `to` only if it is currently `from`.
    /// Returns whether the status changed; a missing item is not an error.
    fn transition_item_status(&self, id: ItemId, from: ItemStatus, to: ItemStatus)
    -> Result<bool>;

    /// Delete an item with its accounts and transactions.
    /// Returns false if there was nothing to delete.
    fn delete_item(&self, id: ItemId) -> Result<bool>;

    // === Accounts ===

    /// Insert or update an account keyed by its external ID
    fn upsert_account(&self, item_id: ItemId, record: &AccountRecord) -> Result<Account>;

    /// Get an account by internal ID
    fn get_account(&self, id: i64) -> Result<Option<Account>>;

    /// Get an account by its external ID
    fn get_account_by_external_id(&self, external_id: &str) -> Result<Option<Account>>;

    /// List accounts belonging to an item
    fn list_accounts_for_item(&self, item_id: ItemId) -> Result<Vec<Account>>;

    /// Delete an account and its transactions. Returns false if absent.
    fn delete_account(&self, id: i64) -> Result<bool>;

    // === Transactions ===

    /// Insert or update a transaction keyed by its external ID, overwriting
    /// every mutable field and touching `updated_at`
    fn upsert_transaction(&self, account_id: i64, record: &TransactionRecord)
    -> Result<UpsertOutcome>;

    /// Delete a transaction by external ID. Deleting an unknown ID is a no-op
    /// and returns false.
    fn delete_transaction_by_external_id(&self, external_id: &str) -> Result<bool>;

    /// Get a transaction by internal ID
    fn get_transaction(&self, id: i64) -> Result<Option<Transaction>>;

    /// Get a transaction by external ID
    fn get_transaction_by_external_id(&self, external_id: &str) -> Result<Option<Transaction>>;

    /// List transactions for an account, newest date first
    fn list_transactions_for_account(&self, account_id: i64) -> Result<Vec<Transaction>>;

    /// List transactions across all of a user's items, newest date first
    fn list_transactions_for_user(&self, user_id: i64) -> Result<Vec<Transaction>>;

    /// Count all stored transactions
    fn count_transactions(&self) -> Result<usize>;
}

/// Durable per-item transactions cursor
pub trait CursorStore: Send + Sync {
    /// Get the last committed cursor for an item (None = sync from start)
    fn get_cursor(&self, item_id: ItemId) -> Result<Option<String>>;

    /// Atomically replace the item's cursor. Errors if the item does not exist.
    fn set_cursor(&self, item_id: ItemId, cursor: &str) -> Result<()>;
}
