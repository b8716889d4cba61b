//! Errors produced by a sync run

use serde::Serialize;
use std::fmt;

use crate::models::ItemId;
use crate::provider::ProviderError;

/// Why an item cannot be synced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Unavailability {
    NotFound,
    Revoked,
    /// The provider rejected the credential; the item is now marked `error`
    LoginRequired,
}

impl fmt::Display for Unavailability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Unavailability::NotFound => "not found",
            Unavailability::Revoked => "access revoked",
            Unavailability::LoginRequired => "login required",
        };
        f.write_str(s)
    }
}

/// Closed set of sync failure kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncErrorKind {
    ItemUnavailable,
    ProviderUnavailable,
    UnknownAccount,
    StoreWriteFailed,
    SyncAlreadyInProgress,
    Cancelled,
}

fn cursor_label(cursor: &Option<String>) -> &str {
    cursor.as_deref().unwrap_or("<start>")
}

/// A failed sync run
///
/// `page` is the 1-based page being processed when the run failed and
/// `cursor` the last committed cursor, i.e. where a retry resumes.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("item {item_id} unavailable: {reason}")]
    ItemUnavailable {
        item_id: ItemId,
        reason: Unavailability,
    },

    #[error(
        "provider unavailable for item {item_id} at page {page} (resume cursor {}): {source}",
        cursor_label(.cursor)
    )]
    ProviderUnavailable {
        item_id: ItemId,
        page: usize,
        cursor: Option<String>,
        #[source]
        source: ProviderError,
    },

    #[error(
        "transaction {transaction_id} on item {item_id} references unknown account {account_id} (page {page}, resume cursor {})",
        cursor_label(.cursor)
    )]
    UnknownAccount {
        item_id: ItemId,
        page: usize,
        cursor: Option<String>,
        transaction_id: String,
        account_id: String,
    },

    #[error(
        "store failure for item {item_id} at page {page} while trying to {operation} (resume cursor {}): {cause:#}",
        cursor_label(.cursor)
    )]
    StoreWriteFailed {
        item_id: ItemId,
        page: usize,
        cursor: Option<String>,
        operation: &'static str,
        cause: anyhow::Error,
    },

    #[error("a sync is already in progress for item {item_id}")]
    SyncAlreadyInProgress { item_id: ItemId },

    #[error(
        "sync for item {item_id} cancelled after {pages} page(s) (resume cursor {})",
        cursor_label(.cursor)
    )]
    Cancelled {
        item_id: ItemId,
        pages: usize,
        cursor: Option<String>,
    },
}

impl SyncError {
    pub fn kind(&self) -> SyncErrorKind {
        match self {
            SyncError::ItemUnavailable { .. } => SyncErrorKind::ItemUnavailable,
            SyncError::ProviderUnavailable { .. } => SyncErrorKind::ProviderUnavailable,
            SyncError::UnknownAccount { .. } => SyncErrorKind::UnknownAccount,
            SyncError::StoreWriteFailed { .. } => SyncErrorKind::StoreWriteFailed,
            SyncError::SyncAlreadyInProgress { .. } => SyncErrorKind::SyncAlreadyInProgress,
            SyncError::Cancelled { .. } => SyncErrorKind::Cancelled,
        }
    }

    pub fn item_id(&self) -> ItemId {
        match self {
            SyncError::ItemUnavailable { item_id, .. }
            | SyncError::ProviderUnavailable { item_id, .. }
            | SyncError::UnknownAccount { item_id, .. }
            | SyncError::StoreWriteFailed { item_id, .. }
            | SyncError::SyncAlreadyInProgress { item_id }
            | SyncError::Cancelled { item_id, .. } => *item_id,
        }
    }

    /// Whether rerunning the same sync later can succeed without anyone
    /// changing the item or the ledger first
    pub fn is_retryable(&self) -> bool {
        match self.kind() {
            SyncErrorKind::ProviderUnavailable
            | SyncErrorKind::StoreWriteFailed
            | SyncErrorKind::SyncAlreadyInProgress
            | SyncErrorKind::Cancelled => true,
            SyncErrorKind::ItemUnavailable | SyncErrorKind::UnknownAccount => false,
        }
    }

    /// The last committed cursor, when the failure happened inside the page loop
    pub fn resume_cursor(&self) -> Option<&str> {
        match self {
            SyncError::ProviderUnavailable { cursor, .. }
            | SyncError::UnknownAccount { cursor, .. }
            | SyncError::StoreWriteFailed { cursor, .. }
            | SyncError::Cancelled { cursor, .. } => cursor.as_deref(),
            SyncError::ItemUnavailable { .. } | SyncError::SyncAlreadyInProgress { .. } => None,
        }
    }
}
