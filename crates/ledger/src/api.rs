//! Transport-boundary mapping for the sync trigger
//!
//! Turns engine results into the JSON bodies and HTTP status codes an
//! outer server returns. No server lives here; any framework can call
//! [`handle_sync_request`] and write the pair it returns.

use log::error;
use serde::Serialize;
use serde_json::{Value, json};

use crate::models::{ItemId, RemovedTransaction, TransactionRecord};
use crate::sync::{
    CancelToken, SyncEngine, SyncError, SyncErrorKind, SyncOutcome, SyncSummary, Unavailability,
};

/// Body of a successful sync trigger
///
/// The change lists mirror the final page the provider returned; `summary`
/// carries the aggregate counts over every page of the run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncTransactionsResponse {
    pub added: Vec<TransactionRecord>,
    pub modified: Vec<TransactionRecord>,
    pub removed: Vec<RemovedTransaction>,
    pub next_cursor: String,
    pub summary: SyncSummary,
}

impl From<SyncOutcome> for SyncTransactionsResponse {
    fn from(outcome: SyncOutcome) -> Self {
        let page = outcome.last_page;
        Self {
            added: page.added,
            modified: page.modified,
            removed: page.removed,
            next_cursor: page.next_cursor,
            summary: outcome.summary,
        }
    }
}

/// Body of a failed sync trigger
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: String,
    pub kind: SyncErrorKind,
    pub retryable: bool,
    pub item_id: ItemId,
}

impl From<&SyncError> for ErrorResponse {
    fn from(err: &SyncError) -> Self {
        Self {
            error: err.to_string(),
            kind: err.kind(),
            retryable: err.is_retryable(),
            item_id: err.item_id(),
        }
    }
}

/// HTTP status for a failed sync
pub fn status_code(err: &SyncError) -> u16 {
    match err {
        SyncError::ItemUnavailable {
            reason: Unavailability::NotFound,
            ..
        } => 404,
        SyncError::ItemUnavailable { .. } => 403,
        SyncError::ProviderUnavailable { .. } => 502,
        SyncError::UnknownAccount { .. } => 500,
        SyncError::StoreWriteFailed { .. } => 503,
        SyncError::SyncAlreadyInProgress { .. } | SyncError::Cancelled { .. } => 409,
    }
}

/// Run a sync for `item_id` and render the result as (status, body)
pub fn handle_sync_request(engine: &SyncEngine, item_id: ItemId) -> (u16, Value) {
    match engine.sync_item_with_cancel(item_id, &CancelToken::new()) {
        Ok(outcome) => (200, json!(SyncTransactionsResponse::from(outcome))),
        Err(err) => {
            let status = status_code(&err);
            if status >= 500 {
                error!("[API] Sync for item {} failed: {}", item_id, err);
            }
            (status, json!(ErrorResponse::from(&err)))
        }
    }
}
