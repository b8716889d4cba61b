//! Financial-data provider contract
//!
//! The sync engine only ever talks to a provider through
//! [`TransactionsProvider`], so tests can inject scripted fakes and the
//! Plaid client can be swapped for another backend.

use serde::{Deserialize, Serialize};

use crate::models::{AccountRecord, RemovedTransaction, TransactionRecord};

/// One page of transaction changes
///
/// `next_cursor` is opaque: it is stored and replayed verbatim, never parsed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionsPage {
    pub added: Vec<TransactionRecord>,
    pub modified: Vec<TransactionRecord>,
    pub removed: Vec<RemovedTransaction>,
    pub next_cursor: String,
    pub has_more: bool,
}

impl TransactionsPage {
    /// Total number of changes in this page
    pub fn len(&self) -> usize {
        self.added.len() + self.modified.len() + self.removed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Errors reported by a provider
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderError {
    /// The request never produced a response (DNS, TLS, timeout, ...)
    #[error("provider request failed: {0}")]
    Transport(String),

    /// The provider answered with an error payload
    #[error("provider returned HTTP {status} ({code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    /// The access credential is no longer accepted; the user must re-link
    #[error("provider requires the item to be re-authenticated")]
    LoginRequired,

    /// The response could not be decoded
    #[error("failed to decode provider response: {0}")]
    Decode(String),
}

/// Source of account and transaction data for a linked item
pub trait TransactionsProvider: Send + Sync {
    /// Fetch one page of transaction changes since `cursor`
    /// (None = from the beginning of the item's history)
    fn fetch_page(
        &self,
        access_token: &str,
        cursor: Option<&str>,
    ) -> Result<TransactionsPage, ProviderError>;

    /// List the accounts currently visible under the item
    fn fetch_accounts(&self, access_token: &str) -> Result<Vec<AccountRecord>, ProviderError>;
}
