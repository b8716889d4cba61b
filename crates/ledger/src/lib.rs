//! Ledger crate - Transaction sync for linked bank accounts
//!
//! This crate provides the platform-independent core of Compound's
//! account aggregation:
//! - Domain models (User, Item, Account, Transaction)
//! - Storage trait abstractions with in-memory and SQLite backends
//! - Plaid API client behind a provider trait
//! - Cursor-based, resumable transaction sync engine
//! - Response and status mapping for the sync trigger endpoint

pub mod api;
pub mod config;
pub mod models;
pub mod plaid;
pub mod provider;
pub mod storage;
pub mod sync;

pub use api::{ErrorResponse, SyncTransactionsResponse, handle_sync_request, status_code};
pub use config::{ConcurrentSyncPolicy, PlaidCredentials, PlaidEnvironment, SyncSettings};
pub use models::{
    Account, AccountRecord, Item, ItemId, ItemStatus, RemovedTransaction, Transaction,
    TransactionRecord, User,
};
pub use plaid::PlaidClient;
pub use provider::{ProviderError, TransactionsPage, TransactionsProvider};
pub use storage::{CursorStore, InMemoryLedgerStore, LedgerStore, SqliteLedgerStore, UpsertOutcome};
pub use sync::{
    CancelToken, SyncEngine, SyncError, SyncErrorKind, SyncOutcome, SyncSummary, Unavailability,
    discover_accounts,
};
