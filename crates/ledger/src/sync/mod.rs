//! Transaction synchronization
//!
//! [`SyncEngine`] pulls incremental changes from a [`TransactionsProvider`]
//! and reconciles them into the ledger, committing the item's cursor only
//! after each page has been fully applied.
//!
//! [`TransactionsProvider`]: crate::provider::TransactionsProvider

mod accounts;
mod engine;
mod error;
mod single_flight;

pub use accounts::discover_accounts;
pub use engine::{ItemSyncResult, SyncEngine, SyncOutcome, SyncSummary};
pub use error::{SyncError, SyncErrorKind, Unavailability};
pub use single_flight::{CancelToken, FlightGuard, SingleFlight};
