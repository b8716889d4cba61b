//! Storage traits and implementations
//!
//! This module defines the storage abstraction layer for ledger entities.
//! The trait-based design allows swapping between in-memory and persistent
//! storage implementations.

mod memory;
mod sqlite;
mod traits;

pub use memory::InMemoryLedgerStore;
pub use sqlite::SqliteLedgerStore;
pub use traits::{CursorStore, LedgerStore, UpsertOutcome};
