//! Domain models for ledger entities

mod account;
mod item;
mod transaction;
mod user;

pub use account::{Account, AccountRecord};
pub use item::{Item, ItemId, ItemStatus};
pub use transaction::{RemovedTransaction, Transaction, TransactionRecord};
pub use user::User;
