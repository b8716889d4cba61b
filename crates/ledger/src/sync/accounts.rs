//! Account discovery for a linked item
//!
//! Transactions may only reference accounts the ledger already knows, so
//! discovery runs once after linking and again whenever the provider starts
//! reporting accounts the ledger has not seen.

use log::{info, warn};

use super::engine::load_syncable_item;
use super::error::{SyncError, Unavailability};
use crate::models::{Account, ItemId, ItemStatus};
use crate::provider::{ProviderError, TransactionsProvider};
use crate::storage::LedgerStore;

/// Fetch the item's accounts from the provider and upsert them by external id
///
/// Accounts that disappeared upstream are left in place; their history stays
/// queryable until the item itself is deleted.
pub fn discover_accounts(
    provider: &dyn TransactionsProvider,
    store: &dyn LedgerStore,
    item_id: ItemId,
) -> Result<Vec<Account>, SyncError> {
    let item = load_syncable_item(store, item_id)?;

    let records = match provider.fetch_accounts(&item.access_token) {
        Ok(records) => records,
        Err(ProviderError::LoginRequired) => {
            warn!(
                "[ACCOUNTS] Provider requires re-authentication, marking item {} as error",
                item_id
            );
            if let Err(e) = store.update_item_status(item_id, ItemStatus::Error) {
                warn!("[ACCOUNTS] Failed to mark item {} as error: {:#}", item_id, e);
            }
            return Err(SyncError::ItemUnavailable {
                item_id,
                reason: Unavailability::LoginRequired,
            });
        }
        Err(source) => {
            return Err(SyncError::ProviderUnavailable {
                item_id,
                page: 0,
                cursor: item.cursor,
                source,
            });
        }
    };

    let mut accounts = Vec::with_capacity(records.len());
    for record in &records {
        let account = store
            .upsert_account(item_id, record)
            .map_err(|cause| SyncError::StoreWriteFailed {
                item_id,
                page: 0,
                cursor: item.cursor.clone(),
                operation: "upsert account",
                cause,
            })?;
        accounts.push(account);
    }

    info!(
        "[ACCOUNTS] Discovered {} account(s) for item {}",
        accounts.len(),
        item_id
    );
    Ok(accounts)
}
