//! Cursor-based transaction sync engine
//!
//! Each run pages through the provider's change feed for one item:
//!
//! 1. Read the item's committed cursor
//! 2. Fetch one page of added / modified / removed transactions
//! 3. Resolve every referenced account (the whole page fails on an unknown one)
//! 4. Upsert added and modified records, delete removed ones
//! 5. Commit the page's cursor, and only then fetch the next page
//!
//! The cursor therefore never runs ahead of the ledger. A run that fails
//! part-way resumes from the last committed page, and replaying that page
//! is harmless because every write is keyed by the provider's transaction id.

use anyhow::{Result, anyhow};
use log::{debug, info, warn};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use super::accounts::discover_accounts;
use super::error::{SyncError, Unavailability};
use super::single_flight::{CancelToken, SingleFlight};
use crate::config::{ConcurrentSyncPolicy, SyncSettings};
use crate::models::{Account, Item, ItemId, ItemStatus};
use crate::provider::{ProviderError, TransactionsPage, TransactionsProvider};
use crate::storage::{CursorStore, LedgerStore};

/// Aggregate counts for a whole multi-page run
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    /// Records the provider classified as added
    pub added: usize,
    /// Records the provider classified as modified
    pub modified: usize,
    /// Records the provider classified as removed
    pub removed: usize,
    /// Pages fetched and committed
    pub pages: usize,
    /// Cursor committed at the end of the run
    pub cursor: Option<String>,
    /// Duration of the sync operation
    pub duration_ms: u64,
}

impl SyncSummary {
    pub fn total_changes(&self) -> usize {
        self.added + self.modified + self.removed
    }
}

/// A successful run: the summary plus the final page as the provider sent it
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub summary: SyncSummary,
    pub last_page: TransactionsPage,
}

/// Result of syncing one of several items
pub type ItemSyncResult = (ItemId, Result<SyncSummary, SyncError>);

/// Where a failure happened inside the page loop
struct PageContext<'a> {
    item_id: ItemId,
    page: usize,
    cursor: Option<&'a str>,
}

impl PageContext<'_> {
    fn store_failure(&self, operation: &'static str) -> impl FnOnce(anyhow::Error) -> SyncError {
        let item_id = self.item_id;
        let page = self.page;
        let cursor = self.cursor.map(str::to_string);
        move |cause| SyncError::StoreWriteFailed {
            item_id,
            page,
            cursor,
            operation,
            cause,
        }
    }
}

/// Orchestrates transaction sync for linked items
///
/// The provider and stores are injected, so one engine can be shared
/// (e.g. behind an `Arc`) by every request handler. Runs for different
/// items proceed in parallel; runs for the same item are serialized
/// according to the configured [`ConcurrentSyncPolicy`].
pub struct SyncEngine {
    provider: Arc<dyn TransactionsProvider>,
    ledger: Arc<dyn LedgerStore>,
    cursors: Arc<dyn CursorStore>,
    flights: SingleFlight,
    policy: ConcurrentSyncPolicy,
}

impl SyncEngine {
    pub fn new(
        provider: Arc<dyn TransactionsProvider>,
        ledger: Arc<dyn LedgerStore>,
        cursors: Arc<dyn CursorStore>,
    ) -> Self {
        Self {
            provider,
            ledger,
            cursors,
            flights: SingleFlight::new(),
            policy: ConcurrentSyncPolicy::default(),
        }
    }

    /// Set what happens when the same item is synced concurrently
    pub fn with_policy(mut self, policy: ConcurrentSyncPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Apply the engine-level parts of the sync settings
    pub fn with_settings(self, settings: &SyncSettings) -> Self {
        self.with_policy(settings.concurrent_sync)
    }

    /// Whether a sync is currently running for the item
    pub fn is_syncing(&self, item_id: ItemId) -> bool {
        self.flights.is_active(item_id)
    }

    /// Sync one item to the provider's latest state
    pub fn sync_item(&self, item_id: ItemId) -> Result<SyncSummary, SyncError> {
        self.sync_item_with_cancel(item_id, &CancelToken::new())
            .map(|outcome| outcome.summary)
    }

    /// Sync one item, stopping at the next page boundary once `cancel` fires
    pub fn sync_item_with_cancel(
        &self,
        item_id: ItemId,
        cancel: &CancelToken,
    ) -> Result<SyncOutcome, SyncError> {
        let _flight = self.flights.acquire(item_id, self.policy)?;
        let start = Instant::now();

        let item = self.load_syncable_item(item_id)?;
        info!(
            "[SYNC] Starting transactions sync for item {} (cursor: {})",
            item_id,
            item.cursor.as_deref().unwrap_or("<start>")
        );

        let mut summary = SyncSummary::default();
        let mut last_page = TransactionsPage::default();
        let mut has_more = true;

        while has_more {
            let cursor = self.cursors.get_cursor(item_id).map_err(|cause| {
                SyncError::StoreWriteFailed {
                    item_id,
                    page: summary.pages + 1,
                    cursor: summary.cursor.clone(),
                    operation: "read cursor",
                    cause,
                }
            })?;

            if cancel.is_cancelled() {
                info!(
                    "[SYNC] Sync for item {} cancelled after {} page(s)",
                    item_id, summary.pages
                );
                return Err(SyncError::Cancelled {
                    item_id,
                    pages: summary.pages,
                    cursor,
                });
            }

            let ctx = PageContext {
                item_id,
                page: summary.pages + 1,
                cursor: cursor.as_deref(),
            };

            let page = self.fetch_page(&item, &ctx)?;
            debug!(
                "[SYNC] Item {} page {}: {} added, {} modified, {} removed (has_more: {})",
                item_id,
                ctx.page,
                page.added.len(),
                page.modified.len(),
                page.removed.len(),
                page.has_more
            );

            self.reconcile_page(&item, &page, &ctx)?;

            // Batch writes above happen-before this cursor write
            if ctx.cursor != Some(page.next_cursor.as_str()) {
                self.cursors
                    .set_cursor(item_id, &page.next_cursor)
                    .map_err(ctx.store_failure("commit cursor"))?;
            }

            summary.added += page.added.len();
            summary.modified += page.modified.len();
            summary.removed += page.removed.len();
            summary.pages += 1;
            summary.cursor = Some(page.next_cursor.clone());

            has_more = page.has_more;
            last_page = page;
        }

        // The item may have been revoked while the run was in flight
        if item.status == ItemStatus::Error {
            let recovered = self
                .ledger
                .transition_item_status(item_id, ItemStatus::Error, ItemStatus::Linked)
                .map_err(|cause| SyncError::StoreWriteFailed {
                    item_id,
                    page: summary.pages,
                    cursor: summary.cursor.clone(),
                    operation: "restore item status",
                    cause,
                })?;
            if recovered {
                info!("[SYNC] Item {} recovered, status set to linked", item_id);
            }
        }

        summary.duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(
            "[SYNC] Finished item {}: {} added, {} modified, {} removed over {} page(s) in {}ms",
            item_id,
            summary.added,
            summary.modified,
            summary.removed,
            summary.pages,
            summary.duration_ms
        );

        Ok(SyncOutcome { summary, last_page })
    }

    /// Sync several items in parallel; each result is independent
    pub fn sync_items(&self, item_ids: &[ItemId]) -> Vec<ItemSyncResult> {
        item_ids
            .par_iter()
            .map(|&item_id| (item_id, self.sync_item(item_id)))
            .collect()
    }

    /// Sync every non-revoked item a user owns
    pub fn sync_user(&self, user_id: i64) -> Result<Vec<ItemSyncResult>> {
        if self.ledger.get_user(user_id)?.is_none() {
            return Err(anyhow!("User {} not found", user_id));
        }

        let item_ids: Vec<ItemId> = self
            .ledger
            .list_items_for_user(user_id)?
            .into_iter()
            .filter(Item::is_syncable)
            .map(|item| item.id)
            .collect();

        Ok(self.sync_items(&item_ids))
    }

    /// Refresh the item's accounts from the provider
    pub fn refresh_accounts(&self, item_id: ItemId) -> Result<Vec<Account>, SyncError> {
        discover_accounts(self.provider.as_ref(), self.ledger.as_ref(), item_id)
    }

    fn load_syncable_item(&self, item_id: ItemId) -> Result<Item, SyncError> {
        load_syncable_item(self.ledger.as_ref(), item_id)
    }

    fn fetch_page(&self, item: &Item, ctx: &PageContext<'_>) -> Result<TransactionsPage, SyncError> {
        match self.provider.fetch_page(&item.access_token, ctx.cursor) {
            Ok(page) => Ok(page),
            Err(ProviderError::LoginRequired) => {
                self.mark_item_error(item.id);
                Err(SyncError::ItemUnavailable {
                    item_id: item.id,
                    reason: Unavailability::LoginRequired,
                })
            }
            Err(source) => {
                warn!(
                    "[SYNC] Provider call failed for item {} at page {}: {}",
                    item.id, ctx.page, source
                );
                Err(SyncError::ProviderUnavailable {
                    item_id: item.id,
                    page: ctx.page,
                    cursor: ctx.cursor.map(str::to_string),
                    source,
                })
            }
        }
    }

    /// Apply one page to the ledger
    ///
    /// Accounts are resolved for the whole page before the first write, so
    /// an integrity failure leaves the ledger untouched for this page.
    fn reconcile_page(
        &self,
        item: &Item,
        page: &TransactionsPage,
        ctx: &PageContext<'_>,
    ) -> Result<(), SyncError> {
        let upserts = page.added.iter().chain(page.modified.iter());

        let mut accounts: HashMap<&str, i64> = HashMap::new();
        for record in upserts.clone() {
            let external_id = record.account_external_id.as_str();
            if accounts.contains_key(external_id) {
                continue;
            }

            let account = self
                .ledger
                .get_account_by_external_id(external_id)
                .map_err(ctx.store_failure("resolve account"))?;

            match account {
                Some(account) if account.item_id == item.id => {
                    accounts.insert(external_id, account.id);
                }
                _ => {
                    warn!(
                        "[SYNC] Transaction {} on item {} references unknown account {}",
                        record.external_id, item.id, external_id
                    );
                    return Err(SyncError::UnknownAccount {
                        item_id: item.id,
                        page: ctx.page,
                        cursor: ctx.cursor.map(str::to_string),
                        transaction_id: record.external_id.clone(),
                        account_id: external_id.to_string(),
                    });
                }
            }
        }

        // Added and modified share one path: both are natural-key upserts
        for record in upserts {
            let account_id = accounts[record.account_external_id.as_str()];
            let outcome = self
                .ledger
                .upsert_transaction(account_id, record)
                .map_err(ctx.store_failure("upsert transaction"))?;

            if outcome.previous_pending == Some(false) && record.pending {
                warn!(
                    "[SYNC] Transaction {} went from settled back to pending",
                    record.external_id
                );
            }
        }

        for removed in &page.removed {
            let deleted = self
                .ledger
                .delete_transaction_by_external_id(&removed.external_id)
                .map_err(ctx.store_failure("delete transaction"))?;
            if !deleted {
                debug!(
                    "[SYNC] Removed transaction {} was not stored, skipping",
                    removed.external_id
                );
            }
        }

        Ok(())
    }

    /// Best effort: a failure here must not mask the provider error
    fn mark_item_error(&self, item_id: ItemId) {
        warn!(
            "[SYNC] Provider requires re-authentication, marking item {} as error",
            item_id
        );
        if let Err(e) = self.ledger.update_item_status(item_id, ItemStatus::Error) {
            warn!("[SYNC] Failed to mark item {} as error: {:#}", item_id, e);
        }
    }
}

/// Load an item and check it may be synced
pub(crate) fn load_syncable_item(
    ledger: &dyn LedgerStore,
    item_id: ItemId,
) -> Result<Item, SyncError> {
    let item = ledger
        .get_item(item_id)
        .map_err(|cause| SyncError::StoreWriteFailed {
            item_id,
            page: 0,
            cursor: None,
            operation: "load item",
            cause,
        })?;

    match item {
        None => Err(SyncError::ItemUnavailable {
            item_id,
            reason: Unavailability::NotFound,
        }),
        Some(item) if !item.is_syncable() => Err(SyncError::ItemUnavailable {
            item_id,
            reason: Unavailability::Revoked,
        }),
        Some(item) => Ok(item),
    }
}
