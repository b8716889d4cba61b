//! Integration tests for the ledger crate
//!
//! These tests drive the sync engine end to end against both storage
//! backends with scripted providers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{Result, anyhow};
use chrono::NaiveDate;
use ledger::models::{
    Account, AccountRecord, Item, ItemId, ItemStatus, RemovedTransaction, Transaction,
    TransactionRecord, User,
};
use ledger::provider::{ProviderError, TransactionsPage, TransactionsProvider};
use ledger::storage::{
    CursorStore, InMemoryLedgerStore, LedgerStore, SqliteLedgerStore, UpsertOutcome,
};
use ledger::{
    CancelToken, ConcurrentSyncPolicy, SyncEngine, SyncError, SyncSettings, Unavailability,
};
use tempfile::TempDir;

/// Provider serving pages keyed by the cursor they are requested with
#[derive(Default)]
struct ScriptedProvider {
    pages: HashMap<Option<String>, TransactionsPage>,
    accounts: Vec<AccountRecord>,
}

impl ScriptedProvider {
    fn page(mut self, cursor: Option<&str>, page: TransactionsPage) -> Self {
        self.pages.insert(cursor.map(str::to_string), page);
        self
    }

    fn account(mut self, record: AccountRecord) -> Self {
        self.accounts.push(record);
        self
    }
}

impl TransactionsProvider for ScriptedProvider {
    fn fetch_page(
        &self,
        _access_token: &str,
        cursor: Option<&str>,
    ) -> Result<TransactionsPage, ProviderError> {
        let key = cursor.map(str::to_string);
        Ok(self.pages.get(&key).cloned().unwrap_or_else(|| TransactionsPage {
            next_cursor: cursor.unwrap_or_default().to_string(),
            ..TransactionsPage::default()
        }))
    }

    fn fetch_accounts(&self, _access_token: &str) -> Result<Vec<AccountRecord>, ProviderError> {
        Ok(self.accounts.clone())
    }
}

/// Store wrapper that fails selected writes once
struct FlakyStore {
    inner: InMemoryLedgerStore,
    fail_cursor_write: AtomicBool,
    fail_upsert_of: Mutex<Option<String>>,
}

impl FlakyStore {
    fn new() -> Self {
        Self {
            inner: InMemoryLedgerStore::new(),
            fail_cursor_write: AtomicBool::new(false),
            fail_upsert_of: Mutex::new(None),
        }
    }
}

impl LedgerStore for FlakyStore {
    fn create_user(&self, username: &str) -> Result<User> {
        self.inner.create_user(username)
    }

    fn get_user(&self, id: i64) -> Result<Option<User>> {
        self.inner.get_user(id)
    }

    fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        self.inner.get_user_by_username(username)
    }

    fn delete_user(&self, id: i64) -> Result<bool> {
        self.inner.delete_user(id)
    }

    fn create_item(&self, item: Item) -> Result<Item> {
        self.inner.create_item(item)
    }

    fn get_item(&self, id: ItemId) -> Result<Option<Item>> {
        self.inner.get_item(id)
    }

    fn list_items_for_user(&self, user_id: i64) -> Result<Vec<Item>> {
        self.inner.list_items_for_user(user_id)
    }

    fn update_item_status(&self, id: ItemId, status: ItemStatus) -> Result<()> {
        self.inner.update_item_status(id, status)
    }

    fn transition_item_status(
        &self,
        id: ItemId,
        from: ItemStatus,
        to: ItemStatus,
    ) -> Result<bool> {
        self.inner.transition_item_status(id, from, to)
    }

    fn delete_item(&self, id: ItemId) -> Result<bool> {
        self.inner.delete_item(id)
    }

    fn upsert_account(&self, item_id: ItemId, record: &AccountRecord) -> Result<Account> {
        self.inner.upsert_account(item_id, record)
    }

    fn get_account(&self, id: i64) -> Result<Option<Account>> {
        self.inner.get_account(id)
    }

    fn get_account_by_external_id(&self, external_id: &str) -> Result<Option<Account>> {
        self.inner.get_account_by_external_id(external_id)
    }

    fn list_accounts_for_item(&self, item_id: ItemId) -> Result<Vec<Account>> {
        self.inner.list_accounts_for_item(item_id)
    }

    fn delete_account(&self, id: i64) -> Result<bool> {
        self.inner.delete_account(id)
    }

    fn upsert_transaction(
        &self,
        account_id: i64,
        record: &TransactionRecord,
    ) -> Result<UpsertOutcome> {
        let mut fail = self.fail_upsert_of.lock().unwrap();
        if fail.as_deref() == Some(record.external_id.as_str()) {
            *fail = None;
            return Err(anyhow!("database is locked"));
        }
        drop(fail);
        self.inner.upsert_transaction(account_id, record)
    }

    fn delete_transaction_by_external_id(&self, external_id: &str) -> Result<bool> {
        self.inner.delete_transaction_by_external_id(external_id)
    }

    fn get_transaction(&self, id: i64) -> Result<Option<Transaction>> {
        self.inner.get_transaction(id)
    }

    fn get_transaction_by_external_id(&self, external_id: &str) -> Result<Option<Transaction>> {
        self.inner.get_transaction_by_external_id(external_id)
    }

    fn list_transactions_for_account(&self, account_id: i64) -> Result<Vec<Transaction>> {
        self.inner.list_transactions_for_account(account_id)
    }

    fn list_transactions_for_user(&self, user_id: i64) -> Result<Vec<Transaction>> {
        self.inner.list_transactions_for_user(user_id)
    }

    fn count_transactions(&self) -> Result<usize> {
        self.inner.count_transactions()
    }
}

impl CursorStore for FlakyStore {
    fn get_cursor(&self, item_id: ItemId) -> Result<Option<String>> {
        self.inner.get_cursor(item_id)
    }

    fn set_cursor(&self, item_id: ItemId, cursor: &str) -> Result<()> {
        if self.fail_cursor_write.swap(false, Ordering::SeqCst) {
            return Err(anyhow!("disk I/O error"));
        }
        self.inner.set_cursor(item_id, cursor)
    }
}

/// Helper to create provider records
fn tx(id: &str, account: &str, amount: f64) -> TransactionRecord {
    TransactionRecord::builder(id, account)
        .name(format!("Merchant {}", id))
        .amount(amount)
        .date(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap())
        .build()
}

fn page(
    added: Vec<TransactionRecord>,
    modified: Vec<TransactionRecord>,
    removed: Vec<&str>,
    next: &str,
    has_more: bool,
) -> TransactionsPage {
    TransactionsPage {
        added,
        modified,
        removed: removed.into_iter().map(RemovedTransaction::new).collect(),
        next_cursor: next.to_string(),
        has_more,
    }
}

/// The test user, created on first use
fn alice<S: LedgerStore + ?Sized>(store: &S) -> User {
    match store.get_user_by_username("alice").unwrap() {
        Some(user) => user,
        None => store.create_user("alice").unwrap(),
    }
}

/// Link an item for alice with one account
fn link_item<S: LedgerStore + ?Sized>(store: &S, external_id: &str, account: &str) -> ItemId {
    let item = store
        .create_item(Item::new(alice(store).id, external_id, "access-sandbox"))
        .unwrap();
    store
        .upsert_account(item.id, &AccountRecord::new(account, "Checking"))
        .unwrap();
    item.id
}

fn two_page_provider() -> ScriptedProvider {
    ScriptedProvider::default()
        .page(
            None,
            page(vec![tx("tx1", "acc1", 12.50)], vec![], vec![], "c1", true),
        )
        .page(
            Some("c1"),
            page(vec![], vec![tx("tx1", "acc1", 15.00)], vec![], "c2", false),
        )
}

#[test]
fn test_two_page_sync_in_memory() {
    let store = Arc::new(InMemoryLedgerStore::new());
    let item_id = link_item(store.as_ref(), "item-1", "acc1");
    let engine = SyncEngine::new(Arc::new(two_page_provider()), store.clone(), store.clone());

    let summary = engine.sync_item(item_id).unwrap();
    assert_eq!(
        (summary.added, summary.modified, summary.removed),
        (1, 1, 0)
    );
    assert_eq!(summary.cursor.as_deref(), Some("c2"));

    let stored = store.get_transaction_by_external_id("tx1").unwrap().unwrap();
    assert_eq!(stored.amount, 15.00);
    assert_eq!(store.count_transactions().unwrap(), 1);
    assert_eq!(store.get_cursor(item_id).unwrap().as_deref(), Some("c2"));
}

#[test]
fn test_two_page_sync_persists_in_sqlite() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("ledger.db");

    let item_id = {
        let store = Arc::new(SqliteLedgerStore::new(&db_path).unwrap());
        let item_id = link_item(store.as_ref(), "item-1", "acc1");
        let engine =
            SyncEngine::new(Arc::new(two_page_provider()), store.clone(), store.clone());
        engine.sync_item(item_id).unwrap();
        item_id
    };

    // Reopen: cursor and ledger survive the process
    let store = Arc::new(SqliteLedgerStore::new(&db_path).unwrap());
    assert_eq!(store.get_cursor(item_id).unwrap().as_deref(), Some("c2"));
    let stored = store.get_transaction_by_external_id("tx1").unwrap().unwrap();
    assert_eq!(stored.amount, 15.00);

    // The next run resumes from c2 and sees nothing new
    let engine = SyncEngine::new(Arc::new(two_page_provider()), store.clone(), store.clone());
    let summary = engine.sync_item(item_id).unwrap();
    assert_eq!(summary.total_changes(), 0);
    assert_eq!(summary.cursor.as_deref(), Some("c2"));
    assert_eq!(store.count_transactions().unwrap(), 1);
}

#[test]
fn test_replaying_page_after_cursor_write_failure() {
    let store = Arc::new(FlakyStore::new());
    let item_id = link_item(store.as_ref(), "item-1", "acc1");
    let provider = ScriptedProvider::default().page(
        None,
        page(
            vec![tx("tx1", "acc1", 1.0), tx("tx2", "acc1", 2.0)],
            vec![],
            vec![],
            "c1",
            false,
        ),
    );
    let engine = SyncEngine::new(Arc::new(provider), store.clone(), store.clone());

    store.fail_cursor_write.store(true, Ordering::SeqCst);
    let err = engine.sync_item(item_id).unwrap_err();
    assert!(matches!(err, SyncError::StoreWriteFailed { .. }));
    assert!(err.is_retryable());
    assert_eq!(err.resume_cursor(), None);

    // Writes landed but the cursor did not advance
    assert_eq!(store.count_transactions().unwrap(), 2);
    assert!(store.get_cursor(item_id).unwrap().is_none());

    // The replayed page converges on the same ledger
    let summary = engine.sync_item(item_id).unwrap();
    assert_eq!(summary.added, 2);
    assert_eq!(store.count_transactions().unwrap(), 2);
    assert_eq!(store.get_cursor(item_id).unwrap().as_deref(), Some("c1"));
}

#[test]
fn test_resume_after_upsert_failure_on_second_page() {
    let store = Arc::new(FlakyStore::new());
    let item_id = link_item(store.as_ref(), "item-1", "acc1");
    let provider = ScriptedProvider::default()
        .page(None, page(vec![tx("tx1", "acc1", 1.0)], vec![], vec![], "c1", true))
        .page(
            Some("c1"),
            page(vec![tx("tx2", "acc1", 2.0)], vec![], vec!["tx1"], "c2", false),
        );
    let engine = SyncEngine::new(Arc::new(provider), store.clone(), store.clone());

    *store.fail_upsert_of.lock().unwrap() = Some("tx2".to_string());
    let err = engine.sync_item(item_id).unwrap_err();
    match &err {
        SyncError::StoreWriteFailed {
            page,
            cursor,
            operation,
            ..
        } => {
            assert_eq!(*page, 2);
            assert_eq!(cursor.as_deref(), Some("c1"));
            assert_eq!(*operation, "upsert transaction");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(store.get_cursor(item_id).unwrap().as_deref(), Some("c1"));

    let summary = engine.sync_item(item_id).unwrap();
    assert_eq!(summary.pages, 1);
    assert_eq!(summary.cursor.as_deref(), Some("c2"));
    assert!(store.get_transaction_by_external_id("tx1").unwrap().is_none());
    assert!(store.get_transaction_by_external_id("tx2").unwrap().is_some());
}

#[test]
fn test_unknown_account_on_later_page_keeps_committed_cursor() {
    let store = Arc::new(InMemoryLedgerStore::new());
    let item_id = link_item(store.as_ref(), "item-1", "acc1");
    let provider = ScriptedProvider::default()
        .page(None, page(vec![tx("tx1", "acc1", 1.0)], vec![], vec![], "c1", true))
        .page(
            Some("c1"),
            page(
                vec![tx("tx2", "acc1", 2.0), tx("tx3", "acc-new", 3.0)],
                vec![],
                vec![],
                "c2",
                false,
            ),
        )
        .account(AccountRecord::new("acc1", "Checking"))
        .account(AccountRecord::new("acc-new", "Savings"));
    let engine = SyncEngine::new(Arc::new(provider), store.clone(), store.clone());

    let err = engine.sync_item(item_id).unwrap_err();
    assert!(matches!(err, SyncError::UnknownAccount { page: 2, .. }));
    assert_eq!(store.get_cursor(item_id).unwrap().as_deref(), Some("c1"));
    assert!(store.get_transaction_by_external_id("tx2").unwrap().is_none());

    // Discovering the new account unblocks the sync
    let accounts = engine.refresh_accounts(item_id).unwrap();
    assert_eq!(accounts.len(), 2);

    let summary = engine.sync_item(item_id).unwrap();
    assert_eq!(summary.added, 2);
    assert_eq!(store.count_transactions().unwrap(), 3);
}

#[test]
fn test_settled_to_pending_reversal_is_stored() {
    let store = Arc::new(InMemoryLedgerStore::new());
    let item_id = link_item(store.as_ref(), "item-1", "acc1");
    let reverted = TransactionRecord {
        pending: true,
        ..tx("tx1", "acc1", 5.0)
    };
    let provider = ScriptedProvider::default()
        .page(None, page(vec![tx("tx1", "acc1", 5.0)], vec![], vec![], "c1", true))
        .page(Some("c1"), page(vec![], vec![reverted], vec![], "c2", false));
    let engine = SyncEngine::new(Arc::new(provider), store.clone(), store.clone());

    engine.sync_item(item_id).unwrap();
    let stored = store.get_transaction_by_external_id("tx1").unwrap().unwrap();
    assert!(stored.pending);
}

#[test]
fn test_concurrent_sync_is_rejected() {
    struct GatedProvider {
        entered: Barrier,
        release: Barrier,
    }

    impl TransactionsProvider for GatedProvider {
        fn fetch_page(
            &self,
            _access_token: &str,
            _cursor: Option<&str>,
        ) -> Result<TransactionsPage, ProviderError> {
            self.entered.wait();
            self.release.wait();
            Ok(page(vec![], vec![], vec![], "c1", false))
        }

        fn fetch_accounts(&self, _access_token: &str) -> Result<Vec<AccountRecord>, ProviderError> {
            Ok(vec![])
        }
    }

    let store = Arc::new(InMemoryLedgerStore::new());
    let item_id = link_item(store.as_ref(), "item-1", "acc1");
    let provider = Arc::new(GatedProvider {
        entered: Barrier::new(2),
        release: Barrier::new(2),
    });
    let engine = Arc::new(
        SyncEngine::new(provider.clone(), store.clone(), store.clone())
            .with_policy(ConcurrentSyncPolicy::Reject),
    );

    let running = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || engine.sync_item(item_id))
    };

    provider.entered.wait();
    assert!(engine.is_syncing(item_id));
    let err = engine.sync_item(item_id).unwrap_err();
    assert!(matches!(err, SyncError::SyncAlreadyInProgress { .. }));

    provider.release.wait();
    assert!(running.join().unwrap().is_ok());
    assert!(!engine.is_syncing(item_id));
}

#[test]
fn test_concurrent_sync_waits_when_configured() {
    /// Blocks only the first fetch until released
    struct GateFirstProvider {
        gated: AtomicBool,
        entered: Barrier,
        release: Barrier,
    }

    impl TransactionsProvider for GateFirstProvider {
        fn fetch_page(
            &self,
            _access_token: &str,
            cursor: Option<&str>,
        ) -> Result<TransactionsPage, ProviderError> {
            if self.gated.swap(false, Ordering::SeqCst) {
                self.entered.wait();
                self.release.wait();
            }
            match cursor {
                None => Ok(page(vec![tx("tx1", "acc1", 1.0)], vec![], vec![], "c1", false)),
                Some(c) => Ok(page(vec![], vec![], vec![], c, false)),
            }
        }

        fn fetch_accounts(&self, _access_token: &str) -> Result<Vec<AccountRecord>, ProviderError> {
            Ok(vec![])
        }
    }

    let store = Arc::new(InMemoryLedgerStore::new());
    let item_id = link_item(store.as_ref(), "item-1", "acc1");
    let provider = Arc::new(GateFirstProvider {
        gated: AtomicBool::new(true),
        entered: Barrier::new(2),
        release: Barrier::new(2),
    });
    let settings = SyncSettings {
        concurrent_sync: ConcurrentSyncPolicy::Wait,
        ..SyncSettings::default()
    };
    let engine = Arc::new(
        SyncEngine::new(provider.clone(), store.clone(), store.clone()).with_settings(&settings),
    );

    let first = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || engine.sync_item(item_id))
    };
    provider.entered.wait();

    let second = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || engine.sync_item(item_id))
    };
    thread::sleep(Duration::from_millis(50));
    assert!(!second.is_finished());
    assert!(engine.is_syncing(item_id));

    provider.release.wait();
    let first = first.join().unwrap().unwrap();
    let second = second.join().unwrap().unwrap();
    assert_eq!(first.added, 1);
    assert_eq!(second.total_changes(), 0);
    assert_eq!(second.cursor.as_deref(), Some("c1"));
    assert_eq!(store.count_transactions().unwrap(), 1);
    assert!(!engine.is_syncing(item_id));
}

#[test]
fn test_user_ownership_in_sqlite() {
    let temp_dir = TempDir::new().unwrap();
    let store = SqliteLedgerStore::new(temp_dir.path().join("ledger.db")).unwrap();

    assert!(store.create_item(Item::new(7, "item-1", "token")).is_err());

    let item_id = link_item(&store, "item-1", "acc1");
    let user = alice(&store);
    assert_eq!(store.list_items_for_user(user.id).unwrap().len(), 1);

    assert!(store.delete_user(user.id).unwrap());
    assert!(store.get_item(item_id).unwrap().is_none());
    assert!(store.get_account_by_external_id("acc1").unwrap().is_none());
}

#[test]
fn test_cancel_between_pages() {
    struct CancellingProvider {
        inner: ScriptedProvider,
        token: CancelToken,
    }

    impl TransactionsProvider for CancellingProvider {
        fn fetch_page(
            &self,
            access_token: &str,
            cursor: Option<&str>,
        ) -> Result<TransactionsPage, ProviderError> {
            // Cancellation arrives while the first page is in flight
            self.token.cancel();
            self.inner.fetch_page(access_token, cursor)
        }

        fn fetch_accounts(&self, access_token: &str) -> Result<Vec<AccountRecord>, ProviderError> {
            self.inner.fetch_accounts(access_token)
        }
    }

    let store = Arc::new(InMemoryLedgerStore::new());
    let item_id = link_item(store.as_ref(), "item-1", "acc1");
    let token = CancelToken::new();
    let provider = CancellingProvider {
        inner: two_page_provider(),
        token: token.clone(),
    };
    let engine = SyncEngine::new(Arc::new(provider), store.clone(), store.clone());

    let err = engine.sync_item_with_cancel(item_id, &token).unwrap_err();
    match &err {
        SyncError::Cancelled { pages, cursor, .. } => {
            assert_eq!(*pages, 1);
            assert_eq!(cursor.as_deref(), Some("c1"));
        }
        other => panic!("unexpected error: {other}"),
    }

    // The in-flight page was committed in full
    let stored = store.get_transaction_by_external_id("tx1").unwrap().unwrap();
    assert_eq!(stored.amount, 12.50);
    assert_eq!(store.get_cursor(item_id).unwrap().as_deref(), Some("c1"));
}

#[test]
fn test_sync_items_in_parallel_with_sqlite() {
    /// Serves one page per access token
    struct PerTokenProvider(HashMap<String, TransactionsPage>);

    impl TransactionsProvider for PerTokenProvider {
        fn fetch_page(
            &self,
            access_token: &str,
            _cursor: Option<&str>,
        ) -> Result<TransactionsPage, ProviderError> {
            self.0
                .get(access_token)
                .cloned()
                .ok_or_else(|| ProviderError::Transport(format!("no feed for {}", access_token)))
        }

        fn fetch_accounts(&self, _access_token: &str) -> Result<Vec<AccountRecord>, ProviderError> {
            Ok(vec![])
        }
    }

    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(SqliteLedgerStore::new(temp_dir.path().join("ledger.db")).unwrap());

    let user = alice(store.as_ref());
    let mut feeds = HashMap::new();
    let mut item_ids = Vec::new();
    for n in 1..=4 {
        let token = format!("token-{}", n);
        let account = format!("acc{}", n);
        let item = store
            .create_item(Item::new(user.id, format!("item-{}", n), token.clone()))
            .unwrap();
        store
            .upsert_account(item.id, &AccountRecord::new(account.clone(), "Checking"))
            .unwrap();
        feeds.insert(
            token,
            page(
                vec![tx(&format!("tx{}", n), &account, n as f64)],
                vec![],
                vec![],
                &format!("c{}", n),
                false,
            ),
        );
        item_ids.push(item.id);
    }
    let engine = SyncEngine::new(Arc::new(PerTokenProvider(feeds)), store.clone(), store.clone());

    let results = engine.sync_items(&item_ids);
    assert_eq!(results.len(), 4);
    for (n, (item_id, result)) in results.iter().enumerate() {
        assert_eq!(*item_id, item_ids[n]);
        assert_eq!(result.as_ref().unwrap().added, 1);
        assert_eq!(
            store.get_cursor(*item_id).unwrap(),
            Some(format!("c{}", n + 1))
        );
    }
    assert_eq!(store.count_transactions().unwrap(), 4);
    assert_eq!(store.list_transactions_for_user(user.id).unwrap().len(), 4);
}

#[test]
fn test_sync_user_across_items() {
    let store = Arc::new(InMemoryLedgerStore::new());
    let first = link_item(store.as_ref(), "item-1", "acc1");
    let second = link_item(store.as_ref(), "item-2", "acc2");
    let provider = ScriptedProvider::default().page(
        None,
        page(vec![tx("tx1", "acc1", 1.0)], vec![], vec![], "c1", false),
    );
    let engine = SyncEngine::new(Arc::new(provider), store.clone(), store.clone());

    store.update_item_status(second, ItemStatus::Revoked).unwrap();
    let results = engine.sync_user(alice(store.as_ref()).id).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].0, first);
    assert_eq!(results[0].1.as_ref().unwrap().added, 1);

    let err = engine.sync_item(second).unwrap_err();
    assert!(matches!(
        err,
        SyncError::ItemUnavailable {
            reason: Unavailability::Revoked,
            ..
        }
    ));
}

#[test]
fn test_unlink_item_removes_history() {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(SqliteLedgerStore::new(temp_dir.path().join("ledger.db")).unwrap());
    let item_id = link_item(store.as_ref(), "item-1", "acc1");
    let engine = SyncEngine::new(Arc::new(two_page_provider()), store.clone(), store.clone());
    engine.sync_item(item_id).unwrap();
    assert_eq!(store.list_transactions_for_user(1).unwrap().len(), 1);

    assert!(store.delete_item(item_id).unwrap());
    assert_eq!(store.count_transactions().unwrap(), 0);
    assert!(store.get_account_by_external_id("acc1").unwrap().is_none());

    let err = engine.sync_item(item_id).unwrap_err();
    assert!(matches!(
        err,
        SyncError::ItemUnavailable {
            reason: Unavailability::NotFound,
            ..
        }
    ));
}
