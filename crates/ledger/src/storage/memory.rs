//! In-memory storage implementation
//!
//! Used for tests and for running the engine without a database.

use anyhow::{Result, bail};
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use super::{CursorStore, LedgerStore, UpsertOutcome};
use crate::models::{
    Account, AccountRecord, Item, ItemId, ItemStatus, Transaction, TransactionRecord, User,
};

/// All tables behind one lock so cascading deletes are atomic
#[derive(Default)]
struct Tables {
    users: BTreeMap<i64, User>,
    items: BTreeMap<i64, Item>,
    accounts: BTreeMap<i64, Account>,
    transactions: BTreeMap<i64, Transaction>,
    /// external account id -> account id
    account_index: HashMap<String, i64>,
    /// external transaction id -> transaction id
    transaction_index: HashMap<String, i64>,
    next_user_id: i64,
    next_item_id: i64,
    next_account_id: i64,
    next_transaction_id: i64,
}

impl Tables {
    fn remove_transactions_for_accounts(&mut self, account_ids: &[i64]) {
        let doomed: Vec<i64> = self
            .transactions
            .values()
            .filter(|t| account_ids.contains(&t.account_id))
            .map(|t| t.id)
            .collect();

        for id in doomed {
            if let Some(tx) = self.transactions.remove(&id) {
                self.transaction_index.remove(&tx.external_id);
            }
        }
    }

    fn remove_accounts(&mut self, account_ids: &[i64]) {
        self.remove_transactions_for_accounts(account_ids);
        for id in account_ids {
            if let Some(account) = self.accounts.remove(id) {
                self.account_index.remove(&account.external_id);
            }
        }
    }

    fn remove_items(&mut self, item_ids: &[ItemId]) {
        let account_ids: Vec<i64> = self
            .accounts
            .values()
            .filter(|a| item_ids.contains(&a.item_id))
            .map(|a| a.id)
            .collect();
        self.remove_accounts(&account_ids);
        for id in item_ids {
            self.items.remove(&id.0);
        }
    }
}

/// In-memory implementation of LedgerStore and CursorStore
pub struct InMemoryLedgerStore {
    tables: RwLock<Tables>,
}

impl InMemoryLedgerStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
        }
    }
}

impl Default for InMemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

fn sort_newest_first(transactions: &mut [Transaction]) {
    transactions.sort_by(|a, b| b.date.cmp(&a.date).then(b.id.cmp(&a.id)));
}

impl LedgerStore for InMemoryLedgerStore {
    fn create_user(&self, username: &str) -> Result<User> {
        let mut tables = self.tables.write().unwrap();
        if tables.users.values().any(|u| u.username == username) {
            bail!("Username {} is already taken", username);
        }

        tables.next_user_id += 1;
        let user = User {
            id: tables.next_user_id,
            ..User::new(username)
        };
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    fn get_user(&self, id: i64) -> Result<Option<User>> {
        let tables = self.tables.read().unwrap();
        Ok(tables.users.get(&id).cloned())
    }

    fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let tables = self.tables.read().unwrap();
        Ok(tables
            .users
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    fn delete_user(&self, id: i64) -> Result<bool> {
        let mut tables = self.tables.write().unwrap();
        if tables.users.remove(&id).is_none() {
            return Ok(false);
        }

        let item_ids: Vec<ItemId> = tables
            .items
            .values()
            .filter(|i| i.user_id == id)
            .map(|i| i.id)
            .collect();
        tables.remove_items(&item_ids);
        Ok(true)
    }

    fn create_item(&self, item: Item) -> Result<Item> {
        let mut tables = self.tables.write().unwrap();
        if !tables.users.contains_key(&item.user_id) {
            bail!("User {} not found", item.user_id);
        }

        let existing = tables
            .items
            .values()
            .find(|i| i.user_id == item.user_id && i.external_id == item.external_id)
            .map(|i| i.id);

        if let Some(id) = existing {
            let stored = tables.items.get_mut(&id.0).expect("indexed item exists");
            stored.access_token = item.access_token;
            stored.institution_id = item.institution_id.or(stored.institution_id.take());
            stored.status = ItemStatus::Linked;
            stored.updated_at = Utc::now();
            return Ok(stored.clone());
        }

        tables.next_item_id += 1;
        let id = ItemId(tables.next_item_id);
        let now = Utc::now();
        let stored = Item {
            id,
            created_at: now,
            updated_at: now,
            ..item
        };
        tables.items.insert(id.0, stored.clone());
        Ok(stored)
    }

    fn get_item(&self, id: ItemId) -> Result<Option<Item>> {
        let tables = self.tables.read().unwrap();
        Ok(tables.items.get(&id.0).cloned())
    }

    fn list_items_for_user(&self, user_id: i64) -> Result<Vec<Item>> {
        let tables = self.tables.read().unwrap();
        Ok(tables
            .items
            .values()
            .filter(|i| i.user_id == user_id)
            .cloned()
            .collect())
    }

    fn update_item_status(&self, id: ItemId, status: ItemStatus) -> Result<()> {
        let mut tables = self.tables.write().unwrap();
        let Some(item) = tables.items.get_mut(&id.0) else {
            bail!("Item {} not found", id);
        };
        item.status = status;
        item.updated_at = Utc::now();
        Ok(())
    }

    fn transition_item_status(
        &self,
        id: ItemId,
        from: ItemStatus,
        to: ItemStatus,
    ) -> Result<bool> {
        let mut tables = self.tables.write().unwrap();
        match tables.items.get_mut(&id.0) {
            Some(item) if item.status == from => {
                item.status = to;
                item.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn delete_item(&self, id: ItemId) -> Result<bool> {
        let mut tables = self.tables.write().unwrap();
        if !tables.items.contains_key(&id.0) {
            return Ok(false);
        }
        tables.remove_items(&[id]);
        Ok(true)
    }

    fn upsert_account(&self, item_id: ItemId, record: &AccountRecord) -> Result<Account> {
        let mut tables = self.tables.write().unwrap();
        if !tables.items.contains_key(&item_id.0) {
            bail!("Item {} not found", item_id);
        }

        let now = Utc::now();
        if let Some(&id) = tables.account_index.get(&record.external_id) {
            let account = tables.accounts.get_mut(&id).expect("indexed account exists");
            account.item_id = item_id;
            account.name = record.name.clone();
            account.mask = record.mask.clone();
            account.kind = record.kind.clone();
            account.subtype = record.subtype.clone();
            account.updated_at = now;
            return Ok(account.clone());
        }

        tables.next_account_id += 1;
        let account = Account {
            id: tables.next_account_id,
            item_id,
            external_id: record.external_id.clone(),
            name: record.name.clone(),
            mask: record.mask.clone(),
            kind: record.kind.clone(),
            subtype: record.subtype.clone(),
            created_at: now,
            updated_at: now,
        };
        tables
            .account_index
            .insert(account.external_id.clone(), account.id);
        tables.accounts.insert(account.id, account.clone());
        Ok(account)
    }

    fn get_account(&self, id: i64) -> Result<Option<Account>> {
        let tables = self.tables.read().unwrap();
        Ok(tables.accounts.get(&id).cloned())
    }

    fn get_account_by_external_id(&self, external_id: &str) -> Result<Option<Account>> {
        let tables = self.tables.read().unwrap();
        Ok(tables
            .account_index
            .get(external_id)
            .and_then(|id| tables.accounts.get(id))
            .cloned())
    }

    fn list_accounts_for_item(&self, item_id: ItemId) -> Result<Vec<Account>> {
        let tables = self.tables.read().unwrap();
        Ok(tables
            .accounts
            .values()
            .filter(|a| a.item_id == item_id)
            .cloned()
            .collect())
    }

    fn delete_account(&self, id: i64) -> Result<bool> {
        let mut tables = self.tables.write().unwrap();
        if !tables.accounts.contains_key(&id) {
            return Ok(false);
        }
        tables.remove_accounts(&[id]);
        Ok(true)
    }

    fn upsert_transaction(
        &self,
        account_id: i64,
        record: &TransactionRecord,
    ) -> Result<UpsertOutcome> {
        let mut tables = self.tables.write().unwrap();
        if !tables.accounts.contains_key(&account_id) {
            bail!("Account {} not found", account_id);
        }

        if let Some(&id) = tables.transaction_index.get(&record.external_id) {
            let stored = tables
                .transactions
                .get_mut(&id)
                .expect("indexed transaction exists");
            let previous_pending = stored.pending;
            stored.apply(account_id, record);
            return Ok(UpsertOutcome {
                id,
                created: false,
                previous_pending: Some(previous_pending),
            });
        }

        tables.next_transaction_id += 1;
        let id = tables.next_transaction_id;
        tables
            .transaction_index
            .insert(record.external_id.clone(), id);
        tables
            .transactions
            .insert(id, Transaction::from_record(id, account_id, record));

        Ok(UpsertOutcome {
            id,
            created: true,
            previous_pending: None,
        })
    }

    fn delete_transaction_by_external_id(&self, external_id: &str) -> Result<bool> {
        let mut tables = self.tables.write().unwrap();
        let Some(id) = tables.transaction_index.remove(external_id) else {
            return Ok(false);
        };
        tables.transactions.remove(&id);
        Ok(true)
    }

    fn get_transaction(&self, id: i64) -> Result<Option<Transaction>> {
        let tables = self.tables.read().unwrap();
        Ok(tables.transactions.get(&id).cloned())
    }

    fn get_transaction_by_external_id(&self, external_id: &str) -> Result<Option<Transaction>> {
        let tables = self.tables.read().unwrap();
        Ok(tables
            .transaction_index
            .get(external_id)
            .and_then(|id| tables.transactions.get(id))
            .cloned())
    }

    fn list_transactions_for_account(&self, account_id: i64) -> Result<Vec<Transaction>> {
        let tables = self.tables.read().unwrap();
        let mut transactions: Vec<Transaction> = tables
            .transactions
            .values()
            .filter(|t| t.account_id == account_id)
            .cloned()
            .collect();
        sort_newest_first(&mut transactions);
        Ok(transactions)
    }

    fn list_transactions_for_user(&self, user_id: i64) -> Result<Vec<Transaction>> {
        let tables = self.tables.read().unwrap();
        let mut transactions: Vec<Transaction> = tables
            .transactions
            .values()
            .filter(|t| {
                tables
                    .accounts
                    .get(&t.account_id)
                    .and_then(|a| tables.items.get(&a.item_id.0))
                    .is_some_and(|i| i.user_id == user_id)
            })
            .cloned()
            .collect();
        sort_newest_first(&mut transactions);
        Ok(transactions)
    }

    fn count_transactions(&self) -> Result<usize> {
        let tables = self.tables.read().unwrap();
        Ok(tables.transactions.len())
    }
}

impl CursorStore for InMemoryLedgerStore {
    fn get_cursor(&self, item_id: ItemId) -> Result<Option<String>> {
        let tables = self.tables.read().unwrap();
        Ok(tables.items.get(&item_id.0).and_then(|i| i.cursor.clone()))
    }

    fn set_cursor(&self, item_id: ItemId, cursor: &str) -> Result<()> {
        let mut tables = self.tables.write().unwrap();
        let Some(item) = tables.items.get_mut(&item_id.0) else {
            bail!("Item {} not found", item_id);
        };
        item.cursor = Some(cursor.to_string());
        item.updated_at = Utc::now();
        Ok(())
    }
}
