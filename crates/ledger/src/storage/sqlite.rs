//! SQLite-based ledger storage

use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use rusqlite_migration::{M, Migrations};

use super::traits::{CursorStore, LedgerStore, UpsertOutcome};
use crate::models::{
    Account, AccountRecord, Item, ItemId, ItemStatus, Transaction, TransactionRecord, User,
};

/// Database migrations
///
/// Each migration is applied in order. The user_version pragma tracks which
/// migrations have been applied.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        // Migration 1: Initial schema
        M::up(
            r#"
            -- Owners of linked items
            CREATE TABLE users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- Linked items; the cursor column is owned by the sync engine
            CREATE TABLE items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                access_token TEXT NOT NULL,
                external_id TEXT NOT NULL,
                institution_id TEXT,
                status TEXT NOT NULL DEFAULT 'linked',
                transactions_cursor TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (user_id, external_id),
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );

            CREATE INDEX idx_items_user_id ON items(user_id);

            -- Accounts discovered under an item
            CREATE TABLE accounts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                item_id INTEGER NOT NULL,
                external_id TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                mask TEXT,
                type TEXT NOT NULL,
                subtype TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (item_id) REFERENCES items(id) ON DELETE CASCADE
            );

            CREATE INDEX idx_accounts_item_id ON accounts(item_id);

            -- Ledger entries keyed by provider transaction id
            CREATE TABLE transactions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_id INTEGER NOT NULL,
                external_id TEXT NOT NULL UNIQUE,
                type TEXT NOT NULL,
                name TEXT NOT NULL,
                amount REAL NOT NULL,
                iso_currency_code TEXT,
                unofficial_currency_code TEXT,
                date TEXT NOT NULL,
                pending INTEGER NOT NULL DEFAULT 0,
                category_data TEXT NOT NULL DEFAULT 'null',
                account_owner TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (account_id) REFERENCES accounts(id) ON DELETE CASCADE
            );

            CREATE INDEX idx_transactions_account_date
                ON transactions(account_id, date DESC);
            "#,
        ),
    ])
}

const USER_COLUMNS: &str = "id, username, created_at, updated_at";

const ITEM_COLUMNS: &str = "id, user_id, access_token, external_id, institution_id, status,
     transactions_cursor, created_at, updated_at";

const ACCOUNT_COLUMNS: &str =
    "id, item_id, external_id, name, mask, type, subtype, created_at, updated_at";

const TRANSACTION_COLUMNS: &str = "t.id, t.account_id, t.external_id, t.type, t.name, t.amount,
     t.iso_currency_code, t.unofficial_currency_code, t.date, t.pending, t.category_data,
     t.account_owner, t.created_at, t.updated_at";

/// Date format for the transactions.date column
const DATE_FORMAT: &str = "%Y-%m-%d";

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn conversion_error(
    idx: usize,
    e: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into())
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        created_at: parse_timestamp(&row.get::<_, String>(2)?),
        updated_at: parse_timestamp(&row.get::<_, String>(3)?),
    })
}

fn item_from_row(row: &Row<'_>) -> rusqlite::Result<Item> {
    let status: String = row.get(5)?;
    let status = status
        .parse::<ItemStatus>()
        .map_err(|e| conversion_error(5, e))?;

    Ok(Item {
        id: ItemId(row.get(0)?),
        user_id: row.get(1)?,
        access_token: row.get(2)?,
        external_id: row.get(3)?,
        institution_id: row.get(4)?,
        status,
        cursor: row.get(6)?,
        created_at: parse_timestamp(&row.get::<_, String>(7)?),
        updated_at: parse_timestamp(&row.get::<_, String>(8)?),
    })
}

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<Account> {
    Ok(Account {
        id: row.get(0)?,
        item_id: ItemId(row.get(1)?),
        external_id: row.get(2)?,
        name: row.get(3)?,
        mask: row.get(4)?,
        kind: row.get(5)?,
        subtype: row.get(6)?,
        created_at: parse_timestamp(&row.get::<_, String>(7)?),
        updated_at: parse_timestamp(&row.get::<_, String>(8)?),
    })
}

fn transaction_from_row(row: &Row<'_>) -> rusqlite::Result<Transaction> {
    let date: String = row.get(8)?;
    let date = NaiveDate::parse_from_str(&date, DATE_FORMAT).map_err(|e| conversion_error(8, e))?;

    let category: String = row.get(10)?;
    let category = serde_json::from_str(&category).map_err(|e| conversion_error(10, e))?;

    Ok(Transaction {
        id: row.get(0)?,
        account_id: row.get(1)?,
        external_id: row.get(2)?,
        kind: row.get(3)?,
        name: row.get(4)?,
        amount: row.get(5)?,
        iso_currency_code: row.get(6)?,
        unofficial_currency_code: row.get(7)?,
        date,
        pending: row.get(9)?,
        category,
        account_owner: row.get(11)?,
        created_at: parse_timestamp(&row.get::<_, String>(12)?),
        updated_at: parse_timestamp(&row.get::<_, String>(13)?),
    })
}

/// SQLite-based ledger storage
///
/// A single connection behind a mutex; every trait method runs under the
/// lock, so writes are serialized and immediately visible to later reads.
pub struct SqliteLedgerStore {
    conn: Mutex<Connection>,
}

impl SqliteLedgerStore {
    /// Open (or create) a ledger database at `db_path`
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;
        Self::from_connection(conn)
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::from_connection(conn)
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        // WAL lets readers proceed during a write; foreign_keys is required
        // for the user -> item -> account -> transaction cascades.
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            "#,
        )?;

        migrations()
            .to_latest(&mut conn)
            .context("Failed to run database migrations")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn load_user(conn: &Connection, id: i64) -> Result<Option<User>> {
        let user = conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"),
                [id],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    fn load_item(conn: &Connection, id: i64) -> Result<Option<Item>> {
        let item = conn
            .query_row(
                &format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = ?"),
                [id],
                item_from_row,
            )
            .optional()?;
        Ok(item)
    }

    fn load_account(conn: &Connection, id: i64) -> Result<Option<Account>> {
        let account = conn
            .query_row(
                &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?"),
                [id],
                account_from_row,
            )
            .optional()?;
        Ok(account)
    }
}

impl LedgerStore for SqliteLedgerStore {
    fn create_user(&self, username: &str) -> Result<User> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();

        let id: i64 = conn
            .query_row(
                "INSERT INTO users (username, created_at, updated_at)
                 VALUES (?, ?, ?)
                 RETURNING id",
                params![username, now, now],
                |row| row.get(0),
            )
            .with_context(|| format!("Failed to create user {}", username))?;

        Self::load_user(&conn, id)?.context("User vanished after insert")
    }

    fn get_user(&self, id: i64) -> Result<Option<User>> {
        let conn = self.conn.lock().unwrap();
        Self::load_user(&conn, id)
    }

    fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let conn = self.conn.lock().unwrap();

        let user = conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?"),
                [username],
                user_from_row,
            )
            .optional()?;

        Ok(user)
    }

    fn delete_user(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        // Cascades to items, accounts and transactions
        let deleted = conn.execute("DELETE FROM users WHERE id = ?", [id])?;
        Ok(deleted > 0)
    }

    fn create_item(&self, item: Item) -> Result<Item> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();

        let id: i64 = conn
            .query_row(
                "INSERT INTO items
                 (user_id, access_token, external_id, institution_id, status, created_at, updated_at)
                 VALUES (?, ?, ?, ?, 'linked', ?, ?)
                 ON CONFLICT(user_id, external_id) DO UPDATE SET
                    access_token = excluded.access_token,
                    institution_id = COALESCE(excluded.institution_id, items.institution_id),
                    status = 'linked',
                    updated_at = excluded.updated_at
                 RETURNING id",
                params![
                    item.user_id,
                    item.access_token,
                    item.external_id,
                    item.institution_id,
                    now,
                    now,
                ],
                |row| row.get(0),
            )
            .context("Failed to store item")?;

        Self::load_item(&conn, id)?.context("Item vanished after insert")
    }

    fn get_item(&self, id: ItemId) -> Result<Option<Item>> {
        let conn = self.conn.lock().unwrap();
        Self::load_item(&conn, id.0)
    }

    fn list_items_for_user(&self, user_id: i64) -> Result<Vec<Item>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(&format!(
            "SELECT {ITEM_COLUMNS} FROM items WHERE user_id = ? ORDER BY id"
        ))?;
        let items = stmt
            .query_map([user_id], item_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(items)
    }

    fn update_item_status(&self, id: ItemId, status: ItemStatus) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        let updated = conn.execute(
            "UPDATE items SET status = ?, updated_at = ? WHERE id = ?",
            params![status.as_str(), Utc::now().to_rfc3339(), id.0],
        )?;
        if updated == 0 {
            bail!("Item {} not found", id);
        }

        Ok(())
    }

    fn transition_item_status(
        &self,
        id: ItemId,
        from: ItemStatus,
        to: ItemStatus,
    ) -> Result<bool> {
        let conn = self.conn.lock().unwrap();

        let updated = conn.execute(
            "UPDATE items SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
            params![to.as_str(), Utc::now().to_rfc3339(), id.0, from.as_str()],
        )?;

        Ok(updated > 0)
    }

    fn delete_item(&self, id: ItemId) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        // Cascades to accounts and their transactions
        let deleted = conn.execute("DELETE FROM items WHERE id = ?", [id.0])?;
        Ok(deleted > 0)
    }

    fn upsert_account(&self, item_id: ItemId, record: &AccountRecord) -> Result<Account> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();

        // ON CONFLICT DO UPDATE rather than INSERT OR REPLACE: a replace
        // deletes the old row and would cascade away its transactions.
        let id: i64 = conn
            .query_row(
                "INSERT INTO accounts
                 (item_id, external_id, name, mask, type, subtype, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(external_id) DO UPDATE SET
                    item_id = excluded.item_id,
                    name = excluded.name,
                    mask = excluded.mask,
                    type = excluded.type,
                    subtype = excluded.subtype,
                    updated_at = excluded.updated_at
                 RETURNING id",
                params![
                    item_id.0,
                    record.external_id,
                    record.name,
                    record.mask,
                    record.kind,
                    record.subtype,
                    now,
                    now,
                ],
                |row| row.get(0),
            )
            .with_context(|| format!("Failed to store account {}", record.external_id))?;

        Self::load_account(&conn, id)?.context("Account vanished after insert")
    }

    fn get_account(&self, id: i64) -> Result<Option<Account>> {
        let conn = self.conn.lock().unwrap();
        Self::load_account(&conn, id)
    }

    fn get_account_by_external_id(&self, external_id: &str) -> Result<Option<Account>> {
        let conn = self.conn.lock().unwrap();

        let account = conn
            .query_row(
                &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE external_id = ?"),
                [external_id],
                account_from_row,
            )
            .optional()?;

        Ok(account)
    }

    fn list_accounts_for_item(&self, item_id: ItemId) -> Result<Vec<Account>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE item_id = ? ORDER BY id"
        ))?;
        let accounts = stmt
            .query_map([item_id.0], account_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(accounts)
    }

    fn delete_account(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute("DELETE FROM accounts WHERE id = ?", [id])?;
        Ok(deleted > 0)
    }

    fn upsert_transaction(
        &self,
        account_id: i64,
        record: &TransactionRecord,
    ) -> Result<UpsertOutcome> {
        let category = serde_json::to_string(&record.category)?;
        let now = Utc::now().to_rfc3339();

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let previous_pending: Option<bool> = tx
            .query_row(
                "SELECT pending FROM transactions WHERE external_id = ?",
                [&record.external_id],
                |row| row.get(0),
            )
            .optional()?;

        let id: i64 = tx
            .query_row(
                "INSERT INTO transactions
                 (account_id, external_id, type, name, amount, iso_currency_code,
                  unofficial_currency_code, date, pending, category_data, account_owner,
                  created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(external_id) DO UPDATE SET
                    account_id = excluded.account_id,
                    type = excluded.type,
                    name = excluded.name,
                    amount = excluded.amount,
                    iso_currency_code = excluded.iso_currency_code,
                    unofficial_currency_code = excluded.unofficial_currency_code,
                    date = excluded.date,
                    pending = excluded.pending,
                    category_data = excluded.category_data,
                    account_owner = excluded.account_owner,
                    updated_at = excluded.updated_at
                 RETURNING id",
                params![
                    account_id,
                    record.external_id,
                    record.kind,
                    record.name,
                    record.amount,
                    record.iso_currency_code,
                    record.unofficial_currency_code,
                    record.date.format(DATE_FORMAT).to_string(),
                    record.pending,
                    category,
                    record.account_owner,
                    now,
                    now,
                ],
                |row| row.get(0),
            )
            .with_context(|| format!("Failed to store transaction {}", record.external_id))?;

        tx.commit()?;

        Ok(UpsertOutcome {
            id,
            created: previous_pending.is_none(),
            previous_pending,
        })
    }

    fn delete_transaction_by_external_id(&self, external_id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(
            "DELETE FROM transactions WHERE external_id = ?",
            [external_id],
        )?;
        Ok(deleted > 0)
    }

    fn get_transaction(&self, id: i64) -> Result<Option<Transaction>> {
        let conn = self.conn.lock().unwrap();

        let transaction = conn
            .query_row(
                &format!("SELECT {TRANSACTION_COLUMNS} FROM transactions t WHERE t.id = ?"),
                [id],
                transaction_from_row,
            )
            .optional()?;

        Ok(transaction)
    }

    fn get_transaction_by_external_id(&self, external_id: &str) -> Result<Option<Transaction>> {
        let conn = self.conn.lock().unwrap();

        let transaction = conn
            .query_row(
                &format!("SELECT {TRANSACTION_COLUMNS} FROM transactions t WHERE t.external_id = ?"),
                [external_id],
                transaction_from_row,
            )
            .optional()?;

        Ok(transaction)
    }

    fn list_transactions_for_account(&self, account_id: i64) -> Result<Vec<Transaction>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions t
             WHERE t.account_id = ?
             ORDER BY t.date DESC, t.id DESC"
        ))?;
        let transactions = stmt
            .query_map([account_id], transaction_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(transactions)
    }

    fn list_transactions_for_user(&self, user_id: i64) -> Result<Vec<Transaction>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions t
             INNER JOIN accounts a ON t.account_id = a.id
             INNER JOIN items i ON a.item_id = i.id
             WHERE i.user_id = ?
             ORDER BY t.date DESC, t.id DESC"
        ))?;
        let transactions = stmt
            .query_map([user_id], transaction_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(transactions)
    }

    fn count_transactions(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM transactions", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

impl CursorStore for SqliteLedgerStore {
    fn get_cursor(&self, item_id: ItemId) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();

        let cursor: Option<Option<String>> = conn
            .query_row(
                "SELECT transactions_cursor FROM items WHERE id = ?",
                [item_id.0],
                |row| row.get(0),
            )
            .optional()?;

        Ok(cursor.flatten())
    }

    fn set_cursor(&self, item_id: ItemId, cursor: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        let updated = conn.execute(
            "UPDATE items SET transactions_cursor = ?, updated_at = ? WHERE id = ?",
            params![cursor, Utc::now().to_rfc3339(), item_id.0],
        )?;
        if updated == 0 {
            bail!("Item {} not found", item_id);
        }

        Ok(())
    }
}
