//! Transaction models: the provider's view and the stored ledger row

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A transaction as reported by the provider in an added or modified set
///
/// The amount is kept exactly as the provider sent it (positive = money
/// leaving the account). It is never recomputed locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Provider transaction identifier (natural key)
    pub external_id: String,
    /// Provider identifier of the owning account
    pub account_external_id: String,
    /// Transaction kind (e.g. "place", "digital", "special")
    pub kind: String,
    pub name: String,
    pub amount: f64,
    pub iso_currency_code: Option<String>,
    pub unofficial_currency_code: Option<String>,
    pub date: NaiveDate,
    pub pending: bool,
    /// Merged legacy and normalized category data
    pub category: serde_json::Value,
    pub account_owner: Option<String>,
}

impl TransactionRecord {
    /// Create a new record builder
    pub fn builder(
        external_id: impl Into<String>,
        account_external_id: impl Into<String>,
    ) -> TransactionRecordBuilder {
        TransactionRecordBuilder::new(external_id.into(), account_external_id.into())
    }

    /// Currency code to display: the ISO code when present, otherwise the unofficial one
    pub fn currency(&self) -> Option<&str> {
        self.iso_currency_code
            .as_deref()
            .or(self.unofficial_currency_code.as_deref())
    }
}

/// Builder for creating TransactionRecord instances
pub struct TransactionRecordBuilder {
    external_id: String,
    account_external_id: String,
    kind: String,
    name: String,
    amount: f64,
    iso_currency_code: Option<String>,
    unofficial_currency_code: Option<String>,
    date: Option<NaiveDate>,
    pending: bool,
    category: serde_json::Value,
    account_owner: Option<String>,
}

impl TransactionRecordBuilder {
    fn new(external_id: String, account_external_id: String) -> Self {
        Self {
            external_id,
            account_external_id,
            kind: "unresolved".to_string(),
            name: String::new(),
            amount: 0.0,
            iso_currency_code: Some("USD".to_string()),
            unofficial_currency_code: None,
            date: None,
            pending: false,
            category: serde_json::Value::Null,
            account_owner: None,
        }
    }

    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn amount(mut self, amount: f64) -> Self {
        self.amount = amount;
        self
    }

    pub fn iso_currency_code(mut self, code: Option<String>) -> Self {
        self.iso_currency_code = code;
        self
    }

    pub fn unofficial_currency_code(mut self, code: Option<String>) -> Self {
        self.unofficial_currency_code = code;
        self
    }

    pub fn date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    pub fn pending(mut self, pending: bool) -> Self {
        self.pending = pending;
        self
    }

    pub fn category(mut self, category: serde_json::Value) -> Self {
        self.category = category;
        self
    }

    pub fn account_owner(mut self, owner: Option<String>) -> Self {
        self.account_owner = owner;
        self
    }

    pub fn build(self) -> TransactionRecord {
        TransactionRecord {
            external_id: self.external_id,
            account_external_id: self.account_external_id,
            kind: self.kind,
            name: self.name,
            amount: self.amount,
            iso_currency_code: self.iso_currency_code,
            unofficial_currency_code: self.unofficial_currency_code,
            date: self.date.unwrap_or_else(|| Utc::now().date_naive()),
            pending: self.pending,
            category: self.category,
            account_owner: self.account_owner,
        }
    }
}

/// A transaction the provider reports as removed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemovedTransaction {
    pub external_id: String,
    pub account_external_id: Option<String>,
}

impl RemovedTransaction {
    pub fn new(external_id: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            account_external_id: None,
        }
    }
}

/// A stored ledger entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Internal identifier (database primary key)
    pub id: i64,
    /// Owning account (internal id)
    pub account_id: i64,
    /// Provider transaction identifier (unique)
    pub external_id: String,
    pub kind: String,
    pub name: String,
    pub amount: f64,
    pub iso_currency_code: Option<String>,
    pub unofficial_currency_code: Option<String>,
    pub date: NaiveDate,
    pub pending: bool,
    pub category: serde_json::Value,
    pub account_owner: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// Build a stored row from a provider record
    pub fn from_record(id: i64, account_id: i64, record: &TransactionRecord) -> Self {
        let now = Utc::now();
        Self {
            id,
            account_id,
            external_id: record.external_id.clone(),
            kind: record.kind.clone(),
            name: record.name.clone(),
            amount: record.amount,
            iso_currency_code: record.iso_currency_code.clone(),
            unofficial_currency_code: record.unofficial_currency_code.clone(),
            date: record.date,
            pending: record.pending,
            category: record.category.clone(),
            account_owner: record.account_owner.clone(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Overwrite every mutable field from a newer provider record
    pub fn apply(&mut self, account_id: i64, record: &TransactionRecord) {
        self.account_id = account_id;
        self.kind = record.kind.clone();
        self.name = record.name.clone();
        self.amount = record.amount;
        self.iso_currency_code = record.iso_currency_code.clone();
        self.unofficial_currency_code = record.unofficial_currency_code.clone();
        self.date = record.date;
        self.pending = record.pending;
        self.category = record.category.clone();
        self.account_owner = record.account_owner.clone();
        self.updated_at = Utc::now();
    }
}
