//! Plaid API response normalization
//!
//! Converts Plaid API responses to provider-neutral records.

use serde_json::{Map, Value, json};

use super::api::{PlaidAccount, PlaidTransaction, TransactionsSyncResponse};
use crate::models::{AccountRecord, RemovedTransaction, TransactionRecord};
use crate::provider::TransactionsPage;

/// Normalize a full sync response into a page of changes
pub fn normalize_page(response: TransactionsSyncResponse) -> TransactionsPage {
    TransactionsPage {
        added: response
            .added
            .into_iter()
            .map(normalize_transaction)
            .collect(),
        modified: response
            .modified
            .into_iter()
            .map(normalize_transaction)
            .collect(),
        removed: response
            .removed
            .into_iter()
            .map(|r| RemovedTransaction {
                external_id: r.transaction_id,
                account_external_id: r.account_id,
            })
            .collect(),
        next_cursor: response.next_cursor,
        has_more: response.has_more,
    }
}

/// Normalize a Plaid transaction to a TransactionRecord
///
/// The amount and currency codes pass through untouched.
pub fn normalize_transaction(tx: PlaidTransaction) -> TransactionRecord {
    let category = merge_categories(&tx);

    // transaction_type is deprecated upstream; payment_channel is the fallback
    let kind = tx
        .transaction_type
        .clone()
        .or_else(|| tx.payment_channel.clone())
        .unwrap_or_else(|| "unresolved".to_string());

    TransactionRecord::builder(tx.transaction_id, tx.account_id)
        .kind(kind)
        .name(tx.name)
        .amount(tx.amount)
        .iso_currency_code(tx.iso_currency_code)
        .unofficial_currency_code(tx.unofficial_currency_code)
        .date(tx.date)
        .pending(tx.pending)
        .category(category)
        .account_owner(tx.account_owner)
        .build()
}

/// Normalize a Plaid account to an AccountRecord
pub fn normalize_account(account: PlaidAccount) -> AccountRecord {
    AccountRecord {
        external_id: account.account_id,
        name: account.name,
        mask: account.mask,
        kind: account.account_type,
        subtype: account.subtype,
    }
}

/// Merge the legacy category hierarchy and the personal finance category
/// into one blob: `{"legacy": {...}, "personal_finance": {...}}`
fn merge_categories(tx: &PlaidTransaction) -> Value {
    let mut merged = Map::new();

    if tx.category.is_some() || tx.category_id.is_some() {
        merged.insert(
            "legacy".to_string(),
            json!({
                "category": tx.category,
                "category_id": tx.category_id,
            }),
        );
    }

    if let Some(pfc) = &tx.personal_finance_category {
        merged.insert("personal_finance".to_string(), json!(pfc));
    }

    if merged.is_empty() {
        Value::Null
    } else {
        Value::Object(merged)
    }
}
