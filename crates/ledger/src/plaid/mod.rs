//! Plaid API integration
//!
//! This module provides:
//! - Plaid HTTP client implementing the provider contract
//! - Response normalization to domain models

mod client;
mod normalize;

pub use client::PlaidClient;
pub use normalize::{normalize_account, normalize_page, normalize_transaction};

/// Plaid API request and response types
pub mod api {
    use chrono::NaiveDate;
    use serde::{Deserialize, Serialize};

    /// Body for POST /transactions/sync
    #[derive(Debug, Serialize)]
    pub struct TransactionsSyncRequest<'a> {
        pub client_id: &'a str,
        pub secret: &'a str,
        pub access_token: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub cursor: Option<&'a str>,
        pub count: u32,
        pub options: TransactionsSyncOptions,
    }

    #[derive(Debug, Serialize)]
    pub struct TransactionsSyncOptions {
        pub include_personal_finance_category: bool,
    }

    /// Response from POST /transactions/sync
    #[derive(Debug, Deserialize)]
    pub struct TransactionsSyncResponse {
        #[serde(default)]
        pub added: Vec<PlaidTransaction>,
        #[serde(default)]
        pub modified: Vec<PlaidTransaction>,
        #[serde(default)]
        pub removed: Vec<PlaidRemovedTransaction>,
        pub next_cursor: String,
        pub has_more: bool,
        pub request_id: Option<String>,
    }

    /// A transaction in an added or modified set
    #[derive(Debug, Deserialize)]
    pub struct PlaidTransaction {
        pub transaction_id: String,
        pub account_id: String,
        pub amount: f64,
        pub iso_currency_code: Option<String>,
        pub unofficial_currency_code: Option<String>,
        /// Legacy category hierarchy, e.g. ["Food and Drink", "Restaurants"]
        pub category: Option<Vec<String>>,
        pub category_id: Option<String>,
        pub personal_finance_category: Option<PersonalFinanceCategory>,
        pub date: NaiveDate,
        pub name: String,
        pub merchant_name: Option<String>,
        pub pending: bool,
        pub transaction_type: Option<String>,
        pub payment_channel: Option<String>,
        pub account_owner: Option<String>,
    }

    /// Normalized category taxonomy
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct PersonalFinanceCategory {
        pub primary: String,
        pub detailed: String,
        pub confidence_level: Option<String>,
    }

    /// A removed transaction reference
    #[derive(Debug, Deserialize)]
    pub struct PlaidRemovedTransaction {
        pub transaction_id: String,
        pub account_id: Option<String>,
    }

    /// Body for POST /accounts/get
    #[derive(Debug, Serialize)]
    pub struct AccountsGetRequest<'a> {
        pub client_id: &'a str,
        pub secret: &'a str,
        pub access_token: &'a str,
    }

    /// Response from POST /accounts/get
    #[derive(Debug, Deserialize)]
    pub struct AccountsGetResponse {
        #[serde(default)]
        pub accounts: Vec<PlaidAccount>,
    }

    #[derive(Debug, Deserialize)]
    pub struct PlaidAccount {
        pub account_id: String,
        pub name: String,
        pub official_name: Option<String>,
        pub mask: Option<String>,
        #[serde(rename = "type")]
        pub account_type: String,
        pub subtype: Option<String>,
    }

    /// Error body returned with any non-2xx response
    #[derive(Debug, Deserialize)]
    pub struct PlaidErrorResponse {
        pub error_type: String,
        pub error_code: String,
        pub error_message: String,
        pub display_message: Option<String>,
        pub request_id: Option<String>,
    }
}
