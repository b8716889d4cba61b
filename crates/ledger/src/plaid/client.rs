//! Plaid API HTTP client
//!
//! Provides the transactions sync and account listing calls.
//! Uses synchronous HTTP (ureq) to be executor-agnostic.

use anyhow::{Context, Result};
use log::debug;
use serde::Serialize;
use serde::de::DeserializeOwned;
use url::Url;

use super::api::{
    AccountsGetRequest, AccountsGetResponse, PlaidErrorResponse, TransactionsSyncOptions,
    TransactionsSyncRequest, TransactionsSyncResponse,
};
use super::normalize::{normalize_account, normalize_page};
use crate::config::{PlaidCredentials, SyncSettings};
use crate::models::AccountRecord;
use crate::provider::{ProviderError, TransactionsPage, TransactionsProvider};

/// Error code Plaid returns when the user must re-authenticate the item
const ITEM_LOGIN_REQUIRED: &str = "ITEM_LOGIN_REQUIRED";

/// Plaid API client
pub struct PlaidClient {
    credentials: PlaidCredentials,
    base_url: Url,
    agent: ureq::Agent,
    page_size: u32,
}

impl PlaidClient {
    /// Create a client for the environment named in the credentials
    pub fn new(credentials: PlaidCredentials, settings: &SyncSettings) -> Result<Self> {
        let base_url = Url::parse(credentials.environment.base_url())
            .context("Invalid Plaid base URL")?;
        Ok(Self::with_base_url(credentials, base_url, settings))
    }

    /// Create a client against an explicit base URL (proxies, mock servers)
    pub fn with_base_url(
        credentials: PlaidCredentials,
        base_url: Url,
        settings: &SyncSettings,
    ) -> Self {
        // Error statuses are decoded from the body, so they must not be
        // turned into transport errors by ureq.
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(settings.request_timeout()))
            .build()
            .into();

        Self {
            credentials,
            base_url,
            agent,
            page_size: settings.clone().normalized().page_size,
        }
    }

    /// POST a JSON body to `path` and decode the JSON response
    fn post<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        path: &str,
        body: &Req,
    ) -> Result<Resp, ProviderError> {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| ProviderError::Transport(format!("invalid endpoint {}: {}", path, e)))?;

        let mut response = self
            .agent
            .post(url.as_str())
            .send_json(body)
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        debug!("[PLAID] POST {} -> {}", path, status);

        if (200..300).contains(&status) {
            return response
                .body_mut()
                .read_json::<Resp>()
                .map_err(|e| ProviderError::Decode(e.to_string()));
        }

        let error = response.body_mut().read_json::<PlaidErrorResponse>().ok();
        Err(classify_error(status, error))
    }
}

/// Map a non-2xx Plaid response to a provider error
fn classify_error(status: u16, error: Option<PlaidErrorResponse>) -> ProviderError {
    match error {
        Some(e) if e.error_code == ITEM_LOGIN_REQUIRED => ProviderError::LoginRequired,
        Some(e) => ProviderError::Api {
            status,
            code: e.error_code,
            message: e.error_message,
        },
        None => ProviderError::Api {
            status,
            code: "UNKNOWN".to_string(),
            message: "response body was not a Plaid error".to_string(),
        },
    }
}

impl TransactionsProvider for PlaidClient {
    fn fetch_page(
        &self,
        access_token: &str,
        cursor: Option<&str>,
    ) -> Result<TransactionsPage, ProviderError> {
        let request = TransactionsSyncRequest {
            client_id: &self.credentials.client_id,
            secret: &self.credentials.secret,
            access_token,
            // An empty cursor means "from the beginning" to Plaid as well
            cursor: cursor.filter(|c| !c.is_empty()),
            count: self.page_size,
            options: TransactionsSyncOptions {
                include_personal_finance_category: true,
            },
        };

        let response: TransactionsSyncResponse = self.post("/transactions/sync", &request)?;
        Ok(normalize_page(response))
    }

    fn fetch_accounts(&self, access_token: &str) -> Result<Vec<AccountRecord>, ProviderError> {
        let request = AccountsGetRequest {
            client_id: &self.credentials.client_id,
            secret: &self.credentials.secret,
            access_token,
        };

        let response: AccountsGetResponse = self.post("/accounts/get", &request)?;
        Ok(response
            .accounts
            .into_iter()
            .map(normalize_account)
            .collect())
    }
}
