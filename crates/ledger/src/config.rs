//! Configuration loading for the ledger services
//!
//! Plaid credentials are loaded from (in order of priority):
//! 1. JSON file in the Compound config directory
//! 2. Runtime environment variables
//!
//! Sync tuning lives in a separate optional JSON file with defaults.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Credentials filename in the Compound config directory
const CREDENTIALS_FILE: &str = "plaid-credentials.json";

/// Sync settings filename in the Compound config directory
const SYNC_SETTINGS_FILE: &str = "sync.json";

/// Largest page the Plaid sync endpoint accepts
pub const MAX_PAGE_SIZE: u32 = 500;

/// Plaid deployment to talk to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaidEnvironment {
    #[default]
    Sandbox,
    Production,
}

impl PlaidEnvironment {
    /// API base URL for this environment
    pub fn base_url(&self) -> &'static str {
        match self {
            PlaidEnvironment::Sandbox => "https://sandbox.plaid.com",
            PlaidEnvironment::Production => "https://production.plaid.com",
        }
    }

    /// Environment variable holding the secret for this environment
    fn secret_var(&self) -> &'static str {
        match self {
            PlaidEnvironment::Sandbox => "PLAID_SECRET_SANDBOX",
            PlaidEnvironment::Production => "PLAID_SECRET_PRODUCTION",
        }
    }
}

impl FromStr for PlaidEnvironment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sandbox" => Ok(PlaidEnvironment::Sandbox),
            "production" => Ok(PlaidEnvironment::Production),
            other => bail!("Invalid Plaid environment: {}", other),
        }
    }
}

/// API credentials for Plaid
#[derive(Clone, Serialize, Deserialize)]
pub struct PlaidCredentials {
    pub client_id: String,
    pub secret: String,
    #[serde(default)]
    pub environment: PlaidEnvironment,
}

impl fmt::Debug for PlaidCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaidCredentials")
            .field("client_id", &self.client_id)
            .field("secret", &"<redacted>")
            .field("environment", &self.environment)
            .finish()
    }
}

impl PlaidCredentials {
    /// Load credentials using the following priority:
    /// 1. JSON file (~/.config/compound/plaid-credentials.json)
    /// 2. Runtime environment variables
    pub fn load() -> Result<Self> {
        if config::config_exists(CREDENTIALS_FILE) {
            return config::load_json(CREDENTIALS_FILE);
        }

        Self::from_env()
    }

    /// Load credentials from a specific JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        config::load_json_file(path)
    }

    /// Parse credentials from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse credentials JSON")
    }

    /// Load credentials from environment variables
    ///
    /// `PLAID_ENV` selects the environment (default sandbox) and with it
    /// which secret variable is read.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load credentials through an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let environment = match lookup("PLAID_ENV").filter(|v| !v.is_empty()) {
            Some(value) => value.parse()?,
            None => PlaidEnvironment::default(),
        };

        let client_id = lookup("PLAID_CLIENT_ID")
            .filter(|v| !v.is_empty())
            .context("PLAID_CLIENT_ID environment variable not set")?;
        let secret = lookup(environment.secret_var())
            .filter(|v| !v.is_empty())
            .with_context(|| format!("{} environment variable not set", environment.secret_var()))?;

        Ok(Self {
            client_id,
            secret,
            environment,
        })
    }

    /// Save credentials to ~/.config/compound/plaid-credentials.json
    pub fn save(&self) -> Result<()> {
        config::save_json(CREDENTIALS_FILE, self)
    }

    /// Save credentials to a specific JSON file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        config::save_json_file(path, self)
    }

    /// Get the default credentials file path (~/.config/compound/plaid-credentials.json)
    pub fn default_credentials_path() -> Option<PathBuf> {
        config::config_path(CREDENTIALS_FILE)
    }
}

/// What to do when a sync is requested for an item that is already syncing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrentSyncPolicy {
    /// Fail immediately with `SyncAlreadyInProgress`
    #[default]
    Reject,
    /// Block until the running sync finishes, then run
    Wait,
}

/// Tuning for the sync engine and provider client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Transactions requested per provider page (1-500)
    pub page_size: u32,
    pub concurrent_sync: ConcurrentSyncPolicy,
    /// Per-request timeout for provider calls
    pub request_timeout_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            page_size: 100,
            concurrent_sync: ConcurrentSyncPolicy::Reject,
            request_timeout_secs: 30,
        }
    }
}

impl SyncSettings {
    /// Load settings from ~/.config/compound/sync.json, or defaults if absent
    pub fn load() -> Result<Self> {
        let settings: Self = config::load_json_or_default(SYNC_SETTINGS_FILE)?;
        Ok(settings.normalized())
    }

    /// Load settings from a specific JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let settings: Self = config::load_json_file(path)?;
        Ok(settings.normalized())
    }

    /// Save settings to ~/.config/compound/sync.json
    pub fn save(&self) -> Result<()> {
        config::save_json(SYNC_SETTINGS_FILE, self)
    }

    /// Save settings to a specific JSON file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        config::save_json_file(path, self)
    }

    /// Clamp values into the ranges the provider accepts
    pub fn normalized(mut self) -> Self {
        self.page_size = self.page_size.clamp(1, MAX_PAGE_SIZE);
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
