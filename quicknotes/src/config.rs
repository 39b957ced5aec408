//! Application configuration constants
//!
//! Central location for all configuration constants, resource limits,
//! and the environment overrides read at startup.

use std::path::PathBuf;
use std::time::Duration;

// ===== Storage =====

/// SQLite database file name inside the data directory
pub const DATABASE_FILE_NAME: &str = "quicknotes.db";

/// Data directory used when `QUICKNOTES_DATA_DIR` is unset
pub const DEFAULT_DATA_DIR: &str = "quicknotes-data";

// ===== Background Tasks =====

/// Default interval between automatic sync cycles in seconds.
/// The first cycle runs immediately on startup.
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 30;

/// Minimum sync interval. Anything shorter hammers the DevOps API.
pub const MIN_SYNC_INTERVAL_SECS: u64 = 5;

/// Default auto-save debounce in milliseconds
pub const DEFAULT_AUTO_SAVE_DEBOUNCE_MS: u64 = 1_000;

/// Minimum auto-save debounce in milliseconds.
/// Values below this cause excessive disk I/O.
pub const MIN_AUTO_SAVE_DEBOUNCE_MS: u64 = 100;

/// Days a note may stay in the trash before it is purged
pub const DEFAULT_TRASH_RETENTION_DAYS: i64 = 30;

/// Warn this many hours before a trashed note is purged
pub const TRASH_PURGE_WARNING_HOURS: i64 = 24;

/// How often the trash retention sweep runs
pub const TRASH_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

// ===== Azure DevOps =====

/// Base URL of the Azure DevOps REST API
pub const DEVOPS_BASE_URL: &str = "https://dev.azure.com";

/// REST API version used for work item queries
pub const DEVOPS_API_VERSION: &str = "7.1";

/// Maximum ids accepted by a single `workitemsbatch` request
pub const DEVOPS_BATCH_SIZE: usize = 200;

/// HTTP timeout for DevOps requests
pub const DEVOPS_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Work items assigned to the authenticated user
pub const ASSIGNED_WORK_ITEMS_WIQL: &str =
    "Select [System.Id] From WorkItems Where [System.AssignedTo] = @Me";

// ===== Credentials =====

/// Keyring service name
pub const KEYRING_SERVICE: &str = "quick-notes";

/// Keyring entry holding the DevOps PAT or OAuth access token
pub const KEYRING_CREDENTIAL_ENTRY: &str = "azure_devops_credential";

// ===== OAuth (device code flow) =====

pub const OAUTH_CLIENT_ID: &str = "99dade1a-b65d-4672-bd1c-29804d696a8f";
pub const OAUTH_AUTH_URL: &str = "https://login.microsoftonline.com/common/oauth2/v2.0/authorize";
pub const OAUTH_DEVICE_CODE_URL: &str =
    "https://login.microsoftonline.com/common/oauth2/v2.0/devicecode";
pub const OAUTH_TOKEN_URL: &str = "https://login.microsoftonline.com/common/oauth2/v2.0/token";

/// Azure DevOps resource id with the work item read scope
pub const OAUTH_DEVOPS_SCOPE: &str = "499b84ac-1321-427f-aa17-267ca6975798/vso.work";

/// Runtime configuration, resolved once at startup
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub sync_interval: Duration,
    pub auto_save_debounce: Duration,
    pub trash_retention_days: i64,
    pub devops_base_url: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            sync_interval: Duration::from_secs(DEFAULT_SYNC_INTERVAL_SECS),
            auto_save_debounce: Duration::from_millis(DEFAULT_AUTO_SAVE_DEBOUNCE_MS),
            trash_retention_days: DEFAULT_TRASH_RETENTION_DAYS,
            devops_base_url: DEVOPS_BASE_URL.to_string(),
        }
    }
}

impl AppConfig {
    /// Read `QUICKNOTES_*` overrides from the environment.
    ///
    /// Unparseable values fall back to the defaults; values below the
    /// minimums are clamped up.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let data_dir = std::env::var("QUICKNOTES_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);

        let sync_interval_secs = env_parse("QUICKNOTES_SYNC_INTERVAL_SECS")
            .unwrap_or(DEFAULT_SYNC_INTERVAL_SECS)
            .max(MIN_SYNC_INTERVAL_SECS);

        let debounce_ms = env_parse("QUICKNOTES_AUTO_SAVE_DEBOUNCE_MS")
            .unwrap_or(DEFAULT_AUTO_SAVE_DEBOUNCE_MS)
            .max(MIN_AUTO_SAVE_DEBOUNCE_MS);

        let trash_retention_days = env_parse("QUICKNOTES_TRASH_RETENTION_DAYS")
            .unwrap_or(DEFAULT_TRASH_RETENTION_DAYS)
            .max(1);

        let devops_base_url = std::env::var("QUICKNOTES_DEVOPS_BASE_URL")
            .unwrap_or(defaults.devops_base_url);

        Self {
            data_dir,
            sync_interval: Duration::from_secs(sync_interval_secs),
            auto_save_debounce: Duration::from_millis(debounce_ms),
            trash_retention_days,
            devops_base_url,
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE_NAME)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
