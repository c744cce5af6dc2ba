//! Daemon configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use edr_core::daemon::{DaemonConfig, RetryPolicy};
use edr_core::reconcile::MissingDocumentPolicy;
use edr_core::source::drive::DRIVE_API_BASE;
use edr_core::source::FolderFilter;
use edr_core::store::sheets::{DEFAULT_WORKSHEET, SHEETS_API_BASE};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub google: GoogleConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleConfig {
    /// Spreadsheet holding the tracking table
    #[serde(default)]
    pub store_id: String,

    /// Drive folder with the review documents
    #[serde(default)]
    pub folder_filter: String,

    /// OAuth authorized-user file
    #[serde(default = "default_credentials")]
    pub credentials: PathBuf,

    /// Worksheet holding the tracking table
    #[serde(default = "default_worksheet")]
    pub worksheet: String,

    #[serde(default = "default_drive_api_base")]
    pub drive_api_base: String,

    #[serde(default = "default_sheets_api_base")]
    pub sheets_api_base: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Minutes between cycles
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,

    /// Listing attempts per cycle, including the first
    #[serde(default = "default_max_fetch_attempts")]
    pub max_fetch_attempts: u32,

    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,

    /// What to do with rows whose document vanished
    #[serde(default)]
    pub missing_policy: MissingDocumentPolicy,

    /// Sync immediately on start instead of after one interval
    #[serde(default = "default_true")]
    pub run_on_startup: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Directory for daily log files; console only when unset
    #[serde(default)]
    pub directory: Option<PathBuf>,

    /// Emit JSON lines instead of plain text
    #[serde(default)]
    pub json: bool,
}

// Defaults
fn default_credentials() -> PathBuf { PathBuf::from("token.json") }
fn default_worksheet() -> String { DEFAULT_WORKSHEET.to_string() }
fn default_drive_api_base() -> String { DRIVE_API_BASE.to_string() }
fn default_sheets_api_base() -> String { SHEETS_API_BASE.to_string() }
fn default_interval_minutes() -> u64 { 15 }
fn default_max_fetch_attempts() -> u32 { 3 }
fn default_retry_base_delay_ms() -> u64 { 2_000 }
fn default_retry_max_delay_ms() -> u64 { 30_000 }
fn default_true() -> bool { true }

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            store_id: String::new(),
            folder_filter: String::new(),
            credentials: default_credentials(),
            worksheet: default_worksheet(),
            drive_api_base: default_drive_api_base(),
            sheets_api_base: default_sheets_api_base(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_minutes: default_interval_minutes(),
            max_fetch_attempts: default_max_fetch_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            missing_policy: MissingDocumentPolicy::default(),
            run_on_startup: true,
        }
    }
}

/// Values given on the command line or through the environment. They win
/// over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub store_id: Option<String>,
    pub folder_id: Option<String>,
    pub credentials: Option<PathBuf>,
    pub interval_minutes: Option<u64>,
}

impl Config {
    /// Read `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(store_id) = overrides.store_id {
            self.google.store_id = store_id;
        }
        if let Some(folder_id) = overrides.folder_id {
            self.google.folder_filter = folder_id;
        }
        if let Some(credentials) = overrides.credentials {
            self.google.credentials = credentials;
        }
        if let Some(minutes) = overrides.interval_minutes {
            self.sync.interval_minutes = minutes;
        }
    }

    /// Enough to talk to the tracking table.
    pub fn require_store(&self) -> Result<(), ConfigError> {
        if self.google.store_id.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "google.store_id is empty (set it or EDR_STORE_ID)".to_string(),
            ));
        }
        Ok(())
    }

    /// Enough to list the review folder.
    pub fn require_folder(&self) -> Result<(), ConfigError> {
        if self.google.folder_filter.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "google.folder_filter is empty (set it or EDR_FOLDER_ID)".to_string(),
            ));
        }
        Ok(())
    }

    /// Everything the sync loop needs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.require_store()?;
        self.require_folder()?;
        if self.sync.interval_minutes < 1 {
            return Err(ConfigError::Invalid(
                "sync.interval_minutes must be at least 1".to_string(),
            ));
        }
        if self.sync.max_fetch_attempts < 1 {
            return Err(ConfigError::Invalid(
                "sync.max_fetch_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn folder(&self) -> FolderFilter {
        FolderFilter::new(self.google.folder_filter.trim())
    }

    pub fn daemon_config(&self) -> DaemonConfig {
        let base_delay = Duration::from_millis(self.sync.retry_base_delay_ms);
        DaemonConfig {
            interval: Duration::from_secs(self.sync.interval_minutes.saturating_mul(60)),
            retry: RetryPolicy {
                max_attempts: self.sync.max_fetch_attempts,
                base_delay,
                max_delay: Duration::from_millis(self.sync.retry_max_delay_ms).max(base_delay),
            },
            missing_policy: self.sync.missing_policy,
            run_on_startup: self.sync.run_on_startup,
            filter: self.folder(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("absent.toml")).unwrap();

        assert_eq!(config.sync.interval_minutes, 15);
        assert_eq!(config.sync.max_fetch_attempts, 3);
        assert_eq!(config.sync.missing_policy, MissingDocumentPolicy::Retain);
        assert!(config.sync.run_on_startup);
        assert_eq!(config.google.worksheet, "Active Reviews");
        assert_eq!(config.google.credentials, PathBuf::from("token.json"));
        assert!(config.logging.directory.is_none());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let file = write_config(
            r#"
[google]
store_id = "1AbCdEf"
folder_filter = "0BxFolder"

[sync]
interval_minutes = 5
missing_policy = "flag"
"#,
        );

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.google.store_id, "1AbCdEf");
        assert_eq!(config.sync.interval_minutes, 5);
        assert_eq!(config.sync.missing_policy, MissingDocumentPolicy::Flag);
        assert_eq!(config.sync.retry_base_delay_ms, 2_000);
        assert!(config.validate().is_ok());

        let daemon = config.daemon_config();
        assert_eq!(daemon.interval, Duration::from_secs(300));
        assert_eq!(daemon.retry.max_attempts, 3);
        assert_eq!(daemon.filter.folder_id, "0BxFolder");
    }

    #[test]
    fn test_overrides_win() {
        let file = write_config("[google]\nstore_id = \"from-file\"\n");
        let mut config = Config::load(file.path()).unwrap();

        config.apply(Overrides {
            store_id: Some("from-env".to_string()),
            folder_id: Some("folder-env".to_string()),
            credentials: None,
            interval_minutes: Some(30),
        });

        assert_eq!(config.google.store_id, "from-env");
        assert_eq!(config.google.folder_filter, "folder-env");
        assert_eq!(config.google.credentials, PathBuf::from("token.json"));
        assert_eq!(config.sync.interval_minutes, 30);
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        assert!(config.require_store().is_err());

        config.google.store_id = "sheet".to_string();
        assert!(config.require_store().is_ok());
        assert!(config.validate().is_err());

        config.google.folder_filter = "folder".to_string();
        config.sync.interval_minutes = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.sync.interval_minutes = 1;
        config.sync.max_fetch_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_toml_is_reported() {
        let file = write_config("[sync]\ninterval_minutes = \"often\"\n");
        assert!(matches!(
            Config::load(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }
}
