//! Configuration loading
//!
//! Bootstrap configuration comes from a TOML file. Every field has a built-in
//! default, so a missing file means "run with defaults" rather than a startup
//! failure. Secrets are resolved environment-first, then TOML.
//!
//! # Settings Sources Priority
//!
//! 1. Command-line arguments (applied by the binary)
//! 2. Environment variables (`CLICKPATH_*`)
//! 3. TOML configuration file
//! 4. Built-in defaults (code constants)

use crate::phone::{PhoneNormalizer, DEFAULT_COUNTRY_CODE, DEFAULT_NATIONAL_NUMBER_LENGTH};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable holding the spreadsheet API access token
pub const ENV_SHEETS_TOKEN: &str = "CLICKPATH_SHEETS_TOKEN";
/// Environment variable holding the webhook subscription verify token
pub const ENV_VERIFY_TOKEN: &str = "CLICKPATH_VERIFY_TOKEN";
/// Environment variable holding the operator API bearer token
pub const ENV_API_TOKEN: &str = "CLICKPATH_API_TOKEN";
/// Environment variable holding the destination spreadsheet id
pub const ENV_SPREADSHEET_ID: &str = "CLICKPATH_SPREADSHEET_ID";

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub attribution: AttributionConfig,
    pub engagement: EngagementConfig,
    pub export: ExportConfig,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Bearer token for `/api/*`; unset or empty disables the check
    pub api_token: Option<String>,
    /// Token expected in the platform's webhook subscription handshake
    pub verify_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5740,
            api_token: None,
            verify_token: None,
        }
    }
}

/// Session store location
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("clickpath.db"),
        }
    }
}

/// Resolver tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AttributionConfig {
    /// Country code prefixed to national phone numbers
    pub country_code: String,
    /// Digits in a national number
    pub national_number_length: usize,
    /// How far back a channel-identifier match may reach (default 300s)
    pub channel_window_secs: u64,
    /// Candidates fetched for a channel-identifier match (default 5)
    pub channel_batch_limit: u32,
}

impl Default for AttributionConfig {
    fn default() -> Self {
        Self {
            country_code: DEFAULT_COUNTRY_CODE.to_string(),
            national_number_length: DEFAULT_NATIONAL_NUMBER_LENGTH,
            channel_window_secs: 300,
            channel_batch_limit: 5,
        }
    }
}

impl AttributionConfig {
    pub fn phone_normalizer(&self) -> PhoneNormalizer {
        PhoneNormalizer::new(self.country_code.clone(), self.national_number_length)
    }

    pub fn channel_window(&self) -> Duration {
        Duration::from_secs(self.channel_window_secs)
    }
}

/// What to persist for a message no session can be attributed to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectPolicy {
    /// Separate direct-engagement record, never exported
    #[default]
    Record,
    /// Synthetic engaged click session with `source = direct_message`
    Synthesize,
}

/// Engagement committer settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngagementConfig {
    pub direct_policy: DirectPolicy,
}

/// Export sync settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub enabled: bool,
    pub spreadsheet_id: String,
    pub sheet_title: String,
    pub api_base_url: String,
    /// Prefer `CLICKPATH_SHEETS_TOKEN` over storing this in the file
    pub access_token: Option<String>,
    /// Records per sync attempt (default 250)
    pub batch_size: u32,
    /// Attempts per sync cycle (default 3)
    pub max_attempts: u32,
    /// Base delay, multiplied by the attempt number
    pub retry_delay_ms: u64,
    /// Scheduled sync period
    pub interval_secs: u64,
    /// Quiet period after a change notification before syncing
    pub notify_debounce_ms: u64,
    /// Export direct (unattributed) engagements too
    pub include_direct: bool,
    /// Last Message column length cap
    pub message_max_chars: usize,
    /// Upper bound per spreadsheet call
    pub call_timeout_secs: u64,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            spreadsheet_id: String::new(),
            sheet_title: "Engagements".to_string(),
            api_base_url: "https://sheets.googleapis.com".to_string(),
            access_token: None,
            batch_size: 250,
            max_attempts: 3,
            retry_delay_ms: 2000,
            interval_secs: 300,
            notify_debounce_ms: 2000,
            include_direct: false,
            message_max_chars: 500,
            call_timeout_secs: 30,
        }
    }
}

impl ExportConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn notify_debounce(&self) -> Duration {
        Duration::from_millis(self.notify_debounce_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

/// Store connectivity check settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub connect_timeout_secs: u64,
    pub connect_attempts: u32,
    pub connect_retry_delay_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            connect_attempts: 5,
            connect_retry_delay_ms: 2000,
        }
    }
}

impl StoreConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn connect_retry_delay(&self) -> Duration {
        Duration::from_millis(self.connect_retry_delay_ms)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl TomlConfig {
    /// Load configuration from a TOML file.
    ///
    /// A missing file is not an error: a warning is logged and defaults are
    /// used. A file that exists but does not parse is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            info!("No configuration file given, using built-in defaults");
            return Ok(Self::default());
        };

        if !path.exists() {
            warn!(
                "Configuration file not found: {} (using built-in defaults)",
                path.display()
            );
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: TomlConfig = toml::from_str(&content).map_err(|e| {
            Error::Config(format!("Parse {} failed: {}", path.display(), e))
        })?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Overlay secrets and ids from the environment
    pub fn apply_env(&mut self) {
        self.export.access_token = resolve_secret(ENV_SHEETS_TOKEN, self.export.access_token.take());
        self.server.verify_token = resolve_secret(ENV_VERIFY_TOKEN, self.server.verify_token.take());
        self.server.api_token = resolve_secret(ENV_API_TOKEN, self.server.api_token.take());
        if let Some(id) = resolve_secret(ENV_SPREADSHEET_ID, None) {
            self.export.spreadsheet_id = id;
        }
    }

    /// Reject settings the services cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.attribution.channel_batch_limit == 0 {
            return Err(Error::Config(
                "attribution.channel_batch_limit must be at least 1".to_string(),
            ));
        }
        if self.attribution.country_code.is_empty()
            || !self.attribution.country_code.chars().all(|c| c.is_ascii_digit())
        {
            return Err(Error::Config(format!(
                "attribution.country_code must be digits, got '{}'",
                self.attribution.country_code
            )));
        }
        if self.export.batch_size == 0 {
            return Err(Error::Config("export.batch_size must be at least 1".to_string()));
        }
        if self.export.max_attempts == 0 {
            return Err(Error::Config("export.max_attempts must be at least 1".to_string()));
        }
        if self.export.interval_secs == 0 {
            return Err(Error::Config("export.interval_secs must be at least 1".to_string()));
        }
        if self.export.call_timeout_secs == 0 {
            return Err(Error::Config(
                "export.call_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.export.message_max_chars == 0 {
            return Err(Error::Config(
                "export.message_max_chars must be at least 1".to_string(),
            ));
        }
        if self.store.connect_attempts == 0 {
            return Err(Error::Config("store.connect_attempts must be at least 1".to_string()));
        }
        if self.export.enabled {
            if self.export.spreadsheet_id.trim().is_empty() {
                return Err(Error::Config(format!(
                    "export is enabled but no spreadsheet id is configured \
                     (set export.spreadsheet_id or {})",
                    ENV_SPREADSHEET_ID
                )));
            }
            if self.export.access_token.is_none() {
                return Err(Error::Config(format!(
                    "export is enabled but no access token is configured \
                     (set {} or export.access_token)",
                    ENV_SHEETS_TOKEN
                )));
            }
        }
        Ok(())
    }
}

/// Resolve a secret: environment variable first, then the TOML value.
///
/// Blank values from either source count as absent.
pub fn resolve_secret(env_name: &str, toml_value: Option<String>) -> Option<String> {
    let env_value = std::env::var(env_name).ok().filter(|v| is_valid_secret(v));
    let toml_value = toml_value.filter(|v| is_valid_secret(v));

    if env_value.is_some() && toml_value.is_some() {
        warn!(
            "{} set in both environment and TOML. Using environment (highest priority).",
            env_name
        );
    }

    env_value.or(toml_value)
}

/// Secrets must be non-empty and non-whitespace
pub fn is_valid_secret(value: &str) -> bool {
    !value.trim().is_empty()
}
