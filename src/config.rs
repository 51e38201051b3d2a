//! Layered configuration for the cards client.
//!
//! Settings are read from `cards.toml`, then overridden by environment
//! variables (a `.env` file in the working directory is honored), then by
//! CLI flags.
//!
//! # Configuration File Format
//!
//! ```toml
//! [service]
//! base_url = "http://localhost:9201"
//! timeout_ms = 15000
//! client_id = "fic"
//! client_secret = "fic"
//! seal_password = true
//!
//! [session]
//! expiry_skew_ms = 60000
//! storage_path = "/home/me/.local/share/hardcore-cards/session.json"
//!
//! [logging]
//! filter = "hardcore_cards=debug"
//! json = false
//! file_dir = "/tmp/cards-logs"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::client::transport::DEFAULT_TIMEOUT_MS;
use crate::session::DEFAULT_EXPIRY_SKEW_MS;

pub const APP_DIR: &str = "hardcore-cards";
pub const CONFIG_FILE: &str = "cards.toml";

pub const ENV_BASE_URL: &str = "CARDS_BASE_URL";
pub const ENV_TIMEOUT_MS: &str = "CARDS_TIMEOUT_MS";
pub const ENV_STORAGE_PATH: &str = "CARDS_STORAGE_PATH";
pub const ENV_LOG: &str = "CARDS_LOG";

pub const DEFAULT_LOG_FILTER: &str = "hardcore_cards=info";
pub const VERBOSE_LOG_FILTER: &str = "hardcore_cards=debug";

/// Skews beyond this exceed the lifetime of a typical access credential.
const MAX_SENSIBLE_SKEW_MS: i64 = 3_600_000;

/// Remote service settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSection {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Ceiling for every call, in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_client_credential")]
    pub client_id: String,
    #[serde(default = "default_client_credential")]
    pub client_secret: String,
    /// Encrypt passwords with a single-use login key before sending them
    #[serde(default = "default_seal_password")]
    pub seal_password: bool,
}

fn default_base_url() -> String {
    "http://localhost:9201".to_string()
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_client_credential() -> String {
    "fic".to_string()
}

fn default_seal_password() -> bool {
    true
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_ms: default_timeout_ms(),
            client_id: default_client_credential(),
            client_secret: default_client_credential(),
            seal_password: default_seal_password(),
        }
    }
}

/// Session handling settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSection {
    /// Early-expiry margin in milliseconds
    #[serde(default = "default_expiry_skew_ms")]
    pub expiry_skew_ms: i64,
    /// Where the credential pair is persisted (defaults under the data dir)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_path: Option<PathBuf>,
}

fn default_expiry_skew_ms() -> i64 {
    DEFAULT_EXPIRY_SKEW_MS
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            expiry_skew_ms: default_expiry_skew_ms(),
            storage_path: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggingSection {
    /// `EnvFilter` directive
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
    /// Also write daily-rolling log files here
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_dir: Option<PathBuf>,
}

/// The `cards.toml` file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CardsToml {
    #[serde(default)]
    pub service: ServiceSection,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl CardsToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse cards.toml")
    }

    /// Load from `path`, or defaults if the file doesn't exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize cards.toml")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// `<config_dir>/hardcore-cards/cards.toml`, if the platform has one.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
    }

    /// Apply environment overrides in place. Unparseable values are ignored
    /// and reported.
    pub fn apply_env(&mut self) -> Vec<String> {
        let mut ignored = Vec::new();
        if let Ok(url) = std::env::var(ENV_BASE_URL)
            && !url.trim().is_empty()
        {
            self.service.base_url = url.trim().to_string();
        }
        if let Ok(raw) = std::env::var(ENV_TIMEOUT_MS) {
            match raw.trim().parse::<u64>() {
                Ok(ms) => self.service.timeout_ms = ms,
                Err(_) => ignored.push(format!("Ignoring {}='{}': not a number", ENV_TIMEOUT_MS, raw)),
            }
        }
        if let Ok(path) = std::env::var(ENV_STORAGE_PATH)
            && !path.trim().is_empty()
        {
            self.session.storage_path = Some(PathBuf::from(path.trim()));
        }
        if let Ok(filter) = std::env::var(ENV_LOG)
            && !filter.trim().is_empty()
        {
            self.logging.filter = Some(filter);
        }
        ignored
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        let url = &self.service.base_url;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            warnings.push(format!(
                "Invalid base_url '{}': should start with http:// or https://",
                url
            ));
        }
        if self.service.timeout_ms == 0 {
            warnings.push("timeout_ms is 0: every call would time out immediately".to_string());
        }
        if self.service.client_id.is_empty() {
            warnings.push("client_id is empty".to_string());
        }
        if self.session.expiry_skew_ms < 0 {
            warnings.push(format!(
                "expiry_skew_ms {} is negative: credentials would be used after they expire",
                self.session.expiry_skew_ms
            ));
        } else if self.session.expiry_skew_ms > MAX_SENSIBLE_SKEW_MS {
            warnings.push(format!(
                "expiry_skew_ms {} exceeds one hour: most sessions would refresh on every call",
                self.session.expiry_skew_ms
            ));
        }

        warnings
    }
}

/// Flags that override file and environment settings.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_path: Option<PathBuf>,
    pub base_url: Option<String>,
    pub verbose: bool,
    pub json_logs: bool,
}

/// Fully resolved settings (file → environment → CLI).
#[derive(Debug, Clone)]
pub struct CardsConfig {
    /// The file that was read, if any.
    pub source: Option<PathBuf>,
    pub toml: CardsToml,
    pub storage_path: PathBuf,
    pub log_filter: String,
    pub json_logs: bool,
    /// Environment values that could not be applied.
    pub env_warnings: Vec<String>,
}

impl CardsConfig {
    pub fn resolve(cli: &CliOverrides) -> Result<Self> {
        // A missing .env is the normal case.
        let _ = dotenvy::dotenv();

        let (source, mut toml) = match &cli.config_path {
            Some(path) => (Some(path.clone()), CardsToml::load(path)?),
            None => match CardsToml::default_path() {
                Some(path) if path.exists() => (Some(path.clone()), CardsToml::load(&path)?),
                _ => (None, CardsToml::default()),
            },
        };
        let env_warnings = toml.apply_env();
        Ok(Self::from_layers(source, toml, cli, env_warnings))
    }

    /// Apply CLI overrides on top of an already env-merged file config.
    pub fn from_layers(
        source: Option<PathBuf>,
        mut toml: CardsToml,
        cli: &CliOverrides,
        env_warnings: Vec<String>,
    ) -> Self {
        if let Some(url) = &cli.base_url {
            toml.service.base_url = url.clone();
        }
        let log_filter = if cli.verbose {
            VERBOSE_LOG_FILTER.to_string()
        } else {
            toml.logging
                .filter
                .clone()
                .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string())
        };
        let json_logs = cli.json_logs || toml.logging.json;
        let storage_path = toml
            .session
            .storage_path
            .clone()
            .unwrap_or_else(default_storage_path);

        Self {
            source,
            toml,
            storage_path,
            log_filter,
            json_logs,
            env_warnings,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.toml.service.base_url
    }

    pub fn timeout_ms(&self) -> u64 {
        self.toml.service.timeout_ms
    }

    pub fn expiry_skew_ms(&self) -> i64 {
        self.toml.session.expiry_skew_ms
    }

    pub fn log_dir(&self) -> Option<&Path> {
        self.toml.logging.file_dir.as_deref()
    }

    pub fn validate(&self) -> Vec<String> {
        let mut warnings = self.env_warnings.clone();
        warnings.extend(self.toml.validate());
        warnings
    }
}

/// `<data_dir>/hardcore-cards/session.json`, falling back to the working
/// directory on platforms without a data dir.
pub fn default_storage_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join("session.json")
}
