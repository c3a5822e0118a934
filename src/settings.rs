//! Settings consumed by the update pipeline.
//!
//! The settings themselves live in an external key-value store; this module
//! defines the shape the core needs ([`SettingsStore`]), the validation rules
//! the store is expected to enforce, and a TOML file-backed store used by the
//! command-line host.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use crate::error::{Error, Result};

/// Stanza name holding the account credentials.
pub const ACCOUNT_STANZA: &str = "account";
/// Stanza name holding the log level.
pub const LOGGING_STANZA: &str = "logging";
/// Stanza present in every conf file that never names a database.
pub const DEFAULT_STANZA: &str = "default";

static ACCOUNT_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{1,20}$").expect("valid account id pattern"));
static LICENSE_KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]{8,100}$").expect("valid license key pattern"));

/// Account stanza as stored: both values are free text until validated.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct AccountStanza {
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub license_key: Option<String>,
}

/// Credentials ready for the update service.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub account_id: u64,
    pub license_key: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("account_id", &self.account_id)
            .field("license_key", &"<redacted>")
            .finish()
    }
}

impl AccountStanza {
    /// Turn the stored values into credentials.
    ///
    /// Only checks what an update run needs: both present, id numeric.
    pub fn credentials(&self) -> Result<Credentials> {
        let account_id = self.account_id.as_deref().unwrap_or_default();
        let license_key = self.license_key.as_deref().unwrap_or_default();

        if account_id.is_empty() || license_key.is_empty() {
            return Err(Error::MissingCredentials);
        }
        if !account_id.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::InvalidAccountId {
                value: account_id.to_string(),
            });
        }
        let account_id = account_id.parse().map_err(|_| Error::InvalidAccountId {
            value: account_id.to_string(),
        })?;

        Ok(Credentials {
            account_id,
            license_key: license_key.to_string(),
        })
    }
}

/// Log levels accepted by the settings store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    pub const ALL: [LogLevel; 5] = [
        LogLevel::Debug,
        LogLevel::Info,
        LogLevel::Warning,
        LogLevel::Error,
        LogLevel::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        LogLevel::ALL
            .into_iter()
            .find(|level| level.as_str() == s)
            .ok_or_else(|| Error::InvalidSetting {
                field: "loglevel",
                reason: format!(
                    "must be one of {}, got '{s}'",
                    LogLevel::ALL.map(|l| l.as_str()).join(", ")
                ),
            })
    }
}

impl TryFrom<String> for LogLevel {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

/// Account id: digits only, 1 to 20 characters.
pub fn validate_account_id(value: &str) -> Result<()> {
    if ACCOUNT_ID_RE.is_match(value) {
        Ok(())
    } else {
        Err(Error::InvalidSetting {
            field: "account_id",
            reason: "must be 1-20 digits".to_string(),
        })
    }
}

/// License key: letters, digits and underscores, 8 to 100 characters.
pub fn validate_license_key(value: &str) -> Result<()> {
    if LICENSE_KEY_RE.is_match(value) {
        Ok(())
    } else {
        Err(Error::InvalidSetting {
            field: "license_key",
            reason: "must be 8-100 letters, digits or underscores".to_string(),
        })
    }
}

pub fn validate_log_level(value: &str) -> Result<()> {
    value.parse::<LogLevel>().map(|_| ())
}

/// Source of settings, keyed by an opaque session key.
///
/// Implementations talk to whatever configuration store the host provides.
pub trait SettingsStore: Send + Sync {
    /// The account stanza, or `None` when it has never been saved.
    fn account(&self, session_key: &str) -> Result<Option<AccountStanza>>;

    /// All database stanza names, in stored order. May include
    /// [`DEFAULT_STANZA`].
    fn database_stanzas(&self, session_key: &str) -> Result<Vec<String>>;

    /// Configured log level, if any.
    fn log_level(&self, session_key: &str) -> Result<Option<LogLevel>>;

    /// Credentials for an update run.
    fn credentials(&self, session_key: &str) -> Result<Credentials> {
        self.account(session_key)?
            .ok_or(Error::MissingCredentials)?
            .credentials()
    }

    /// Edition ids to download: every database stanza except `default`.
    fn databases(&self, session_key: &str) -> Result<Vec<String>> {
        let databases: Vec<String> = self
            .database_stanzas(session_key)?
            .into_iter()
            .filter(|name| name != DEFAULT_STANZA)
            .collect();
        if databases.is_empty() {
            return Err(Error::NoDatabases);
        }
        Ok(databases)
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    #[serde(default)]
    account: Option<AccountStanza>,
    #[serde(default)]
    logging: Option<LoggingStanza>,
    /// Insertion ordered (`toml/preserve_order`).
    #[serde(default)]
    databases: toml::Table,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingStanza {
    #[serde(default)]
    loglevel: Option<LogLevel>,
}

/// Settings read from a TOML file on every call, so saves made by other
/// processes are always observed.
///
/// ```toml
/// [account]
/// account_id = "12345"
/// license_key = "abcdefgh1234"
///
/// [logging]
/// loglevel = "INFO"
///
/// [databases.GeoLite2-Country]
/// [databases.GeoLite2-City]
/// ```
///
/// A missing file reads as a fresh install with nothing configured.
#[derive(Clone, Debug)]
pub struct FileSettingsStore {
    path: PathBuf,
}

impl FileSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<SettingsFile> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(SettingsFile::default()),
            Err(err) => return Err(err.into()),
        };
        toml::from_str(&text).map_err(|source| Error::Settings {
            path: self.path.clone(),
            source,
        })
    }

    /// Run the full validation surface over the stored values and return
    /// every problem found.
    pub fn check(&self) -> Result<Vec<Error>> {
        let file = self.load()?;
        let mut problems = Vec::new();

        match file.account {
            Some(account) => {
                match account.account_id.as_deref() {
                    Some(id) => problems.extend(validate_account_id(id).err()),
                    None => problems.push(Error::MissingCredentials),
                }
                match account.license_key.as_deref() {
                    Some(key) => problems.extend(validate_license_key(key).err()),
                    None => problems.push(Error::MissingCredentials),
                }
            }
            None => problems.push(Error::MissingCredentials),
        }

        for name in file.databases.keys().filter(|n| *n != DEFAULT_STANZA) {
            problems.extend(crate::cache::check_database_name(name).err());
        }

        Ok(problems)
    }
}

impl SettingsStore for FileSettingsStore {
    fn account(&self, _session_key: &str) -> Result<Option<AccountStanza>> {
        Ok(self.load()?.account)
    }

    fn database_stanzas(&self, _session_key: &str) -> Result<Vec<String>> {
        Ok(self.load()?.databases.keys().cloned().collect())
    }

    fn log_level(&self, _session_key: &str) -> Result<Option<LogLevel>> {
        Ok(self.load()?.logging.and_then(|logging| logging.loglevel))
    }
}
