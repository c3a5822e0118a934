use std::path::PathBuf;

/// Error types for the geoipenrich library.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Database name contains characters outside `[A-Za-z0-9-]`.
    #[error("invalid database name: {name:?}")]
    InvalidDatabaseName { name: String },

    /// MMDB database file was not found at the expected path.
    #[error("database not found: {}", path.display())]
    DatabaseNotFound { path: PathBuf },

    /// MMDB database file exists but could not be opened.
    #[error("failed to open database {}", path.display())]
    OpenDatabase {
        path: PathBuf,
        #[source]
        source: maxminddb::MaxMindDBError,
    },

    /// IP address lookup failed in the MMDB database.
    #[error("lookup failed for {ip}")]
    LookupFailed {
        ip: String,
        #[source]
        source: maxminddb::MaxMindDBError,
    },

    /// Account credentials are absent from the settings store.
    #[error(
        "MaxMind account credentials not configured. \
         Go to Configuration > MaxMind Account to enter your credentials."
    )]
    MissingCredentials,

    /// Account id is not a number.
    #[error(
        "MaxMind account ID must be a number, got '{value}'. \
         Go to Configuration > MaxMind Account to correct your account ID."
    )]
    InvalidAccountId { value: String },

    /// No database editions are configured.
    #[error("No databases configured. Go to Configuration > Databases to add databases to download.")]
    NoDatabases,

    /// A settings value failed validation.
    #[error("invalid setting {field}: {reason}")]
    InvalidSetting { field: &'static str, reason: String },

    /// Settings file could not be parsed.
    #[error("failed to parse settings file {}", path.display())]
    Settings {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// The update service rejected the credentials.
    #[error("authentication with the update service failed ({status})")]
    Authentication { status: u16 },

    /// The update service answered with an unexpected status.
    #[error("unexpected response from {url}: {status} {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    /// Network or protocol error talking to the update service.
    #[error("request to update service failed")]
    Transport(#[from] reqwest::Error),

    /// The update service has no metadata for the requested edition.
    #[error("edition {edition_id} is not available from the update service")]
    EditionUnavailable { edition_id: String },

    /// Downloaded content does not match the advertised hash.
    #[error("hash mismatch for {edition_id}: expected {expected}, got {actual}")]
    HashMismatch {
        edition_id: String,
        expected: String,
        actual: String,
    },

    /// Downloaded archive does not contain a database file.
    #[error("no .mmdb file found in archive for {edition_id}")]
    MissingArchiveEntry { edition_id: String },

    /// A background task ended without producing a result.
    #[error("update task for {edition_id} did not complete")]
    TaskFailed { edition_id: String },

    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Convenience type alias for Results using the library error.
pub type Result<T> = std::result::Result<T, Error>;

/// Render an error and its sources as `outer: inner: root`.
pub fn display_chain(err: &dyn std::error::Error) -> String {
    let mut rendered = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}
