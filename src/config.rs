use std::path::PathBuf;
use std::time::Duration;

/// Environment variable overriding the database directory.
pub const DB_DIR_ENV: &str = "MAXMIND_DB_DIR";
/// Environment variable naming the host application's install root.
pub const HOST_HOME_ENV: &str = "SPLUNK_HOME";

/// Environment variable naming the settings file.
pub const SETTINGS_ENV: &str = "GEOIP_SETTINGS";

const DEFAULT_HOST_HOME: &str = "/opt/splunk";
const APP_NAME: &str = "geoip";
const SETTINGS_FILE: &str = "geoip.toml";

/// Default update service endpoint.
pub const DEFAULT_UPDATE_HOST: &str = "https://updates.maxmind.com";
/// Bound on a whole HTTP exchange, body included.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Directory holding `<edition-id>.mmdb` files.
///
/// `MAXMIND_DB_DIR` wins; otherwise the app's local data directory under
/// `SPLUNK_HOME`.
pub fn database_directory() -> PathBuf {
    resolve_database_directory(
        std::env::var_os(DB_DIR_ENV).map(PathBuf::from),
        std::env::var_os(HOST_HOME_ENV).map(PathBuf::from),
    )
}

/// Settings file used when `GEOIP_SETTINGS` is not set: `geoip.toml` in the
/// app's local directory.
pub fn default_settings_path() -> PathBuf {
    app_local_dir(std::env::var_os(HOST_HOME_ENV).map(PathBuf::from)).join(SETTINGS_FILE)
}

fn resolve_database_directory(overridden: Option<PathBuf>, host_home: Option<PathBuf>) -> PathBuf {
    if let Some(dir) = overridden.filter(|dir| !dir.as_os_str().is_empty()) {
        return dir;
    }
    app_local_dir(host_home).join("data")
}

fn app_local_dir(host_home: Option<PathBuf>) -> PathBuf {
    host_home
        .filter(|home| !home.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_HOST_HOME))
        .join("etc")
        .join("apps")
        .join(APP_NAME)
        .join("local")
}
