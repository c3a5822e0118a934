//! Keeping database files current.
//!
//! An update run asks the distribution service for the latest MD5 of every
//! configured edition in one request, then handles each edition
//! concurrently: editions whose local file already matches are left alone,
//! the rest are downloaded, verified and swapped into place under a
//! directory lock. Credential or transport failures on the metadata request
//! end the whole run; anything after that is attributed to one edition.

use std::path::PathBuf;
use std::time::Duration;

use crate::config::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_TIMEOUT, DEFAULT_UPDATE_HOST};
use crate::error::{Error, Result};
use crate::settings::Credentials;

pub mod archive;
pub mod client;
pub mod install;
pub mod service;
pub mod trigger;

pub use client::UpdateClient;
pub use service::{DistributionService, EditionMetadata, HttpService};
pub use trigger::{ConfigChange, DatabaseAction, RunOutcome, Scheduler, Trigger, UpdateHandle};

/// Hash reported for an edition with no local file.
pub const ZERO_HASH: &str = "00000000000000000000000000000000";

/// Where and how to reach the distribution service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceOptions {
    /// Base URL, e.g. `https://updates.maxmind.com`.
    pub host: String,
    /// Bound on each HTTP exchange including the body.
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            host: DEFAULT_UPDATE_HOST.to_string(),
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl ServiceOptions {
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Everything one update run against the real service needs.
#[derive(Clone, Debug)]
pub struct UpdateConfig {
    pub credentials: Credentials,
    pub edition_ids: Vec<String>,
    pub database_directory: PathBuf,
    pub service: ServiceOptions,
}

impl UpdateConfig {
    /// Check and install every configured edition.
    pub async fn run(&self) -> Result<Vec<EditionOutcome>> {
        let client = UpdateClient::http(
            &self.credentials,
            self.database_directory.clone(),
            &self.service,
        )?;
        client.update(&self.edition_ids).await
    }
}

/// Outcome for one edition that was checked successfully.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpdateResult {
    pub edition_id: String,
    /// MD5 of the local file before the run, or [`ZERO_HASH`].
    pub old_hash: String,
    /// MD5 of the local file after the run.
    pub new_hash: String,
    /// Whether this run wrote a new file.
    pub was_updated: bool,
    /// Build date advertised by the service.
    pub date: String,
}

/// An edition that could not be checked or installed.
#[derive(Debug, thiserror::Error)]
#[error("{edition_id}: {error}")]
pub struct EditionFailure {
    pub edition_id: String,
    #[source]
    pub error: Error,
}

impl EditionFailure {
    pub fn new(edition_id: impl Into<String>, error: Error) -> Self {
        Self {
            edition_id: edition_id.into(),
            error,
        }
    }
}

pub type EditionOutcome = std::result::Result<UpdateResult, EditionFailure>;
