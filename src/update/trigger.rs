//! Deciding when to run an update, and running it off the caller's thread.

use std::any::Any;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::{EditionOutcome, ServiceOptions, UpdateConfig};
use crate::error::Result;
use crate::settings::{SettingsStore, ACCOUNT_STANZA};

/// What happened to a database stanza.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DatabaseAction {
    Create,
    Edit,
    Remove,
}

/// A save in the settings store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigChange {
    /// A stanza of the settings conf was saved.
    Settings { stanza: String },
    Database(DatabaseAction),
}

impl ConfigChange {
    /// Saving the account or adding/editing a database warrants a run;
    /// removals and other settings do not.
    pub fn triggers_update(&self) -> bool {
        match self {
            ConfigChange::Settings { stanza } => stanza == ACCOUNT_STANZA,
            ConfigChange::Database(action) => {
                matches!(action, DatabaseAction::Create | DatabaseAction::Edit)
            }
        }
    }
}

/// How an update run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// The run reached the service; `failed` editions could not be updated.
    Completed { updated: usize, current: usize, failed: usize },
    /// Preconditions were not met (no credentials, no databases).
    Skipped,
    /// The run as a whole failed.
    Failed,
    /// The run panicked.
    Panicked,
}

/// A run in flight on its own thread.
#[must_use = "the update thread should be joined"]
#[derive(Debug)]
pub struct UpdateHandle {
    inner: JoinHandle<RunOutcome>,
}

impl UpdateHandle {
    /// Wait for the run to finish.
    pub fn join(self) -> RunOutcome {
        self.inner.join().unwrap_or(RunOutcome::Panicked)
    }

    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }
}

/// Launches update runs in response to settings saves and schedule ticks.
#[derive(Debug)]
pub struct Trigger<S> {
    store: Arc<S>,
    directory: PathBuf,
    options: ServiceOptions,
}

impl<S> Clone for Trigger<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            directory: self.directory.clone(),
            options: self.options.clone(),
        }
    }
}

impl<S: SettingsStore + 'static> Trigger<S> {
    pub fn new(store: Arc<S>, directory: impl Into<PathBuf>) -> Self {
        Self {
            store,
            directory: directory.into(),
            options: ServiceOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ServiceOptions) -> Self {
        self.options = options;
        self
    }

    /// React to a save. Returns the handle of the launched run, if any.
    pub fn on_config_change(&self, session_key: &str, change: &ConfigChange) -> Option<UpdateHandle> {
        if !change.triggers_update() {
            debug!(?change, "change does not trigger an update");
            return None;
        }
        info!(?change, "configuration saved, triggering database update");
        self.trigger(session_key)
    }

    /// Entry point for a scheduled tick.
    pub fn on_schedule(&self, session_key: &str) -> Option<UpdateHandle> {
        info!("scheduled database update");
        self.trigger(session_key)
    }

    fn trigger(&self, session_key: &str) -> Option<UpdateHandle> {
        if session_key.is_empty() {
            error!("no session key available, cannot run database update");
            return None;
        }

        let this = self.clone();
        let session_key = session_key.to_string();
        let spawned = thread::Builder::new()
            .name("geoip-update".to_string())
            .spawn(move || {
                panic::catch_unwind(AssertUnwindSafe(|| this.run_database_update(&session_key)))
                    .unwrap_or_else(|payload| {
                        error!(
                            panic = panic_message(payload.as_ref()),
                            "Unexpected error during database update"
                        );
                        RunOutcome::Panicked
                    })
            });

        match spawned {
            Ok(inner) => Some(UpdateHandle { inner }),
            Err(err) => {
                error!(error = %err, "failed to start update thread");
                None
            }
        }
    }

    /// One complete update run, on the current thread.
    pub fn run_database_update(&self, session_key: &str) -> RunOutcome {
        let config = match self.prepare(session_key) {
            Ok(config) => config,
            Err(err) => {
                warn!("Skipping database update: {err}");
                return RunOutcome::Skipped;
            }
        };

        if let Err(err) = fs::create_dir_all(&config.database_directory) {
            error!(
                directory = %config.database_directory.display(),
                error = %err,
                "Database update failed"
            );
            return RunOutcome::Failed;
        }

        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(err) => {
                error!(error = %err, "Database update failed");
                return RunOutcome::Failed;
            }
        };

        info!(
            "Starting database update for editions: {}",
            config.edition_ids.join(", ")
        );
        match runtime.block_on(config.run()) {
            Ok(outcomes) => {
                let outcome = report(&outcomes);
                info!("Database update completed successfully");
                outcome
            }
            Err(err) => {
                error!(error = %crate::error::display_chain(&err), "Database update failed");
                RunOutcome::Failed
            }
        }
    }

    fn prepare(&self, session_key: &str) -> Result<UpdateConfig> {
        let credentials = self.store.credentials(session_key)?;
        let edition_ids = self.store.databases(session_key)?;
        Ok(UpdateConfig {
            credentials,
            edition_ids,
            database_directory: self.directory.clone(),
            service: self.options.clone(),
        })
    }
}

fn report(outcomes: &[EditionOutcome]) -> RunOutcome {
    let (mut updated, mut current, mut failed) = (0, 0, 0);
    for outcome in outcomes {
        match outcome {
            Ok(result) if result.was_updated => {
                updated += 1;
                info!(
                    edition = %result.edition_id,
                    date = %result.date,
                    "Updated {}: {} -> {}",
                    result.edition_id,
                    result.old_hash,
                    result.new_hash
                );
            }
            Ok(result) => {
                current += 1;
                info!(
                    "{} is up to date (hash: {})",
                    result.edition_id, result.new_hash
                );
            }
            Err(failure) => {
                failed += 1;
                error!(
                    edition = %failure.edition_id,
                    error = %crate::error::display_chain(&failure.error),
                    "Failed to update database"
                );
            }
        }
    }
    RunOutcome::Completed {
        updated,
        current,
        failed,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

/// Drives [`Trigger::on_schedule`] at a fixed interval.
#[derive(Debug)]
pub struct Scheduler<S> {
    trigger: Trigger<S>,
    interval: Duration,
}

impl<S: SettingsStore + 'static> Scheduler<S> {
    pub fn new(trigger: Trigger<S>, interval: Duration) -> Self {
        Self { trigger, interval }
    }

    /// Tick `ticks` times, or forever with `None`. Each run is joined before
    /// the next tick is scheduled.
    pub fn run(&self, session_key: &str, ticks: Option<u64>) -> Vec<RunOutcome> {
        let mut outcomes = Vec::new();
        let mut tick = 0u64;
        loop {
            if let Some(handle) = self.trigger.on_schedule(session_key) {
                outcomes.push(handle.join());
            }
            tick += 1;
            if ticks.is_some_and(|limit| tick >= limit) {
                return outcomes;
            }
            debug!(seconds = self.interval.as_secs(), "waiting for next scheduled update");
            thread::sleep(self.interval);
        }
    }
}
