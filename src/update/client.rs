use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustc_hash::FxHashMap;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::archive::{extract_database, md5_hex};
use super::install::{hash_file, install};
use super::service::{DistributionService, EditionMetadata, HttpService};
use super::{EditionFailure, EditionOutcome, ServiceOptions, UpdateResult};
use crate::cache::{check_database_name, database_path};
use crate::error::{Error, Result};
use crate::settings::Credentials;

/// Brings the database files in one directory up to date.
#[derive(Debug)]
pub struct UpdateClient<S> {
    service: Arc<S>,
    directory: PathBuf,
}

impl<S> Clone for UpdateClient<S> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            directory: self.directory.clone(),
        }
    }
}

impl UpdateClient<HttpService> {
    /// Client for the MaxMind service described by `options`.
    pub fn http(
        credentials: &Credentials,
        directory: impl Into<PathBuf>,
        options: &ServiceOptions,
    ) -> Result<Self> {
        Ok(Self::new(HttpService::new(credentials, options)?, directory))
    }
}

impl<S: DistributionService> UpdateClient<S> {
    pub fn new(service: S, directory: impl Into<PathBuf>) -> Self {
        Self {
            service: Arc::new(service),
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Check every edition in `edition_ids` and install the ones that
    /// changed.
    ///
    /// Outcomes come back in request order, one per edition.
    ///
    /// # Errors
    ///
    /// Only when the metadata exchange itself fails (transport, credentials,
    /// unexpected status). Everything after that is reported per edition.
    pub async fn update(&self, edition_ids: &[String]) -> Result<Vec<EditionOutcome>> {
        let mut slots: Vec<Option<EditionOutcome>> = Vec::with_capacity(edition_ids.len());
        let mut requested = Vec::new();
        for id in edition_ids {
            match check_database_name(id) {
                Ok(()) => {
                    slots.push(None);
                    requested.push(id.clone());
                }
                Err(err) => slots.push(Some(Err(EditionFailure::new(id.clone(), err)))),
            }
        }
        if requested.is_empty() {
            return Ok(slots.into_iter().flatten().collect());
        }

        let advertised: FxHashMap<String, EditionMetadata> = self
            .service
            .metadata(&requested)
            .await?
            .into_iter()
            .map(|metadata| (metadata.edition_id.clone(), metadata))
            .collect();

        let mut tasks = JoinSet::new();
        for (index, id) in edition_ids.iter().enumerate() {
            if slots[index].is_some() {
                continue;
            }
            let Some(metadata) = advertised.get(id).cloned() else {
                slots[index] = Some(Err(EditionFailure::new(
                    id.clone(),
                    Error::EditionUnavailable {
                        edition_id: id.clone(),
                    },
                )));
                continue;
            };
            let client = self.clone();
            tasks.spawn(async move {
                let outcome = client
                    .update_edition(&metadata)
                    .await
                    .map_err(|err| EditionFailure::new(metadata.edition_id.clone(), err));
                (index, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => slots[index] = Some(outcome),
                Err(err) => warn!(error = %err, "update task ended abnormally"),
            }
        }

        Ok(slots
            .into_iter()
            .zip(edition_ids)
            .map(|(slot, id)| {
                slot.unwrap_or_else(|| {
                    Err(EditionFailure::new(
                        id.clone(),
                        Error::TaskFailed {
                            edition_id: id.clone(),
                        },
                    ))
                })
            })
            .collect())
    }

    async fn update_edition(&self, metadata: &EditionMetadata) -> Result<UpdateResult> {
        let edition_id = metadata.edition_id.clone();
        let target = database_path(&self.directory, &edition_id);
        let old_hash = blocking(move || hash_file(&target)).await?;

        if old_hash.eq_ignore_ascii_case(&metadata.md5) {
            debug!(edition = %edition_id, hash = %old_hash, "local file matches");
            return Ok(UpdateResult {
                edition_id,
                new_hash: old_hash.clone(),
                old_hash,
                was_updated: false,
                date: metadata.date.clone(),
            });
        }

        let archive = self.service.download(metadata).await?;
        debug!(edition = %edition_id, bytes = archive.len(), "downloaded archive");

        let expected = metadata.md5.to_ascii_lowercase();
        let directory = self.directory.clone();
        let id = edition_id.clone();
        let installed = blocking(move || {
            let contents = extract_database(&archive, &id)?;
            let actual = md5_hex(&contents);
            if actual != expected {
                return Err(Error::HashMismatch {
                    edition_id: id,
                    expected,
                    actual,
                });
            }
            let installed = install(&directory, &id, &contents, &actual)?;
            Ok((installed, actual))
        })
        .await?;
        let (installed, new_hash) = installed;

        Ok(UpdateResult {
            edition_id,
            old_hash,
            new_hash,
            was_updated: installed.written,
            date: metadata.date.clone(),
        })
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(std::io::Error::other)?
}
