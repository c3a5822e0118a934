use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::error::{Error, Result};
use crate::mmdb::Database;

/// File extension of database files inside the database directory.
pub const DATABASE_EXTENSION: &str = "mmdb";

/// Reject names that are not `[A-Za-z0-9-]+`.
///
/// Names map directly to file names, so this runs before any path is built.
pub fn check_database_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-');
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidDatabaseName {
            name: name.to_string(),
        })
    }
}

/// Path of the database file for `name` inside `dir`. The name must already
/// be validated.
pub fn database_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.{DATABASE_EXTENSION}"))
}

/// Open database readers keyed by name.
///
/// Readers are opened on first use and kept for the lifetime of the cache.
/// A cached reader is never reopened, even if the file on disk is replaced;
/// a new process (or a new cache) sees the new file.
#[derive(Debug)]
pub struct ReaderCache {
    dir: PathBuf,
    readers: RwLock<FxHashMap<String, Arc<Database>>>,
}

impl ReaderCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            readers: RwLock::new(FxHashMap::default()),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.dir
    }

    /// Get the reader for `name`, opening it on a miss.
    ///
    /// # Errors
    ///
    /// `InvalidDatabaseName` for names outside `[A-Za-z0-9-]+`,
    /// `DatabaseNotFound` when the file is absent, `OpenDatabase` when it is
    /// not a valid database.
    pub fn get(&self, name: &str) -> Result<Arc<Database>> {
        check_database_name(name)?;

        if let Some(reader) = self
            .readers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            return Ok(Arc::clone(reader));
        }

        // Opened outside the lock; a racing opener for the same name is
        // harmless and the first stored reader wins.
        let path = database_path(&self.dir, name);
        let opened = Arc::new(Database::open(&path)?);
        debug!(database = name, path = %path.display(), "opened database");

        let mut readers = self
            .readers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let reader = readers.entry(name.to_string()).or_insert(opened);
        Ok(Arc::clone(reader))
    }

    /// Resolve every name in order, failing on the first bad one.
    pub fn open_all<I, S>(&self, names: I) -> Result<Vec<(String, Arc<Database>)>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        names
            .into_iter()
            .map(|name| {
                let name = name.as_ref();
                self.get(name).map(|reader| (name.to_string(), reader))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.readers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
