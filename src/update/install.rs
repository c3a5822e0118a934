//! Atomic replacement of database files.
//!
//! Writers serialize on an exclusive lock over `.geoipupdate.lock` in the
//! database directory, held only while one edition is written. The new file
//! is written beside the target and renamed over it, so readers see either
//! the old file or the new one, never a partial write. Readers that already
//! mapped the old file keep their mapping.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use md5::{Digest, Md5};
use tracing::debug;

use super::ZERO_HASH;
use crate::cache::database_path;
use crate::error::Result;

pub const LOCK_FILE: &str = ".geoipupdate.lock";

/// Exclusive lock on a database directory, released on drop.
#[derive(Debug)]
pub struct DirectoryLock {
    file: File,
    path: PathBuf,
}

impl DirectoryLock {
    /// Block until the lock for `dir` is held.
    pub fn acquire(dir: &Path) -> Result<Self> {
        let path = dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;
        file.lock()?;
        debug!(path = %path.display(), "acquired directory lock");
        Ok(Self { file, path })
    }
}

impl Drop for DirectoryLock {
    fn drop(&mut self) {
        if self.file.unlock().is_ok() {
            debug!(path = %self.path.display(), "released directory lock");
        }
    }
}

/// MD5 of the file at `path`, or [`ZERO_HASH`] if there is none.
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(ZERO_HASH.to_string()),
        Err(err) => return Err(err.into()),
    };

    let mut hasher = Md5::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// What [`install`] found under the lock.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Installed {
    /// Hash of the target just before the write decision.
    pub previous_hash: String,
    /// False when the target already had `hash`, e.g. installed by a
    /// concurrent run.
    pub written: bool,
}

/// Write `contents` as the database for `edition_id` in `dir`.
///
/// `hash` is the MD5 of `contents`; the target is re-hashed under the lock
/// and left alone if it already matches.
pub fn install(dir: &Path, edition_id: &str, contents: &[u8], hash: &str) -> Result<Installed> {
    let _lock = DirectoryLock::acquire(dir)?;

    let target = database_path(dir, edition_id);
    let previous_hash = hash_file(&target)?;
    if previous_hash == hash {
        return Ok(Installed {
            previous_hash,
            written: false,
        });
    }

    let temp = target.with_extension("mmdb.temp");
    if let Err(err) = write_and_rename(&temp, &target, contents) {
        let _ = fs::remove_file(&temp);
        return Err(err.into());
    }
    sync_directory(dir)?;

    debug!(
        edition = edition_id,
        path = %target.display(),
        bytes = contents.len(),
        "installed database"
    );
    Ok(Installed {
        previous_hash,
        written: true,
    })
}

fn write_and_rename(temp: &Path, target: &Path, contents: &[u8]) -> io::Result<()> {
    let mut file = File::create(temp)?;
    file.write_all(contents)?;
    file.sync_all()?;
    drop(file);
    fs::rename(temp, target)
}

#[cfg(unix)]
fn sync_directory(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_directory(_dir: &Path) -> io::Result<()> {
    Ok(())
}
