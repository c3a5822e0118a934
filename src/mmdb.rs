use std::fmt;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use maxminddb::{MaxMindDBError, Mmap, Reader};
use serde_json::Value;

use crate::error::{Error, Result};

/// Outcome of looking up one address in one database.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    /// The text is not an IP address this database can answer for.
    InvalidAddress,
    /// No network in the database covers the address.
    NotFound,
    /// The most specific record covering the address, with the prefix length
    /// of the matched network relative to the queried address family.
    Found { record: Value, prefix_len: u8 },
}

/// An open, memory-mapped MaxMind DB file.
pub struct Database {
    path: PathBuf,
    reader: Reader<Mmap>,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .field("database_type", &self.database_type())
            .field("ip_version", &self.ip_version())
            .finish()
    }
}

impl Database {
    /// Open and memory-map a database file.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseNotFound` if the file does not exist and
    /// `OpenDatabase` if it is not a valid MaxMind DB.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(Error::DatabaseNotFound {
                path: path.to_path_buf(),
            });
        }
        let reader = Reader::open_mmap(path).map_err(|source| Error::OpenDatabase {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            reader,
        })
    }

    /// The `database_type` string from the file metadata, e.g. `GeoIP2-City`.
    pub fn database_type(&self) -> &str {
        &self.reader.metadata.database_type
    }

    pub fn ip_version(&self) -> u16 {
        self.reader.metadata.ip_version
    }

    pub fn build_epoch(&self) -> u64 {
        self.reader.metadata.build_epoch
    }

    /// Look up a text-form address.
    ///
    /// Malformed addresses, IPv6 addresses against an IPv4-only tree, and
    /// uncovered addresses are reported as misses rather than errors. Only a
    /// corrupt data section is an error.
    pub fn lookup(&self, ip: &str) -> Result<Lookup> {
        let addr: IpAddr = match ip.parse() {
            Ok(addr) => addr,
            Err(_) => return Ok(Lookup::InvalidAddress),
        };
        self.lookup_addr(addr)
    }

    /// Look up an already parsed address.
    pub fn lookup_addr(&self, addr: IpAddr) -> Result<Lookup> {
        if addr.is_ipv6() && self.ip_version() == 4 {
            return Ok(Lookup::InvalidAddress);
        }

        match self.reader.lookup_prefix::<Value>(addr) {
            Ok((record, prefix_len)) => Ok(Lookup::Found {
                record,
                prefix_len: family_prefix_len(addr, prefix_len),
            }),
            Err(MaxMindDBError::AddressNotFoundError(_)) => Ok(Lookup::NotFound),
            Err(MaxMindDBError::InvalidNetworkError(_)) => Ok(Lookup::InvalidAddress),
            Err(source) => Err(Error::LookupFailed {
                ip: addr.to_string(),
                source,
            }),
        }
    }
}

/// IPv4 lookups in an IPv6 tree walk the 96-bit `::/96` prefix first; report
/// the length relative to the IPv4 address.
fn family_prefix_len(addr: IpAddr, prefix_len: usize) -> u8 {
    let len = match addr {
        IpAddr::V4(_) if prefix_len > 32 => prefix_len.saturating_sub(96),
        _ => prefix_len,
    };
    u8::try_from(len).unwrap_or(u8::MAX)
}
