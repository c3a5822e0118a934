//! Per-event enrichment across an ordered list of databases.

use std::net::IpAddr;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::cache::ReaderCache;
use crate::error::Result;
use crate::flatten::flatten;
use crate::mmdb::{Database, Lookup};
use crate::network::Network;

/// An event: ordered field name to value mapping.
pub type Event = Map<String, Value>;

pub const DEFAULT_FIELD: &str = "ip";
const NETWORK_FIELD: &str = "network";

/// What to look up and where to write it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnrichOptions {
    /// Event field holding the address.
    pub field: String,
    /// Prepended to every output field name, including `network`.
    pub prefix: String,
    /// Database names in precedence order; later entries win on collisions.
    pub databases: Vec<String>,
}

impl Default for EnrichOptions {
    fn default() -> Self {
        Self {
            field: DEFAULT_FIELD.to_string(),
            prefix: String::new(),
            databases: Vec::new(),
        }
    }
}

impl EnrichOptions {
    /// Options with `databases` taken from a comma-separated list. Entries are
    /// trimmed; empty entries are kept so that they fail name validation.
    pub fn new(field: impl Into<String>, prefix: impl Into<String>, databases: &str) -> Self {
        Self {
            field: field.into(),
            prefix: prefix.into(),
            databases: parse_database_list(databases),
        }
    }
}

pub fn parse_database_list(databases: &str) -> Vec<String> {
    databases
        .split(',')
        .map(|name| name.trim().to_string())
        .collect()
}

/// Enriches events using readers resolved once, up front.
#[derive(Debug)]
pub struct Enricher {
    readers: Vec<(String, Arc<Database>)>,
    field: String,
    prefix: String,
}

impl Enricher {
    /// Resolve every configured database through `cache`.
    ///
    /// # Errors
    ///
    /// Fails before any event is seen if a name is invalid or its file is
    /// missing or unreadable.
    pub fn new(cache: &ReaderCache, options: EnrichOptions) -> Result<Self> {
        let readers = cache.open_all(&options.databases)?;
        Ok(Self {
            readers,
            field: options.field,
            prefix: options.prefix,
        })
    }

    /// Enrich `event` and hand it back.
    pub fn process(&self, mut event: Event) -> Result<Event> {
        self.enrich(&mut event)?;
        Ok(event)
    }

    /// Lazily enrich a stream of events.
    pub fn stream<'a, I>(&'a self, events: I) -> impl Iterator<Item = Result<Event>> + 'a
    where
        I: IntoIterator<Item = Event>,
        I::IntoIter: 'a,
    {
        events.into_iter().map(move |event| self.process(event))
    }

    /// Enrich `event` in place. Returns whether any database matched.
    ///
    /// Fields from later databases overwrite earlier ones; the `network`
    /// field uses the longest prefix seen across all matching databases.
    /// Events without a usable address, or with no match anywhere, are left
    /// untouched.
    ///
    /// # Errors
    ///
    /// Only a corrupt database surfaces here; misses and malformed
    /// addresses do not.
    pub fn enrich(&self, event: &mut Event) -> Result<bool> {
        let ip = match event.get(&self.field) {
            Some(Value::String(ip)) if !ip.is_empty() => ip.clone(),
            Some(Value::String(_)) | Some(Value::Null) | None => {
                debug!(field = %self.field, "event missing or empty field");
                return Ok(false);
            }
            Some(other) => {
                debug!(field = %self.field, value = %other, "address field is not a string");
                return Ok(false);
            }
        };

        let mut largest_prefix_len: Option<u8> = None;

        for (name, reader) in &self.readers {
            let (record, prefix_len) = match reader.lookup(&ip)? {
                Lookup::Found { record, prefix_len } => (record, prefix_len),
                Lookup::InvalidAddress => {
                    debug!(ip = %ip, database = %name, "invalid IP address");
                    continue;
                }
                Lookup::NotFound => {
                    debug!(
                        ip = %ip,
                        database = %name,
                        database_type = reader.database_type(),
                        "no record found"
                    );
                    continue;
                }
            };

            match record.as_object() {
                Some(map) if map.is_empty() => {
                    debug!(ip = %ip, database = %name, "empty record");
                    continue;
                }
                Some(_) => {}
                None => {
                    debug!(ip = %ip, database = %name, record = %record, "record is not a map");
                    continue;
                }
            }

            for (key, value) in flatten(&record) {
                event.insert(format!("{}{}", self.prefix, key), value.clone());
            }

            largest_prefix_len = Some(largest_prefix_len.map_or(prefix_len, |l| l.max(prefix_len)));
        }

        let Some(prefix_len) = largest_prefix_len else {
            return Ok(false);
        };

        // Found implies the text parsed as an address.
        if let Ok(addr) = ip.parse::<IpAddr>() {
            let network = Network::new(addr, prefix_len);
            event.insert(
                format!("{}{}", self.prefix, NETWORK_FIELD),
                Value::String(network.to_string()),
            );
        }

        Ok(true)
    }

    /// Names of the resolved databases, in precedence order.
    pub fn databases(&self) -> impl Iterator<Item = &str> {
        self.readers.iter().map(|(name, _)| name.as_str())
    }
}
