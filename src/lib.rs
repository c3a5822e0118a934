//! The geoipenrich library: MaxMind DB enrichment for event streams, and the
//! pipeline that keeps those databases current.
//!
//! Enrichment resolves a set of named databases once, then adds every field
//! of each matching record to the event, flattened to dotted keys, plus the
//! matched network in CIDR notation.
//!
//! # Examples
//!
//! ```rust,no_run
//! use geoipenrich::{EnrichOptions, Enricher, ReaderCache};
//! use serde_json::json;
//!
//! let cache = ReaderCache::new("/opt/geoip/data");
//! let options = EnrichOptions::new("src_ip", "geo_", "GeoLite2-City,GeoLite2-ASN");
//! let enricher = Enricher::new(&cache, options)?;
//!
//! let event = json!({ "src_ip": "81.2.69.142" });
//! let event = enricher.process(event.as_object().cloned().unwrap_or_default())?;
//! println!("{}", serde_json::Value::Object(event));
//! # Ok::<(), geoipenrich::Error>(())
//! ```
//!
//! Updates run from a [`SettingsStore`] through [`update::Trigger`], which
//! launches each run on its own thread and hands back a handle to join.

pub mod cache;
pub mod config;
pub mod enrich;
pub mod error;
pub mod flatten;
pub mod input;
pub mod logging;
pub mod mmdb;
pub mod network;
pub mod settings;
pub mod update;

pub use crate::cache::ReaderCache;
pub use crate::enrich::{EnrichOptions, Enricher, Event};
pub use crate::error::{Error, Result};
pub use crate::mmdb::{Database, Lookup};
pub use crate::network::Network;
pub use crate::settings::{FileSettingsStore, LogLevel, SettingsStore};
