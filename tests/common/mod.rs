//! Builds small but real MaxMind DB files for tests.
//!
//! Only what the reader needs is emitted: a binary search tree with 24-bit
//! records, a data section without pointers, and the metadata map.
#![allow(dead_code)]

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use serde_json::{json, Value};

const METADATA_MARKER: &[u8] = b"\xAB\xCD\xEFMaxMind.com";
const DATA_SEPARATOR: usize = 16;

const TYPE_STRING: u8 = 2;
const TYPE_DOUBLE: u8 = 3;
const TYPE_UINT16: u8 = 5;
const TYPE_UINT32: u8 = 6;
const TYPE_MAP: u8 = 7;
const TYPE_INT32: u8 = 8;
const TYPE_UINT64: u8 = 9;
const TYPE_ARRAY: u8 = 11;
const TYPE_BOOLEAN: u8 = 14;

#[derive(Clone, Copy, Debug)]
enum Record {
    Empty,
    Node(usize),
    Data(usize),
}

pub struct MmdbWriter {
    database_type: String,
    ip_version: u16,
    networks: Vec<(IpAddr, u8, Value)>,
}

impl MmdbWriter {
    /// A writer for a database with an IPv6 tree; IPv4 networks live under
    /// `::/96`.
    pub fn new(database_type: &str) -> Self {
        Self {
            database_type: database_type.to_string(),
            ip_version: 6,
            networks: Vec::new(),
        }
    }

    /// A writer for an IPv4-only database.
    pub fn ipv4_only(database_type: &str) -> Self {
        Self {
            ip_version: 4,
            ..Self::new(database_type)
        }
    }

    /// Store `record` for `network`, e.g. `"214.78.120.0/22"`.
    pub fn insert(&mut self, network: &str, record: Value) -> &mut Self {
        let (addr, len) = network.split_once('/').expect("network in CIDR form");
        let addr: IpAddr = addr.parse().expect("network address");
        let len: u8 = len.parse().expect("prefix length");
        self.networks.push((addr, len, record));
        self
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let depth = if self.ip_version == 6 { 128 } else { 32 };
        let mut nodes: Vec<[Record; 2]> = vec![[Record::Empty; 2]];
        let mut data = Vec::new();

        // Broader networks first so that narrower ones split them.
        let mut networks: Vec<_> = self.networks.iter().collect();
        networks.sort_by_key(|(addr, len, _)| tree_prefix_len(*addr, *len, depth));

        for (addr, len, record) in networks {
            let bits = tree_bits(*addr, depth);
            let prefix_len = tree_prefix_len(*addr, *len, depth);
            let offset = data.len();
            encode(&mut data, record);

            let mut node = 0;
            for i in 0..prefix_len {
                let bit = bit_at(&bits, i);
                if i + 1 == prefix_len {
                    nodes[node][bit] = Record::Data(offset);
                    break;
                }
                node = match nodes[node][bit] {
                    Record::Node(next) => next,
                    existing => {
                        let split = match existing {
                            Record::Data(_) => [existing; 2],
                            _ => [Record::Empty; 2],
                        };
                        nodes.push(split);
                        let next = nodes.len() - 1;
                        nodes[node][bit] = Record::Node(next);
                        next
                    }
                };
            }
        }

        let node_count = nodes.len();
        let value = |record: Record| -> u32 {
            let v = match record {
                Record::Empty => node_count,
                Record::Node(i) => i,
                Record::Data(offset) => node_count + DATA_SEPARATOR + offset,
            };
            assert!(v < 1 << 24, "record value overflows 24 bits");
            v as u32
        };

        let mut out = Vec::new();
        for [left, right] in &nodes {
            out.extend_from_slice(&value(*left).to_be_bytes()[1..]);
            out.extend_from_slice(&value(*right).to_be_bytes()[1..]);
        }
        out.extend_from_slice(&[0u8; DATA_SEPARATOR]);
        out.extend_from_slice(&data);
        out.extend_from_slice(METADATA_MARKER);
        self.encode_metadata(&mut out, node_count as u32);
        out
    }

    /// Write `<dir>/<name>.mmdb`.
    pub fn write(&self, dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(format!("{name}.mmdb"));
        std::fs::write(&path, self.to_bytes()).expect("write database");
        path
    }

    fn encode_metadata(&self, out: &mut Vec<u8>, node_count: u32) {
        control(out, TYPE_MAP, 9);
        string(out, "binary_format_major_version");
        uint(out, TYPE_UINT16, 2);
        string(out, "binary_format_minor_version");
        uint(out, TYPE_UINT16, 0);
        string(out, "build_epoch");
        uint(out, TYPE_UINT64, 1_704_067_200);
        string(out, "database_type");
        string(out, &self.database_type);
        string(out, "description");
        control(out, TYPE_MAP, 1);
        string(out, "en");
        string(out, "test database");
        string(out, "ip_version");
        uint(out, TYPE_UINT16, u64::from(self.ip_version));
        string(out, "languages");
        control(out, TYPE_ARRAY, 1);
        string(out, "en");
        string(out, "node_count");
        uint(out, TYPE_UINT32, u64::from(node_count));
        string(out, "record_size");
        uint(out, TYPE_UINT16, 24);
    }
}

fn tree_bits(addr: IpAddr, depth: usize) -> Vec<u8> {
    match (addr, depth) {
        (IpAddr::V4(v4), 32) => v4.octets().to_vec(),
        (IpAddr::V4(v4), _) => v4.to_ipv6_compatible().octets().to_vec(),
        (IpAddr::V6(v6), 128) => v6.octets().to_vec(),
        (IpAddr::V6(_), _) => panic!("IPv6 network in an IPv4 database"),
    }
}

fn tree_prefix_len(addr: IpAddr, len: u8, depth: usize) -> usize {
    match addr {
        IpAddr::V4(_) if depth == 128 => usize::from(len) + 96,
        _ => usize::from(len),
    }
}

fn bit_at(bytes: &[u8], i: usize) -> usize {
    usize::from((bytes[i / 8] >> (7 - i % 8)) & 1)
}

fn control(out: &mut Vec<u8>, type_num: u8, size: usize) {
    let (size_bits, extra): (u8, Vec<u8>) = match size {
        0..=28 => (size as u8, Vec::new()),
        29..=284 => (29, vec![(size - 29) as u8]),
        285..=65_820 => (30, ((size - 285) as u16).to_be_bytes().to_vec()),
        _ => (31, ((size - 65_821) as u32).to_be_bytes()[1..].to_vec()),
    };
    if type_num <= 7 {
        out.push(type_num << 5 | size_bits);
    } else {
        out.push(size_bits);
        out.push(type_num - 7);
    }
    out.extend_from_slice(&extra);
}

fn string(out: &mut Vec<u8>, s: &str) {
    control(out, TYPE_STRING, s.len());
    out.extend_from_slice(s.as_bytes());
}

fn uint(out: &mut Vec<u8>, type_num: u8, value: u64) {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    control(out, type_num, bytes.len() - skip);
    out.extend_from_slice(&bytes[skip..]);
}

fn encode(out: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Object(map) => {
            control(out, TYPE_MAP, map.len());
            for (key, value) in map {
                string(out, key);
                encode(out, value);
            }
        }
        Value::Array(items) => {
            control(out, TYPE_ARRAY, items.len());
            for item in items {
                encode(out, item);
            }
        }
        Value::String(s) => string(out, s),
        Value::Bool(b) => control(out, TYPE_BOOLEAN, usize::from(*b)),
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                let type_num = if u <= u64::from(u32::MAX) {
                    TYPE_UINT32
                } else {
                    TYPE_UINT64
                };
                uint(out, type_num, u);
            } else if let Some(i) = n.as_i64() {
                let i = i32::try_from(i).expect("negative integers must fit in int32");
                control(out, TYPE_INT32, 4);
                out.extend_from_slice(&i.to_be_bytes());
            } else {
                let f = n.as_f64().expect("finite number");
                control(out, TYPE_DOUBLE, 8);
                out.extend_from_slice(&f.to_be_bytes());
            }
        }
        Value::Null => panic!("null cannot be stored in a MaxMind DB"),
    }
}

/// A GeoIP2-Country style record.
pub fn country_record(iso_code: &str, name: &str, continent: &str) -> Value {
    json!({
        "continent": { "code": continent, "names": { "en": continent_name(continent) } },
        "country": { "iso_code": iso_code, "names": { "en": name } },
        "registered_country": { "iso_code": iso_code, "names": { "en": name } },
    })
}

fn continent_name(code: &str) -> &'static str {
    match code {
        "NA" => "North America",
        "AS" => "Asia",
        "EU" => "Europe",
        _ => "Unknown",
    }
}

/// A country database holding the networks the tests rely on:
/// `214.78.120.0/22` (US), `2001:218::/32` (JP) and `2001:220::1/128` (KR).
pub fn write_country_db(dir: &Path, name: &str) -> PathBuf {
    MmdbWriter::new("GeoIP2-Country")
        .insert("214.78.120.0/22", country_record("US", "United States", "NA"))
        .insert("2001:218::/32", country_record("JP", "Japan", "AS"))
        .insert("2001:220::1/128", country_record("KR", "South Korea", "AS"))
        .write(dir, name)
}

/// A city database with subdivisions and location data. Its US network is
/// narrower than the country database's.
pub fn write_city_db(dir: &Path, name: &str) -> PathBuf {
    MmdbWriter::new("GeoIP2-City")
        .insert(
            "214.78.120.0/24",
            json!({
                "city": { "geoname_id": 4_509_177, "names": { "en": "Columbus" } },
                "country": { "iso_code": "US", "names": { "en": "United States" } },
                "location": {
                    "accuracy_radius": 1000,
                    "latitude": 39.9625,
                    "longitude": -83.0061,
                },
                "subdivisions": [
                    { "iso_code": "OH", "names": { "en": "Ohio" } },
                    { "iso_code": "FRA", "names": { "en": "Franklin" } },
                ],
            }),
        )
        .write(dir, name)
}

/// An ASN database. Records are flat maps.
pub fn write_asn_db(dir: &Path, name: &str) -> PathBuf {
    MmdbWriter::new("GeoLite2-ASN")
        .insert(
            "214.0.0.0/8",
            json!({
                "autonomous_system_number": 721,
                "autonomous_system_organization": "DoD Network Information Center",
            }),
        )
        .write(dir, name)
}
