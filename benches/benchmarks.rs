use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use geoipenrich::flatten::flatten;
use geoipenrich::{EnrichOptions, Enricher, Event, ReaderCache};
use serde_json::{json, Value};
use std::hint::black_box;

#[path = "../tests/common/mod.rs"]
mod common;

// A GeoIP2-City style record with nested maps and a subdivisions list
fn city_record() -> Value {
    json!({
        "city": { "geoname_id": 4509177, "names": { "de": "Columbus", "en": "Columbus", "ja": "コロンバス" } },
        "continent": { "code": "NA", "geoname_id": 6255149, "names": { "en": "North America" } },
        "country": { "geoname_id": 6252001, "iso_code": "US", "names": { "en": "United States" } },
        "location": { "accuracy_radius": 1000, "latitude": 39.9625, "longitude": -83.0061, "time_zone": "America/New_York" },
        "postal": { "code": "43215" },
        "registered_country": { "geoname_id": 6252001, "iso_code": "US", "names": { "en": "United States" } },
        "subdivisions": [
            { "geoname_id": 5165418, "iso_code": "OH", "names": { "en": "Ohio" } },
            { "geoname_id": 4512060, "iso_code": "FRA", "names": { "en": "Franklin" } }
        ]
    })
}

// Generate events spread over the networks in the test databases
fn generate_events(count: usize) -> Vec<Event> {
    let ips = ["214.78.120.1", "214.78.122.9", "2001:218::1", "2001:220::1", "10.0.0.1", "bogus"];
    (0..count)
        .map(|i| {
            let event = json!({ "ip": ips[i % ips.len()], "seq": i, "action": "allowed" });
            event.as_object().cloned().unwrap_or_default()
        })
        .collect()
}

fn bench_flatten(c: &mut Criterion) {
    let record = city_record();
    let mut group = c.benchmark_group("flatten");
    group.throughput(Throughput::Elements(1));

    group.bench_function("city_record", |b| {
        b.iter(|| flatten(black_box(&record)).count());
    });

    group.bench_function("city_record_owned", |b| {
        b.iter(|| {
            let pairs: Vec<(String, Value)> =
                flatten(black_box(&record)).map(|(k, v)| (k, v.clone())).collect();
            black_box(pairs);
        });
    });

    group.finish();
}

fn bench_enrich(c: &mut Criterion) {
    let dir = tempfile::tempdir().expect("temp dir");
    common::write_country_db(dir.path(), "GeoIP2-Country");
    common::write_city_db(dir.path(), "GeoIP2-City");
    common::write_asn_db(dir.path(), "GeoLite2-ASN");
    let cache = ReaderCache::new(dir.path());

    let events = generate_events(1000);
    let mut group = c.benchmark_group("enrich");
    group.throughput(Throughput::Elements(events.len() as u64));

    for databases in ["GeoIP2-Country", "GeoIP2-Country,GeoIP2-City,GeoLite2-ASN"] {
        let enricher = Enricher::new(&cache, EnrichOptions::new("ip", "", databases))
            .expect("Failed to load databases");
        group.bench_with_input(BenchmarkId::from_parameter(databases), &events, |b, events| {
            b.iter(|| {
                for event in events {
                    let mut event = event.clone();
                    black_box(enricher.enrich(&mut event).expect("lookup"));
                }
            });
        });
    }

    group.finish();
}

fn bench_lookup(c: &mut Criterion) {
    let dir = tempfile::tempdir().expect("temp dir");
    common::write_country_db(dir.path(), "GeoIP2-Country");
    let cache = ReaderCache::new(dir.path());
    let db = cache.get("GeoIP2-Country").expect("Failed to open database");

    let mut group = c.benchmark_group("lookup");
    for ip in ["214.78.120.1", "2001:220::1", "10.0.0.1"] {
        group.bench_with_input(BenchmarkId::from_parameter(ip), ip, |b, ip| {
            b.iter(|| db.lookup(black_box(ip)).expect("lookup"));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_flatten, bench_enrich, bench_lookup);
criterion_main!(benches);
