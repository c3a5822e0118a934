//! Flattening of nested MMDB records into dot-notation fields.
//!
//! `{"country": {"iso_code": "US"}}` becomes `country.iso_code = "US"` and
//! `{"tags": ["a", "b"]}` becomes `tags.0 = "a"`, `tags.1 = "b"`.
//!
//! MaxMind orders `subdivisions` from the largest administrative region to
//! the smallest, so the last entry of a record's top-level `subdivisions`
//! list is additionally exposed under index `-1`
//! (`subdivisions.-1.iso_code`). No other list is treated this way.

use serde_json::{Map, Value};

const SUBDIVISIONS: &str = "subdivisions";
const LAST_INDEX: &str = "-1";

/// Lazily flatten `record` into `(key, leaf)` pairs.
///
/// The iterator is cheap to clone; calling `flatten` again restarts the walk.
pub fn flatten(record: &Value) -> Flatten<'_> {
    let mut stack = Vec::new();
    match record {
        Value::Object(map) => {
            for (key, value) in map.iter().rev() {
                stack.push(Pending {
                    key: Some(key.clone()),
                    value,
                });
            }
        }
        other => stack.push(Pending {
            key: None,
            value: other,
        }),
    }
    Flatten { stack }
}

/// Collect a flattened record into a map, preserving emission order.
pub fn flatten_to_map(record: &Value) -> Map<String, Value> {
    flatten(record)
        .map(|(key, value)| (key, value.clone()))
        .collect()
}

#[derive(Clone, Debug)]
struct Pending<'a> {
    /// `None` only for a non-map root value.
    key: Option<String>,
    value: &'a Value,
}

/// Iterator returned by [`flatten`].
#[derive(Clone, Debug)]
pub struct Flatten<'a> {
    stack: Vec<Pending<'a>>,
}

impl<'a> Iterator for Flatten<'a> {
    type Item = (String, &'a Value);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(Pending { key, value }) = self.stack.pop() {
            match value {
                Value::Object(map) => {
                    for (sub_key, sub_value) in map.iter().rev() {
                        self.stack.push(Pending {
                            key: Some(join(key.as_deref(), sub_key)),
                            value: sub_value,
                        });
                    }
                }
                Value::Array(items) => {
                    // Pushed first so it pops after every indexed element.
                    if key.as_deref() == Some(SUBDIVISIONS) {
                        if let Some(last) = items.last() {
                            self.stack.push(Pending {
                                key: Some(join(key.as_deref(), LAST_INDEX)),
                                value: last,
                            });
                        }
                    }
                    for (i, item) in items.iter().enumerate().rev() {
                        self.stack.push(Pending {
                            key: Some(join(key.as_deref(), &i.to_string())),
                            value: item,
                        });
                    }
                }
                leaf => return Some((key.unwrap_or_default(), leaf)),
            }
        }
        None
    }
}

fn join(parent: Option<&str>, child: &str) -> String {
    match parent {
        Some(parent) => {
            let mut key = String::with_capacity(parent.len() + 1 + child.len());
            key.push_str(parent);
            key.push('.');
            key.push_str(child);
            key
        }
        None => child.to_string(),
    }
}
