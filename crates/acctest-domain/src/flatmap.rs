//! Flattening of nested JSON attribute values into the dotted key scheme
//! used for state assertions (`tags.%`, `tags.hello`, `acl.#`, `acl.0.id`).

use std::collections::HashMap;

use serde_json::Value;

/// Flatten the attribute object of one resource.
///
/// Maps get a `<key>.%` entry with their size, lists a `<key>.#` entry.
/// Objects nested inside lists are blocks and do not get a `%` entry.
/// `null` values are dropped.
pub fn flatten(attributes: &Value) -> HashMap<String, String> {
    let mut out = HashMap::new();
    if let Some(obj) = attributes.as_object() {
        for (k, v) in obj {
            flatten_into(k, v, &mut out);
        }
    }
    out
}

fn flatten_into(prefix: &str, value: &Value, out: &mut HashMap<String, String>) {
    match value {
        Value::Null => {}
        Value::Bool(b) => {
            out.insert(prefix.to_string(), b.to_string());
        }
        Value::Number(n) => {
            out.insert(prefix.to_string(), n.to_string());
        }
        Value::String(s) => {
            out.insert(prefix.to_string(), s.clone());
        }
        Value::Array(items) => {
            out.insert(format!("{}.#", prefix), items.len().to_string());
            for (i, item) in items.iter().enumerate() {
                let elem = format!("{}.{}", prefix, i);
                match item {
                    Value::Object(block) => {
                        for (k, v) in block {
                            flatten_into(&format!("{}.{}", elem, k), v, out);
                        }
                    }
                    other => flatten_into(&elem, other, out),
                }
            }
        }
        Value::Object(map) => {
            out.insert(format!("{}.%", prefix), map.len().to_string());
            for (k, v) in map {
                flatten_into(&format!("{}.{}", prefix, k), v, out);
            }
        }
    }
}

/// Collect the entries of a flattened map attribute (`prefix.key` pairs, excluding counts).
pub fn map_entries(attributes: &HashMap<String, String>, prefix: &str) -> HashMap<String, String> {
    let lead = format!("{}.", prefix);
    attributes
        .iter()
        .filter_map(|(k, v)| {
            let rest = k.strip_prefix(&lead)?;
            if rest == "%" || rest == "#" || rest.contains('.') {
                return None;
            }
            Some((rest.to_string(), v.clone()))
        })
        .collect()
}
