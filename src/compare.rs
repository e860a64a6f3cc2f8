//! Field comparison between a partial mutation payload and a freshly
//! fetched rule.
//!
//! Used only for post-failure verification: the payload is considered
//! reflected in the rule iff every field present in the payload matches
//! after type normalization. A single mismatched or unrecognized field fails
//! the whole check, so verification prefers false negatives (retry-safe)
//! over false positives (which would mask a real failure as success).

use crate::types::ProxyRule;
use serde_json::Value;

/// Does the fetched rule reflect every field of this flat payload?
pub fn payload_reflected(payload: &Value, rule: &ProxyRule) -> bool {
    let Some(fields) = payload.as_object() else {
        return false;
    };
    fields
        .iter()
        .all(|(name, value)| field_matches(name, value, rule))
}

fn field_matches(name: &str, value: &Value, rule: &ProxyRule) -> bool {
    match name {
        "description" => value.as_str() == Some(rule.description.as_str()),
        "frontend_fqdn" => hostname_eq(value, &rule.frontend.fqdn),
        "backend_fqdn" => hostname_eq(value, &rule.backend.fqdn),
        "frontend_port" => number_eq(value, rule.frontend.port as f64),
        "backend_port" => number_eq(value, rule.backend.port as f64),
        "frontend_protocol" => number_eq(value, rule.frontend.protocol as f64),
        "backend_protocol" => number_eq(value, rule.backend.protocol as f64),
        "proxy_connect_timeout" => number_eq(value, rule.proxy_connect_timeout as f64),
        "proxy_read_timeout" => number_eq(value, rule.proxy_read_timeout as f64),
        "proxy_send_timeout" => number_eq(value, rule.proxy_send_timeout as f64),
        "proxy_http_version" => number_eq(value, rule.proxy_http_version as f64),
        "frontend_hsts" => bool_eq(value, rule.frontend.https.hsts),
        "proxy_intercept_errors" => bool_eq(value, rule.proxy_intercept_errors),
        "customize_headers" => headers_eq(value, rule),
        "acl" => acl_eq(value, rule),
        // No known accessor: conservatively a mismatch.
        _ => false,
    }
}

fn hostname_eq(value: &Value, fqdn: &str) -> bool {
    value
        .as_str()
        .map(|v| v.eq_ignore_ascii_case(fqdn))
        .unwrap_or(false)
}

fn number_eq(value: &Value, expected: f64) -> bool {
    as_number(value).map(|n| n == expected).unwrap_or(false)
}

fn bool_eq(value: &Value, expected: bool) -> bool {
    as_bool_like(value).map(|b| b == expected).unwrap_or(false)
}

/// Numeric coercion: JSON numbers pass through, numeric strings parse.
pub(crate) fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Boolean coercion following the UI's truthy convention: `true`, `"true"`
/// and `1` all mean true.
fn as_bool_like(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn headers_eq(value: &Value, rule: &ProxyRule) -> bool {
    let Some(payload_pairs) = canonical_headers(value) else {
        return false;
    };
    let mut rule_pairs: Vec<(String, String)> = rule
        .customize_headers
        .iter()
        .map(|h| (h.name.clone(), h.value.clone()))
        .collect();
    rule_pairs.sort();
    payload_pairs == rule_pairs
}

/// Normalize a headers payload to a sorted `(name, value)` list.
fn canonical_headers(value: &Value) -> Option<Vec<(String, String)>> {
    let entries = value.as_array()?;
    let mut pairs = Vec::with_capacity(entries.len());
    for entry in entries {
        let name = entry.get("name")?.as_str()?;
        let header_value = entry.get("value")?.as_str()?;
        pairs.push((name.to_string(), header_value.to_string()));
    }
    pairs.sort();
    Some(pairs)
}

fn acl_eq(value: &Value, rule: &ProxyRule) -> bool {
    match (value, &rule.frontend.acl) {
        (Value::Null, None) => true,
        (Value::Null, Some(_)) | (_, None) => false,
        (payload, Some(current)) => deep_sort(payload) == deep_sort(current),
    }
}

/// Recursively sort object keys so structurally-equal nested config compares
/// equal regardless of key order.
fn deep_sort(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = serde_json::Map::new();
            for key in keys {
                sorted.insert(key.clone(), deep_sort(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(deep_sort).collect()),
        other => other.clone(),
    }
}
