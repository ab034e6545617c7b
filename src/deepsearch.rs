//! Structure-agnostic search over embedded JSON payloads.
//!
//! Listing pages embed deeply nested JSON whose exact shape drifts between
//! page variants, so nothing here assumes fixed paths. Objects of interest
//! are located by a signature predicate over their keys, and field lookup
//! tolerates snake_case/camelCase naming drift. All traversal is pre-order
//! depth-first, so the first (shallowest-leftmost) match wins
//! deterministically.

use serde_json::Value;

/// Find the first object, in pre-order, for which `signature` holds.
pub fn find_object<'a, F>(value: &'a Value, signature: &F) -> Option<&'a Value>
where
    F: Fn(&serde_json::Map<String, Value>) -> bool,
{
    match value {
        Value::Object(map) => {
            if signature(map) {
                return Some(value);
            }
            for (_, child) in map {
                if let Some(found) = find_object(child, signature) {
                    return Some(found);
                }
            }
            None
        }
        Value::Array(items) => items.iter().find_map(|item| find_object(item, signature)),
        _ => None,
    }
}

/// Name variants tried when looking a field up: the name as given, its
/// camelCase form, and its snake_case form.
pub fn name_variants(name: &str) -> Vec<String> {
    let mut variants = vec![name.to_string()];

    if name.contains('_') {
        let mut camel = String::with_capacity(name.len());
        let mut upper_next = false;
        for c in name.chars() {
            if c == '_' {
                upper_next = true;
            } else if upper_next {
                camel.extend(c.to_uppercase());
                upper_next = false;
            } else {
                camel.push(c);
            }
        }
        if !variants.contains(&camel) {
            variants.push(camel);
        }
    } else if name.chars().any(|c| c.is_uppercase()) {
        let mut snake = String::with_capacity(name.len() + 4);
        for c in name.chars() {
            if c.is_uppercase() {
                snake.push('_');
                snake.extend(c.to_lowercase());
            } else {
                snake.push(c);
            }
        }
        if !variants.contains(&snake) {
            variants.push(snake);
        }
    }

    variants
}

/// Direct (non-recursive) field lookup on an object, trying name variants.
pub fn get_field<'a>(value: &'a Value, name: &str) -> Option<&'a Value> {
    let map = value.as_object()?;
    for variant in name_variants(name) {
        if let Some(v) = map.get(&variant) {
            if !v.is_null() {
                return Some(v);
            }
        }
    }
    None
}

/// Find the first non-null occurrence of a field anywhere in the tree,
/// trying name variants at every object.
pub fn deep_find_field<'a>(value: &'a Value, name: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => {
            for variant in name_variants(name) {
                if let Some(v) = map.get(&variant) {
                    if !v.is_null() {
                        return Some(v);
                    }
                }
            }
            for (_, child) in map {
                if let Some(found) = deep_find_field(child, name) {
                    return Some(found);
                }
            }
            None
        }
        Value::Array(items) => items.iter().find_map(|item| deep_find_field(item, name)),
        _ => None,
    }
}

/// Coercions for the loose typing of embedded payloads, where numbers show
/// up as strings ("450000", "$450,000") and vice versa.
pub fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => {
            let cleaned: String = s.chars().filter(|c| c.is_ascii_digit() || *c == '-').collect();
            cleaned.parse().ok()
        }
        _ => None,
    }
}

pub fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let cleaned: String = s
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
                .collect();
            cleaned.parse().ok()
        }
        _ => None,
    }
}

pub fn as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
