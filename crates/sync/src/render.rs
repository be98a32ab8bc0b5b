//! Row-to-text rendering and metadata sanitization
//!
//! Deterministic projection of a row into prose the embedding model can work
//! with, plus a sanitized scalar metadata map for filtering. Rows arrive as
//! JSON objects with timestamps already ISO-8601, decimals already floats and
//! binary payloads already replaced by `<binary:N>` placeholders.

use atabot_common::registry::TablePatterns;
use serde_json::{Map, Value};

/// Maximum rendered field segments per row
const MAX_SEGMENTS: usize = 20;

/// Maximum characters kept from a string value
const MAX_STRING_CHARS: usize = 1000;

/// Render a row to searchable prose.
///
/// Starts with `"This is a {entity_type} from {table}"` when the entity type
/// is specific, then appends `"{label}: {value}"` segments. Fields named in
/// display/searchable patterns come first (the top five are promoted to the
/// head); nulls, leading-underscore columns and binary placeholders are
/// skipped; strings are truncated.
pub fn render_searchable_text(
    row: &Map<String, Value>,
    table: &str,
    patterns: &TablePatterns,
) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut head_len = 0;

    if patterns.entity_type != "record" && !patterns.entity_type.is_empty() {
        parts.push(format!("This is a {} from {}", patterns.entity_type, table));
        head_len = 1;
    }

    let important: Vec<&String> = patterns
        .display_fields
        .iter()
        .chain(patterns.searchable_fields.iter())
        .collect();

    for (key, value) in row {
        if value.is_null() || key.starts_with('_') {
            continue;
        }

        let Some(rendered) = render_value(value) else {
            continue;
        };

        let label = patterns
            .terminology
            .get(key)
            .cloned()
            .unwrap_or_else(|| key.replace('_', " "));

        let segment = format!("{}: {}", label, rendered);
        let priority = important.iter().take(5).any(|f| *f == key);

        if priority {
            parts.insert(head_len, segment);
            head_len += 1;
        } else {
            parts.push(segment);
        }
    }

    parts.truncate(MAX_SEGMENTS);
    parts.join(". ")
}

/// Render one field value; `None` means skip the field
fn render_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            if s.starts_with("<binary:") {
                return None;
            }
            Some(truncate(s, MAX_STRING_CHARS))
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(_) | Value::Object(_) => {
            let json = value.to_string();
            Some(truncate(&json, MAX_STRING_CHARS))
        }
        Value::Null => None,
    }
}

/// Sanitize a row into a scalar metadata map: strings truncated to 1000
/// chars, nested values serialized to JSON strings (capped at 2000)
pub fn sanitize_metadata(row: &Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::with_capacity(row.len());

    for (key, value) in row {
        let sanitized = match value {
            Value::Null => Value::Null,
            Value::String(s) => Value::String(truncate(s, MAX_STRING_CHARS)),
            Value::Number(_) | Value::Bool(_) => value.clone(),
            Value::Array(_) | Value::Object(_) => {
                Value::String(truncate(&value.to_string(), 2000))
            }
        };
        out.insert(key.clone(), sanitized);
    }

    out
}

/// Stable identifier for a row: `{schema}_{table}_{pk}` when a primary key
/// value exists, else the md5 of schema, table and rendered text
pub fn stable_row_id(
    schema: &str,
    table: &str,
    row: &Map<String, Value>,
    primary_key: Option<&str>,
    text: &str,
) -> String {
    if let Some(pk) = primary_key {
        if let Some(value) = row.get(pk) {
            let pk_value = match value {
                Value::String(s) => s.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            };
            if !pk_value.is_empty() {
                return format!("{}_{}_{}", schema, table, pk_value);
            }
        }
    }
    format!("{:x}", md5::compute(format!("{}_{}_{}", schema, table, text)))
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn patterns() -> TablePatterns {
        TablePatterns {
            entity_type: "product".into(),
            display_fields: vec!["name".into()],
            searchable_fields: vec!["sku".into()],
            terminology: [("im_stock".to_string(), "stock on hand".to_string())]
                .into_iter()
                .collect(),
            primary_key: Some("id".into()),
        }
    }

    fn row() -> Map<String, Value> {
        json!({
            "id": 7,
            "name": "ALO LEGGING BLACK",
            "sku": "ALO-01",
            "im_stock": 42,
            "_internal": "hidden",
            "blob": "<binary:2048>",
            "note": null
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    #[test]
    fn test_render_has_entity_header_and_promoted_fields() {
        let text = render_searchable_text(&row(), "products", &patterns());

        assert!(text.starts_with("This is a product from products"));
        // Promoted display field right after the header
        let after_header = text.split(". ").nth(1).unwrap();
        assert!(after_header == "name: ALO LEGGING BLACK" || after_header == "sku: ALO-01");
        // Terminology replaces the raw column name
        assert!(text.contains("stock on hand: 42"));
        // Skips nulls, underscore columns and binaries
        assert!(!text.contains("_internal"));
        assert!(!text.contains("binary"));
        assert!(!text.contains("note"));
    }

    #[test]
    fn test_render_plain_record_has_no_header() {
        let patterns = TablePatterns::default();
        let text = render_searchable_text(&row(), "products", &patterns);
        assert!(!text.starts_with("This is a"));
        assert!(text.contains("name: ALO LEGGING BLACK"));
    }

    #[test]
    fn test_render_is_deterministic() {
        let a = render_searchable_text(&row(), "products", &patterns());
        let b = render_searchable_text(&row(), "products", &patterns());
        assert_eq!(a, b);
    }

    #[test]
    fn test_render_caps_segments() {
        let mut big = Map::new();
        for i in 0..40 {
            big.insert(format!("col{:02}", i), json!(i));
        }
        let text = render_searchable_text(&big, "wide", &TablePatterns::default());
        assert_eq!(text.split(". ").count(), 20);
    }

    #[test]
    fn test_render_truncates_long_strings() {
        let mut row = Map::new();
        row.insert("body".into(), json!("x".repeat(5000)));
        let text = render_searchable_text(&row, "docs", &TablePatterns::default());
        assert!(text.len() < 1100);
        assert!(text.ends_with("..."));
    }

    #[test]
    fn test_sanitize_metadata_truncates_and_stringifies() {
        let mut row = Map::new();
        row.insert("name".into(), json!("ok"));
        row.insert("long".into(), json!("y".repeat(1500)));
        row.insert("nested".into(), json!({"a": [1, 2, 3]}));
        row.insert("qty".into(), json!(5));
        row.insert("gone".into(), Value::Null);

        let meta = sanitize_metadata(&row);
        assert_eq!(meta["name"], json!("ok"));
        assert_eq!(meta["long"].as_str().unwrap().len(), 1003);
        assert!(meta["nested"].is_string());
        assert_eq!(meta["qty"], json!(5));
        assert!(meta["gone"].is_null());
    }

    #[test]
    fn test_stable_row_id_prefers_primary_key() {
        let id = stable_row_id("retail", "products", &row(), Some("id"), "text");
        assert_eq!(id, "retail_products_7");
    }

    #[test]
    fn test_stable_row_id_hash_fallback_is_deterministic() {
        let a = stable_row_id("retail", "products", &row(), None, "some text");
        let b = stable_row_id("retail", "products", &row(), None, "some text");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }
}
