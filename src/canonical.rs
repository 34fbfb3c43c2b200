//! Canonical JSON serialization and content hashing.
//!
//! Every component that needs a stable identity for a record goes through
//! this module. The canonical form is what makes deduplication work across
//! process runs and across implementations in other languages, so the rules
//! here are load-bearing:
//!
//! - Object keys are normalized to Unicode NFC, then sorted lexicographically
//!   (byte order of the normalized UTF-8) at **every** nesting level.
//! - String values are normalized to NFC. Non-ASCII characters are emitted
//!   as-is, never `\u`-escaped.
//! - Numbers pass through with serde_json's own rendering (itoa/ryu).
//! - Booleans and null are the bare literals.
//! - Arrays keep their order; elements are normalized recursively.
//! - No insignificant whitespace; separators are `,` and `:`.
//!
//! Payloads reach this module as [`serde_json::Value`], so there is no
//! fallback path for host-language types here — callers convert dates and
//! custom objects at the serde boundary (ISO-8601 strings for timestamps).
//! Any change to these rules silently breaks dedup against existing packs.

use serde_json::Value;
use sha2::{Digest, Sha256};
use unicode_normalization::{is_nfc, UnicodeNormalization};

/// Normalize a string to NFC, borrowing when it is already normalized.
fn nfc(s: &str) -> String {
    if is_nfc(s) {
        s.to_string()
    } else {
        s.nfc().collect()
    }
}

/// Serialize a JSON string with serde_json's escaping rules.
///
/// serde_json escapes quotes, backslashes, and control characters but leaves
/// non-ASCII untouched, which is exactly the canonical form's requirement.
fn write_json_string(out: &mut String, s: &str) {
    // Serializing a &str cannot fail.
    let encoded = serde_json::to_string(s).unwrap_or_default();
    out.push_str(&encoded);
}

fn write_canonical(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_json_string(out, &nfc(s)),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => {
            // Normalize keys first, then sort. If two keys collide after
            // normalization, the later one wins (matches serde_json's own
            // duplicate-key handling on parse).
            let mut entries: Vec<(String, &Value)> =
                map.iter().map(|(k, v)| (nfc(k), v)).collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            entries.dedup_by(|later, earlier| {
                if later.0 == earlier.0 {
                    earlier.1 = later.1;
                    true
                } else {
                    false
                }
            });

            out.push('{');
            for (i, (key, val)) in entries.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_json_string(out, key);
                out.push(':');
                write_canonical(out, val);
            }
            out.push('}');
        }
    }
}

/// Produce the canonical serialization of a JSON value.
///
/// Invariant to input key ordering and to the Unicode normalization form of
/// equal-meaning strings. Total: every [`Value`] has a canonical form.
#[must_use]
pub fn canonicalize(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(&mut out, value);
    out
}

/// Compute the SHA-256 content hash over a record's identity fields.
///
/// The identity object is `{exchange_type, source_system, entity_type,
/// natural_key, request, response}` — `exchange_id` and `observed_at_utc`
/// are deliberately excluded so that re-observing identical content does
/// not mint a new identity. Returns lowercase hex (64 chars).
#[must_use]
pub fn content_hash(
    exchange_type: &str,
    source_system: &str,
    entity_type: &str,
    natural_key: Option<&str>,
    request: &Value,
    response: &Value,
) -> String {
    let identity = serde_json::json!({
        "exchange_type": exchange_type,
        "source_system": source_system,
        "entity_type": entity_type,
        "natural_key": natural_key,
        "request": request,
        "response": response,
    });
    let canonical = canonicalize(&identity);
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_order_invariance() {
        let a: Value = serde_json::from_str(r#"{"b":1,"a":{"d":2,"c":3}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a":{"c":3,"d":2},"b":1}"#).unwrap();
        assert_eq!(canonicalize(&a), canonicalize(&b));
        assert_eq!(canonicalize(&a), r#"{"a":{"c":3,"d":2},"b":1}"#);
    }

    #[test]
    fn test_nested_keys_sorted_at_every_level() {
        let v = json!({"z": {"y": {"b": 1, "a": 2}}, "a": 0});
        assert_eq!(canonicalize(&v), r#"{"a":0,"z":{"y":{"a":2,"b":1}}}"#);
    }

    #[test]
    fn test_nfc_normalization_of_strings_and_keys() {
        // U+00E9 (precomposed) vs U+0065 U+0301 (decomposed) — same meaning.
        let precomposed = json!({"caf\u{e9}": "r\u{e9}sum\u{e9}"});
        let decomposed = json!({"cafe\u{301}": "re\u{301}sume\u{301}"});
        assert_eq!(canonicalize(&precomposed), canonicalize(&decomposed));
    }

    #[test]
    fn test_non_ascii_not_escaped() {
        let v = json!({"name": "東京"});
        assert_eq!(canonicalize(&v), "{\"name\":\"東京\"}");
    }

    #[test]
    fn test_booleans_and_null_preserved() {
        let v = json!({"t": true, "f": false, "n": null});
        assert_eq!(canonicalize(&v), r#"{"f":false,"n":null,"t":true}"#);
    }

    #[test]
    fn test_array_order_preserved() {
        let v = json!([3, 1, 2]);
        assert_eq!(canonicalize(&v), "[3,1,2]");
    }

    #[test]
    fn test_no_insignificant_whitespace() {
        let v: Value = serde_json::from_str(r#"{ "a" : [ 1 , 2 ] }"#).unwrap();
        assert_eq!(canonicalize(&v), r#"{"a":[1,2]}"#);
    }

    #[test]
    fn test_content_hash_shape() {
        let hash = content_hash(
            "fetch",
            "wiki",
            "page",
            Some("Main_Page"),
            &json!({"url": "https://example.org"}),
            &json!({"status": 200}),
        );
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_content_hash_ignores_key_order_in_payloads() {
        let r1: Value = serde_json::from_str(r#"{"status":200,"body":"x"}"#).unwrap();
        let r2: Value = serde_json::from_str(r#"{"body":"x","status":200}"#).unwrap();
        let req = json!({});
        let h1 = content_hash("fetch", "wiki", "page", None, &req, &r1);
        let h2 = content_hash("fetch", "wiki", "page", None, &req, &r2);
        assert_eq!(h1, h2);
    }

    #[test]
    fn test_content_hash_distinguishes_natural_key() {
        let req = json!({});
        let resp = json!({});
        let with_key = content_hash("fetch", "wiki", "page", Some("A"), &req, &resp);
        let without = content_hash("fetch", "wiki", "page", None, &req, &resp);
        assert_ne!(with_key, without);
    }
}
