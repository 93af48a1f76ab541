//! Secret redaction shared by C1 (event payloads) and C5 (host API arguments)

use regex::Regex;
use std::sync::LazyLock;

const REDACTED: &str = "[REDACTED]";

/// Object keys whose values are always redacted regardless of content.
const SENSITIVE_KEYS: &[&str] = &["password", "token", "secret", "api_key", "apikey", "access_key", "private_key"];

static SECRET_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        // Common API key / token shapes: sk-..., ghp_..., Bearer <token>
        Regex::new(r"sk-[A-Za-z0-9]{16,}").unwrap(),
        Regex::new(r"ghp_[A-Za-z0-9]{20,}").unwrap(),
        Regex::new(r"(?i)bearer\s+[A-Za-z0-9._-]{10,}").unwrap(),
    ]
});

/// Redact string values matching known secret shapes and any value stored
/// under a sensitive key name. Used by C1 before appending event payloads
/// and by C5 for every `HostCall` argument crossing the sandbox boundary.
pub fn redact(value: &serde_json::Value) -> serde_json::Value {
    redact_inner(value, false)
}

fn redact_inner(value: &serde_json::Value, force: bool) -> serde_json::Value {
    match value {
        serde_json::Value::String(s) => {
            if force || SECRET_PATTERNS.iter().any(|p| p.is_match(s)) {
                serde_json::Value::String(REDACTED.to_string())
            } else {
                serde_json::Value::String(s.clone())
            }
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(|v| redact_inner(v, force)).collect())
        }
        serde_json::Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                let key_is_sensitive = SENSITIVE_KEYS.iter().any(|sk| k.to_lowercase().contains(sk));
                out.insert(k.clone(), redact_inner(v, force || key_is_sensitive));
            }
            serde_json::Value::Object(out)
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_sensitive_key_regardless_of_value_shape() {
        let input = serde_json::json!({"api_key": "anything", "note": "hello"});
        let redacted = redact(&input);
        assert_eq!(redacted["api_key"], REDACTED);
        assert_eq!(redacted["note"], "hello");
    }

    #[test]
    fn redacts_known_secret_patterns_in_free_text() {
        let input = serde_json::json!({"log": "used sk-abcdefghijklmnopqrstuvwxyz to call"});
        let redacted = redact(&input);
        assert_eq!(redacted["log"], REDACTED);
    }

    #[test]
    fn redacts_nested_objects_and_arrays() {
        let input = serde_json::json!({"headers": [{"token": "abc"}, {"name": "x"}]});
        let redacted = redact(&input);
        assert_eq!(redacted["headers"][0]["token"], REDACTED);
        assert_eq!(redacted["headers"][1]["name"], "x");
    }

    #[test]
    fn leaves_ordinary_values_untouched() {
        let input = serde_json::json!({"count": 3, "name": "task"});
        assert_eq!(redact(&input), input);
    }
}
