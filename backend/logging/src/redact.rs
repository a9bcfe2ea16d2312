//! Log Redaction
//!
//! Scrubs tokens and secrets from strings and event payloads before they are
//! logged.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

static API_KEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(sk-[a-zA-Z0-9]{32,})|(Bearer\s+[a-zA-Z0-9\-\._~+/]+=*)")
        .expect("api key pattern")
});

/// Object keys whose values are replaced wholesale.
static SENSITIVE_KEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(password|passwd|secret|token|api[_-]?key|authorization|credential)")
        .expect("sensitive key pattern")
});

const REDACTED: &str = "[REDACTED]";

/// Redacts API keys and bearer tokens in a string.
pub fn redact_sensitive_data(input: &str) -> String {
    API_KEY_RE.replace_all(input, "[REDACTED_TOKEN]").into_owned()
}

/// Copy of `payload` with sensitive keys masked and token-like strings
/// scrubbed, at any depth.
pub fn redact_payload(payload: &Value) -> Value {
    match payload {
        Value::String(s) => Value::String(redact_sensitive_data(s)),
        Value::Array(items) => Value::Array(items.iter().map(redact_payload).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    let v = if SENSITIVE_KEY_RE.is_match(k) && !v.is_null() {
                        Value::String(REDACTED.to_string())
                    } else {
                        redact_payload(v)
                    };
                    (k.clone(), v)
                })
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_redaction() {
        let raw = "calling with Bearer eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9";
        let clean = redact_sensitive_data(raw);
        assert!(!clean.contains("eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9"));
        assert!(clean.starts_with("calling with"));
    }

    #[test]
    fn test_payload_redaction() {
        let payload = json!({
            "id": "1",
            "name": "deploy",
            "args": {"apiKey": "abc", "nested": [{"Password": "hunter2"}], "note": "sk-0123456789abcdef0123456789abcdef"},
            "token": null
        });
        let clean = redact_payload(&payload);
        assert_eq!(clean["name"], "deploy");
        assert_eq!(clean["args"]["apiKey"], REDACTED);
        assert_eq!(clean["args"]["nested"][0]["Password"], REDACTED);
        assert_eq!(clean["args"]["note"], "[REDACTED_TOKEN]");
        assert!(clean["token"].is_null());
    }
}
