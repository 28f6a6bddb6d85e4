//! Stable request fingerprints.
//!
//! Cache keys must be deterministic across processes and across
//! implementations, so the fingerprint is a SHA-256 digest over a
//! canonical JSON rendering of the request: object keys recursively
//! sorted, every output-affecting field included, and fields that
//! cannot change the response (caller identity) excluded.

use crate::models::{ChatRequest, EmbeddingRequest};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Render a JSON value with recursively sorted object keys.
pub fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let body: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        Value::String(k.clone()),
                        canonical_json(&map[k])
                    )
                })
                .collect();
            format!("{{{}}}", body.join(","))
        }
        Value::Array(items) => {
            let body: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", body.join(","))
        }
        primitive => primitive.to_string(),
    }
}

fn digest(prefix: &str, canonical: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let hash = hasher.finalize();
    use std::fmt::Write as _;
    let mut out = String::with_capacity(prefix.len() + 1 + hash.len() * 2);
    out.push_str(prefix);
    out.push(':');
    for byte in hash {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Fingerprint a chat request.
///
/// Covers the model alias, the fully ordered message list, generation
/// parameters, tool schemas, and every extension field. The `user`
/// field is identity, not content, and is excluded.
pub fn chat_fingerprint(request: &ChatRequest) -> String {
    let mut value = serde_json::to_value(request).unwrap_or(Value::Null);
    if let Value::Object(map) = &mut value {
        map.remove("user");
        map.remove("stream");
    }
    digest("chat", &canonical_json(&value))
}

/// Fingerprint an embedding request.
pub fn embedding_fingerprint(request: &EmbeddingRequest) -> String {
    let mut value = serde_json::to_value(request).unwrap_or(Value::Null);
    if let Value::Object(map) = &mut value {
        map.remove("user");
    }
    digest("embedding", &canonical_json(&value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EmbeddingInput, Message};

    fn request() -> ChatRequest {
        ChatRequest {
            model: "gpt-4o".into(),
            messages: vec![Message::system("Be kind."), Message::user("hello")],
            temperature: Some(0.7),
            max_tokens: Some(128),
            ..Default::default()
        }
    }

    #[test]
    fn canonical_json_sorts_keys_recursively() {
        let value = serde_json::json!({
            "b": {"z": 1, "a": [{"k": 2, "c": 3}]},
            "a": true
        });
        assert_eq!(
            canonical_json(&value),
            r#"{"a":true,"b":{"a":[{"c":3,"k":2}],"z":1}}"#
        );
    }

    #[test]
    fn identical_requests_fingerprint_identically() {
        assert_eq!(chat_fingerprint(&request()), chat_fingerprint(&request()));
    }

    #[test]
    fn content_changes_change_the_fingerprint() {
        let base = chat_fingerprint(&request());

        let mut changed = request();
        changed.messages[1] = Message::user("hello!");
        assert_ne!(base, chat_fingerprint(&changed));

        let mut changed = request();
        changed.temperature = Some(0.8);
        assert_ne!(base, chat_fingerprint(&changed));

        let mut changed = request();
        changed
            .extensions
            .insert("top_k".into(), serde_json::json!(40));
        assert_ne!(base, chat_fingerprint(&changed));
    }

    #[test]
    fn message_order_matters() {
        let mut reordered = request();
        reordered.messages.reverse();
        assert_ne!(chat_fingerprint(&request()), chat_fingerprint(&reordered));
    }

    #[test]
    fn caller_identity_is_ignored() {
        let base = chat_fingerprint(&request());
        let mut with_user = request();
        with_user.user = Some("tenant-42".into());
        assert_eq!(base, chat_fingerprint(&with_user));
    }

    #[test]
    fn embedding_fingerprint_distinguishes_inputs() {
        let a = EmbeddingRequest {
            model: "text-embedding-3-small".into(),
            input: EmbeddingInput::String("alpha".into()),
            ..Default::default()
        };
        let b = EmbeddingRequest {
            input: EmbeddingInput::String("beta".into()),
            ..a.clone()
        };
        assert_ne!(embedding_fingerprint(&a), embedding_fingerprint(&b));
        assert!(embedding_fingerprint(&a).starts_with("embedding:"));
    }
}
