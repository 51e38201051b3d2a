//! Claim decoding for self-describing access credentials.
//!
//! A credential is `header.payload.signature`, each part base64url. Only the
//! payload is read; signature verification belongs to the remote service.

use std::collections::BTreeSet;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::errors::ClaimError;

/// Keys the service has used for the subject identifier, in lookup order.
const SUBJECT_ID_KEYS: &[&str] = &["sub", "id", "userId", "user_id"];
const SUBJECT_NAME_KEYS: &[&str] = &["user_name", "username", "name"];

/// Claims carried by an access credential. Derived on demand, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    pub subject_id: String,
    pub subject_name: String,
    pub issued_at_epoch_ms: Option<i64>,
    pub expires_at_epoch_ms: i64,
    pub grants: BTreeSet<String>,
}

impl Claims {
    pub fn has_grant(&self, grant: &str) -> bool {
        self.grants.contains(grant)
    }

    /// Milliseconds until expiry, or `None` once expired.
    pub fn remaining_ms(&self, now_epoch_ms: i64) -> Option<i64> {
        let remaining = self.expires_at_epoch_ms - now_epoch_ms;
        (remaining > 0).then_some(remaining)
    }
}

/// Decode an access credential into its claims.
pub fn decode(access_credential: &str) -> Result<Claims, ClaimError> {
    let parts: Vec<&str> = access_credential.split('.').collect();
    if parts.len() != 3 {
        return Err(ClaimError::malformed(format!(
            "expected 3 dot-separated parts, found {}",
            parts.len()
        )));
    }

    let payload = URL_SAFE_NO_PAD
        .decode(parts[1].trim_end_matches('='))
        .map_err(|e| ClaimError::malformed(format!("payload is not base64url: {}", e)))?;
    let value: Value = serde_json::from_slice(&payload)
        .map_err(|e| ClaimError::malformed(format!("payload is not JSON: {}", e)))?;
    let object = value
        .as_object()
        .ok_or_else(|| ClaimError::malformed("payload is not a JSON object"))?;

    let exp_seconds = seconds_claim(object, "exp")?
        .ok_or_else(|| ClaimError::malformed("missing exp claim"))?;
    let expires_at_epoch_ms = exp_seconds
        .checked_mul(1000)
        .ok_or_else(|| ClaimError::malformed("exp claim out of range"))?;

    let subject_id = SUBJECT_ID_KEYS
        .iter()
        .find_map(|key| object.get(*key).and_then(scalar_to_string))
        .ok_or_else(|| ClaimError::malformed("missing subject identifier"))?;

    let subject_name = SUBJECT_NAME_KEYS
        .iter()
        .find_map(|key| object.get(*key).and_then(Value::as_str))
        .unwrap_or_default()
        .to_string();

    let issued_at_epoch_ms = seconds_claim(object, "iat")?.and_then(|s| s.checked_mul(1000));

    Ok(Claims {
        subject_id,
        subject_name,
        issued_at_epoch_ms,
        expires_at_epoch_ms,
        grants: grants(object),
    })
}

/// Read a numeric seconds claim. Absent is `Ok(None)`; present but not a
/// number is malformed.
fn seconds_claim(object: &Map<String, Value>, key: &str) -> Result<Option<i64>, ClaimError> {
    match object.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
            .map(Some)
            .ok_or_else(|| ClaimError::malformed(format!("{} claim is not an integer", key))),
        Some(_) => Err(ClaimError::malformed(format!("{} claim is not a number", key))),
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn grants(object: &Map<String, Value>) -> BTreeSet<String> {
    let source = object.get("authorities").or_else(|| object.get("scope"));
    match source {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(Value::String(s)) => s.split_whitespace().map(str::to_string).collect(),
        _ => BTreeSet::new(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build an unsigned credential around the given payload.
    pub(crate) fn credential_with(payload: Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
        let body = URL_SAFE_NO_PAD.encode(payload.to_string());
        format!("{}.{}.sig", header, body)
    }

    // ── structure ────────────────────────────────────────────────────

    #[test]
    fn test_decode_rejects_two_parts() {
        let err = decode("abc.def").unwrap_err();
        assert!(err.to_string().contains("found 2"));
    }

    #[test]
    fn test_decode_rejects_four_parts() {
        assert!(decode("a.b.c.d").is_err());
    }

    #[test]
    fn test_decode_rejects_empty_string() {
        assert!(decode("").is_err());
    }

    #[test]
    fn test_decode_rejects_non_base64_payload() {
        let err = decode("h.***.s").unwrap_err();
        assert!(err.to_string().contains("base64url"));
    }

    #[test]
    fn test_decode_rejects_non_object_payload() {
        let payload = URL_SAFE_NO_PAD.encode("[1,2,3]");
        let err = decode(&format!("h.{}.s", payload)).unwrap_err();
        assert!(err.to_string().contains("not a JSON object"));
    }

    #[test]
    fn test_decode_accepts_padded_payload() {
        let body = base64::engine::general_purpose::URL_SAFE
            .encode(serde_json::json!({"exp": 10, "sub": "u1"}).to_string());
        let claims = decode(&format!("h.{}.s", body)).unwrap();
        assert_eq!(claims.subject_id, "u1");
    }

    // ── required claims ──────────────────────────────────────────────

    #[test]
    fn test_decode_requires_exp() {
        let err = decode(&credential_with(serde_json::json!({"id": 1}))).unwrap_err();
        assert!(err.to_string().contains("exp"));
    }

    #[test]
    fn test_decode_rejects_string_exp() {
        let cred = credential_with(serde_json::json!({"exp": "soon", "id": 1}));
        assert!(decode(&cred).is_err());
    }

    #[test]
    fn test_decode_requires_subject() {
        let err = decode(&credential_with(serde_json::json!({"exp": 10}))).unwrap_err();
        assert!(err.to_string().contains("subject"));
    }

    #[test]
    fn test_decode_converts_exp_to_millis() {
        let cred = credential_with(serde_json::json!({"exp": 1_700_000_000, "id": 42}));
        let claims = decode(&cred).unwrap();
        assert_eq!(claims.expires_at_epoch_ms, 1_700_000_000_000);
        assert_eq!(claims.subject_id, "42");
    }

    // ── optional claims ──────────────────────────────────────────────

    #[test]
    fn test_decode_reads_service_token_shape() {
        let cred = credential_with(serde_json::json!({
            "exp": 100,
            "iat": 40,
            "id": 7,
            "user_name": "zway",
            "authorities": ["ROLE_USER", "ROLE_ADMIN"],
            "client_id": "fic"
        }));
        let claims = decode(&cred).unwrap();
        assert_eq!(claims.subject_id, "7");
        assert_eq!(claims.subject_name, "zway");
        assert_eq!(claims.issued_at_epoch_ms, Some(40_000));
        assert!(claims.has_grant("ROLE_ADMIN"));
        assert!(!claims.has_grant("ROLE_ROOT"));
    }

    #[test]
    fn test_decode_space_separated_scope() {
        let cred = credential_with(serde_json::json!({
            "exp": 100, "sub": "s", "scope": "read write"
        }));
        let claims = decode(&cred).unwrap();
        assert_eq!(claims.grants.len(), 2);
        assert!(claims.has_grant("write"));
    }

    #[test]
    fn test_decode_subject_lookup_order_prefers_sub() {
        let cred = credential_with(serde_json::json!({"exp": 1, "sub": "a", "id": 2}));
        assert_eq!(decode(&cred).unwrap().subject_id, "a");
    }

    #[test]
    fn test_remaining_ms() {
        let cred = credential_with(serde_json::json!({"exp": 10, "id": 1}));
        let claims = decode(&cred).unwrap();
        assert_eq!(claims.remaining_ms(4_000), Some(6_000));
        assert_eq!(claims.remaining_ms(10_000), None);
    }
}
