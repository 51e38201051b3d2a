//! Response envelope and status-code classification.
//!
//! Every response body is `{ "code": "...", "msg": "...", "data": ... }`. The
//! embedded `code` is independent of the HTTP status.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Embedded code for a successful call.
pub const SUCCESS_CODE: &str = "000";

/// Embedded code the service uses when the access credential is rejected.
pub const SESSION_INVALID_CODE: &str = "A401";

/// HTTP status that also means "session invalid", whatever the body says.
pub const HTTP_UNAUTHORIZED: u16 = 401;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ApiEnvelope {
    #[serde(deserialize_with = "code_as_string")]
    pub code: String,
    #[serde(default, alias = "msg")]
    pub message: String,
    #[serde(default)]
    pub data: Value,
}

/// How the pipeline should treat a decoded envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    Success(Value),
    SessionInvalid,
    Business { code: String, message: String },
}

impl ApiEnvelope {
    pub fn classify(self) -> Classification {
        match self.code.as_str() {
            SUCCESS_CODE => Classification::Success(self.data),
            SESSION_INVALID_CODE => Classification::SessionInvalid,
            _ => Classification::Business {
                code: self.code,
                message: self.message,
            },
        }
    }
}

/// Classify a raw response. `Err` carries a description of why the body is
/// not an envelope.
pub fn classify_response(status: u16, body: &[u8]) -> Result<Classification, String> {
    if status == HTTP_UNAUTHORIZED {
        return Ok(Classification::SessionInvalid);
    }
    let envelope: ApiEnvelope = serde_json::from_slice(body).map_err(|e| e.to_string())?;
    Ok(envelope.classify())
}

// Some endpoints send the code as a bare number.
fn code_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(format!("{:0>3}", n.to_string())),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number code, got {}",
            other
        ))),
    }
}
