//! Failure classification.
//!
//! The portal can reject a mutation outright, or the call can die in a way
//! that leaves the server-side outcome unknown. [`classify`] flattens a
//! [`TransportError`] into the fields the executor branches on, and
//! [`ClassifiedError::is_ambiguous`] decides whether a verification read is
//! warranted.

use crate::transport::TransportError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// Matches `"code": 1234` inside a string payload that did not parse as JSON.
static CODE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""code"\s*:\s*(\d+)"#).expect("code pattern is valid")
});

/// Normalized descriptor of a failed transport call.
#[derive(Debug, Clone)]
pub struct ClassifiedError {
    /// Application error code extracted from the response body, if any.
    pub code: Option<i64>,
    pub message: String,
    /// Client-side timeout, no response observed.
    pub timeout: bool,
    /// No response at all, e.g. connection refused.
    pub network: bool,
    /// A response arrived with a 5xx status.
    pub server_error: bool,
}

impl ClassifiedError {
    /// True when the mutation's real effect cannot be inferred from the
    /// failure: the request may have been applied even though the
    /// acknowledgement never made it back.
    pub fn is_ambiguous(&self, ambiguous_codes: &[i64]) -> bool {
        if self.timeout || self.network || self.server_error {
            return true;
        }
        self.code
            .map(|code| ambiguous_codes.contains(&code))
            .unwrap_or(false)
    }
}

pub fn classify(err: &TransportError) -> ClassifiedError {
    ClassifiedError {
        code: err.detail.as_ref().and_then(extract_code),
        message: err.message.clone(),
        timeout: err.timeout,
        network: err.network,
        server_error: err.status.map(|s| (500..600).contains(&s)).unwrap_or(false),
    }
}

/// Pull an application error code out of a structured or string payload.
/// Structured bodies are checked at `error.code` and at the top level;
/// string bodies are pattern-matched.
fn extract_code(detail: &Value) -> Option<i64> {
    match detail {
        Value::Object(map) => map
            .get("error")
            .and_then(|e| e.get("code"))
            .or_else(|| map.get("code"))
            .and_then(Value::as_i64),
        Value::String(text) => CODE_PATTERN
            .captures(text)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok()),
        _ => None,
    }
}
