//! Transport boundary for the portal API.
//!
//! The orchestrator only sees [`RuleTransport`]; [`SynoTransport`] is the
//! production implementation speaking the DSM `entry.cgi` protocol. The
//! portal answers HTTP 200 for most application-level rejections and wraps
//! the real outcome in a `{"success": bool, "error": {"code": N}}` envelope,
//! so this layer normalizes everything into [`TransportError`].

use crate::types::{ProxyRule, RuleId};
use serde_json::{json, Value};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

const PORTAL_API: &str = "SYNO.Core.AppPortal.ReverseProxy";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// A failed transport call, normalized across reqwest failures, HTTP error
/// statuses and application-level rejection envelopes.
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
    /// HTTP status, when a response was received.
    pub status: Option<u16>,
    /// Structured or string response body, when one was received.
    pub detail: Option<Value>,
    /// Client-side timeout: the request was given up on, outcome unknown.
    pub timeout: bool,
    /// No response at all (connection refused, DNS failure, ...).
    pub network: bool,
}

impl TransportError {
    pub fn timeout(message: impl Into<String>) -> Self {
        TransportError {
            message: message.into(),
            status: None,
            detail: None,
            timeout: true,
            network: false,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        TransportError {
            message: message.into(),
            status: None,
            detail: None,
            timeout: false,
            network: true,
        }
    }

    pub fn http(status: u16, message: impl Into<String>, detail: Option<Value>) -> Self {
        TransportError {
            message: message.into(),
            status: Some(status),
            detail,
            timeout: false,
            network: false,
        }
    }

    /// Application-level rejection: a response arrived, the portal said no.
    pub fn rejected(message: impl Into<String>, detail: Value) -> Self {
        TransportError {
            message: message.into(),
            status: None,
            detail: Some(detail),
            timeout: false,
            network: false,
        }
    }

    fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::timeout(format!("request timed out: {}", e))
        } else if e.is_decode() || e.is_body() {
            TransportError {
                message: format!("unreadable response: {}", e),
                status: e.status().map(|s| s.as_u16()),
                detail: None,
                timeout: false,
                network: false,
            }
        } else {
            TransportError::network(format!("request failed: {}", e))
        }
    }
}

/// The mutation surface the orchestrator drives. Every method re-contacts
/// the portal; none of them cache.
pub trait RuleTransport: Send + Sync + 'static {
    /// Fetch the full authoritative rule collection.
    fn list(&self) -> impl Future<Output = Result<Vec<ProxyRule>, TransportError>> + Send;

    /// Create a rule from a flat payload (`frontend_fqdn`, `backend_port`, ...).
    fn create(&self, rule: &Value) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Apply a flat partial payload to an existing rule.
    fn update(
        &self,
        id: &str,
        patch: &Value,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn delete(&self, id: &str) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn bulk_delete(
        &self,
        ids: &[RuleId],
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// `reqwest` client for the DSM reverse-proxy portal.
pub struct SynoTransport {
    base_url: String,
    sid: String,
    syno_token: Option<String>,
    client: reqwest::Client,
}

impl SynoTransport {
    pub fn new(base_url: impl Into<String>, sid: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        SynoTransport {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            sid: sid.into(),
            syno_token: None,
            client,
        }
    }

    /// Attach the CSRF token DSM hands out alongside the session id.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.syno_token = Some(token.into());
        self
    }

    fn entry_url(&self) -> String {
        format!("{}/webapi/entry.cgi", self.base_url)
    }

    fn params(&self, method: &str) -> Vec<(String, String)> {
        let mut params = vec![
            ("api".to_string(), PORTAL_API.to_string()),
            ("method".to_string(), method.to_string()),
            ("version".to_string(), "1".to_string()),
            ("_sid".to_string(), self.sid.clone()),
        ];
        if let Some(token) = &self.syno_token {
            params.push(("SynoToken".to_string(), token.clone()));
        }
        params
    }

    /// One portal round trip: send, check HTTP status, unwrap the
    /// success/error envelope, return `data`.
    async fn call(
        &self,
        method: &str,
        form: Option<Vec<(&str, String)>>,
    ) -> Result<Value, TransportError> {
        let request = match form {
            Some(fields) => self
                .client
                .post(self.entry_url())
                .query(&self.params(method))
                .form(&fields),
            None => self.client.get(self.entry_url()).query(&self.params(method)),
        };

        let response = request.send().await.map_err(TransportError::from_reqwest)?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = (!body.is_empty()).then(|| Value::String(body));
            return Err(TransportError::http(
                status.as_u16(),
                format!("portal returned HTTP {} for {}", status.as_u16(), method),
                detail,
            ));
        }

        let envelope: Value = response.json().await.map_err(TransportError::from_reqwest)?;
        if envelope
            .get("success")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            Ok(envelope.get("data").cloned().unwrap_or(Value::Null))
        } else {
            let detail = envelope
                .get("error")
                .cloned()
                .unwrap_or_else(|| envelope.clone());
            Err(TransportError {
                message: format!("portal rejected {}: {}", method, detail),
                status: Some(status.as_u16()),
                detail: Some(detail),
                timeout: false,
                network: false,
            })
        }
    }
}

impl RuleTransport for SynoTransport {
    async fn list(&self) -> Result<Vec<ProxyRule>, TransportError> {
        let data = self.call("list", None).await?;
        let entries = data.get("entries").cloned().unwrap_or_else(|| json!([]));
        serde_json::from_value(entries).map_err(|e| TransportError {
            message: format!("unexpected list payload: {}", e),
            status: None,
            detail: Some(data),
            timeout: false,
            network: false,
        })
    }

    async fn create(&self, rule: &Value) -> Result<(), TransportError> {
        let entry = build_entry(rule);
        tracing::debug!("[SYNO] create entry for {:?}", entry.get("description"));
        self.call("create", Some(vec![("entry", entry.to_string())]))
            .await?;
        Ok(())
    }

    async fn update(&self, id: &str, patch: &Value) -> Result<(), TransportError> {
        // The portal demands the full entry plus the opaque `_key` token it
        // returned on list, so fetch the current state and overlay the patch.
        let rules = RuleTransport::list(self).await?;
        let existing = rules.iter().find(|r| r.uuid == id).ok_or_else(|| {
            TransportError::rejected(
                format!("rule {} not found", id),
                json!({"code": 404, "message": format!("rule {} not found", id)}),
            )
        })?;

        let key = existing
            .extra
            .get("_key")
            .or_else(|| existing.extra.get("key"))
            .and_then(Value::as_str)
            .unwrap_or(id)
            .to_string();

        let mut flat = flatten_rule(existing);
        if let Some(fields) = patch.as_object() {
            for (name, value) in fields {
                flat.insert(name.clone(), value.clone());
            }
        }

        let mut entry = build_entry(&Value::Object(flat));
        entry["UUID"] = json!(id);
        entry["_key"] = json!(key);

        self.call("update", Some(vec![("entry", entry.to_string())]))
            .await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), TransportError> {
        RuleTransport::bulk_delete(self, &[id.to_string()]).await
    }

    async fn bulk_delete(&self, ids: &[RuleId]) -> Result<(), TransportError> {
        let uuids = serde_json::to_string(ids).unwrap_or_else(|_| "[]".to_string());
        self.call("delete", Some(vec![("uuids", uuids)])).await?;
        Ok(())
    }
}

/// Nest a flat payload into the portal's wire entry, filling the same
/// defaults the management UI does.
pub fn build_entry(flat: &Value) -> Value {
    let get = |name: &str| flat.get(name).cloned();
    let or = |name: &str, fallback: Value| get(name).unwrap_or(fallback);

    json!({
        "description": or("description", json!("")),
        "backend": {
            "fqdn": or("backend_fqdn", json!("")),
            "port": or("backend_port", json!(80)),
            "protocol": or("backend_protocol", json!(0)),
        },
        "frontend": {
            "fqdn": or("frontend_fqdn", json!("")),
            "port": or("frontend_port", json!(443)),
            "protocol": or("frontend_protocol", json!(1)),
            "https": {"hsts": or("frontend_hsts", json!(false))},
            "acl": or("acl", Value::Null),
        },
        "proxy_connect_timeout": or("proxy_connect_timeout", json!(60)),
        "proxy_read_timeout": or("proxy_read_timeout", json!(60)),
        "proxy_send_timeout": or("proxy_send_timeout", json!(60)),
        "proxy_http_version": or("proxy_http_version", json!(1)),
        "proxy_intercept_errors": or("proxy_intercept_errors", json!(false)),
        "customize_headers": or("customize_headers", json!([])),
    })
}

/// Inverse of [`build_entry`]: project a fetched rule back onto the flat
/// field convention so a partial patch can be overlaid.
pub fn flatten_rule(rule: &ProxyRule) -> serde_json::Map<String, Value> {
    let mut flat = serde_json::Map::new();
    flat.insert("description".into(), json!(rule.description));
    flat.insert("backend_fqdn".into(), json!(rule.backend.fqdn));
    flat.insert("backend_port".into(), json!(rule.backend.port));
    flat.insert("backend_protocol".into(), json!(rule.backend.protocol));
    flat.insert("frontend_fqdn".into(), json!(rule.frontend.fqdn));
    flat.insert("frontend_port".into(), json!(rule.frontend.port));
    flat.insert("frontend_protocol".into(), json!(rule.frontend.protocol));
    flat.insert("frontend_hsts".into(), json!(rule.frontend.https.hsts));
    flat.insert(
        "acl".into(),
        rule.frontend.acl.clone().unwrap_or(Value::Null),
    );
    flat.insert(
        "proxy_connect_timeout".into(),
        json!(rule.proxy_connect_timeout),
    );
    flat.insert("proxy_read_timeout".into(), json!(rule.proxy_read_timeout));
    flat.insert("proxy_send_timeout".into(), json!(rule.proxy_send_timeout));
    flat.insert("proxy_http_version".into(), json!(rule.proxy_http_version));
    flat.insert(
        "proxy_intercept_errors".into(),
        json!(rule.proxy_intercept_errors),
    );
    flat.insert("customize_headers".into(), json!(rule.customize_headers));
    flat
}
