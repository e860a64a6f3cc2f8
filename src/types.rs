use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Rule identifier — the UUID string assigned by the portal API.
pub type RuleId = String;

/// Operation identifier, generated at creation and stable across retries.
pub type OperationId = Uuid;

/// A reverse-proxy rule as returned by the portal's `list` method.
///
/// Accepts the `UUID`, `uuid` and `id` spellings for the identifier because
/// the portal is not consistent across DSM versions. Fields the struct does
/// not model (notably the `_key` update token) are preserved in `extra` so
/// the transport can round-trip them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyRule {
    #[serde(rename = "UUID", alias = "uuid", alias = "id")]
    pub uuid: RuleId,
    #[serde(default)]
    pub description: String,
    pub frontend: Frontend,
    pub backend: Backend,
    #[serde(default)]
    pub customize_headers: Vec<HeaderPair>,
    #[serde(default = "default_timeout")]
    pub proxy_connect_timeout: i64,
    #[serde(default = "default_timeout")]
    pub proxy_read_timeout: i64,
    #[serde(default = "default_timeout")]
    pub proxy_send_timeout: i64,
    #[serde(default = "default_http_version")]
    pub proxy_http_version: i64,
    #[serde(default)]
    pub proxy_intercept_errors: bool,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_timeout() -> i64 {
    60
}

fn default_http_version() -> i64 {
    1
}

/// Front-facing half of a rule: the hostname and port clients connect to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frontend {
    pub fqdn: String,
    pub port: u16,
    #[serde(default)]
    pub protocol: i64,
    #[serde(default)]
    pub https: HttpsOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acl: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpsOptions {
    #[serde(default)]
    pub hsts: bool,
}

/// Upstream half of a rule: where the proxy forwards traffic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Backend {
    pub fqdn: String,
    pub port: u16,
    #[serde(default)]
    pub protocol: i64,
}

/// One `customize_headers` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderPair {
    pub name: String,
    pub value: String,
}

/// Caller-visible uniqueness constraint used to locate a rule when its
/// UUID is not yet known (typically while verifying a create).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NaturalKey {
    pub fqdn: String,
    pub port: Option<u16>,
}

impl NaturalKey {
    /// Hostname match is case-insensitive; port narrows the match only when
    /// the payload carried one.
    pub fn matches(&self, rule: &ProxyRule) -> bool {
        if !rule.frontend.fqdn.eq_ignore_ascii_case(&self.fqdn) {
            return false;
        }
        match self.port {
            Some(port) => rule.frontend.port == port,
            None => true,
        }
    }
}

/// The mutation kinds the orchestrator tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MutationKind {
    Create,
    Update,
    Delete,
    BulkDelete,
}

/// Request parameters for one mutation, retained on the operation record so
/// a retry resubmits identically.
///
/// Rule payloads use the flat field convention of the management UI
/// (`frontend_fqdn`, `backend_port`, `frontend_hsts`, ...); the transport is
/// responsible for nesting them into the wire shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum MutationPayload {
    Create { rule: serde_json::Value },
    Update { id: RuleId, patch: serde_json::Value },
    Delete { id: RuleId },
    BulkDelete { ids: Vec<RuleId> },
}

impl MutationPayload {
    pub fn kind(&self) -> MutationKind {
        match self {
            MutationPayload::Create { .. } => MutationKind::Create,
            MutationPayload::Update { .. } => MutationKind::Update,
            MutationPayload::Delete { .. } => MutationKind::Delete,
            MutationPayload::BulkDelete { .. } => MutationKind::BulkDelete,
        }
    }

    /// The affected rule id, when it is known up front. Creates discover
    /// theirs only on success; bulk deletes track several at once.
    pub fn target_id(&self) -> Option<&RuleId> {
        match self {
            MutationPayload::Update { id, .. } | MutationPayload::Delete { id } => Some(id),
            MutationPayload::Create { .. } | MutationPayload::BulkDelete { .. } => None,
        }
    }

    /// Natural key for create payloads: the front-facing hostname, narrowed
    /// by the frontend port when one is present.
    pub fn natural_key(&self) -> Option<NaturalKey> {
        let MutationPayload::Create { rule } = self else {
            return None;
        };
        let fqdn = rule.get("frontend_fqdn")?.as_str()?.to_string();
        let port = rule
            .get("frontend_port")
            .and_then(crate::compare::as_number)
            .map(|n| n as u16);
        Some(NaturalKey { fqdn, port })
    }
}

/// Lifecycle state of an operation. `Failed` and `Succeeded` are terminal;
/// the only backward transition is `Failed`/`Succeeded` → `Running` via retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Queued,
    Running,
    Verifying,
    Failed,
    Succeeded,
}

impl OperationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OperationStatus::Failed | OperationStatus::Succeeded)
    }
}

/// One in-flight or completed mutation attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    pub id: OperationId,
    pub kind: MutationKind,
    pub target_id: Option<RuleId>,
    pub target_label: String,
    pub status: OperationStatus,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_code: Option<i64>,
    pub error_message: Option<String>,
    /// True only when failed and a retry is meaningful.
    pub recoverable: bool,
    /// Cosmetic flag set shortly before auto-clear removes the record.
    pub expiring: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_payload: Option<MutationPayload>,
}

/// Derived counts per status, recomputed on read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationSummary {
    pub queued: usize,
    pub running: usize,
    pub verifying: usize,
    pub failed: usize,
    pub succeeded: usize,
}

impl OperationSummary {
    pub fn total(&self) -> usize {
        self.queued + self.running + self.verifying + self.failed + self.succeeded
    }

    pub fn in_flight(&self) -> usize {
        self.queued + self.running + self.verifying
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rule(fqdn: &str, port: u16) -> ProxyRule {
        ProxyRule {
            uuid: "r-1".into(),
            description: "test".into(),
            frontend: Frontend {
                fqdn: fqdn.into(),
                port,
                protocol: 1,
                https: HttpsOptions::default(),
                acl: None,
            },
            backend: Backend {
                fqdn: "localhost".into(),
                port: 8080,
                protocol: 0,
            },
            customize_headers: vec![],
            proxy_connect_timeout: 60,
            proxy_read_timeout: 60,
            proxy_send_timeout: 60,
            proxy_http_version: 1,
            proxy_intercept_errors: false,
            extra: serde_json::Map::new(),
        }
    }

    #[test]
    fn natural_key_matches_case_insensitive() {
        let key = NaturalKey {
            fqdn: "App.Example.Com".into(),
            port: None,
        };
        assert!(key.matches(&rule("app.example.com", 443)));
        assert!(!key.matches(&rule("other.example.com", 443)));
    }

    #[test]
    fn natural_key_port_narrows_match() {
        let key = NaturalKey {
            fqdn: "app.example.com".into(),
            port: Some(8443),
        };
        assert!(!key.matches(&rule("app.example.com", 443)));
        assert!(key.matches(&rule("app.example.com", 8443)));
    }

    #[test]
    fn payload_natural_key_coerces_string_port() {
        let payload = MutationPayload::Create {
            rule: json!({"frontend_fqdn": "app.example.com", "frontend_port": "8443"}),
        };
        let key = payload.natural_key().unwrap();
        assert_eq!(key.port, Some(8443));
    }

    #[test]
    fn rule_accepts_uuid_spellings() {
        let from_upper: ProxyRule = serde_json::from_value(json!({
            "UUID": "abc",
            "frontend": {"fqdn": "a.example.com", "port": 443},
            "backend": {"fqdn": "localhost", "port": 80},
        }))
        .unwrap();
        assert_eq!(from_upper.uuid, "abc");

        let from_lower: ProxyRule = serde_json::from_value(json!({
            "uuid": "def",
            "frontend": {"fqdn": "a.example.com", "port": 443},
            "backend": {"fqdn": "localhost", "port": 80},
        }))
        .unwrap();
        assert_eq!(from_lower.uuid, "def");
    }

    #[test]
    fn rule_preserves_update_token_in_extra() {
        let parsed: ProxyRule = serde_json::from_value(json!({
            "UUID": "abc",
            "_key": "k-123",
            "frontend": {"fqdn": "a.example.com", "port": 443},
            "backend": {"fqdn": "localhost", "port": 80},
        }))
        .unwrap();
        assert_eq!(
            parsed.extra.get("_key").and_then(|v| v.as_str()),
            Some("k-123")
        );
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&OperationStatus::Verifying).unwrap(),
            "\"verifying\""
        );
    }

    #[test]
    fn terminal_statuses() {
        assert!(OperationStatus::Failed.is_terminal());
        assert!(OperationStatus::Succeeded.is_terminal());
        assert!(!OperationStatus::Queued.is_terminal());
        assert!(!OperationStatus::Running.is_terminal());
        assert!(!OperationStatus::Verifying.is_terminal());
    }
}
