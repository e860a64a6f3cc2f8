#![allow(dead_code)]

use proxydeck::transport::{RuleTransport, TransportError};
use proxydeck::types::{Operation, OperationId, ProxyRule};
use proxydeck::MutationOrchestrator;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

/// One scripted answer for the next mutation call (create/update/delete).
pub struct Scripted {
    pub result: Result<(), TransportError>,
    /// Replacement for the authoritative collection once this call settles,
    /// simulating a mutation that silently applied (or didn't).
    pub rules_after: Option<Vec<ProxyRule>>,
    /// When set, the call blocks until a permit is released.
    pub gate: Option<Arc<Semaphore>>,
}

/// In-process stand-in for the portal. Mutation calls consume scripted
/// responses in order; `list` always reflects the current collection.
pub struct MockTransport {
    rules: Mutex<Vec<ProxyRule>>,
    responses: Mutex<VecDeque<Scripted>>,
    list_failures: Mutex<VecDeque<TransportError>>,
    pub calls: Mutex<Vec<String>>,
}

impl MockTransport {
    pub fn new(initial_rules: Vec<ProxyRule>) -> Arc<Self> {
        Arc::new(MockTransport {
            rules: Mutex::new(initial_rules),
            responses: Mutex::new(VecDeque::new()),
            list_failures: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn script(&self, scripted: Scripted) {
        self.responses.lock().unwrap().push_back(scripted);
    }

    pub fn script_ok(&self) {
        self.script(Scripted {
            result: Ok(()),
            rules_after: None,
            gate: None,
        });
    }

    pub fn script_ok_with(&self, rules_after: Vec<ProxyRule>) {
        self.script(Scripted {
            result: Ok(()),
            rules_after: Some(rules_after),
            gate: None,
        });
    }

    pub fn script_fail(&self, err: TransportError) {
        self.script(Scripted {
            result: Err(err),
            rules_after: None,
            gate: None,
        });
    }

    /// Fail the call but still apply the mutation server-side: the
    /// acknowledgement is lost, the effect is not.
    pub fn script_fail_with(&self, err: TransportError, rules_after: Vec<ProxyRule>) {
        self.script(Scripted {
            result: Err(err),
            rules_after: Some(rules_after),
            gate: None,
        });
    }

    /// Script a response that blocks until the returned gate gets a permit.
    pub fn script_gated(&self, result: Result<(), TransportError>) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.script(Scripted {
            result,
            rules_after: None,
            gate: Some(Arc::clone(&gate)),
        });
        gate
    }

    pub fn fail_next_list(&self, err: TransportError) {
        self.list_failures.lock().unwrap().push_back(err);
    }

    pub fn set_rules(&self, rules: Vec<ProxyRule>) {
        *self.rules.lock().unwrap() = rules;
    }

    pub fn call_log(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    async fn mutate(&self, name: &str) -> Result<(), TransportError> {
        self.calls.lock().unwrap().push(name.to_string());
        let scripted = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("unscripted {} call", name));

        if let Some(gate) = &scripted.gate {
            let permit = gate.acquire().await.expect("gate closed");
            permit.forget();
        }
        if let Some(rules_after) = scripted.rules_after {
            *self.rules.lock().unwrap() = rules_after;
        }
        scripted.result
    }
}

impl RuleTransport for MockTransport {
    async fn list(&self) -> Result<Vec<ProxyRule>, TransportError> {
        self.calls.lock().unwrap().push("list".to_string());
        if let Some(err) = self.list_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(self.rules.lock().unwrap().clone())
    }

    async fn create(&self, _rule: &Value) -> Result<(), TransportError> {
        self.mutate("create").await
    }

    async fn update(&self, _id: &str, _patch: &Value) -> Result<(), TransportError> {
        self.mutate("update").await
    }

    async fn delete(&self, _id: &str) -> Result<(), TransportError> {
        self.mutate("delete").await
    }

    async fn bulk_delete(&self, _ids: &[String]) -> Result<(), TransportError> {
        self.mutate("bulk_delete").await
    }
}

pub fn rule(uuid: &str, fqdn: &str, port: u16) -> ProxyRule {
    serde_json::from_value(json!({
        "UUID": uuid,
        "description": fqdn,
        "frontend": {"fqdn": fqdn, "port": port, "protocol": 1},
        "backend": {"fqdn": "localhost", "port": 8080, "protocol": 0},
    }))
    .unwrap()
}

pub fn rule_described(uuid: &str, fqdn: &str, description: &str) -> ProxyRule {
    serde_json::from_value(json!({
        "UUID": uuid,
        "description": description,
        "frontend": {"fqdn": fqdn, "port": 443, "protocol": 1},
        "backend": {"fqdn": "localhost", "port": 8080, "protocol": 0},
    }))
    .unwrap()
}

/// Poll through the registry watch channel until the operation satisfies
/// the predicate.
pub async fn wait_for(
    orchestrator: &Arc<MutationOrchestrator<MockTransport>>,
    id: OperationId,
    predicate: impl Fn(&Operation) -> bool,
) -> Operation {
    let mut revisions = orchestrator.subscribe();
    for _ in 0..200 {
        match orchestrator.get(&id) {
            Some(op) if predicate(&op) => return op,
            Some(_) => {}
            None => panic!("operation {} vanished while waiting", id),
        }
        let _ = tokio::time::timeout(Duration::from_millis(50), revisions.changed()).await;
    }
    panic!("operation {} never satisfied the predicate", id);
}

pub async fn wait_terminal(
    orchestrator: &Arc<MutationOrchestrator<MockTransport>>,
    id: OperationId,
) -> Operation {
    wait_for(orchestrator, id, |op| op.status.is_terminal()).await
}
