//! Verification-time rule lookup.
//!
//! Both finders re-fetch the authoritative collection on every call — the
//! only consumer is post-failure verification, where a cached read would
//! defeat the purpose. Not-found is `Ok(None)`; a failed fetch propagates as
//! an error and is never folded into "not found".

use crate::transport::{RuleTransport, TransportError};
use crate::types::{NaturalKey, ProxyRule};
use std::sync::Arc;

pub struct RuleLookup<T> {
    transport: Arc<T>,
}

impl<T: RuleTransport> RuleLookup<T> {
    pub fn new(transport: Arc<T>) -> Self {
        RuleLookup { transport }
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<ProxyRule>, TransportError> {
        let rules = self.transport.list().await?;
        Ok(rules.into_iter().find(|r| r.uuid == id))
    }

    pub async fn find_by_natural_key(
        &self,
        key: &NaturalKey,
    ) -> Result<Option<ProxyRule>, TransportError> {
        let rules = self.transport.list().await?;
        Ok(rules.into_iter().find(|r| key.matches(r)))
    }

    /// Fresh snapshot of the collection, for absence checks after deletes.
    pub async fn all(&self) -> Result<Vec<ProxyRule>, TransportError> {
        self.transport.list().await
    }
}
