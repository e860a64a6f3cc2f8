//! # Proxydeck
//!
//! Mutation-operation orchestrator for DSM-style reverse-proxy rule
//! collections whose API gives no reliable synchronous confirmation of
//! success: requests can time out, return ambiguous error codes, or fail at
//! the network layer while the mutation silently completed server-side.
//!
//! The orchestrator tracks the full lifecycle of every mutation,
//! disambiguates "probably failed" from "probably succeeded but the
//! acknowledgement was lost" via a read-and-compare verification step,
//! supports retry without allocating new records, and exposes a live,
//! queryable operation history without blocking the caller.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use proxydeck::{MutationOrchestrator, MutationPayload, OrchestratorConfig, RequestOptions};
//! use proxydeck::transport::SynoTransport;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn demo() {
//! let transport = Arc::new(SynoTransport::new("http://nas.local:5000", "my-session-id"));
//! let orchestrator = MutationOrchestrator::new(transport, OrchestratorConfig::from_env());
//!
//! // Returns immediately; the mutation runs on its own task.
//! let id = orchestrator.request_mutation(
//!     MutationPayload::Create {
//!         rule: json!({
//!             "description": "DSM",
//!             "frontend_fqdn": "dsm.example.com",
//!             "backend_fqdn": "localhost",
//!             "backend_port": 5000,
//!         }),
//!     },
//!     RequestOptions::default(),
//! );
//!
//! // Observe progress without polling the records themselves.
//! let mut revisions = orchestrator.subscribe();
//! revisions.changed().await.ok();
//! println!("{:?}", orchestrator.get(&id).map(|op| op.status));
//! # }
//! ```

pub mod autoclear;
pub mod classify;
pub mod compare;
pub mod config;
pub mod error;
pub mod lookup;
pub mod orchestrator;
pub mod registry;
pub mod transport;
pub mod types;

pub use config::OrchestratorConfig;
pub use error::{ProxyDeckError, Result};
pub use orchestrator::{ExecutionOutcome, MutationOrchestrator, RequestOptions};
pub use registry::OperationRegistry;
pub use transport::{RuleTransport, SynoTransport, TransportError};
pub use types::{
    Backend, Frontend, HeaderPair, MutationKind, MutationPayload, NaturalKey, Operation,
    OperationId, OperationStatus, OperationSummary, ProxyRule, RuleId,
};
