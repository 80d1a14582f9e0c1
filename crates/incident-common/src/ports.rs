//! Trait interfaces to external collaborators (§6): the abstractions the core
//! consumes but does not implement — cloud-provider collectors, the persisted
//! object/vector store, embedders and completion models, and outbound action
//! handlers. Concrete backends are injected by the process that wires the
//! pipeline together.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::Result;
use crate::types::{Alarm, Anomaly, ChangeEvent, HealthEvent};
use crate::ComponentHealth;

/// One per-service collection result, merged by the Correlator.
#[derive(Debug, Clone, Default)]
pub struct CollectedSignals {
    pub anomalies: Vec<Anomaly>,
    pub alarms: Vec<Alarm>,
    pub changes: Vec<ChangeEvent>,
    pub health_events: Vec<HealthEvent>,
    pub telemetry: HashMap<String, f64>,
}

/// A single cloud-service collector (§4.1). One implementation per service tag
/// (ec2, eks, rds, ...); the Correlator fans out across the configured set.
#[async_trait]
pub trait Collector: Send + Sync {
    fn service_tag(&self) -> &str;

    async fn collect(&self, lookback_minutes: u32) -> Result<CollectedSignals>;
}

/// The Knowledge Store's object-store half (§6 persistence interface).
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Filterable metadata stored alongside a pattern's embedding.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IndexMetadata {
    pub service: String,
    pub category: String,
    pub severity: String,
    pub tags: Vec<String>,
}

/// The Knowledge Store's vector-index half (§6 persistence interface).
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn index_put(&self, id: &str, vector: Vec<f32>, metadata: IndexMetadata) -> Result<()>;
    async fn index_search(
        &self,
        vector: &[f32],
        filter: Option<&IndexMetadata>,
        k: usize,
    ) -> Result<Vec<(String, f32)>>;
}

/// `Embed(text) -> float[dim]` (§6 model interface).
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// `Complete(prompt, model_id) -> string` (§6 model interface). Concrete
/// backends (Bedrock Titan, Claude Sonnet, Claude Opus) are injected; the core
/// only ever sees the `model_id` string.
#[async_trait]
pub trait Completer: Send + Sync {
    async fn complete(&self, prompt: &str, model_id: &str) -> Result<String>;
}

/// Outcome of invoking an action handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub ok: bool,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
}

/// A registered action handler, dispatched to by id from the SOP Executor
/// (§9 dynamic dispatch over action handlers). `dry` mirrors `mode=dry_run`.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn invoke(
        &self,
        params: &HashMap<String, serde_json::Value>,
        dry: bool,
    ) -> Result<ActionOutcome>;
}

/// The outbound notification transport used for `notify_wait` gating and
/// high-severity escalations (e.g. rollback failure). Concrete transports
/// (Slack, email, webhook) are out of scope; only this interface is specified.
#[async_trait]
pub trait NotificationTransport: Send + Sync {
    async fn notify(&self, subject: &str, body: &str) -> Result<()>;
}

/// Anything long-lived enough to report its own health into the aggregated
/// `HealthStatus` (DetectAgent, Knowledge Store, Orchestrator).
#[async_trait]
pub trait HealthReporting: Send + Sync {
    async fn health_check(&self) -> Result<ComponentHealth>;
}
