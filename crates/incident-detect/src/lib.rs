//! DetectAgent: owns the single cached `DetectResult`, deciding whether to
//! serve it, collect fresh, or coalesce concurrent callers onto one
//! in-flight collection (§4.2).

mod agent;

pub use agent::DefaultDetectAgent;

use async_trait::async_trait;
use incident_common::{ComponentHealth, DetectResult, DetectSource, Result, TriggerType};

#[async_trait]
pub trait DetectAgent: Send + Sync {
    /// Always performs a collection pass (subject to the in-flight
    /// coalescing/TTL-reuse rules) and returns its result (§4.2 `RunDetection`).
    async fn detect(&self, trigger_type: TriggerType, lookback_minutes: u32) -> Result<DetectResult>;

    /// Read-only peek at whatever is already cached. Never triggers or waits
    /// on a collection; returns `None` if nothing is cached, the cache
    /// doesn't match `source`, or it is older than `max_age_seconds` (§4.2
    /// `GetLatest`).
    async fn get_latest(
        &self,
        source: Option<DetectSource>,
        max_age_seconds: Option<u64>,
    ) -> Result<Option<DetectResult>>;

    async fn health_check(&self) -> Result<ComponentHealth>;
}
