//! Orchestrator: drives `HandleIncident` through collect, analyse, match &
//! classify, gate and learn, recording per-stage timings on the resulting
//! `IncidentRecord` (§4.9). The Feedback Learner (C11) lives alongside it,
//! synthesising a `Pattern` from any terminally analysed or executed incident
//! and indexing it via the Knowledge Store.

mod feedback;
mod orchestrator;

pub use feedback::DefaultFeedbackLearner;
pub use orchestrator::DefaultOrchestrator;

use async_trait::async_trait;
use incident_common::{DetectResult, HealthStatus, IncidentRecord, Result, TokenId, TriggerType};

#[async_trait]
pub trait Orchestrator: Send + Sync {
    async fn handle_incident(
        &self,
        trigger_type: TriggerType,
        trigger_payload: serde_json::Value,
        detect_result: Option<DetectResult>,
    ) -> Result<IncidentRecord>;

    /// Resumes an `IncidentRecord` suspended at `AwaitingApproval` once a
    /// human decides its token: on approval, runs the stored candidate
    /// through the executor and the incident reaches `Executed`; on
    /// rejection or expiry, it reaches `Rejected` without executing (§4.9).
    async fn resolve_approval(
        &self,
        token_id: TokenId,
        approved: bool,
        approver: String,
    ) -> Result<IncidentRecord>;

    async fn health_check(&self) -> Result<HealthStatus>;

    async fn shutdown(&self) -> Result<()>;
}

#[async_trait]
pub trait FeedbackLearner: Send + Sync {
    /// Synthesises a pattern from a terminally analysed or executed incident
    /// and upserts it into the Knowledge Store (§3, P8).
    async fn record(&self, incident: &IncidentRecord) -> Result<()>;
}
