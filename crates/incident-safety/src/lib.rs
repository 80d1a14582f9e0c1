//! SOP Bridge & Safety: classifies a candidate's risk into an execution
//! mode, enforces per-resource and per-SOP cooldowns, and mediates the
//! approval-token lifecycle that gates high-risk execution (§4.7).

mod gate;

pub use gate::{DefaultSafetyGate, SopDefinition};

use incident_common::{
    ApprovalToken, Classification, RCAResult, Result, ResourceId, SOPCandidate, SopId, TokenId,
};

pub trait SafetyGate: Send + Sync {
    /// §4.7 `MatchSOPs`: up to 5 candidates sorted by
    /// `historical_success_rate * confidence_of_match` descending.
    fn match_sops(&self, rca_result: &RCAResult, resource_ids: &[ResourceId]) -> Vec<SOPCandidate>;

    fn classify(&self, candidate: &SOPCandidate, confidence: f32) -> Classification;

    fn check_cooldown(&self, resource_id: &ResourceId, sop_id: &SopId) -> Result<()>;

    /// Records a completed *live* execution: starts the cooldown window and
    /// clears the first-ever-execution dry-run bit.
    fn record_execution(&self, resource_id: &ResourceId, sop_id: &SopId);

    /// Clears the first-ever-execution bit without starting a cooldown —
    /// called after a dry-run attempt, which must not itself count against
    /// the cooldown window but still ends the "first execution" state.
    fn mark_attempted(&self, resource_id: &ResourceId, sop_id: &SopId);

    /// An SOP's first-ever execution on a given resource is forced into
    /// dry-run regardless of classification.
    fn should_force_dry_run(&self, resource_id: &ResourceId, sop_id: &SopId) -> bool;

    fn request_approval(&self, candidate: SOPCandidate) -> ApprovalToken;

    fn decide_approval(&self, token_id: TokenId, approved: bool, approver: String) -> Result<ApprovalToken>;
}
