//! Shared domain types for the incident pipeline: the canonical data model
//! flowing between the Correlator, DetectAgent, Rule Matcher, Knowledge Store,
//! Search Service, RCA Inferencer, SOP Bridge & Safety, SOP Executor and
//! Orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

pub type IncidentId = Uuid;
pub type DetectId = Uuid;
pub type PatternId = String;
pub type RuleId = String;
pub type SopId = String;
pub type ActionId = String;
pub type TokenId = Uuid;
pub type ResourceId = String;

/// Severity scale shared by anomalies, rules and RCA results.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

/// How an incident entered the pipeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TriggerType {
    Alarm,
    Anomaly,
    Proactive,
    Manual,
}

impl TriggerType {
    /// Manual triggers always force a fresh collection (§4.2 freshness semantics).
    pub fn forces_fresh_collection(self) -> bool {
        matches!(self, TriggerType::Manual)
    }
}

/// A raw, threshold-detected signal, prior to correlation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anomaly {
    pub metric: String,
    pub service: String,
    pub severity: Severity,
    pub value: f64,
    pub threshold: f64,
    pub timestamp: DateTime<Utc>,
}

/// An active cloud-provider alarm.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alarm {
    pub alarm_id: String,
    pub reason: String,
    pub r#type: String,
    pub message: String,
    pub resource_id: ResourceId,
    pub timestamp: DateTime<Utc>,
}

/// A recent control-plane mutation (deploy, scaling event, config change).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub change_id: String,
    pub resource_id: ResourceId,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

/// A provider-reported health signal (e.g. instance status check failure).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthEvent {
    pub resource_id: ResourceId,
    pub status: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// A collector that failed during a Correlator pass, retained on the event
/// rather than aborting the whole collection (§4.1 partial failure semantics).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceError {
    pub service: String,
    pub message: String,
}

/// The canonical input to analysis: everything gathered in one collection pass.
///
/// Owned by the Correlator; immutable after emission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelatedEvent {
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub lookback_minutes: u32,
    pub affected_resources: Vec<ResourceId>,
    pub anomalies: Vec<Anomaly>,
    pub alarms: Vec<Alarm>,
    pub changes: Vec<ChangeEvent>,
    pub health_events: Vec<HealthEvent>,
    /// metric name -> summary statistic, consumed by the Rule Matcher.
    pub telemetry: HashMap<String, f64>,
    pub source_errors: Vec<SourceError>,
}

impl CorrelatedEvent {
    pub fn has_partial_failures(&self) -> bool {
        !self.source_errors.is_empty()
    }
}

/// Where a `DetectResult` originated.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DetectSource {
    Proactive,
    Alarm,
    Manual,
    DetectAgent,
}

/// How fresh a cached `DetectResult` is, relative to `ttl_seconds`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Freshness {
    Fresh,
    Warm,
    Stale,
}

/// A snapshot of a rule match taken at detection time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleMatchSnapshot {
    pub rule_id: RuleId,
    pub confidence: f32,
    pub root_cause: String,
}

/// The cached output of a detection pass (§3, owned by DetectAgent).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectResult {
    pub detect_id: DetectId,
    pub timestamp: DateTime<Utc>,
    pub event: CorrelatedEvent,
    pub rule_matches: Vec<RuleMatchSnapshot>,
    pub recognised_anomalies: Vec<Anomaly>,
    pub vectorized: bool,
    pub source: DetectSource,
    pub ttl_seconds: u64,
}

impl DetectResult {
    pub fn age_seconds(&self, now: DateTime<Utc>) -> i64 {
        (now - self.timestamp).num_seconds().max(0)
    }

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.age_seconds(now) >= self.ttl_seconds as i64
    }

    pub fn freshness_label(&self, now: DateTime<Utc>) -> Freshness {
        let age = self.age_seconds(now);
        if age < 60 {
            Freshness::Fresh
        } else if (age as u64) < self.ttl_seconds {
            Freshness::Warm
        } else {
            Freshness::Stale
        }
    }

    /// Whether this cached result may be reused by `trigger_type` (§4.2).
    pub fn reusable_by(&self, trigger_type: TriggerType, now: DateTime<Utc>) -> bool {
        if trigger_type.forces_fresh_collection() {
            return false;
        }
        matches!(
            self.freshness_label(now),
            Freshness::Fresh | Freshness::Warm
        )
    }
}

/// A learned incident template (§3, owned by the Knowledge Store).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pattern {
    pub pattern_id: PatternId,
    pub title: String,
    pub description: String,
    pub category: String,
    pub service: String,
    pub severity: Severity,
    pub symptoms: Vec<String>,
    pub typical_root_causes: Vec<String>,
    pub remediation_hints: Vec<String>,
    pub confidence: f32,
    pub occurrence_count: u64,
    pub success_rate: f32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Fixed-length embedding, populated once the vector index accepts the pattern.
    pub embedding: Option<Vec<f32>>,
}

impl Pattern {
    /// The text embedded for vector search: `title || description || root_cause`.
    pub fn embedding_source(&self) -> String {
        let root_cause = self.typical_root_causes.first().cloned().unwrap_or_default();
        format!("{} {} {}", self.title, self.description, root_cause)
    }

    /// A pattern may only be indexed once its quality score clears the bar (§4.4).
    pub fn indexable(&self, quality_score: f32) -> bool {
        quality_score >= 0.7
    }
}

/// Where a rule's symptom clause is evaluated.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ClauseSource {
    Events,
    Metrics,
    Logs,
}

/// A comparison used by a metric symptom clause.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Equals(f64),
    GreaterThan(f64),
    LessThan(f64),
    Between(f64, f64),
}

impl Comparison {
    pub fn holds(&self, value: f64) -> bool {
        match self {
            Comparison::Equals(v) => (value - v).abs() < f64::EPSILON,
            Comparison::GreaterThan(v) => value > *v,
            Comparison::LessThan(v) => value < *v,
            Comparison::Between(lo, hi) => value >= *lo && value <= *hi,
        }
    }
}

/// One clause of a declarative rule (§4.3 matching semantics).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymptomClause {
    pub source: ClauseSource,
    pub field: String,
    /// Expected literal value (events: reason/type equality, substring on message).
    pub expected_value: Option<String>,
    /// Condition for metric clauses.
    pub condition: Option<Comparison>,
    /// Regex pattern for log clauses.
    pub pattern: Option<String>,
    pub required: bool,
}

/// The remediation attached to a matching rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemediationSpec {
    pub action_id: ActionId,
    pub auto_execute: bool,
    pub parameters: HashMap<String, serde_json::Value>,
    pub conditions: Vec<String>,
    pub rollback: Option<RollbackSpec>,
    pub checklist: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackSpec {
    pub action_id: ActionId,
    pub parameters: HashMap<String, serde_json::Value>,
}

/// A declarative match specification, loaded once at startup (§3, §4.10).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: RuleId,
    pub name: String,
    pub description: String,
    pub symptoms: Vec<SymptomClause>,
    pub root_cause: String,
    pub severity: Severity,
    pub confidence: f32,
    pub remediation: RemediationSpec,
}

/// The output of `RuleMatcher::Match` (§4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResult {
    pub rule_id: RuleId,
    pub confidence: f32,
    pub root_cause: String,
    pub optional_matched: usize,
}

/// One hit returned by the Knowledge Store's keyword or vector search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hit {
    pub pattern_id: PatternId,
    pub score: f32,
}

/// Which search layer produced a hit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SearchLayer {
    L1,
    L2,
    L3,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub hit: Hit,
    pub layer: SearchLayer,
}

/// Requested search strategy (§4.5).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SearchStrategy {
    Fast,
    Semantic,
    Deep,
    Auto,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub hits: Vec<SearchHit>,
    pub strategy_used: SearchStrategy,
    pub levels_tried: Vec<SearchLayer>,
    pub duration_ms: u64,
    pub total_hits: usize,
}

/// The hypothesis produced by the RCA Inferencer (§3, §4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RCAResult {
    /// A real pattern id, `"unknown"`, or `"rule:<rule_id>"`.
    pub pattern_id: String,
    pub root_cause: String,
    pub severity: Severity,
    pub confidence: f32,
    pub matched_symptoms: Vec<String>,
    pub evidence: Vec<String>,
    pub recommended_action: Option<ActionId>,
    pub timestamp: DateTime<Utc>,
    /// Which inferencer and cascade level produced this (e.g. "rule", "mid", "high").
    pub model_identity: String,
}

impl RCAResult {
    pub fn is_unknown(&self) -> bool {
        self.pattern_id == "unknown"
    }

    pub fn unknown(at: DateTime<Utc>) -> Self {
        RCAResult {
            pattern_id: "unknown".to_string(),
            root_cause: "unknown".to_string(),
            severity: Severity::Info,
            confidence: 0.0,
            matched_symptoms: Vec::new(),
            evidence: Vec::new(),
            recommended_action: None,
            timestamp: at,
            model_identity: "none".to_string(),
        }
    }
}

/// Status of one step of an `SOPCandidate` (§3).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Done,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SOPStep {
    pub id: String,
    pub description: String,
    pub action_id: ActionId,
    pub parameters: HashMap<String, serde_json::Value>,
    pub auto_executable: bool,
    pub rollback: Option<RollbackSpec>,
    pub status: StepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// Risk classification driving `execution_mode` (§4.7 risk policy table).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    L1,
    L2,
    L3,
    L4,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Auto,
    NotifyWait,
    ApprovalRequired,
    ReadOnly,
}

/// One remediation option produced by the SOP Bridge (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SOPCandidate {
    pub sop_id: SopId,
    pub name: String,
    pub description: String,
    pub estimated_duration_seconds: u64,
    pub steps: Vec<SOPStep>,
    pub risk_level: RiskLevel,
    pub execution_mode: ExecutionMode,
    pub matched_triggers: Vec<String>,
}

impl SOPCandidate {
    pub fn all_steps_read_only(&self) -> bool {
        self.steps.iter().all(|s| {
            let id = s.action_id.to_lowercase();
            id.starts_with("describe") || id.starts_with("list") || id.starts_with("get")
        })
    }
}

/// Classification reasons and risk gate outcome (§4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub risk_level: RiskLevel,
    pub execution_mode: ExecutionMode,
    pub reasons: Vec<String>,
}

/// Approval token status (§3 invariant: consumed at most once).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

/// The object gating high-risk execution (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalToken {
    pub token_id: TokenId,
    pub sop_id: SopId,
    pub requested_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: ApprovalStatus,
    pub approver: Option<String>,
    pub justification: Option<String>,
    pub candidate_snapshot: SOPCandidate,
}

impl ApprovalToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Execution mode requested of the SOP Executor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Live,
    DryRun,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutcome {
    pub step_id: String,
    pub ok: bool,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub sop_id: SopId,
    pub mode: RunMode,
    pub step_outcomes: Vec<StepOutcome>,
    pub rolled_back: bool,
    pub ok: bool,
}

/// Terminal/non-terminal status of an `IncidentRecord` (§4.9 state machine).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    Created,
    Collecting,
    Analysed,
    Executed,
    AwaitingApproval,
    Rejected,
    Failed,
}

impl IncidentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            IncidentStatus::Executed | IncidentStatus::Rejected | IncidentStatus::Failed
        )
    }
}

/// The canonical pipeline stages, in the order `stage_timings` must respect (P10).
pub const STAGE_ORDER: [&str; 5] = ["collect", "analyse", "match", "gate", "learn"];

/// The orchestrator's per-run log (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentRecord {
    pub incident_id: IncidentId,
    pub trigger_type: TriggerType,
    pub trigger_payload: serde_json::Value,
    pub detect_id: Option<DetectId>,
    pub rca_result: Option<RCAResult>,
    pub selected_candidate: Option<SOPCandidate>,
    pub approval_token: Option<ApprovalToken>,
    pub execution_outcome: Option<ExecutionResult>,
    /// stage -> milliseconds, insertion-ordered following `STAGE_ORDER`.
    pub stage_timings: HashMap<String, u64>,
    pub status: IncidentStatus,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl IncidentRecord {
    pub fn new(
        trigger_type: TriggerType,
        trigger_payload: serde_json::Value,
        created_at: DateTime<Utc>,
    ) -> Self {
        IncidentRecord {
            incident_id: Uuid::new_v4(),
            trigger_type,
            trigger_payload,
            detect_id: None,
            rca_result: None,
            selected_candidate: None,
            approval_token: None,
            execution_outcome: None,
            stage_timings: HashMap::new(),
            status: IncidentStatus::Created,
            reason: None,
            created_at,
        }
    }

    pub fn record_stage(&mut self, stage: &str, millis: u64) {
        self.stage_timings.insert(stage.to_string(), millis);
    }

    /// P10: `stage_timings.keys` must be a prefix of `STAGE_ORDER`.
    pub fn stage_timings_form_valid_prefix(&self) -> bool {
        let mut seen_any_absent = false;
        for stage in STAGE_ORDER {
            if self.stage_timings.contains_key(stage) {
                if seen_any_absent {
                    return false;
                }
            } else {
                seen_any_absent = true;
            }
        }
        true
    }
}
