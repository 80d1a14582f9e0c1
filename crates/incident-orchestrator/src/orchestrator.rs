use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use incident_common::ports::NotificationTransport;
use incident_common::utils::current_timestamp;
use incident_common::{
    ApprovalStatus, ApprovalToken, Classification, Config, DetectResult, Error, ExecutionMode, HealthLevel,
    HealthStatus, IncidentRecord, IncidentStatus, MatchResult, Result, RunMode, STAGE_ORDER, TokenId,
    TriggerType,
};
use incident_detect::DetectAgent;
use incident_executor::SopExecutor;
use incident_rca::RcaInferencer;
use incident_safety::SafetyGate;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::{FeedbackLearner, Orchestrator};

/// Drives a single incident through collect, analyse, match & classify, gate
/// and learn, recording wall-clock milliseconds for each stage it actually
/// runs (§4.9). Each stage's elapsed time is recorded even when the stage
/// short-circuits the rest of the pipeline (`P10`: timings form a valid
/// prefix of `STAGE_ORDER`).
pub struct DefaultOrchestrator {
    config: Arc<Config>,
    detect: Arc<dyn DetectAgent>,
    rca: Arc<dyn RcaInferencer>,
    safety: Arc<dyn SafetyGate>,
    executor: Arc<dyn SopExecutor>,
    notifier: Option<Arc<dyn NotificationTransport>>,
    feedback: Arc<dyn FeedbackLearner>,
    started_at: chrono::DateTime<chrono::Utc>,
    health: RwLock<HashMap<String, HealthLevel>>,
    /// Incidents suspended at `AwaitingApproval`, keyed by their token id, so
    /// `resolve_approval` can resume the same `IncidentRecord` once a human
    /// decides (§4.9 "on approval → executed").
    pending_approvals: DashMap<TokenId, IncidentRecord>,
}

impl DefaultOrchestrator {
    pub fn new(
        config: Arc<Config>,
        detect: Arc<dyn DetectAgent>,
        rca: Arc<dyn RcaInferencer>,
        safety: Arc<dyn SafetyGate>,
        executor: Arc<dyn SopExecutor>,
        notifier: Option<Arc<dyn NotificationTransport>>,
        feedback: Arc<dyn FeedbackLearner>,
    ) -> Self {
        DefaultOrchestrator {
            config,
            detect,
            rca,
            safety,
            executor,
            notifier,
            feedback,
            started_at: current_timestamp(),
            health: RwLock::new(HashMap::new()),
            pending_approvals: DashMap::new(),
        }
    }

    fn to_match_results(detect_result: &DetectResult) -> Vec<MatchResult> {
        detect_result
            .rule_matches
            .iter()
            .map(|m| MatchResult {
                rule_id: m.rule_id.clone(),
                confidence: m.confidence,
                root_cause: m.root_cause.clone(),
                optional_matched: 0,
            })
            .collect()
    }

    async fn run_classified(
        &self,
        record: &mut IncidentRecord,
        classification: Classification,
    ) -> Result<()> {
        let Some(candidate) = record.selected_candidate.clone() else {
            record.status = IncidentStatus::Analysed;
            record.reason = Some("no sop candidate available".to_string());
            return Ok(());
        };
        let mut candidate = candidate;
        candidate.execution_mode = classification.execution_mode;

        let resource_id = record
            .rca_result
            .as_ref()
            .and_then(|r| r.matched_symptoms.first().cloned())
            .unwrap_or_else(|| "unknown".to_string());

        match classification.execution_mode {
            ExecutionMode::ReadOnly => {
                record.status = IncidentStatus::Analysed;
                record.reason = Some("read-only classification; no execution attempted".to_string());
            }
            ExecutionMode::ApprovalRequired => {
                let token = self.safety.request_approval(candidate.clone());
                let token_id = token.token_id;
                record.approval_token = Some(token);
                record.status = IncidentStatus::AwaitingApproval;
                record.reason = Some("high-risk sop requires human approval".to_string());
                self.pending_approvals.insert(token_id, record.clone());
            }
            ExecutionMode::NotifyWait => {
                if let Some(notifier) = &self.notifier {
                    let _ = notifier
                        .notify(
                            "incident remediation pending",
                            &format!("sop {} will run after a grace period", candidate.sop_id),
                        )
                        .await;
                }
                tokio::time::sleep(std::time::Duration::from_secs(
                    self.config.safety.notify_wait_grace_seconds,
                ))
                .await;
                self.execute_candidate(record, candidate, &resource_id, None).await?;
            }
            ExecutionMode::Auto => {
                self.execute_candidate(record, candidate, &resource_id, None).await?;
            }
        }
        Ok(())
    }

    async fn execute_candidate(
        &self,
        record: &mut IncidentRecord,
        candidate: incident_common::SOPCandidate,
        resource_id: &str,
        approval_token: Option<ApprovalToken>,
    ) -> Result<()> {
        if let Err(e) = self.safety.check_cooldown(&resource_id.to_string(), &candidate.sop_id) {
            record.status = IncidentStatus::Analysed;
            record.reason = Some(format!("cooldown active: {e}"));
            return Ok(());
        }

        let forced_dry_run = self
            .safety
            .should_force_dry_run(&resource_id.to_string(), &candidate.sop_id);
        let mode = if forced_dry_run { RunMode::DryRun } else { RunMode::Live };

        let outcome = self.executor.execute(candidate.clone(), approval_token, mode).await?;

        match mode {
            RunMode::DryRun => self
                .safety
                .mark_attempted(&resource_id.to_string(), &candidate.sop_id),
            RunMode::Live => self
                .safety
                .record_execution(&resource_id.to_string(), &candidate.sop_id),
        }

        record.execution_outcome = Some(outcome.clone());
        record.status = IncidentStatus::Executed;
        record.reason = if outcome.ok {
            None
        } else {
            Some("one or more steps failed".to_string())
        };
        Ok(())
    }
}

#[async_trait]
impl Orchestrator for DefaultOrchestrator {
    async fn handle_incident(
        &self,
        trigger_type: TriggerType,
        trigger_payload: serde_json::Value,
        detect_result: Option<DetectResult>,
    ) -> Result<IncidentRecord> {
        let now = current_timestamp();
        let mut record = IncidentRecord::new(trigger_type, trigger_payload, now);

        let stage_start = std::time::Instant::now();
        let detect_result = match detect_result {
            Some(d) if !trigger_type.forces_fresh_collection() && !d.is_stale(current_timestamp()) => d,
            _ => self.detect.detect(trigger_type, 30).await?,
        };
        record.detect_id = Some(detect_result.detect_id);
        record.record_stage(STAGE_ORDER[0], stage_start.elapsed().as_millis() as u64);

        let stage_start = std::time::Instant::now();
        let match_results = Self::to_match_results(&detect_result);
        let rca_result = self.rca.infer(&detect_result.event, &match_results).await?;
        record.record_stage(STAGE_ORDER[1], stage_start.elapsed().as_millis() as u64);
        record.rca_result = Some(rca_result.clone());

        let stage_start = std::time::Instant::now();
        let candidates = self
            .safety
            .match_sops(&rca_result, &detect_result.event.affected_resources);
        let top_candidate = candidates.into_iter().next();
        let classification = top_candidate.as_ref().map(|c| self.safety.classify(c, rca_result.confidence));
        record.selected_candidate = top_candidate;
        record.record_stage(STAGE_ORDER[2], stage_start.elapsed().as_millis() as u64);

        let stage_start = std::time::Instant::now();
        match classification {
            Some(classification) => self.run_classified(&mut record, classification).await?,
            None => {
                record.status = IncidentStatus::Analysed;
                record.reason = Some("no matching sop candidate".to_string());
            }
        }
        record.record_stage(STAGE_ORDER[3], stage_start.elapsed().as_millis() as u64);

        if matches!(record.status, IncidentStatus::Executed | IncidentStatus::Analysed) {
            let stage_start = std::time::Instant::now();
            if let Err(e) = self.feedback.record(&record).await {
                warn!(incident_id = %record.incident_id, error = %e, "feedback recording failed");
            }
            record.record_stage(STAGE_ORDER[4], stage_start.elapsed().as_millis() as u64);
        }

        info!(incident_id = %record.incident_id, status = ?record.status, "incident handled");
        Ok(record)
    }

    async fn resolve_approval(
        &self,
        token_id: TokenId,
        approved: bool,
        approver: String,
    ) -> Result<IncidentRecord> {
        let token = self.safety.decide_approval(token_id, approved, approver)?;

        let Some((_, mut record)) = self.pending_approvals.remove(&token_id) else {
            return Err(Error::InvalidRequest(format!(
                "no incident is awaiting approval token {token_id}"
            )));
        };
        record.approval_token = Some(token.clone());

        if token.status != ApprovalStatus::Approved {
            record.status = IncidentStatus::Rejected;
            record.reason = Some(format!("approval decided as {:?}", token.status));
            info!(incident_id = %record.incident_id, %token_id, "incident rejected by approval decision");
            return Ok(record);
        }

        let resource_id = record
            .rca_result
            .as_ref()
            .and_then(|r| r.matched_symptoms.first().cloned())
            .unwrap_or_else(|| "unknown".to_string());

        self.execute_candidate(
            &mut record,
            token.candidate_snapshot.clone(),
            &resource_id,
            Some(token.clone()),
        )
        .await?;

        if matches!(record.status, IncidentStatus::Executed | IncidentStatus::Analysed) {
            let stage_start = std::time::Instant::now();
            if let Err(e) = self.feedback.record(&record).await {
                warn!(incident_id = %record.incident_id, error = %e, "feedback recording failed");
            }
            record.record_stage(STAGE_ORDER[4], stage_start.elapsed().as_millis() as u64);
        }

        info!(incident_id = %record.incident_id, status = ?record.status, "approved incident executed");
        Ok(record)
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        let detect_health = self.detect.health_check().await;
        let mut components = HashMap::new();
        match detect_health {
            Ok(h) => {
                components.insert(h.name.clone(), h);
            }
            Err(e) => {
                components.insert(
                    "detect".to_string(),
                    incident_common::ComponentHealth {
                        name: "detect".to_string(),
                        level: HealthLevel::Critical,
                        message: e.to_string(),
                    },
                );
            }
        }

        let mut status = HealthStatus {
            overall_health: HealthLevel::Unknown,
            components,
            last_check: current_timestamp(),
            uptime_seconds: (current_timestamp() - self.started_at).num_seconds().max(0) as u64,
        };
        status.calculate_overall_health();
        let mut cached = self.health.write().await;
        cached.clear();
        for (name, c) in &status.components {
            cached.insert(name.clone(), c.level);
        }
        Ok(status)
    }

    async fn shutdown(&self) -> Result<()> {
        info!("orchestrator shutting down");
        Ok(())
    }
}

#[allow(dead_code)]
fn approval_is_usable(token: &ApprovalToken, now: chrono::DateTime<chrono::Utc>) -> bool {
    token.status == ApprovalStatus::Approved && !token.is_expired(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use incident_common::{
        ComponentHealth, CorrelatedEvent, DetectSource, RCAResult, ResourceId, StepOutcome, SOPCandidate,
    };
    use std::collections::HashMap as StdHashMap;

    struct StubDetect;

    #[async_trait]
    impl DetectAgent for StubDetect {
        async fn detect(&self, _t: TriggerType, _lookback: u32) -> Result<DetectResult> {
            Ok(DetectResult {
                detect_id: uuid::Uuid::new_v4(),
                timestamp: current_timestamp(),
                event: CorrelatedEvent {
                    event_id: uuid::Uuid::new_v4(),
                    timestamp: current_timestamp(),
                    lookback_minutes: 30,
                    affected_resources: vec!["res-1".to_string()],
                    anomalies: vec![],
                    alarms: vec![],
                    changes: vec![],
                    health_events: vec![],
                    telemetry: StdHashMap::new(),
                    source_errors: vec![],
                },
                rule_matches: vec![],
                recognised_anomalies: vec![],
                vectorized: false,
                source: DetectSource::DetectAgent,
                ttl_seconds: 60,
            })
        }
        async fn get_latest(
            &self,
            _source: Option<incident_common::DetectSource>,
            _max_age_seconds: Option<u64>,
        ) -> Result<Option<DetectResult>> {
            Ok(None)
        }
        async fn health_check(&self) -> Result<ComponentHealth> {
            Ok(ComponentHealth { name: "detect".to_string(), level: HealthLevel::Healthy, message: "ok".to_string() })
        }
    }

    struct StubRca;

    #[async_trait]
    impl RcaInferencer for StubRca {
        async fn infer(&self, _event: &CorrelatedEvent, _matches: &[MatchResult]) -> Result<RCAResult> {
            Ok(RCAResult::unknown(current_timestamp()))
        }
    }

    struct StubSafety {
        candidate: Option<SOPCandidate>,
        mode: ExecutionMode,
    }

    impl SafetyGate for StubSafety {
        fn match_sops(&self, _rca: &RCAResult, _resources: &[ResourceId]) -> Vec<SOPCandidate> {
            self.candidate.clone().into_iter().collect()
        }
        fn classify(&self, _candidate: &SOPCandidate, _confidence: f32) -> Classification {
            Classification { risk_level: incident_common::RiskLevel::L1, execution_mode: self.mode, reasons: vec![] }
        }
        fn check_cooldown(&self, _r: &ResourceId, _s: &incident_common::SopId) -> Result<()> {
            Ok(())
        }
        fn record_execution(&self, _r: &ResourceId, _s: &incident_common::SopId) {}
        fn mark_attempted(&self, _r: &ResourceId, _s: &incident_common::SopId) {}
        fn should_force_dry_run(&self, _r: &ResourceId, _s: &incident_common::SopId) -> bool {
            false
        }
        fn request_approval(&self, candidate: SOPCandidate) -> ApprovalToken {
            ApprovalToken {
                token_id: uuid::Uuid::new_v4(),
                sop_id: candidate.sop_id.clone(),
                requested_at: current_timestamp(),
                expires_at: current_timestamp() + chrono::Duration::seconds(60),
                status: ApprovalStatus::Pending,
                approver: None,
                justification: None,
                candidate_snapshot: candidate,
            }
        }
        fn decide_approval(&self, _t: uuid::Uuid, _a: bool, _by: String) -> Result<ApprovalToken> {
            Err(incident_common::Error::Safety("not exercised by these tests".to_string()))
        }
    }

    struct StubExecutor;

    #[async_trait]
    impl SopExecutor for StubExecutor {
        async fn execute(
            &self,
            sop: SOPCandidate,
            _approval: Option<ApprovalToken>,
            mode: RunMode,
        ) -> Result<incident_common::ExecutionResult> {
            Ok(incident_common::ExecutionResult {
                sop_id: sop.sop_id,
                mode,
                step_outcomes: vec![StepOutcome { step_id: "s1".to_string(), ok: true, output: None, error: None }],
                rolled_back: false,
                ok: true,
            })
        }
        async fn complete_step(&self, _sop: &str, _step: &str, _outcome: StepOutcome) -> Result<()> {
            Ok(())
        }
    }

    struct NoopFeedback;

    #[async_trait]
    impl FeedbackLearner for NoopFeedback {
        async fn record(&self, _incident: &IncidentRecord) -> Result<()> {
            Ok(())
        }
    }

    fn candidate() -> SOPCandidate {
        SOPCandidate {
            sop_id: "sop-1".to_string(),
            name: "restart service".to_string(),
            description: "restarts the affected service".to_string(),
            estimated_duration_seconds: 30,
            steps: vec![],
            risk_level: incident_common::RiskLevel::L1,
            execution_mode: ExecutionMode::Auto,
            matched_triggers: vec!["res-1".to_string()],
        }
    }

    fn orchestrator(mode: ExecutionMode) -> DefaultOrchestrator {
        DefaultOrchestrator::new(
            Arc::new(Config::default()),
            Arc::new(StubDetect),
            Arc::new(StubRca),
            Arc::new(StubSafety { candidate: Some(candidate()), mode }),
            Arc::new(StubExecutor),
            None,
            Arc::new(NoopFeedback),
        )
    }

    #[tokio::test]
    async fn auto_mode_executes_and_records_all_stage_timings() {
        let orch = orchestrator(ExecutionMode::Auto);
        let record = orch
            .handle_incident(TriggerType::Alarm, serde_json::Value::Null, None)
            .await
            .unwrap();
        assert_eq!(record.status, IncidentStatus::Executed);
        assert!(record.stage_timings_form_valid_prefix());
        assert_eq!(record.stage_timings.len(), STAGE_ORDER.len());
    }

    #[tokio::test]
    async fn read_only_mode_stops_at_analysed_without_executing() {
        let orch = orchestrator(ExecutionMode::ReadOnly);
        let record = orch
            .handle_incident(TriggerType::Alarm, serde_json::Value::Null, None)
            .await
            .unwrap();
        assert_eq!(record.status, IncidentStatus::Analysed);
        assert!(record.execution_outcome.is_none());
    }

    #[tokio::test]
    async fn approval_required_mode_suspends_with_a_token_and_no_execution() {
        let orch = orchestrator(ExecutionMode::ApprovalRequired);
        let record = orch
            .handle_incident(TriggerType::Alarm, serde_json::Value::Null, None)
            .await
            .unwrap();
        assert_eq!(record.status, IncidentStatus::AwaitingApproval);
        assert!(record.approval_token.is_some());
        assert!(record.execution_outcome.is_none());
    }
}
