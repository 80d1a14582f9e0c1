use std::sync::Arc;

use dashmap::DashMap;
use incident_common::utils::{current_timestamp, new_id};
use incident_common::{
    ApprovalStatus, ApprovalToken, Classification, Config, Error, ExecutionMode, RCAResult,
    Result, ResourceId, RiskLevel, SOPCandidate, SopId, TokenId,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::SafetyGate;

/// A catalog entry loaded from the declarative SOP document at startup (§4.10).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SopDefinition {
    pub sop_id: SopId,
    pub name: String,
    pub description: String,
    pub steps: Vec<incident_common::SOPStep>,
    pub risk_level: RiskLevel,
    /// Lowercase keywords matched against the RCA root cause and symptoms.
    pub keywords: Vec<String>,
    pub historical_success_rate: f32,
}

pub struct DefaultSafetyGate {
    config: Arc<Config>,
    catalog: parking_lot::RwLock<Vec<SopDefinition>>,
    resource_last_run: DashMap<(ResourceId, SopId), chrono::DateTime<chrono::Utc>>,
    sop_run_log: DashMap<SopId, Vec<chrono::DateTime<chrono::Utc>>>,
    seen: DashMap<(ResourceId, SopId), ()>,
    tokens: DashMap<TokenId, ApprovalToken>,
}

impl DefaultSafetyGate {
    pub fn new(config: Arc<Config>, catalog: Vec<SopDefinition>) -> Self {
        Self {
            config,
            catalog: parking_lot::RwLock::new(catalog),
            resource_last_run: DashMap::new(),
            sop_run_log: DashMap::new(),
            seen: DashMap::new(),
            tokens: DashMap::new(),
        }
    }

    /// Swaps the SOP catalog for a freshly loaded snapshot (§4.10). Cooldown
    /// state, approval tokens and the first-execution set are untouched, so a
    /// reload mid-incident never resets a resource's cooldown.
    pub fn reload_catalog(&self, catalog: Vec<SopDefinition>) {
        *self.catalog.write() = catalog;
        info!(sop_count = self.catalog.read().len(), "safety: sop catalog reloaded");
    }

    fn base_mode(risk: RiskLevel) -> ExecutionMode {
        match risk {
            RiskLevel::L1 => ExecutionMode::Auto,
            RiskLevel::L2 => ExecutionMode::Auto,
            RiskLevel::L3 => ExecutionMode::NotifyWait,
            RiskLevel::L4 => ExecutionMode::ApprovalRequired,
        }
    }

    /// Fraction of a definition's keywords present in the RCA's root cause and symptoms.
    fn confidence_of_match(def: &SopDefinition, rca_result: &RCAResult) -> f32 {
        if def.keywords.is_empty() {
            return 0.0;
        }
        let haystack = format!(
            "{} {}",
            rca_result.root_cause.to_lowercase(),
            rca_result.matched_symptoms.join(" ").to_lowercase()
        );
        let hits = def.keywords.iter().filter(|k| haystack.contains(k.as_str())).count();
        hits as f32 / def.keywords.len() as f32
    }

    fn to_candidate(def: &SopDefinition, resource_ids: &[ResourceId], matched_triggers: Vec<String>) -> SOPCandidate {
        let mut steps = def.steps.clone();
        if let Some(resource_id) = resource_ids.first() {
            for step in &mut steps {
                step.parameters
                    .entry("resource_id".to_string())
                    .or_insert_with(|| serde_json::Value::String(resource_id.clone()));
            }
        }
        let estimated_duration_seconds = steps.len() as u64 * 30;
        SOPCandidate {
            sop_id: def.sop_id.clone(),
            name: def.name.clone(),
            description: def.description.clone(),
            estimated_duration_seconds,
            steps,
            risk_level: def.risk_level,
            execution_mode: Self::base_mode(def.risk_level),
            matched_triggers,
        }
    }
}

impl SafetyGate for DefaultSafetyGate {
    fn match_sops(&self, rca_result: &RCAResult, resource_ids: &[ResourceId]) -> Vec<SOPCandidate> {
        let catalog = self.catalog.read();
        let mut scored: Vec<(f32, &SopDefinition)> = catalog
            .iter()
            .map(|def| (def.historical_success_rate * Self::confidence_of_match(def, rca_result), def))
            .filter(|(score, _)| *score > 0.0)
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(5);

        scored
            .into_iter()
            .map(|(_, def)| {
                let matched: Vec<String> = def
                    .keywords
                    .iter()
                    .filter(|k| rca_result.root_cause.to_lowercase().contains(k.as_str()))
                    .cloned()
                    .collect();
                Self::to_candidate(def, resource_ids, matched)
            })
            .collect()
    }

    fn classify(&self, candidate: &SOPCandidate, confidence: f32) -> Classification {
        let mut reasons = Vec::new();
        let mut mode = Self::base_mode(candidate.risk_level);
        reasons.push(format!("base mode for risk {:?} is {:?}", candidate.risk_level, mode));

        if candidate.all_steps_read_only() {
            mode = ExecutionMode::ReadOnly;
            reasons.push("every step is a read-only action".to_string());
        } else if confidence < self.config.safety.read_only_demotion_below {
            mode = ExecutionMode::ReadOnly;
            reasons.push(format!(
                "confidence {confidence:.2} below read-only floor {:.2}",
                self.config.safety.read_only_demotion_below
            ));
        } else if confidence < self.config.safety.notify_wait_demotion_below
            && mode == ExecutionMode::Auto
        {
            mode = ExecutionMode::NotifyWait;
            reasons.push(format!(
                "confidence {confidence:.2} below notify-wait floor {:.2}, demoted from auto",
                self.config.safety.notify_wait_demotion_below
            ));
        }

        Classification {
            risk_level: candidate.risk_level,
            execution_mode: mode,
            reasons,
        }
    }

    fn check_cooldown(&self, resource_id: &ResourceId, sop_id: &SopId) -> Result<()> {
        let now = current_timestamp();
        let key = (resource_id.clone(), sop_id.clone());

        if let Some(last) = self.resource_last_run.get(&key) {
            let elapsed = (now - *last).num_seconds();
            if elapsed < self.config.safety.per_resource_cooldown_seconds {
                return Err(Error::SafetyDenied(format!(
                    "sop {sop_id} on resource {resource_id} in cooldown for {} more seconds",
                    self.config.safety.per_resource_cooldown_seconds - elapsed
                )));
            }
        }

        if let Some(runs) = self.sop_run_log.get(sop_id) {
            let window_start = now - chrono::Duration::seconds(self.config.safety.global_sop_cooldown_seconds);
            let recent = runs.iter().filter(|t| **t >= window_start).count();
            if recent as u32 >= self.config.safety.global_sop_cooldown_max_runs {
                return Err(Error::SafetyDenied(format!(
                    "sop {sop_id} already ran {recent} times in the last {} seconds",
                    self.config.safety.global_sop_cooldown_seconds
                )));
            }
        }

        Ok(())
    }

    fn record_execution(&self, resource_id: &ResourceId, sop_id: &SopId) {
        let now = current_timestamp();
        let key = (resource_id.clone(), sop_id.clone());
        self.resource_last_run.insert(key.clone(), now);
        self.sop_run_log.entry(sop_id.clone()).or_insert_with(Vec::new).push(now);
        self.seen.insert(key, ());
    }

    fn mark_attempted(&self, resource_id: &ResourceId, sop_id: &SopId) {
        self.seen.insert((resource_id.clone(), sop_id.clone()), ());
    }

    fn should_force_dry_run(&self, resource_id: &ResourceId, sop_id: &SopId) -> bool {
        self.config.safety.force_dry_run_on_first_execution
            && !self.seen.contains_key(&(resource_id.clone(), sop_id.clone()))
    }

    fn request_approval(&self, candidate: SOPCandidate) -> ApprovalToken {
        let now = current_timestamp();
        let token = ApprovalToken {
            token_id: new_id(),
            sop_id: candidate.sop_id.clone(),
            requested_at: now,
            expires_at: now + chrono::Duration::seconds(self.config.safety.approval_ttl_seconds),
            status: ApprovalStatus::Pending,
            approver: None,
            justification: None,
            candidate_snapshot: candidate,
        };
        self.tokens.insert(token.token_id, token.clone());
        debug!(token_id = %token.token_id, "safety: approval token issued");
        token
    }

    fn decide_approval(&self, token_id: TokenId, approved: bool, approver: String) -> Result<ApprovalToken> {
        let mut entry = self
            .tokens
            .get_mut(&token_id)
            .ok_or_else(|| Error::InvalidRequest(format!("unknown approval token {token_id}")))?;

        let now = current_timestamp();
        if entry.is_expired(now) && entry.status == ApprovalStatus::Pending {
            entry.status = ApprovalStatus::Expired;
            warn!(%token_id, "safety: approval token expired before a decision arrived");
            return Err(Error::ApprovalExpired(format!("token {token_id} expired")));
        }

        if entry.status != ApprovalStatus::Pending {
            // P6: a token decided once (including a prior expiry) never accepts a second decision.
            return Err(Error::ApprovalExpired(format!(
                "token {token_id} already decided as {:?}",
                entry.status
            )));
        }

        entry.status = if approved {
            ApprovalStatus::Approved
        } else {
            ApprovalStatus::Rejected
        };
        entry.approver = Some(approver);
        info!(%token_id, status = ?entry.status, "safety: approval decided");
        Ok(entry.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use incident_common::{ExecutionMode, RiskLevel, SOPStep, StepStatus};
    use std::collections::HashMap;

    fn candidate(risk: RiskLevel, read_only: bool) -> SOPCandidate {
        SOPCandidate {
            sop_id: "sop-1".to_string(),
            name: "restart service".to_string(),
            description: "test".to_string(),
            estimated_duration_seconds: 60,
            steps: vec![SOPStep {
                id: "s1".to_string(),
                description: "restart".to_string(),
                action_id: if read_only { "describe_instances".to_string() } else { "restart_instance".to_string() },
                parameters: HashMap::new(),
                auto_executable: true,
                rollback: None,
                status: StepStatus::Pending,
                started_at: None,
                ended_at: None,
            }],
            risk_level: risk,
            execution_mode: ExecutionMode::Auto,
            matched_triggers: vec![],
        }
    }

    fn rca_result(root_cause: &str) -> RCAResult {
        RCAResult {
            pattern_id: "p-1".to_string(),
            root_cause: root_cause.to_string(),
            severity: incident_common::Severity::High,
            confidence: 0.9,
            matched_symptoms: vec![],
            evidence: vec![],
            recommended_action: None,
            timestamp: current_timestamp(),
            model_identity: "test".to_string(),
        }
    }

    #[test]
    fn match_sops_ranks_by_success_rate_times_keyword_match() {
        let catalog = vec![
            SopDefinition {
                sop_id: "sop-restart".to_string(),
                name: "restart instance".to_string(),
                description: "restart the ec2 instance".to_string(),
                steps: vec![],
                risk_level: RiskLevel::L2,
                keywords: vec!["iops".to_string(), "disk".to_string()],
                historical_success_rate: 0.9,
            },
            SopDefinition {
                sop_id: "sop-scale".to_string(),
                name: "scale storage".to_string(),
                description: "increase provisioned iops".to_string(),
                steps: vec![],
                risk_level: RiskLevel::L2,
                keywords: vec!["iops".to_string()],
                historical_success_rate: 0.5,
            },
        ];
        let gate = DefaultSafetyGate::new(Arc::new(Config::default()), catalog);

        let candidates = gate.match_sops(&rca_result("undersized iops on disk"), &["i-1".to_string()]);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].sop_id, "sop-restart", "higher success_rate * match should rank first");
    }

    #[test]
    fn low_confidence_demotes_auto_to_notify_wait() {
        let gate = DefaultSafetyGate::new(Arc::new(Config::default()), Vec::new());
        let classification = gate.classify(&candidate(RiskLevel::L1, false), 0.5);
        assert_eq!(classification.execution_mode, ExecutionMode::NotifyWait);
    }

    #[test]
    fn read_only_steps_always_force_read_only_mode() {
        let gate = DefaultSafetyGate::new(Arc::new(Config::default()), Vec::new());
        let classification = gate.classify(&candidate(RiskLevel::L1, true), 0.99);
        assert_eq!(classification.execution_mode, ExecutionMode::ReadOnly);
    }

    #[test]
    fn second_execution_within_cooldown_is_denied() {
        let gate = DefaultSafetyGate::new(Arc::new(Config::default()), Vec::new());
        let resource = "i-1".to_string();
        let sop = "sop-1".to_string();

        gate.record_execution(&resource, &sop);
        let err = gate.check_cooldown(&resource, &sop).unwrap_err();
        assert!(matches!(err, Error::SafetyDenied(_)));
    }

    #[test]
    fn first_execution_on_a_resource_forces_dry_run() {
        let gate = DefaultSafetyGate::new(Arc::new(Config::default()), Vec::new());
        let resource = "i-1".to_string();
        let sop = "sop-1".to_string();
        assert!(gate.should_force_dry_run(&resource, &sop));

        gate.record_execution(&resource, &sop);
        assert!(!gate.should_force_dry_run(&resource, &sop));
    }

    #[test]
    fn approval_token_can_only_be_decided_once() {
        let gate = DefaultSafetyGate::new(Arc::new(Config::default()), Vec::new());
        let token = gate.request_approval(candidate(RiskLevel::L3, false));

        gate.decide_approval(token.token_id, true, "oncall".to_string()).unwrap();
        let err = gate
            .decide_approval(token.token_id, true, "oncall".to_string())
            .unwrap_err();
        assert!(matches!(err, Error::ApprovalExpired(_)));
    }
}
