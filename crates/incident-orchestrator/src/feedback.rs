use std::sync::Arc;

use async_trait::async_trait;
use incident_common::utils::new_id;
use incident_common::{IncidentRecord, IncidentStatus, Pattern, Result};
use incident_knowledge::KnowledgeStore;
use tracing::{debug, info};

use crate::FeedbackLearner;

const SUCCESS_EMA_ALPHA: f32 = 0.2;

pub struct DefaultFeedbackLearner {
    knowledge: Arc<dyn KnowledgeStore>,
}

impl DefaultFeedbackLearner {
    pub fn new(knowledge: Arc<dyn KnowledgeStore>) -> Self {
        Self { knowledge }
    }

    fn is_reusable_pattern_id(pattern_id: &str) -> bool {
        !pattern_id.is_empty() && pattern_id != "unknown" && !pattern_id.starts_with("rule:")
    }

    fn was_successful_execution(incident: &IncidentRecord) -> Option<bool> {
        if incident.status != IncidentStatus::Executed {
            return None;
        }
        incident.execution_outcome.as_ref().map(|o| o.ok)
    }
}

#[async_trait]
impl FeedbackLearner for DefaultFeedbackLearner {
    async fn record(&self, incident: &IncidentRecord) -> Result<()> {
        let Some(rca) = &incident.rca_result else {
            debug!(incident_id = %incident.incident_id, "feedback: no RCA result to learn from");
            return Ok(());
        };

        let now = incident_common::utils::current_timestamp();
        let reused = Self::is_reusable_pattern_id(&rca.pattern_id);
        let existing = if reused {
            self.knowledge.get_pattern(&rca.pattern_id).await?
        } else {
            None
        };

        let success = Self::was_successful_execution(incident);

        let pattern = match existing {
            Some(mut pattern) => {
                pattern.occurrence_count += 1;
                if let Some(success) = success {
                    let target = if success { 1.0 } else { 0.0 };
                    pattern.success_rate += (target - pattern.success_rate) * SUCCESS_EMA_ALPHA;
                }
                pattern.updated_at = now;
                pattern
            }
            None => Pattern {
                pattern_id: if reused { rca.pattern_id.clone() } else { new_id().to_string() },
                title: incident
                    .selected_candidate
                    .as_ref()
                    .map(|c| c.name.clone())
                    .unwrap_or_else(|| rca.root_cause.clone()),
                description: rca.root_cause.clone(),
                category: "incident".to_string(),
                service: incident
                    .selected_candidate
                    .as_ref()
                    .and_then(|c| c.matched_triggers.first().cloned())
                    .unwrap_or_else(|| "unknown".to_string()),
                severity: rca.severity,
                symptoms: rca.matched_symptoms.clone(),
                typical_root_causes: vec![rca.root_cause.clone()],
                remediation_hints: incident
                    .selected_candidate
                    .as_ref()
                    .map(|c| c.steps.iter().map(|s| s.action_id.clone()).collect())
                    .unwrap_or_default(),
                confidence: rca.confidence,
                occurrence_count: 1,
                success_rate: success.map(|s| if s { 1.0 } else { 0.0 }).unwrap_or(0.5),
                created_at: now,
                updated_at: now,
                embedding: None,
            },
        };

        let quality_score = rca.confidence.max(0.0).min(1.0);
        info!(
            incident_id = %incident.incident_id,
            pattern_id = %pattern.pattern_id,
            occurrence_count = pattern.occurrence_count,
            "feedback: upserting learned pattern"
        );
        self.knowledge.upsert_pattern(pattern, quality_score).await?;
        Ok(())
    }
}
