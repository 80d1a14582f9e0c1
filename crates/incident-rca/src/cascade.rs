use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use incident_common::ports::Completer;
use incident_common::utils::simple_hash;
use incident_common::{
    with_circuit_breaker, CircuitBreaker, CircuitBreakerConfig, CorrelatedEvent, Config, Error,
    MatchResult, RCAResult, Result, Severity,
};
use incident_knowledge::KnowledgeStore;
use incident_search::SearchService;
use lru::LruCache;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::RcaInferencer;

#[derive(Debug, Deserialize)]
struct ModelHypothesis {
    pattern_id: Option<String>,
    root_cause: String,
    confidence: f32,
    #[serde(default)]
    evidence: Vec<String>,
}

pub struct DefaultRcaInferencer {
    config: Arc<Config>,
    knowledge: Arc<dyn KnowledgeStore>,
    search: Arc<dyn SearchService>,
    completer: Arc<dyn Completer>,
    cache: Mutex<LruCache<u64, RCAResult>>,
    mid_breaker: CircuitBreaker,
    high_breaker: CircuitBreaker,
}

impl DefaultRcaInferencer {
    pub fn new(
        config: Arc<Config>,
        knowledge: Arc<dyn KnowledgeStore>,
        search: Arc<dyn SearchService>,
        completer: Arc<dyn Completer>,
    ) -> Self {
        Self {
            config,
            knowledge,
            search,
            completer,
            cache: Mutex::new(LruCache::new(NonZeroUsize::new(256).unwrap())),
            mid_breaker: CircuitBreaker::new("rca_mid_model".to_string(), CircuitBreakerConfig::default()),
            high_breaker: CircuitBreaker::new("rca_high_model".to_string(), CircuitBreakerConfig::default()),
        }
    }

    fn build_query(event: &CorrelatedEvent) -> String {
        let mut parts = Vec::new();
        parts.extend(event.alarms.iter().map(|a| format!("{}: {}", a.reason, a.message)));
        parts.extend(event.health_events.iter().map(|h| h.message.clone()));
        parts.extend(event.changes.iter().map(|c| c.description.clone()));
        parts.join(". ")
    }

    fn highest_severity(event: &CorrelatedEvent) -> Severity {
        event
            .anomalies
            .iter()
            .map(|a| a.severity)
            .max()
            .unwrap_or(Severity::Medium)
    }

    async fn call_model(
        &self,
        breaker: &CircuitBreaker,
        model_id: &str,
        prompt: &str,
        timeout_ms: u64,
    ) -> Result<ModelHypothesis> {
        let attempt_timeout = Duration::from_millis(timeout_ms);
        let mut last_err = None;

        for attempt in 0..=self.config.rca.max_model_retries {
            let call = async {
                match timeout(attempt_timeout, self.completer.complete(prompt, model_id)).await {
                    Ok(inner) => inner,
                    Err(_) => Err(Error::Timeout(format!("{model_id} timed out"))),
                }
            };
            match with_circuit_breaker(breaker, call).await {
                Ok(Ok(text)) => {
                    return serde_json::from_str::<ModelHypothesis>(&text)
                        .map_err(|e| Error::Inference(format!("unparseable model response: {e}")));
                }
                Ok(Err(e)) => {
                    warn!("rca: model {model_id} attempt {attempt} failed: {e}");
                    last_err = Some(e);
                }
                Err(breaker_err) => {
                    warn!("rca: model {model_id} attempt {attempt} rejected: {breaker_err}");
                    last_err = Some(Error::Inference(breaker_err.to_string()));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| Error::Inference(format!("{model_id} produced no response"))))
    }
}

#[async_trait]
impl RcaInferencer for DefaultRcaInferencer {
    async fn infer(&self, event: &CorrelatedEvent, rule_matches: &[MatchResult]) -> Result<RCAResult> {
        let now = incident_common::utils::current_timestamp();

        if let Some(top) = rule_matches.first() {
            if top.confidence >= self.config.rca.rule_confidence_floor {
                debug!("rca: rule {} cleared confidence floor", top.rule_id);
                return Ok(RCAResult {
                    pattern_id: format!("rule:{}", top.rule_id),
                    root_cause: top.root_cause.clone(),
                    severity: Self::highest_severity(event),
                    confidence: top.confidence,
                    matched_symptoms: Vec::new(),
                    evidence: vec![format!("rule {} matched", top.rule_id)],
                    recommended_action: None,
                    timestamp: now,
                    model_identity: "rule".to_string(),
                });
            }
        }

        let query = Self::build_query(event);
        let cache_key = simple_hash(&query);
        if let Some(cached) = self.cache.lock().get(&cache_key).cloned() {
            debug!("rca: serving cached hypothesis for repeated query");
            return Ok(cached);
        }

        let result = self.infer_uncached(event, &query).await?;
        self.cache.lock().put(cache_key, result.clone());
        Ok(result)
    }
}

impl DefaultRcaInferencer {
    async fn infer_uncached(&self, event: &CorrelatedEvent, query: &str) -> Result<RCAResult> {
        let now = incident_common::utils::current_timestamp();

        let search_result = self
            .search
            .search(
                query,
                incident_common::SearchStrategy::Auto,
                None,
                None,
                self.config.rca.reference_pattern_limit,
                0.0,
            )
            .await?;

        if let Some(top) = search_result.hits.first() {
            if top.hit.score >= self.config.rca.escalate_below_confidence {
                if let Some(pattern) = self.knowledge.get_pattern(&top.hit.pattern_id).await? {
                    return Ok(RCAResult {
                        pattern_id: pattern.pattern_id.clone(),
                        root_cause: pattern
                            .typical_root_causes
                            .first()
                            .cloned()
                            .unwrap_or_else(|| pattern.title.clone()),
                        severity: pattern.severity,
                        confidence: top.hit.score,
                        matched_symptoms: pattern.symptoms.clone(),
                        evidence: vec![format!("matched via {:?} search", top.layer)],
                        recommended_action: pattern.remediation_hints.first().cloned(),
                        timestamp: now,
                        model_identity: format!("search:{:?}", top.layer),
                    });
                }
            }
        }

        let reference_patterns: Vec<&str> = search_result
            .hits
            .iter()
            .take(self.config.rca.reference_pattern_limit)
            .map(|h| h.hit.pattern_id.as_str())
            .collect();
        let recent_changes: Vec<String> = event
            .changes
            .iter()
            .rev()
            .take(self.config.rca.recent_changes_limit)
            .map(|c| c.description.clone())
            .collect();

        let prompt = format!(
            "Incident signals: {query}\nReference patterns: {reference_patterns:?}\nRecent changes: {recent_changes:?}\n\
             Return JSON {{pattern_id, root_cause, confidence, evidence}}."
        );

        let mid = self
            .call_model(
                &self.mid_breaker,
                &self.config.rca.mid_model_id,
                &prompt,
                self.config.rca.mid_model_timeout_ms,
            )
            .await;

        let chosen = match mid {
            Ok(hyp) if hyp.confidence >= self.config.rca.escalate_below_confidence => Some(("mid", hyp)),
            Ok(mid_hyp) => {
                info!("rca: escalating to high-tier model");
                match self
                    .call_model(
                        &self.high_breaker,
                        &self.config.rca.high_model_id,
                        &prompt,
                        self.config.rca.high_model_timeout_ms,
                    )
                    .await
                {
                    // Both tiers produced a hypothesis; keep whichever is more confident
                    // rather than always preferring the escalated one.
                    Ok(high_hyp) if high_hyp.confidence > mid_hyp.confidence => Some(("high", high_hyp)),
                    Ok(_) => Some(("mid", mid_hyp)),
                    Err(e) => {
                        warn!("rca: high-tier model failed, keeping mid-tier result below escalation threshold: {e}");
                        Some(("mid", mid_hyp))
                    }
                }
            }
            Err(e) => {
                warn!("rca: mid-tier model failed, escalating to high-tier: {e}");
                match self
                    .call_model(
                        &self.high_breaker,
                        &self.config.rca.high_model_id,
                        &prompt,
                        self.config.rca.high_model_timeout_ms,
                    )
                    .await
                {
                    Ok(hyp) => Some(("high", hyp)),
                    Err(e) => {
                        warn!("rca: high-tier model also failed: {e}");
                        None
                    }
                }
            }
        };

        match chosen {
            Some((tier, hyp)) => Ok(RCAResult {
                pattern_id: hyp.pattern_id.unwrap_or_else(|| "unknown".to_string()),
                root_cause: hyp.root_cause,
                severity: Self::highest_severity(event),
                confidence: hyp.confidence,
                matched_symptoms: Vec::new(),
                evidence: hyp.evidence,
                recommended_action: None,
                timestamp: now,
                model_identity: tier.to_string(),
            }),
            None => Ok(RCAResult::unknown(now)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use incident_common::{ComponentHealth, HealthLevel, Hit, Pattern, PatternId, SearchHit, SearchLayer, SearchResult as SR, SourceError};
    use std::collections::HashMap;

    struct StubSearch {
        hits: Vec<SearchHit>,
    }
    #[async_trait]
    impl SearchService for StubSearch {
        async fn search(
            &self,
            _query: &str,
            strategy: incident_common::SearchStrategy,
            _doc_type: Option<&str>,
            _service: Option<&str>,
            _limit: usize,
            _min_score: f32,
        ) -> Result<SR> {
            Ok(SR {
                hits: self.hits.clone(),
                strategy_used: strategy,
                levels_tried: vec![SearchLayer::L1],
                duration_ms: 1,
                total_hits: self.hits.len(),
            })
        }
    }

    struct StubKnowledge;
    #[async_trait]
    impl KnowledgeStore for StubKnowledge {
        async fn upsert_pattern(&self, _p: Pattern, _q: f32) -> Result<()> {
            Ok(())
        }
        async fn get_pattern(&self, id: &PatternId) -> Result<Option<Pattern>> {
            Ok(Some(Pattern {
                pattern_id: id.clone(),
                title: "known pattern".to_string(),
                description: "desc".to_string(),
                category: "storage".to_string(),
                service: "ec2".to_string(),
                severity: Severity::High,
                symptoms: vec!["iowait".to_string()],
                typical_root_causes: vec!["undersized iops".to_string()],
                remediation_hints: vec!["scale_iops".to_string()],
                confidence: 0.9,
                occurrence_count: 5,
                success_rate: 0.8,
                created_at: incident_common::utils::current_timestamp(),
                updated_at: incident_common::utils::current_timestamp(),
                embedding: None,
            }))
        }
        async fn keyword_search(&self, _q: &str, _k: usize) -> Result<Vec<Hit>> {
            Ok(Vec::new())
        }
        async fn vector_search(&self, _e: &[f32], _k: usize) -> Result<Vec<Hit>> {
            Ok(Vec::new())
        }
        async fn rebuild_index(&self) -> Result<usize> {
            Ok(0)
        }
        async fn health_check(&self) -> Result<ComponentHealth> {
            Ok(ComponentHealth {
                name: "stub".to_string(),
                level: HealthLevel::Healthy,
                message: "ok".to_string(),
            })
        }
    }

    struct StubCompleter;
    #[async_trait]
    impl Completer for StubCompleter {
        async fn complete(&self, _prompt: &str, _model_id: &str) -> Result<String> {
            Ok(r#"{"pattern_id":"p-9","root_cause":"model-derived cause","confidence":0.5,"evidence":[]}"#.to_string())
        }
    }

    fn event() -> CorrelatedEvent {
        CorrelatedEvent {
            event_id: uuid::Uuid::new_v4(),
            timestamp: incident_common::utils::current_timestamp(),
            lookback_minutes: 15,
            affected_resources: vec![],
            anomalies: vec![],
            alarms: vec![],
            changes: vec![],
            health_events: vec![],
            telemetry: HashMap::new(),
            source_errors: Vec::<SourceError>::new(),
        }
    }

    #[tokio::test]
    async fn rule_confidence_above_floor_short_circuits_search() {
        let config = Arc::new(Config::default());
        let inferencer = DefaultRcaInferencer::new(
            config,
            Arc::new(StubKnowledge),
            Arc::new(StubSearch { hits: vec![] }),
            Arc::new(StubCompleter),
        );

        let matches = vec![MatchResult {
            rule_id: "r-1".to_string(),
            confidence: 0.95,
            root_cause: "host hardware failure".to_string(),
            optional_matched: 0,
        }];

        let result = inferencer.infer(&event(), &matches).await.unwrap();
        assert_eq!(result.model_identity, "rule");
        assert_eq!(result.pattern_id, "rule:r-1");
    }

    #[tokio::test]
    async fn high_confidence_search_hit_skips_model_cascade() {
        let config = Arc::new(Config::default());
        let inferencer = DefaultRcaInferencer::new(
            config,
            Arc::new(StubKnowledge),
            Arc::new(StubSearch {
                hits: vec![SearchHit {
                    hit: Hit {
                        pattern_id: "p-1".to_string(),
                        score: 0.95,
                    },
                    layer: SearchLayer::L1,
                }],
            }),
            Arc::new(StubCompleter),
        );

        let result = inferencer.infer(&event(), &[]).await.unwrap();
        assert_eq!(result.pattern_id, "p-1");
        assert!(result.model_identity.starts_with("search"));
    }
}
