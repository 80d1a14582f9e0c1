use std::sync::Arc;

use async_trait::async_trait;
use incident_common::utils::new_id;
use incident_common::{
    ComponentHealth, Config, DetectResult, DetectSource, HealthLevel, Result, RuleMatchSnapshot,
    TriggerType,
};
use incident_correlator::Correlator;
use incident_rules::RuleMatcher;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info};

use crate::DetectAgent;

enum Slot {
    Empty,
    Ready(DetectResult),
    InFlight(Arc<Notify>),
}

pub struct DefaultDetectAgent {
    config: Arc<Config>,
    correlator: Arc<dyn Correlator>,
    rule_matcher: Arc<dyn RuleMatcher>,
    rules: parking_lot::RwLock<Vec<incident_common::Rule>>,
    slot: Mutex<Slot>,
}

impl DefaultDetectAgent {
    pub fn new(
        config: Arc<Config>,
        correlator: Arc<dyn Correlator>,
        rule_matcher: Arc<dyn RuleMatcher>,
        rules: Vec<incident_common::Rule>,
    ) -> Self {
        Self {
            config,
            correlator,
            rule_matcher,
            rules: parking_lot::RwLock::new(rules),
            slot: Mutex::new(Slot::Empty),
        }
    }

    /// Swaps the loaded rule set for a freshly parsed one (§4.10). The
    /// currently cached `DetectResult`, if any, keeps its own rule matches —
    /// only the next fresh collection sees the new rules.
    pub fn reload_rules(&self, rules: Vec<incident_common::Rule>) {
        let count = rules.len();
        *self.rules.write() = rules;
        info!(rule_count = count, "detect: rule set reloaded");
    }

    async fn collect_fresh(&self, source: DetectSource, lookback_minutes: u32) -> Result<DetectResult> {
        let event = self.correlator.collect(lookback_minutes).await?;
        let rule_matches: Vec<RuleMatchSnapshot> = self
            .rule_matcher
            .match_rules(&event, &self.rules.read())
            .into_iter()
            .map(|m| RuleMatchSnapshot {
                rule_id: m.rule_id,
                confidence: m.confidence,
                root_cause: m.root_cause,
            })
            .collect();

        Ok(DetectResult {
            detect_id: new_id(),
            timestamp: incident_common::utils::current_timestamp(),
            recognised_anomalies: event.anomalies.clone(),
            event,
            rule_matches,
            vectorized: false,
            source,
            ttl_seconds: self.config.detect.default_ttl_seconds,
        })
    }
}

#[async_trait]
impl DetectAgent for DefaultDetectAgent {
    async fn detect(&self, trigger_type: TriggerType, lookback_minutes: u32) -> Result<DetectResult> {
        loop {
            let wait_on = {
                let mut guard = self.slot.lock().await;
                match &*guard {
                    Slot::Ready(result)
                        if result.reusable_by(trigger_type, incident_common::utils::current_timestamp()) =>
                    {
                        debug!(detect_id = %result.detect_id, "detect: serving cached result");
                        return Ok(result.clone());
                    }
                    Slot::InFlight(notify) => Some(notify.clone()),
                    _ => None,
                }
            };

            if let Some(notify) = wait_on {
                info!("detect: coalescing onto in-flight collection");
                notify.notified().await;
                continue;
            }

            // Nothing reusable and nothing in flight: claim the slot.
            let notify = Arc::new(Notify::new());
            {
                let mut guard = self.slot.lock().await;
                // Re-check: another caller may have claimed it between unlock and relock.
                if matches!(&*guard, Slot::InFlight(_)) {
                    continue;
                }
                *guard = Slot::InFlight(notify.clone());
            }

            let source = match trigger_type {
                TriggerType::Manual => DetectSource::Manual,
                TriggerType::Alarm => DetectSource::Alarm,
                TriggerType::Proactive => DetectSource::Proactive,
                TriggerType::Anomaly => DetectSource::DetectAgent,
            };

            let outcome = self.collect_fresh(source, lookback_minutes).await;

            let mut guard = self.slot.lock().await;
            match &outcome {
                Ok(result) => *guard = Slot::Ready(result.clone()),
                Err(_) => *guard = Slot::Empty,
            }
            notify.notify_waiters();
            drop(guard);

            return outcome;
        }
    }

    async fn get_latest(
        &self,
        source: Option<DetectSource>,
        max_age_seconds: Option<u64>,
    ) -> Result<Option<DetectResult>> {
        let guard = self.slot.lock().await;
        let Slot::Ready(result) = &*guard else {
            return Ok(None);
        };

        if let Some(wanted) = source {
            if result.source != wanted {
                return Ok(None);
            }
        }

        if let Some(max_age) = max_age_seconds {
            let age = result.age_seconds(incident_common::utils::current_timestamp());
            if age < 0 || age as u64 > max_age {
                return Ok(None);
            }
        }

        Ok(Some(result.clone()))
    }

    async fn health_check(&self) -> Result<ComponentHealth> {
        let guard = self.slot.lock().await;
        let (level, message) = match &*guard {
            Slot::Ready(r) => (
                HealthLevel::Healthy,
                format!("cached result {} rules matched", r.rule_matches.len()),
            ),
            Slot::InFlight(_) => (HealthLevel::Healthy, "collection in flight".to_string()),
            Slot::Empty => (HealthLevel::Degraded, "no cached result yet".to_string()),
        };
        Ok(ComponentHealth {
            name: "detect_agent".to_string(),
            level,
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use incident_common::{CorrelatedEvent, SourceError};
    use incident_rules::DefaultRuleMatcher;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingCorrelator {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Correlator for CountingCorrelator {
        async fn collect(&self, lookback_minutes: u32) -> Result<CorrelatedEvent> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(CorrelatedEvent {
                event_id: new_id(),
                timestamp: incident_common::utils::current_timestamp(),
                lookback_minutes,
                affected_resources: vec![],
                anomalies: vec![],
                alarms: vec![],
                changes: vec![],
                health_events: vec![],
                telemetry: Default::default(),
                source_errors: Vec::<SourceError>::new(),
            })
        }

        async fn health_check(&self) -> Result<ComponentHealth> {
            Ok(ComponentHealth {
                name: "test".to_string(),
                level: HealthLevel::Healthy,
                message: "ok".to_string(),
            })
        }

        async fn shutdown(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn reuses_fresh_result_without_recollecting() {
        let correlator = Arc::new(CountingCorrelator {
            calls: AtomicU32::new(0),
        });
        let agent = DefaultDetectAgent::new(
            Arc::new(Config::default()),
            correlator.clone(),
            Arc::new(DefaultRuleMatcher::new()),
            Vec::new(),
        );

        agent.detect(TriggerType::Alarm, 15).await.unwrap();
        agent.detect(TriggerType::Alarm, 15).await.unwrap();

        assert_eq!(correlator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn get_latest_peeks_cache_without_collecting() {
        let correlator = Arc::new(CountingCorrelator {
            calls: AtomicU32::new(0),
        });
        let agent = DefaultDetectAgent::new(
            Arc::new(Config::default()),
            correlator.clone(),
            Arc::new(DefaultRuleMatcher::new()),
            Vec::new(),
        );

        assert!(agent.get_latest(None, None).await.unwrap().is_none());
        assert_eq!(correlator.calls.load(Ordering::SeqCst), 0);

        agent.detect(TriggerType::Alarm, 15).await.unwrap();
        assert_eq!(correlator.calls.load(Ordering::SeqCst), 1);

        let cached = agent.get_latest(None, None).await.unwrap();
        assert!(cached.is_some());
        assert_eq!(correlator.calls.load(Ordering::SeqCst), 1);

        assert!(agent
            .get_latest(Some(DetectSource::Manual), None)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn manual_trigger_always_forces_fresh_collection() {
        let correlator = Arc::new(CountingCorrelator {
            calls: AtomicU32::new(0),
        });
        let agent = DefaultDetectAgent::new(
            Arc::new(Config::default()),
            correlator.clone(),
            Arc::new(DefaultRuleMatcher::new()),
            Vec::new(),
        );

        agent.detect(TriggerType::Alarm, 15).await.unwrap();
        agent.detect(TriggerType::Manual, 15).await.unwrap();

        assert_eq!(correlator.calls.load(Ordering::SeqCst), 2);
    }
}
