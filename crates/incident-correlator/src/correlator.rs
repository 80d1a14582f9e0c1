//! Default `Correlator`: fans out across the configured collectors
//! concurrently, merges what comes back, and records source failures instead
//! of aborting the whole pass (§4.1).

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use incident_common::{
    retry_for_error, ComponentHealth, Config, CorrelatedEvent, Error, HealthLevel, Result,
    SourceError,
};
use incident_common::ports::{CollectedSignals, Collector};
use incident_common::utils::{current_timestamp, new_id};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::Correlator;

/// Handle returned to callers that only need to hold the correlator, not
/// construct one — mirrors the teacher's `create_router` factory shape.
pub type CorrelatorHandle = Arc<dyn Correlator>;

pub struct DefaultCorrelator {
    config: Arc<Config>,
    collectors: Vec<Arc<dyn Collector>>,
}

impl DefaultCorrelator {
    pub fn new(config: Arc<Config>, collectors: Vec<Arc<dyn Collector>>) -> Self {
        Self { config, collectors }
    }

    fn clamp_lookback(&self, requested: u32) -> u32 {
        requested.clamp(
            self.config.correlator.min_lookback_minutes,
            self.config.correlator.max_lookback_minutes,
        )
    }

    async fn collect_one(&self, collector: Arc<dyn Collector>, lookback: u32) -> (String, Result<CollectedSignals>) {
        let tag = collector.service_tag().to_string();
        let per_timeout = Duration::from_millis(self.config.correlator.per_collector_timeout_ms);

        let attempt = {
            let collector = collector.clone();
            move || {
                let collector = collector.clone();
                Box::pin(async move { collector.collect(lookback).await })
                    as std::pin::Pin<Box<dyn std::future::Future<Output = Result<CollectedSignals>> + Send>>
            }
        };

        let outcome = retry_for_error(
            &format!("collect:{tag}"),
            &Error::Collection("probe".to_string()),
            attempt,
        );

        match timeout(per_timeout, outcome).await {
            Ok(result) => (tag, result),
            Err(_) => (tag.clone(), Err(Error::Timeout(format!("collector {tag} timed out")))),
        }
    }
}

#[async_trait::async_trait]
impl Correlator for DefaultCorrelator {
    async fn collect(&self, lookback_minutes: u32) -> Result<CorrelatedEvent> {
        let lookback = self.clamp_lookback(lookback_minutes);
        let total_timeout = Duration::from_millis(self.config.correlator.total_timeout_ms);

        let pending: Vec<_> = self
            .collectors
            .iter()
            .cloned()
            .map(|c| self.collect_one(c, lookback))
            .collect();

        let mut results = match timeout(total_timeout, futures::future::join_all(pending)).await {
            Ok(results) => results,
            Err(_) => {
                warn!("correlator: total collection timeout after {:?}", total_timeout);
                return Err(Error::PartialCollection(
                    "collection deadline exceeded before any collector completed".to_string(),
                ));
            }
        };
        // Merge in a deterministic order regardless of which collector answers first.
        results.sort_by(|a, b| a.0.cmp(&b.0));

        let mut event = CorrelatedEvent {
            event_id: new_id(),
            timestamp: current_timestamp(),
            lookback_minutes: lookback,
            affected_resources: Vec::new(),
            anomalies: Vec::new(),
            alarms: Vec::new(),
            changes: Vec::new(),
            health_events: Vec::new(),
            telemetry: Default::default(),
            source_errors: Vec::new(),
        };

        let mut any_succeeded = false;
        let mut seen: HashSet<(String, String, i64)> = HashSet::new();
        for (service, result) in results {
            match result {
                Ok(signals) => {
                    any_succeeded = true;
                    merge_resources(&mut event, &signals);

                    for anomaly in signals.anomalies {
                        let key = dedup_key(&anomaly.service, &format!("anomaly:{}", anomaly.metric), anomaly.timestamp);
                        if seen.insert(key) {
                            event.anomalies.push(anomaly);
                        }
                    }
                    for alarm in signals.alarms {
                        let key = dedup_key(&alarm.resource_id, &format!("alarm:{}", alarm.reason), alarm.timestamp);
                        if seen.insert(key) {
                            event.alarms.push(alarm);
                        }
                    }
                    for change in signals.changes {
                        let key = dedup_key(&change.resource_id, "change", change.timestamp);
                        if seen.insert(key) {
                            event.changes.push(change);
                        }
                    }
                    for health_event in signals.health_events {
                        let key = dedup_key(
                            &health_event.resource_id,
                            &format!("health:{}", health_event.status),
                            health_event.timestamp,
                        );
                        if seen.insert(key) {
                            event.health_events.push(health_event);
                        }
                    }

                    event.telemetry.extend(signals.telemetry);
                }
                Err(e) => {
                    debug!("collector {service} failed: {e}");
                    event.source_errors.push(SourceError {
                        service,
                        message: e.to_string(),
                    });
                }
            }
        }

        event.affected_resources.sort();
        event.affected_resources.dedup();

        if !any_succeeded && !self.collectors.is_empty() {
            return Err(Error::Collection(
                "every configured collector failed for this pass".to_string(),
            ));
        }

        Ok(event)
    }

    async fn health_check(&self) -> Result<ComponentHealth> {
        Ok(ComponentHealth {
            name: "correlator".to_string(),
            level: HealthLevel::Healthy,
            message: format!("{} collectors configured", self.collectors.len()),
        })
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

/// De-dup key for cross-collector signals: same resource/service, same kind,
/// same 60-second timestamp bucket is treated as the same underlying signal
/// reported twice (§4.1).
fn dedup_key(id: &str, kind: &str, timestamp: chrono::DateTime<chrono::Utc>) -> (String, String, i64) {
    (id.to_string(), kind.to_string(), timestamp.timestamp() / 60)
}

fn merge_resources(event: &mut CorrelatedEvent, signals: &CollectedSignals) {
    event
        .affected_resources
        .extend(signals.alarms.iter().map(|a| a.resource_id.clone()));
    event
        .affected_resources
        .extend(signals.changes.iter().map(|c| c.resource_id.clone()));
    event
        .affected_resources
        .extend(signals.health_events.iter().map(|h| h.resource_id.clone()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use incident_common::Alarm;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyCollector {
        tag: String,
        fail_times: AtomicUsize,
    }

    #[async_trait]
    impl Collector for FlakyCollector {
        fn service_tag(&self) -> &str {
            &self.tag
        }

        async fn collect(&self, _lookback_minutes: u32) -> Result<CollectedSignals> {
            if self.fail_times.fetch_sub(1, Ordering::SeqCst) > 0 {
                return Err(Error::Collection("simulated transient failure".to_string()));
            }
            Ok(CollectedSignals {
                alarms: vec![Alarm {
                    alarm_id: "a-1".to_string(),
                    reason: "StatusCheckFailed".to_string(),
                    r#type: "InstanceStatus".to_string(),
                    message: "instance unhealthy".to_string(),
                    resource_id: "i-0123".to_string(),
                    timestamp: current_timestamp(),
                }],
                ..Default::default()
            })
        }
    }

    struct AlwaysFailCollector;

    #[async_trait]
    impl Collector for AlwaysFailCollector {
        fn service_tag(&self) -> &str {
            "rds"
        }

        async fn collect(&self, _lookback_minutes: u32) -> Result<CollectedSignals> {
            Err(Error::Collection("rds api unreachable".to_string()))
        }
    }

    #[tokio::test]
    async fn merges_signals_from_healthy_collectors_and_records_failures() {
        let config = Arc::new(Config::default());
        let collectors: Vec<Arc<dyn Collector>> = vec![
            Arc::new(FlakyCollector {
                tag: "ec2".to_string(),
                fail_times: AtomicUsize::new(0),
            }),
            Arc::new(AlwaysFailCollector),
        ];
        let correlator = DefaultCorrelator::new(config, collectors);

        let event = correlator.collect(15).await.expect("partial success");
        assert_eq!(event.alarms.len(), 1);
        assert_eq!(event.source_errors.len(), 1);
        assert!(event.has_partial_failures());
        assert_eq!(event.affected_resources, vec!["i-0123".to_string()]);
    }

    #[tokio::test]
    async fn fails_when_every_collector_fails() {
        let config = Arc::new(Config::default());
        let collectors: Vec<Arc<dyn Collector>> = vec![Arc::new(AlwaysFailCollector)];
        let correlator = DefaultCorrelator::new(config, collectors);

        let err = correlator.collect(15).await.unwrap_err();
        assert!(matches!(err, Error::Collection(_)));
    }

    #[tokio::test]
    async fn clamps_lookback_to_configured_bounds() {
        let config = Arc::new(Config::default());
        let correlator = DefaultCorrelator::new(config.clone(), Vec::new());
        assert_eq!(correlator.clamp_lookback(1), config.correlator.min_lookback_minutes);
        assert_eq!(
            correlator.clamp_lookback(999_999),
            config.correlator.max_lookback_minutes
        );
    }
}
