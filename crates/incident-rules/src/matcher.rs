//! Default rule matcher: a required clause that fails eliminates the rule;
//! every required clause holding is the entry price, optional clauses only
//! raise confidence (§4.3).

use incident_common::{ClauseSource, Comparison, CorrelatedEvent, MatchResult, Rule, SymptomClause};
use regex::Regex;
use tracing::debug;

use crate::RuleMatcher;

pub struct DefaultRuleMatcher;

impl DefaultRuleMatcher {
    pub fn new() -> Self {
        Self
    }

    fn clause_holds(clause: &SymptomClause, event: &CorrelatedEvent) -> bool {
        match clause.source {
            ClauseSource::Events => Self::event_clause_holds(clause, event),
            ClauseSource::Metrics => Self::metric_clause_holds(clause, event),
            ClauseSource::Logs => Self::log_clause_holds(clause, event),
        }
    }

    fn event_clause_holds(clause: &SymptomClause, event: &CorrelatedEvent) -> bool {
        let Some(expected) = &clause.expected_value else {
            return false;
        };
        match clause.field.as_str() {
            "reason" => event.alarms.iter().any(|a| &a.reason == expected),
            "type" => event.alarms.iter().any(|a| &a.r#type == expected),
            "message" => event
                .alarms
                .iter()
                .any(|a| a.message.contains(expected.as_str())),
            "health_status" => event.health_events.iter().any(|h| &h.status == expected),
            "change_description" => event
                .changes
                .iter()
                .any(|c| c.description.contains(expected.as_str())),
            other => {
                debug!("rule matcher: unknown event clause field {other}");
                false
            }
        }
    }

    fn metric_clause_holds(clause: &SymptomClause, event: &CorrelatedEvent) -> bool {
        let Some(condition) = &clause.condition else {
            return false;
        };
        match event.telemetry.get(&clause.field) {
            Some(value) => condition.holds(*value),
            None => false,
        }
    }

    fn log_clause_holds(clause: &SymptomClause, event: &CorrelatedEvent) -> bool {
        let Some(pattern) = &clause.pattern else {
            return false;
        };
        let Ok(re) = Regex::new(pattern) else {
            debug!("rule matcher: invalid log pattern {pattern}");
            return false;
        };
        event.alarms.iter().any(|a| re.is_match(&a.message))
            || event.health_events.iter().any(|h| re.is_match(&h.message))
    }

    /// The rule's own confidence is the score; optional clauses never raise
    /// or lower it, they only break ties between rules that scored equally.
    fn score(rule: &Rule, event: &CorrelatedEvent) -> Option<(f32, usize)> {
        let required: Vec<&SymptomClause> = rule.symptoms.iter().filter(|c| c.required).collect();
        let optional: Vec<&SymptomClause> = rule.symptoms.iter().filter(|c| !c.required).collect();

        if !required.iter().all(|c| Self::clause_holds(c, event)) {
            return None;
        }

        if required.is_empty() && optional.is_empty() {
            return None;
        }

        let optional_matched = optional.iter().filter(|c| Self::clause_holds(c, event)).count();

        Some((rule.confidence, optional_matched))
    }
}

impl Default for DefaultRuleMatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleMatcher for DefaultRuleMatcher {
    fn match_rules(&self, event: &CorrelatedEvent, rules: &[Rule]) -> Vec<MatchResult> {
        let mut matches: Vec<MatchResult> = rules
            .iter()
            .filter_map(|rule| {
                Self::score(rule, event).map(|(confidence, optional_matched)| MatchResult {
                    rule_id: rule.id.clone(),
                    confidence,
                    root_cause: rule.root_cause.clone(),
                    optional_matched,
                })
            })
            .collect();

        matches.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap()
                .then(b.optional_matched.cmp(&a.optional_matched))
        });
        matches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use incident_common::{
        Alarm, ClauseSource, RemediationSpec, Severity, SourceError,
    };
    use std::collections::HashMap;

    fn event_with_alarm(reason: &str) -> CorrelatedEvent {
        CorrelatedEvent {
            event_id: uuid::Uuid::new_v4(),
            timestamp: incident_common::utils::current_timestamp(),
            lookback_minutes: 15,
            affected_resources: vec!["i-1".to_string()],
            anomalies: vec![],
            alarms: vec![Alarm {
                alarm_id: "a1".to_string(),
                reason: reason.to_string(),
                r#type: "InstanceStatus".to_string(),
                message: "StatusCheckFailed_Instance".to_string(),
                resource_id: "i-1".to_string(),
                timestamp: incident_common::utils::current_timestamp(),
            }],
            changes: vec![],
            health_events: vec![],
            telemetry: HashMap::new(),
            source_errors: Vec::<SourceError>::new(),
        }
    }

    fn rule(required_reason: &str) -> Rule {
        Rule {
            id: "r-1".to_string(),
            name: "instance status check failed".to_string(),
            description: "test".to_string(),
            symptoms: vec![SymptomClause {
                source: ClauseSource::Events,
                field: "reason".to_string(),
                expected_value: Some(required_reason.to_string()),
                condition: None,
                pattern: None,
                required: true,
            }],
            root_cause: "host hardware failure".to_string(),
            severity: Severity::High,
            confidence: 0.9,
            remediation: RemediationSpec {
                action_id: "reboot_instance".to_string(),
                auto_execute: false,
                parameters: HashMap::new(),
                conditions: vec![],
                rollback: None,
                checklist: vec![],
            },
        }
    }

    #[test]
    fn matches_when_required_clause_holds() {
        let matcher = DefaultRuleMatcher::new();
        let event = event_with_alarm("StatusCheckFailed_System");
        let rules = vec![rule("StatusCheckFailed_System")];

        let results = matcher.match_rules(&event, &rules);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].rule_id, "r-1");
    }

    #[test]
    fn excludes_rule_when_required_clause_fails() {
        let matcher = DefaultRuleMatcher::new();
        let event = event_with_alarm("StatusCheckFailed_System");
        let rules = vec![rule("SomethingElse")];

        assert!(matcher.match_rules(&event, &rules).is_empty());
    }

    #[test]
    fn ties_break_on_optional_clauses_matched() {
        let matcher = DefaultRuleMatcher::new();
        let mut event = event_with_alarm("StatusCheckFailed_System");
        event.telemetry.insert("cpu_steal_pct".to_string(), 40.0);
        event.telemetry.insert("disk_io_wait_pct".to_string(), 40.0);

        let mut strict = rule("StatusCheckFailed_System");
        strict.id = "strict".to_string();
        strict.symptoms.push(SymptomClause {
            source: ClauseSource::Metrics,
            field: "cpu_steal_pct".to_string(),
            expected_value: None,
            condition: Some(Comparison::GreaterThan(20.0)),
            pattern: None,
            required: false,
        });
        strict.symptoms.push(SymptomClause {
            source: ClauseSource::Metrics,
            field: "disk_io_wait_pct".to_string(),
            expected_value: None,
            condition: Some(Comparison::GreaterThan(20.0)),
            pattern: None,
            required: false,
        });

        let mut loose = rule("StatusCheckFailed_System");
        loose.id = "loose".to_string();
        loose.symptoms.push(SymptomClause {
            source: ClauseSource::Metrics,
            field: "cpu_steal_pct".to_string(),
            expected_value: None,
            condition: Some(Comparison::GreaterThan(20.0)),
            pattern: None,
            required: false,
        });
        loose.symptoms.push(SymptomClause {
            source: ClauseSource::Metrics,
            field: "unrelated_metric".to_string(),
            expected_value: None,
            condition: Some(Comparison::GreaterThan(20.0)),
            pattern: None,
            required: false,
        });

        // Same rule confidence on both, so the ranking comes entirely from
        // the optional-clause tie-break: "strict" matches its one optional
        // clause, "loose" only matches one of its two.
        let results = matcher.match_rules(&event, &[loose, strict]);
        assert_eq!(results[0].rule_id, "strict");
        assert_eq!(results[0].confidence, results[1].confidence);
    }
}
