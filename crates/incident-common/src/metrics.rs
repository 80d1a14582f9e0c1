//! Ambient health-check types shared by every long-lived component
//! (DetectAgent, Knowledge Store, Orchestrator) and aggregated into one
//! process-wide `HealthStatus`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Health of the overall process, aggregated from its components.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub overall_health: HealthLevel,
    pub components: HashMap<String, ComponentHealth>,
    pub last_check: DateTime<Utc>,
    pub uptime_seconds: u64,
}

/// Health levels for a single component.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum HealthLevel {
    Healthy,
    Degraded,
    Critical,
    Unknown,
}

/// Per-component health snapshot, returned by every long-lived component's
/// `health_check()` (DetectAgent, Knowledge Store, Search, RCA Inferencer,
/// Orchestrator).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub level: HealthLevel,
    pub message: String,
}

impl HealthLevel {
    /// Numeric value for comparison / export as a gauge.
    pub fn as_score(&self) -> u8 {
        match self {
            HealthLevel::Healthy => 100,
            HealthLevel::Degraded => 50,
            HealthLevel::Critical => 10,
            HealthLevel::Unknown => 0,
        }
    }
}

impl HealthStatus {
    /// Recompute `overall_health` from the current component map.
    pub fn calculate_overall_health(&mut self) {
        if self.components.is_empty() {
            self.overall_health = HealthLevel::Unknown;
            return;
        }

        let critical_count = self
            .components
            .values()
            .filter(|c| c.level == HealthLevel::Critical)
            .count();

        let degraded_count = self
            .components
            .values()
            .filter(|c| c.level == HealthLevel::Degraded)
            .count();

        self.overall_health = if critical_count > 0 {
            HealthLevel::Critical
        } else if degraded_count > 0 {
            HealthLevel::Degraded
        } else {
            HealthLevel::Healthy
        };
    }
}

/// Per-stage timing and outcome metrics recorded for each `IncidentRecord`,
/// exported alongside `HealthStatus` for the (out-of-scope) dashboard.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PipelineMetrics {
    pub incidents_handled: u64,
    pub incidents_executed: u64,
    pub incidents_awaiting_approval: u64,
    pub incidents_failed: u64,
    pub detect_cache_hits: u64,
    pub detect_cache_misses: u64,
    pub rule_matches: u64,
    pub rca_unknown_results: u64,
}
