//! Configuration surface for the incident pipeline core.
//!
//! Everything here is read once at startup and hot-reloadable on a signal
//! (see `incident-orchestrator::reload`); a reload swaps the `RulesConfig`/
//! `SopConfig` snapshots without disturbing in-flight incidents.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration, one section per component group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub detect: DetectConfig,
    pub correlator: CorrelatorConfig,
    pub knowledge: KnowledgeConfig,
    pub search: SearchConfig,
    pub rca: RcaConfig,
    pub safety: SafetyConfig,
    pub executor: ExecutorConfig,
    pub orchestrator: OrchestratorConfig,
    pub telemetry: TelemetryConfig,
}

/// DetectAgent cache and freshness tuning (§4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectConfig {
    pub default_ttl_seconds: u64,
    pub fresh_window_seconds: i64,
    pub cache_capacity: usize,
    /// Callers arriving within this window of an in-flight collection coalesce
    /// onto it rather than seeing `SlotBusy` (§5 backpressure).
    pub coalesce_window_ms: u64,
}

/// Correlator fan-out tuning (§4.1, §5 timeouts).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelatorConfig {
    pub default_services: Vec<String>,
    pub min_lookback_minutes: u32,
    pub max_lookback_minutes: u32,
    pub default_lookback_minutes: u32,
    pub per_collector_timeout_ms: u64,
    pub total_timeout_ms: u64,
    pub collector_max_retries: u32,
    pub change_event_window_hours: i64,
}

/// Knowledge Store tunables (§4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    pub storage_path: PathBuf,
    pub min_quality_score: f32,
    pub embedding_dim: usize,
    pub rebuild_progress_interval: usize,
}

/// Search layering tunables (§4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    pub l1_threshold: f32,
    pub l2_threshold: f32,
    pub l2_timeout_ms: u64,
    pub l3_enabled: bool,
    pub l3_timeout_ms: u64,
    pub l3_endpoint: Option<String>,
    pub max_query_chars: usize,
    pub embedder_timeout_ms: u64,
}

/// RCA cascade model ids and thresholds (§4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RcaConfig {
    pub rule_confidence_floor: f32,
    pub reference_pattern_limit: usize,
    pub mid_model_id: String,
    pub high_model_id: String,
    pub mid_model_timeout_ms: u64,
    pub high_model_timeout_ms: u64,
    pub escalate_below_confidence: f32,
    pub max_model_retries: u32,
    pub recent_changes_limit: usize,
}

/// Safety gate tunables (§4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    pub notify_wait_demotion_below: f32,
    pub read_only_demotion_below: f32,
    pub per_resource_cooldown_seconds: i64,
    pub global_sop_cooldown_seconds: i64,
    pub global_sop_cooldown_max_runs: u32,
    pub approval_ttl_seconds: i64,
    pub notify_wait_grace_seconds: u64,
    pub force_dry_run_on_first_execution: bool,
}

/// Executor tunables (§4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    pub step_timeout_ms: u64,
    pub rollback_timeout_ms: u64,
}

/// Orchestrator tunables (§4.9, §5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub incident_deadline_seconds: u64,
    pub rules_path: PathBuf,
    pub sops_path: PathBuf,
}

/// Ambient observability configuration, adapted from the teacher's telemetry crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    pub enabled: bool,
    pub metrics_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            detect: DetectConfig {
                default_ttl_seconds: 300,
                fresh_window_seconds: 60,
                cache_capacity: 256,
                coalesce_window_ms: 500,
            },
            correlator: CorrelatorConfig {
                default_services: vec!["ec2".to_string(), "eks".to_string(), "rds".to_string()],
                min_lookback_minutes: 2,
                max_lookback_minutes: 1440,
                default_lookback_minutes: 15,
                per_collector_timeout_ms: 10_000,
                total_timeout_ms: 30_000,
                collector_max_retries: 1,
                change_event_window_hours: 24,
            },
            knowledge: KnowledgeConfig {
                storage_path: PathBuf::from("./data/knowledge.sled"),
                min_quality_score: 0.7,
                embedding_dim: 1024,
                rebuild_progress_interval: 100,
            },
            search: SearchConfig {
                l1_threshold: 0.85,
                l2_threshold: 0.70,
                l2_timeout_ms: 2_000,
                l3_enabled: false,
                l3_timeout_ms: 5_000,
                l3_endpoint: None,
                max_query_chars: 2048,
                embedder_timeout_ms: 3_000,
            },
            rca: RcaConfig {
                rule_confidence_floor: 0.85,
                reference_pattern_limit: 3,
                mid_model_id: "bedrock-titan-mid".to_string(),
                high_model_id: "claude-opus-high".to_string(),
                mid_model_timeout_ms: 20_000,
                high_model_timeout_ms: 40_000,
                escalate_below_confidence: 0.7,
                max_model_retries: 2,
                recent_changes_limit: 10,
            },
            safety: SafetyConfig {
                notify_wait_demotion_below: 0.6,
                read_only_demotion_below: 0.4,
                per_resource_cooldown_seconds: 1_800,
                global_sop_cooldown_seconds: 300,
                global_sop_cooldown_max_runs: 3,
                approval_ttl_seconds: 900,
                notify_wait_grace_seconds: 10,
                force_dry_run_on_first_execution: true,
            },
            executor: ExecutorConfig {
                step_timeout_ms: 30_000,
                rollback_timeout_ms: 30_000,
            },
            orchestrator: OrchestratorConfig {
                incident_deadline_seconds: 90,
                rules_path: PathBuf::from("./config/rules.json"),
                sops_path: PathBuf::from("./config/sops.json"),
            },
            telemetry: TelemetryConfig {
                enabled: true,
                metrics_interval_ms: 10_000,
            },
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, falling back to defaults for any
    /// section the file omits, the way the teacher's gateway binary does.
    pub fn load(path: &std::path::Path) -> crate::error::Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?)
            .add_source(config::File::from(path).required(false))
            .add_source(config::Environment::with_prefix("INCIDENT_PIPELINE").separator("__"));
        let cfg = builder
            .build()
            .map_err(|e| crate::error::Error::Configuration(e.to_string()))?;
        cfg.try_deserialize()
            .map_err(|e| crate::error::Error::Configuration(e.to_string()))
    }
}
