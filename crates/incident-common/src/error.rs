//! Error types and result handling shared across the incident pipeline.

use thiserror::Error;

/// Result type alias used throughout the pipeline.
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy for the incident pipeline core.
///
/// Each variant corresponds to a component boundary. Component implementations
/// capture lower-level failures (HTTP, serialization, timeouts) into these kinds
/// rather than letting them escape as foreign error types.
#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),

    /// All configured collectors failed for a Correlator pass.
    #[error("collection error: {0}")]
    Collection(String),

    /// Some collectors failed; caller chose to continue with a partial event.
    #[error("partial collection error: {0}")]
    PartialCollection(String),

    #[error("detection error: {0}")]
    Detection(String),

    #[error("rule match error: {0}")]
    RuleMatch(String),

    #[error("knowledge store error: {0}")]
    Knowledge(String),

    /// Vector index unreachable; reads should degrade to keyword search.
    #[error("index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("search error: {0}")]
    Search(String),

    /// All model cascades failed to produce a parseable hypothesis.
    #[error("inference error: {0}")]
    Inference(String),

    #[error("safety policy error: {0}")]
    Safety(String),

    /// Cooldown or confidence gate rejected a candidate; not a failure, an advisory.
    #[error("safety denied: {0}")]
    SafetyDenied(String),

    /// Approval token TTL elapsed before an approval decision arrived.
    #[error("approval expired: {0}")]
    ApprovalExpired(String),

    #[error("execution error: {0}")]
    Execution(String),

    /// A step handler reported ok=false.
    #[error("action failed: {0}")]
    ActionFailed(String),

    /// A rollback invoked after ActionFailed itself failed.
    #[error("rollback failed: {0}")]
    RollbackFailed(String),

    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("orchestration error: {0}")]
    Orchestration(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("generic error: {0}")]
    Generic(#[from] anyhow::Error),
}

impl Error {
    /// Whether a retry policy should attempt this operation again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Collection(_)
                | Error::PartialCollection(_)
                | Error::IndexUnavailable(_)
                | Error::Inference(_)
                | Error::ResourceExhausted(_)
                | Error::Timeout(_)
        )
    }

    /// Category label used on metrics and log fields.
    pub fn category(&self) -> &'static str {
        match self {
            Error::Configuration(_) => "configuration",
            Error::Collection(_) => "collection",
            Error::PartialCollection(_) => "partial_collection",
            Error::Detection(_) => "detection",
            Error::RuleMatch(_) => "rule_match",
            Error::Knowledge(_) => "knowledge",
            Error::IndexUnavailable(_) => "index_unavailable",
            Error::Search(_) => "search",
            Error::Inference(_) => "inference",
            Error::Safety(_) => "safety",
            Error::SafetyDenied(_) => "safety_denied",
            Error::ApprovalExpired(_) => "approval_expired",
            Error::Execution(_) => "execution",
            Error::ActionFailed(_) => "action_failed",
            Error::RollbackFailed(_) => "rollback_failed",
            Error::UnknownAction(_) => "unknown_action",
            Error::Orchestration(_) => "orchestration",
            Error::ResourceExhausted(_) => "resource",
            Error::InvalidRequest(_) => "request",
            Error::Timeout(_) => "timeout",
            Error::Serialization(_) => "serialization",
            Error::Storage(_) => "storage",
            Error::Generic(_) => "generic",
        }
    }

    /// Reason code recorded on an `IncidentRecord`, matching the error taxonomy.
    pub fn reason_code(&self) -> &'static str {
        self.category()
    }
}
