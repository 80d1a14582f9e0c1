//! RCA Inferencer: escalates from the already-computed rule match, through
//! the Knowledge Store search, to a mid-tier then high-tier completion model,
//! stopping as soon as a stage clears its confidence bar (§4.6).

mod cascade;

pub use cascade::DefaultRcaInferencer;

use async_trait::async_trait;
use incident_common::{CorrelatedEvent, MatchResult, RCAResult, Result};

#[async_trait]
pub trait RcaInferencer: Send + Sync {
    async fn infer(&self, event: &CorrelatedEvent, rule_matches: &[MatchResult]) -> Result<RCAResult>;
}
