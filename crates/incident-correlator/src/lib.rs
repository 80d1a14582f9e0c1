//! Signal correlation: fan out across per-service collectors, merge their
//! results into one `CorrelatedEvent`, tolerating partial failure (§4.1).

mod correlator;

pub use correlator::{CorrelatorHandle, DefaultCorrelator};

use async_trait::async_trait;
use incident_common::{ComponentHealth, CorrelatedEvent, Result};

/// The Correlator's public surface.
#[async_trait]
pub trait Correlator: Send + Sync {
    async fn collect(&self, lookback_minutes: u32) -> Result<CorrelatedEvent>;

    async fn health_check(&self) -> Result<ComponentHealth>;

    async fn shutdown(&self) -> Result<()>;
}
