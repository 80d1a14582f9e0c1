//! Shared types, error handling, configuration and external-collaborator
//! interfaces used across every crate in the incident pipeline.

pub mod adapters;
pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod metrics;
pub mod ports;
pub mod retry;
pub mod types;
pub mod utils;

pub use circuit_breaker::{with_circuit_breaker, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use config::Config;
pub use error::{Error, Result};
pub use metrics::{ComponentHealth, HealthLevel, HealthStatus, PipelineMetrics};
pub use retry::{retry_for_error, retry_operation, RetryExecutor, RetryPolicy, RetryStrategy};
pub use types::*;
