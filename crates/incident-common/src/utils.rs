//! Small helpers shared across components.

use chrono::{DateTime, Utc};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Generate a new incident/detect/token id.
pub fn new_id() -> Uuid {
    Uuid::new_v4()
}

pub fn current_timestamp() -> DateTime<Utc> {
    Utc::now()
}

pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Exponential backoff delay, capped at `max_delay_ms`.
pub fn exponential_backoff(
    attempt: u32,
    initial_delay_ms: u64,
    max_delay_ms: u64,
    multiplier: f32,
) -> u64 {
    let delay = initial_delay_ms as f64 * (multiplier as f64).powi(attempt as i32);
    (delay as u64).min(max_delay_ms)
}

/// Stable, non-cryptographic hash used to bucket timestamps into 60s windows
/// for de-duplication (§4.1: `resource_id, kind, timestamp-bucket-60s`).
pub fn simple_hash(s: &str) -> u64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    s.hash(&mut hasher);
    hasher.finish()
}

/// Bucket a timestamp into a 60-second window, for de-duplication keys.
pub fn bucket_60s(ts: DateTime<Utc>) -> i64 {
    ts.timestamp() / 60
}

/// Nearest-rank percentile over a list of latencies.
pub fn calculate_percentile(mut latencies: Vec<u64>, percentile: f32) -> u64 {
    if latencies.is_empty() {
        return 0;
    }

    latencies.sort_unstable();
    let index = ((latencies.len() as f32 * percentile / 100.0) - 1.0).max(0.0) as usize;
    latencies[index.min(latencies.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff() {
        assert_eq!(exponential_backoff(0, 1000, 60000, 2.0), 1000);
        assert_eq!(exponential_backoff(1, 1000, 60000, 2.0), 2000);
        assert_eq!(exponential_backoff(2, 1000, 60000, 2.0), 4000);
        assert_eq!(exponential_backoff(10, 1000, 60000, 2.0), 60000);
    }

    #[test]
    fn test_calculate_percentile() {
        let latencies = vec![100, 200, 300, 400, 500];
        assert_eq!(calculate_percentile(latencies.clone(), 50.0), 200);
        assert_eq!(calculate_percentile(latencies.clone(), 95.0), 400);
        assert_eq!(calculate_percentile(vec![], 95.0), 0);
    }

    #[test]
    fn test_bucket_60s_groups_within_window() {
        let a = Utc::now();
        let b = a + chrono::Duration::seconds(10);
        assert_eq!(bucket_60s(a), bucket_60s(b));
    }
}
