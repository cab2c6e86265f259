use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{
    error::StoreError,
    limiter::{self, Decision, Quota},
};

/// Shared counter store holding one theoretical arrival time per key.
///
/// Implementations must make the read-check-write of a single check
/// indivisible: two concurrent checks on the same key must never both observe
/// a conforming decision when only one unit remains.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Perform one atomic admission check for `key`.
    async fn check(&self, key: &str, quota: &Quota) -> Result<Decision, StoreError>;

    /// Verify the store is reachable.
    async fn health_check(&self) -> Result<(), StoreError>;
}

/// In-process store for tests and single-instance deployments. A single mutex
/// around the TAT map stands in for the remote store's atomicity.
#[derive(Default)]
pub struct MemoryCounterStore {
    buckets: Mutex<HashMap<String, u64>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live buckets; a bucket whose TAT has lapsed counts as gone.
    pub async fn live_buckets(&self) -> usize {
        let now = limiter::unix_now_us();
        self.buckets
            .lock()
            .await
            .values()
            .filter(|&&tat| tat > now)
            .count()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn check(&self, key: &str, quota: &Quota) -> Result<Decision, StoreError> {
        let now = limiter::unix_now_us();
        let mut buckets = self.buckets.lock().await;

        let stored = buckets.get(key).copied();
        let (decision, new_tat) = limiter::check(stored, now, quota);
        if let Some(tat) = new_tat {
            buckets.insert(key.to_string(), tat);
        }
        Ok(decision)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
