use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::policies::BackoffPolicy;

/// Decides how long a failed key waits before it is redelivered.
///
/// `when` is called once per failure and counts it; `forget` clears the count.
pub trait RateLimiter: Send + Sync + 'static {
    /// Records a failure of `key` and returns its delay.
    fn when(&self, key: &str) -> Duration;

    /// Stops tracking `key`.
    fn forget(&self, key: &str);

    /// Failures recorded for `key` since the last `forget`.
    fn num_requeues(&self, key: &str) -> u32;
}

/// Per-key exponential backoff driven by a [`BackoffPolicy`].
#[derive(Debug, Default)]
pub struct ItemBackoffLimiter {
    policy: BackoffPolicy,
    failures: Mutex<HashMap<String, u32>>,
}

impl ItemBackoffLimiter {
    /// Limiter using `policy` for every key.
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            failures: Mutex::new(HashMap::new()),
        }
    }

    fn failures(&self) -> std::sync::MutexGuard<'_, HashMap<String, u32>> {
        self.failures.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RateLimiter for ItemBackoffLimiter {
    fn when(&self, key: &str) -> Duration {
        let n = {
            let mut failures = self.failures();
            let entry = failures.entry(key.to_owned()).or_insert(0);
            let n = *entry;
            *entry = n.saturating_add(1);
            n
        };
        self.policy.next(n)
    }

    fn forget(&self, key: &str) {
        self.failures().remove(key);
    }

    fn num_requeues(&self, key: &str) -> u32 {
        self.failures().get(key).copied().unwrap_or(0)
    }
}
