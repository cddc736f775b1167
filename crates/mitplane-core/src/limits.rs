//! Retry and pagination budgets (normative defaults).
//!
//! Two independent attempt counters exist on purpose: conditional-check
//! failures are expected under contention and retried immediately, while
//! transient store errors back off between attempts. Exhausting either
//! budget produces a typed error, never an unbounded hang.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryLimits {
    /// Outer contention loop: full re-derivations of allocation state after
    /// a conditional-write failure.
    pub max_allocation_attempts: u32,
    /// Transient-error retries per conditional write.
    pub max_put_attempts: u32,
    /// Transient-error retries per index query page.
    pub max_query_attempts: u32,
    pub query_page_size: usize,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for RetryLimits {
    fn default() -> Self {
        Self {
            max_allocation_attempts: 5,
            max_put_attempts: 3,
            max_query_attempts: 3,
            query_page_size: 100,
            backoff_base_ms: 50,
            backoff_max_ms: 1_000,
        }
    }
}
