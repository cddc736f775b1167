//! Storage engine for the mitigation control plane.
//!
//! Orchestrates the pieces `mitplane-core` defines: the scan-based workflow
//! allocator, the Create/Edit/Delete/Rollback storage handlers, and the
//! resource-scoped mitigation state store. All cross-caller coordination
//! happens through the backing table's conditional writes; nothing is cached
//! between calls and there are no background threads.

#![forbid(unsafe_code)]

pub mod allocator;
pub mod config;
pub mod error;
pub mod handler;
pub mod memory;
pub mod metrics;
pub mod retry;
pub mod state_store;
pub mod table;

pub use allocator::{ActiveSummary, AllocationScan, WorkflowAllocator};
pub use config::{Config, ConfigError};
pub use error::StoreError;
pub use handler::{MitigationRequest, RequestStorageHandler, StoreRequestOutcome};
pub use memory::{FaultPlan, MemoryRequestTable, MemoryStateTable, TableCounters};
pub use metrics::{Counter, MetricsSink, NoopMetrics};
pub use retry::{Backoff, BackoffPolicy};
pub use state_store::{ApplyMitigationOutcome, ApplyMitigationRequest, MitigationStateStore};
pub use table::{ContinuationToken, RequestPage, RequestTable, StateTable, TableError};

use std::time::{SystemTime, UNIX_EPOCH};

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
