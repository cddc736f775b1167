//! Store-layer error taxonomy.
//!
//! Four classes with distinct exhaustion semantics:
//! - admission refusals (caller's problem, never retried)
//! - capacity exhaustion (fatal operational alarm, never retried)
//! - contention exhaustion (the outer allocation loop ran out of attempts)
//! - store exhaustion (transient-error budget spent; wraps the last error)

use thiserror::Error;

use mitplane_core::{AdmissionError, CapacityExhausted, DeviceName, ResourceId};

use crate::table::TableError;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    #[error(transparent)]
    Admission(#[from] AdmissionError),

    #[error(transparent)]
    Capacity(#[from] CapacityExhausted),

    #[error("allocation for device `{device}` still contended after {attempts} attempts")]
    ContentionExhausted { device: DeviceName, attempts: u32 },

    #[error("state of mitigation for resource `{resource_id}` still contended after {attempts} attempts")]
    StateContentionExhausted { resource_id: ResourceId, attempts: u32 },

    #[error("store unavailable after {attempts} attempts")]
    StoreExhausted {
        attempts: u32,
        #[source]
        source: TableError,
    },

    /// Non-transient, non-conditional table failure (e.g. a corrupt record).
    #[error(transparent)]
    Table(#[from] TableError),
}

impl StoreError {
    /// True for the classes a caller may meaningfully retry later:
    /// contention and transient-store exhaustion. Admission refusals and
    /// capacity exhaustion stay false.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::ContentionExhausted { .. }
                | StoreError::StateContentionExhausted { .. }
                | StoreError::StoreExhausted { .. }
        )
    }
}
