//! Backing-store abstraction.
//!
//! Models the external key-value store: strongly consistent reads, paginated
//! index queries with continuation tokens, and conditional single-item
//! writes. A failed expectation is a first-class outcome
//! ([`TableError::ConditionFailed`]) distinct from transient unavailability,
//! because the two drive different retry policies upstream.

use thiserror::Error;

use mitplane_core::{
    DeviceName, MitigationId, MitigationRequestRecord, MitigationStateRecord,
    ResourceAllocationStateRecord, ResourceId, WorkflowId,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TableError {
    /// The write's attribute expectation did not hold. Expected under
    /// contention; the caller re-derives state and tries again.
    #[error("conditional check failed on {key}")]
    ConditionFailed { key: String },

    /// Transient service/network failure. Retryable with backoff.
    #[error("store unavailable: {reason}")]
    Unavailable { reason: String },

    /// The store returned something this layer cannot interpret. Not
    /// retryable.
    #[error("corrupt record at {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

impl TableError {
    pub fn is_condition_failed(&self) -> bool {
        matches!(self, TableError::ConditionFailed { .. })
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, TableError::Unavailable { .. })
    }
}

/// Opaque resume point for a paginated query.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContinuationToken {
    pub(crate) last_workflow_id: WorkflowId,
}

#[derive(Clone, Debug)]
pub struct RequestPage {
    pub records: Vec<MitigationRequestRecord>,
    pub next: Option<ContinuationToken>,
}

/// Request table: partition key `device_name`, sort key `workflow_id`.
pub trait RequestTable {
    /// Records for `device` with workflow id strictly greater than `after`
    /// (when given), ascending, at most `page_size` per page. Reads are
    /// strongly consistent.
    fn query_device_requests(
        &self,
        device: &DeviceName,
        after: Option<WorkflowId>,
        page_size: usize,
        token: Option<ContinuationToken>,
    ) -> Result<RequestPage, TableError>;

    fn get_request(
        &self,
        device: &DeviceName,
        workflow_id: WorkflowId,
    ) -> Result<Option<MitigationRequestRecord>, TableError>;

    /// Insert expecting no record at (device, workflow_id).
    fn put_new_request(&self, record: &MitigationRequestRecord) -> Result<(), TableError>;

    /// Stamp the supersede pointer on an existing record, expecting it to be
    /// currently unset.
    fn mark_superseded(
        &self,
        device: &DeviceName,
        workflow_id: WorkflowId,
        superseded_by: WorkflowId,
    ) -> Result<(), TableError>;
}

/// State table pair: mitigation state keyed by mitigation id, allocation
/// ledger keyed by resource id.
pub trait StateTable {
    fn get_allocation(
        &self,
        resource: &ResourceId,
    ) -> Result<Option<ResourceAllocationStateRecord>, TableError>;

    /// Insert expecting no ledger row for the resource.
    fn put_new_allocation(&self, record: &ResourceAllocationStateRecord)
    -> Result<(), TableError>;

    /// Flip `confirmed` expecting the row to still reference `mitigation`
    /// unconfirmed.
    fn confirm_allocation(
        &self,
        resource: &ResourceId,
        mitigation: &MitigationId,
    ) -> Result<(), TableError>;

    fn get_state(
        &self,
        mitigation: &MitigationId,
    ) -> Result<Option<MitigationStateRecord>, TableError>;

    /// Insert expecting no state record for the mitigation id.
    fn put_new_state(&self, record: &MitigationStateRecord) -> Result<(), TableError>;

    /// Replace the state record expecting its stored `version_number` to
    /// equal `expected_version`.
    fn update_state(
        &self,
        record: &MitigationStateRecord,
        expected_version: u64,
    ) -> Result<(), TableError>;
}
