//! Workflow-id allocation by scan.
//!
//! There is no counter row. Every allocation scans the device's request
//! records fresh, takes the highest active workflow id inside the target
//! scope, and proposes the next slot. The same pass collects everything the
//! handlers need for admission: the active record carrying the candidate's
//! name, and any coexistence conflict with other live definitions. Conflicts
//! are reported as data rather than thrown, because a Delete does not care
//! about them while a Create must refuse.

use tracing::debug;

use mitplane_core::{
    CapacityExhausted, CoexistenceConflictBox, DefinitionRef, DeviceName, DeviceScope,
    DuplicateClassification, DuplicateDetector, MitigationTemplate, RequestType, RetryLimits,
    WorkflowId,
};

use crate::error::StoreError;
use crate::metrics::{Counter, MetricsSink};
use crate::retry::{Backoff, BackoffPolicy};
use crate::table::{RequestTable, TableError};

/// What the scan learned about the active record with the candidate's name,
/// if one exists. Enough for the handlers to run their version and template
/// checks without re-reading the record.
#[derive(Clone, Debug)]
pub struct ActiveSummary {
    pub workflow_id: WorkflowId,
    pub mitigation_version: i32,
    pub mitigation_template: MitigationTemplate,
    pub request_type: RequestType,
    /// Canonical bytes of the stored definition equal the candidate's.
    pub identical: bool,
}

/// One fresh pass over a device's records in a scope.
#[derive(Clone, Debug, Default)]
pub struct AllocationScan {
    pub max_workflow_id: Option<WorkflowId>,
    pub active_same_name: Option<ActiveSummary>,
    pub conflict: Option<CoexistenceConflictBox>,
}

impl AllocationScan {
    /// The slot this scan proposes, or the capacity alarm when the scope's
    /// range is spent. An empty scope starts one above its floor; the floor
    /// itself is never allocated, and the ceiling is held back as a sentinel,
    /// so the last allocatable slot is one below the scope maximum.
    pub fn next_workflow_id(
        &self,
        device: &DeviceName,
        scope: DeviceScope,
    ) -> Result<WorkflowId, CapacityExhausted> {
        let next = match self.max_workflow_id {
            Some(max) => max.next(),
            None => scope.min_workflow_id().next(),
        };
        if next >= scope.max_workflow_id() {
            return Err(CapacityExhausted {
                device: device.clone(),
                next,
                max: scope.max_workflow_id(),
            });
        }
        Ok(next)
    }

    /// Fold a delta scan (records strictly after the previous maximum) into
    /// this one. Newer information wins: a record written since the last
    /// pass supersedes what we knew about its name.
    pub fn merge(&mut self, newer: AllocationScan) {
        if let Some(max) = newer.max_workflow_id {
            self.max_workflow_id = Some(match self.max_workflow_id {
                Some(prior) => prior.max(max),
                None => max,
            });
        }
        if newer.active_same_name.is_some() {
            self.active_same_name = newer.active_same_name;
        }
        if newer.conflict.is_some() {
            self.conflict = newer.conflict;
        }
    }
}

pub struct WorkflowAllocator<'a, T: RequestTable + ?Sized> {
    table: &'a T,
    limits: &'a RetryLimits,
    metrics: &'a dyn MetricsSink,
}

impl<'a, T: RequestTable + ?Sized> WorkflowAllocator<'a, T> {
    pub fn new(table: &'a T, limits: &'a RetryLimits, metrics: &'a dyn MetricsSink) -> Self {
        Self {
            table,
            limits,
            metrics,
        }
    }

    /// Scan `device`'s records in `scope`, classifying each live definition
    /// against `candidate`. `after` narrows a retry pass to records written
    /// since the previous proposal; the caller merges the result into its
    /// earlier scan.
    pub fn scan(
        &self,
        device: &DeviceName,
        scope: DeviceScope,
        candidate: DefinitionRef<'_>,
        detector: &DuplicateDetector<'_>,
        after: Option<WorkflowId>,
    ) -> Result<AllocationScan, StoreError> {
        let mut scan = AllocationScan::default();
        let mut token = None;
        let mut pages = 0usize;
        loop {
            let page = self.query_page(device, after, token)?;
            pages += 1;
            for record in &page.records {
                if !scope.contains(record.workflow_id) || !record.is_active() {
                    continue;
                }
                scan.max_workflow_id = Some(match scan.max_workflow_id {
                    Some(max) => max.max(record.workflow_id),
                    None => record.workflow_id,
                });
                if record.mitigation_name == *candidate.name {
                    let identical = record.definition_hash == candidate.hash
                        && record.definition.as_str() == candidate.definition.as_str();
                    scan.active_same_name = Some(ActiveSummary {
                        workflow_id: record.workflow_id,
                        mitigation_version: record.mitigation_version,
                        mitigation_template: record.mitigation_template,
                        request_type: record.request_type,
                        identical,
                    });
                    continue;
                }
                if !record.is_live_mitigation() || scan.conflict.is_some() {
                    continue;
                }
                let existing = DefinitionRef {
                    template: record.mitigation_template,
                    name: &record.mitigation_name,
                    definition: &record.definition,
                    hash: record.definition_hash,
                };
                if let DuplicateClassification::Conflicting(conflict) =
                    detector.classify(existing, candidate)
                {
                    scan.conflict = Some(conflict);
                }
            }
            match page.next {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        debug!(
            device = %device,
            ?scope,
            pages,
            max = scan.max_workflow_id.map(|id| id.get()),
            same_name = scan.active_same_name.is_some(),
            conflict = scan.conflict.is_some(),
            "allocation scan complete"
        );
        Ok(scan)
    }

    fn query_page(
        &self,
        device: &DeviceName,
        after: Option<WorkflowId>,
        token: Option<crate::table::ContinuationToken>,
    ) -> Result<crate::table::RequestPage, StoreError> {
        let mut backoff = Backoff::new(BackoffPolicy::from_limits(self.limits));
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match self.table.query_device_requests(
                device,
                after,
                self.limits.query_page_size,
                token,
            ) {
                Ok(page) => return Ok(page),
                Err(err @ TableError::Unavailable { .. }) => {
                    if attempts >= self.limits.max_query_attempts {
                        return Err(StoreError::StoreExhausted {
                            attempts,
                            source: err,
                        });
                    }
                    self.metrics.incr(Counter::QueryRetry);
                    backoff.sleep();
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}
