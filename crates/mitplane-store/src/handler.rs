//! Create/Edit/Delete/Rollback storage handlers.
//!
//! One entry point, [`RequestStorageHandler::store_request`], runs the whole
//! admission pipeline: scan, admission checks for the request type, slot
//! proposal, conditional write, supersede stamping. Two attempt budgets
//! apply. A conditional-write failure means another writer took the proposed
//! slot; the handler re-scans from the previous maximum and re-derives
//! everything, up to `max_allocation_attempts` times. Transient store errors
//! back off inside a single attempt under `max_put_attempts`.

use std::collections::BTreeSet;

use tracing::{info, warn};

use mitplane_core::{
    ActionMetadata, AdmissionError, CoexistenceConflict, CoexistenceValidator, DefinitionRef,
    DuplicateDetector, INITIAL_VERSION, MitigationDefinition, MitigationName,
    MitigationRequestRecord, MitigationTemplate, RequestType, RetryLimits, ServiceName,
    WorkflowId, WorkflowStatus,
};

use crate::allocator::{AllocationScan, WorkflowAllocator};
use crate::error::StoreError;
use crate::metrics::{Counter, MetricsSink};
use crate::now_ms;
use crate::retry::{Backoff, BackoffPolicy};
use crate::table::{RequestTable, TableError};

/// Caller-side request, before a workflow id or record exists.
#[derive(Clone, Debug)]
pub struct MitigationRequest {
    pub request_type: RequestType,
    pub mitigation_name: MitigationName,
    pub mitigation_template: MitigationTemplate,
    pub service_name: ServiceName,
    pub definition: MitigationDefinition,
    /// Target version. Ignored for Create, which always persists
    /// [`INITIAL_VERSION`].
    pub mitigation_version: i32,
    pub locations: BTreeSet<String>,
    pub action_metadata: ActionMetadata,
}

impl MitigationRequest {
    pub fn create(
        name: MitigationName,
        template: MitigationTemplate,
        service: ServiceName,
        definition: MitigationDefinition,
    ) -> Self {
        Self {
            request_type: RequestType::Create,
            mitigation_name: name,
            mitigation_template: template,
            service_name: service,
            definition,
            mitigation_version: INITIAL_VERSION,
            locations: BTreeSet::new(),
            action_metadata: ActionMetadata::default(),
        }
    }

    pub fn edit(
        name: MitigationName,
        template: MitigationTemplate,
        service: ServiceName,
        definition: MitigationDefinition,
        version: i32,
    ) -> Self {
        Self {
            request_type: RequestType::Edit,
            mitigation_version: version,
            ..Self::create(name, template, service, definition)
        }
    }

    pub fn delete(
        name: MitigationName,
        template: MitigationTemplate,
        service: ServiceName,
        definition: MitigationDefinition,
        version: i32,
    ) -> Self {
        Self {
            request_type: RequestType::Delete,
            mitigation_version: version,
            ..Self::create(name, template, service, definition)
        }
    }

    pub fn rollback(
        name: MitigationName,
        template: MitigationTemplate,
        service: ServiceName,
        definition: MitigationDefinition,
        version: i32,
    ) -> Self {
        Self {
            request_type: RequestType::Rollback,
            mitigation_version: version,
            ..Self::create(name, template, service, definition)
        }
    }
}

/// Admitted request ready to persist.
struct Admitted {
    version: i32,
    supersede: Option<WorkflowId>,
}

#[derive(Clone, Debug)]
pub struct StoreRequestOutcome {
    pub record: MitigationRequestRecord,
    /// The previously-active record this request superseded, if any.
    pub superseded: Option<WorkflowId>,
    /// The record was written but stamping the predecessor's supersede
    /// pointer failed. The pointer is advisory for readers; the written
    /// record is still authoritative.
    pub supersede_lagged: bool,
}

pub struct RequestStorageHandler<'a, T: RequestTable + ?Sized> {
    table: &'a T,
    validator: &'a dyn CoexistenceValidator,
    limits: RetryLimits,
    metrics: &'a dyn MetricsSink,
}

impl<'a, T: RequestTable + ?Sized> RequestStorageHandler<'a, T> {
    pub fn new(
        table: &'a T,
        validator: &'a dyn CoexistenceValidator,
        limits: RetryLimits,
        metrics: &'a dyn MetricsSink,
    ) -> Self {
        Self {
            table,
            validator,
            limits,
            metrics,
        }
    }

    /// Admit and persist one request, allocating its workflow id.
    pub fn store_request(
        &self,
        request: &MitigationRequest,
    ) -> Result<StoreRequestOutcome, StoreError> {
        let outcome = self.store_request_inner(request);
        self.metrics.incr(match outcome {
            Ok(_) => Counter::StoreSuccess,
            Err(_) => Counter::StoreFailure,
        });
        outcome
    }

    fn store_request_inner(
        &self,
        request: &MitigationRequest,
    ) -> Result<StoreRequestOutcome, StoreError> {
        let placement = request.mitigation_template.device_placement();
        let hash = request.definition.hash();
        let candidate = DefinitionRef {
            template: request.mitigation_template,
            name: &request.mitigation_name,
            definition: &request.definition,
            hash,
        };
        let detector = DuplicateDetector::new(self.validator);
        let allocator = WorkflowAllocator::new(self.table, &self.limits, self.metrics);

        let mut scan = allocator.scan(
            &placement.device,
            placement.scope,
            candidate,
            &detector,
            None,
        )?;

        let mut attempts = 0u32;
        while attempts < self.limits.max_allocation_attempts {
            attempts += 1;
            self.metrics.incr(Counter::AllocationAttempt);

            let admitted = admit(request, &scan)?;
            let workflow_id = scan
                .next_workflow_id(&placement.device, placement.scope)
                .map_err(StoreError::Capacity)?;

            let record = MitigationRequestRecord {
                device_name: placement.device.clone(),
                device_scope: placement.scope,
                workflow_id,
                request_type: request.request_type,
                mitigation_name: request.mitigation_name.clone(),
                mitigation_template: request.mitigation_template,
                service_name: request.service_name.clone(),
                definition: request.definition.clone(),
                definition_hash: hash,
                mitigation_version: admitted.version,
                workflow_status: WorkflowStatus::Scheduled,
                abort_flag: false,
                update_workflow_id: None,
                locations: request.locations.clone(),
                request_date_ms: now_ms(),
                action_metadata: request.action_metadata.clone(),
            };

            if !self.put_with_retry(&record)? {
                // Lost the slot to a racing writer. Re-derive from where the
                // previous pass stopped and go around.
                self.metrics.incr(Counter::ContentionRetry);
                let delta = allocator.scan(
                    &placement.device,
                    placement.scope,
                    candidate,
                    &detector,
                    scan.max_workflow_id,
                )?;
                scan.merge(delta);
                continue;
            }

            info!(
                device = %placement.device,
                workflow_id = workflow_id.get(),
                request_type = ?request.request_type,
                name = %request.mitigation_name,
                version = admitted.version,
                "request record stored"
            );

            let mut supersede_lagged = false;
            if let Some(previous) = admitted.supersede
                && let Err(err) =
                    self.table
                        .mark_superseded(&placement.device, previous, workflow_id)
            {
                warn!(
                    device = %placement.device,
                    previous = previous.get(),
                    workflow_id = workflow_id.get(),
                    error = %err,
                    "supersede pointer not stamped"
                );
                supersede_lagged = true;
            }

            return Ok(StoreRequestOutcome {
                record,
                superseded: admitted.supersede,
                supersede_lagged,
            });
        }

        Err(StoreError::ContentionExhausted {
            device: placement.device,
            attempts,
        })
    }

    /// Ok(true): written. Ok(false): conditional check failed, slot taken.
    fn put_with_retry(&self, record: &MitigationRequestRecord) -> Result<bool, StoreError> {
        let mut backoff = Backoff::new(BackoffPolicy::from_limits(&self.limits));
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match self.table.put_new_request(record) {
                Ok(()) => return Ok(true),
                Err(TableError::ConditionFailed { .. }) => return Ok(false),
                Err(err @ TableError::Unavailable { .. }) => {
                    if attempts >= self.limits.max_put_attempts {
                        return Err(StoreError::StoreExhausted {
                            attempts,
                            source: err,
                        });
                    }
                    self.metrics.incr(Counter::PutRetry);
                    backoff.sleep();
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

/// Per-request-type admission policy against the scan's findings.
fn admit(request: &MitigationRequest, scan: &AllocationScan) -> Result<Admitted, AdmissionError> {
    let same_name_conflict = |reason: &str| {
        AdmissionError::DuplicateDefinition(CoexistenceConflict {
            existing_name: request.mitigation_name.clone(),
            existing_template: request.mitigation_template,
            candidate_name: request.mitigation_name.clone(),
            candidate_template: request.mitigation_template,
            reason: reason.to_string(),
        })
    };
    let live = scan
        .active_same_name
        .as_ref()
        .filter(|s| s.request_type != RequestType::Delete);

    match request.request_type {
        RequestType::Create => {
            if let Some(active) = live {
                return Err(if active.identical {
                    same_name_conflict("identical definition already active")
                } else {
                    same_name_conflict("name already active with a different definition")
                });
            }
            if let Some(conflict) = &scan.conflict {
                return Err(AdmissionError::DuplicateDefinition((**conflict).clone()));
            }
            // A previous Delete may still hold the name's active slot; the
            // new Create supersedes it and restarts the version ladder.
            let supersede = scan.active_same_name.as_ref().map(|s| s.workflow_id);
            Ok(Admitted {
                version: INITIAL_VERSION,
                supersede,
            })
        }
        RequestType::Edit | RequestType::Rollback => {
            let active = live.ok_or_else(|| AdmissionError::MissingMitigation {
                device: request.mitigation_template.device_placement().device,
                name: request.mitigation_name.clone(),
            })?;
            if active.mitigation_template != request.mitigation_template {
                return Err(AdmissionError::TemplateMismatch {
                    name: request.mitigation_name.clone(),
                    active: active.mitigation_template,
                    requested: request.mitigation_template,
                });
            }
            let expected = active.mitigation_version + 1;
            if request.mitigation_version != expected {
                return Err(AdmissionError::VersionMismatch {
                    name: request.mitigation_name.clone(),
                    expected,
                    got: request.mitigation_version,
                });
            }
            if request.request_type == RequestType::Edit && active.identical {
                return Err(AdmissionError::StaleEdit {
                    name: request.mitigation_name.clone(),
                    version: request.mitigation_version,
                });
            }
            if let Some(conflict) = &scan.conflict {
                return Err(AdmissionError::DuplicateDefinition((**conflict).clone()));
            }
            Ok(Admitted {
                version: request.mitigation_version,
                supersede: Some(active.workflow_id),
            })
        }
        RequestType::Delete => {
            let active = live.ok_or_else(|| AdmissionError::MissingMitigation {
                device: request.mitigation_template.device_placement().device,
                name: request.mitigation_name.clone(),
            })?;
            if active.mitigation_template != request.mitigation_template {
                return Err(AdmissionError::TemplateMismatch {
                    name: request.mitigation_name.clone(),
                    active: active.mitigation_template,
                    requested: request.mitigation_template,
                });
            }
            if request.mitigation_version != active.mitigation_version {
                return Err(AdmissionError::VersionMismatch {
                    name: request.mitigation_name.clone(),
                    expected: active.mitigation_version,
                    got: request.mitigation_version,
                });
            }
            // Coexistence conflicts with other names never block a Delete.
            Ok(Admitted {
                version: active.mitigation_version + 1,
                supersede: Some(active.workflow_id),
            })
        }
    }
}
