//! Resource-scoped mitigation state store (the BlackWatch path).
//!
//! Per resource there is at most one live mitigation, tracked through two
//! rows: the allocation ledger (resource id -> mitigation id, with a
//! `confirmed` flag flipped once the state record exists) and the state
//! record itself, mutated only via version-checked conditional updates.
//! Creation is a three-step sequence — claim the ledger row, write the state
//! record, confirm the claim — and every step is individually resumable, so
//! a crash between steps leaves state the next apply can finish.

use tracing::{debug, info};

use mitplane_core::{
    ActionMetadata, AdmissionError, MitigationId, MitigationSettings, MitigationState,
    MitigationStateRecord, OwnerArn, ResourceAllocationStateRecord, ResourceId, ResourceType,
    RetryLimits, validate_resource,
};

use crate::error::StoreError;
use crate::metrics::{Counter, MetricsSink};
use crate::now_ms;
use crate::retry::{Backoff, BackoffPolicy};
use crate::table::{StateTable, TableError};

const INITIAL_STATE_VERSION: u64 = 1;

#[derive(Clone, Debug)]
pub struct ApplyMitigationRequest {
    pub resource_id: ResourceId,
    pub resource_type: ResourceType,
    pub owner_arn: OwnerArn,
    pub pps_rate: u64,
    pub bps_rate: u64,
    pub minutes_to_live: u32,
    /// Raw settings JSON; canonicalized and checksummed on admission.
    pub settings: String,
    pub location_settings: std::collections::BTreeMap<String, String>,
    pub action_metadata: ActionMetadata,
}

#[derive(Clone, Debug)]
pub struct ApplyMitigationOutcome {
    pub record: MitigationStateRecord,
    /// True when this apply created the mitigation, false when it updated an
    /// existing one in place.
    pub created: bool,
}

pub struct MitigationStateStore<'a, T: StateTable + ?Sized> {
    table: &'a T,
    limits: RetryLimits,
    metrics: &'a dyn MetricsSink,
}

impl<'a, T: StateTable + ?Sized> MitigationStateStore<'a, T> {
    pub fn new(table: &'a T, limits: RetryLimits, metrics: &'a dyn MetricsSink) -> Self {
        Self {
            table,
            limits,
            metrics,
        }
    }

    /// Create the mitigation claiming `resource_id`, or update it in place
    /// when the same owner already holds one. Idempotent across crashes in
    /// the creation sequence.
    pub fn apply_mitigation(
        &self,
        request: &ApplyMitigationRequest,
    ) -> Result<ApplyMitigationOutcome, StoreError> {
        let settings = MitigationSettings::new(&request.settings).map_err(|err| {
            AdmissionError::from(mitplane_core::InvalidResource {
                resource_id: request.resource_id.to_string(),
                reason: err.to_string(),
            })
        })?;
        validate_resource(request.resource_type, &request.resource_id, &settings)
            .map_err(AdmissionError::from)?;

        let mut attempts = 0u32;
        while attempts < self.limits.max_allocation_attempts {
            attempts += 1;
            let allocation = self.get_allocation_retry(&request.resource_id)?;
            let outcome = match allocation {
                None => self.claim_and_create(request, &settings)?,
                Some(allocation) => self.apply_to_allocation(request, &settings, &allocation)?,
            };
            match outcome {
                Some(outcome) => return Ok(outcome),
                None => {
                    // Lost a conditional write to a racing caller; re-derive.
                    self.metrics.incr(Counter::ContentionRetry);
                    continue;
                }
            }
        }
        Err(StoreError::StateContentionExhausted {
            resource_id: request.resource_id.clone(),
            attempts,
        })
    }

    /// Transition the resource's mitigation to `ToDelete`. The record stays
    /// in the table; deletion is a state, not a removal.
    pub fn deactivate_mitigation(
        &self,
        resource_id: &ResourceId,
        owner: &OwnerArn,
        action: ActionMetadata,
    ) -> Result<MitigationStateRecord, StoreError> {
        self.mutate_active(resource_id, owner, action, |record| {
            record.state = MitigationState::ToDelete;
        })
    }

    /// Hand the resource's mitigation to a new owner.
    pub fn change_owner(
        &self,
        resource_id: &ResourceId,
        current_owner: &OwnerArn,
        new_owner: OwnerArn,
        action: ActionMetadata,
    ) -> Result<MitigationStateRecord, StoreError> {
        self.mutate_active(resource_id, current_owner, action, move |record| {
            record.owner_arn = new_owner.clone();
        })
    }

    fn claim_and_create(
        &self,
        request: &ApplyMitigationRequest,
        settings: &MitigationSettings,
    ) -> Result<Option<ApplyMitigationOutcome>, StoreError> {
        let mitigation_id = MitigationId::random();
        let claim = ResourceAllocationStateRecord {
            resource_id: request.resource_id.clone(),
            resource_type: request.resource_type,
            mitigation_id,
            confirmed: false,
        };
        match self.write_retry(|| self.table.put_new_allocation(&claim)) {
            Ok(()) => {}
            Err(StoreError::Table(err)) if err.is_condition_failed() => return Ok(None),
            Err(err) => return Err(err),
        }
        debug!(resource = %request.resource_id, mitigation = %mitigation_id, "ledger row claimed");
        self.create_state(request, settings, mitigation_id)
    }

    /// Write the state record for a claimed ledger row and confirm the claim.
    fn create_state(
        &self,
        request: &ApplyMitigationRequest,
        settings: &MitigationSettings,
        mitigation_id: MitigationId,
    ) -> Result<Option<ApplyMitigationOutcome>, StoreError> {
        let mut recorded_resources = std::collections::BTreeMap::new();
        recorded_resources.insert(
            request.resource_type,
            std::collections::BTreeSet::from([request.resource_id.clone()]),
        );
        let record = MitigationStateRecord {
            mitigation_id,
            resource_id: request.resource_id.clone(),
            resource_type: request.resource_type,
            state: MitigationState::Active,
            owner_arn: request.owner_arn.clone(),
            pps_rate: request.pps_rate,
            bps_rate: request.bps_rate,
            minutes_to_live: request.minutes_to_live,
            change_time_ms: now_ms(),
            version_number: INITIAL_STATE_VERSION,
            settings: settings.clone(),
            recorded_resources,
            location_settings: request.location_settings.clone(),
            latest_action: request.action_metadata.clone(),
        };
        match self.write_retry(|| self.table.put_new_state(&record)) {
            Ok(()) => {}
            Err(StoreError::Table(err)) if err.is_condition_failed() => return Ok(None),
            Err(err) => return Err(err),
        }
        self.write_retry(|| self.table.confirm_allocation(&request.resource_id, &mitigation_id))?;
        info!(
            resource = %request.resource_id,
            mitigation = %mitigation_id,
            owner = %request.owner_arn,
            "mitigation created"
        );
        Ok(Some(ApplyMitigationOutcome {
            record,
            created: true,
        }))
    }

    fn apply_to_allocation(
        &self,
        request: &ApplyMitigationRequest,
        settings: &MitigationSettings,
        allocation: &ResourceAllocationStateRecord,
    ) -> Result<Option<ApplyMitigationOutcome>, StoreError> {
        let state = self.get_state_retry(&allocation.mitigation_id)?;
        let Some(state) = state else {
            if allocation.confirmed {
                return Err(AdmissionError::MissingStateRecord {
                    mitigation_id: allocation.mitigation_id,
                }
                .into());
            }
            // A previous apply claimed the ledger row and died before the
            // state record landed. Finish its creation under its id.
            return self.create_state(request, settings, allocation.mitigation_id);
        };

        if state.resource_id != request.resource_id {
            return Err(AdmissionError::AllocationMismatch {
                resource_id: request.resource_id.clone(),
                ledger_mitigation_id: allocation.mitigation_id,
                state_resource_id: state.resource_id,
            }
            .into());
        }
        if state.owner_arn != request.owner_arn {
            return Err(AdmissionError::OwnerMismatch {
                mitigation_id: state.mitigation_id,
                record_owner: state.owner_arn,
            }
            .into());
        }
        if state.state != MitigationState::Active {
            return Err(AdmissionError::InvalidStateTransition {
                mitigation_id: state.mitigation_id,
                state: state.state,
            }
            .into());
        }

        let expected = state.version_number;
        let mut updated = state;
        updated.pps_rate = request.pps_rate;
        updated.bps_rate = request.bps_rate;
        updated.minutes_to_live = request.minutes_to_live;
        updated.settings = settings.clone();
        updated.location_settings = request.location_settings.clone();
        updated.latest_action = request.action_metadata.clone();
        updated
            .recorded_resources
            .entry(request.resource_type)
            .or_default()
            .insert(request.resource_id.clone());
        updated.version_number = expected + 1;
        updated.change_time_ms = now_ms();

        match self.write_retry(|| self.table.update_state(&updated, expected)) {
            Ok(()) => {}
            Err(StoreError::Table(err)) if err.is_condition_failed() => return Ok(None),
            Err(err) => return Err(err),
        }
        if !allocation.confirmed {
            self.write_retry(|| {
                self.table
                    .confirm_allocation(&request.resource_id, &allocation.mitigation_id)
            })?;
        }
        info!(
            resource = %request.resource_id,
            mitigation = %updated.mitigation_id,
            version = updated.version_number,
            "mitigation updated"
        );
        Ok(Some(ApplyMitigationOutcome {
            record: updated,
            created: false,
        }))
    }

    /// Shared skeleton for owner-gated mutations of an Active record.
    fn mutate_active(
        &self,
        resource_id: &ResourceId,
        owner: &OwnerArn,
        action: ActionMetadata,
        mutate: impl Fn(&mut MitigationStateRecord),
    ) -> Result<MitigationStateRecord, StoreError> {
        let mut attempts = 0u32;
        while attempts < self.limits.max_allocation_attempts {
            attempts += 1;
            let allocation = self.get_allocation_retry(resource_id)?.ok_or_else(|| {
                StoreError::from(AdmissionError::MissingAllocation {
                    resource_id: resource_id.clone(),
                })
            })?;
            let state = self.get_state_retry(&allocation.mitigation_id)?;
            let Some(state) = state else {
                return Err(if allocation.confirmed {
                    AdmissionError::MissingStateRecord {
                        mitigation_id: allocation.mitigation_id,
                    }
                    .into()
                } else {
                    AdmissionError::MissingAllocation {
                        resource_id: resource_id.clone(),
                    }
                    .into()
                });
            };
            if state.owner_arn != *owner {
                return Err(AdmissionError::OwnerMismatch {
                    mitigation_id: state.mitigation_id,
                    record_owner: state.owner_arn,
                }
                .into());
            }
            if state.state != MitigationState::Active {
                return Err(AdmissionError::InvalidStateTransition {
                    mitigation_id: state.mitigation_id,
                    state: state.state,
                }
                .into());
            }

            let expected = state.version_number;
            let mut updated = state;
            mutate(&mut updated);
            updated.latest_action = action.clone();
            updated.version_number = expected + 1;
            updated.change_time_ms = now_ms();

            match self.write_retry(|| self.table.update_state(&updated, expected)) {
                Ok(()) => {
                    info!(
                        resource = %resource_id,
                        mitigation = %updated.mitigation_id,
                        version = updated.version_number,
                        state = ?updated.state,
                        "mitigation state mutated"
                    );
                    return Ok(updated);
                }
                Err(StoreError::Table(err)) if err.is_condition_failed() => {
                    self.metrics.incr(Counter::ContentionRetry);
                    continue;
                }
                Err(err) => return Err(err),
            }
        }
        Err(StoreError::StateContentionExhausted {
            resource_id: resource_id.clone(),
            attempts,
        })
    }

    fn get_allocation_retry(
        &self,
        resource_id: &ResourceId,
    ) -> Result<Option<ResourceAllocationStateRecord>, StoreError> {
        self.read_retry(|| self.table.get_allocation(resource_id))
    }

    fn get_state_retry(
        &self,
        mitigation_id: &MitigationId,
    ) -> Result<Option<MitigationStateRecord>, StoreError> {
        self.read_retry(|| self.table.get_state(mitigation_id))
    }

    fn read_retry<R>(
        &self,
        mut op: impl FnMut() -> Result<R, TableError>,
    ) -> Result<R, StoreError> {
        self.retry_transient(self.limits.max_query_attempts, Counter::QueryRetry, &mut op)
    }

    /// Retries transient failures only; a `ConditionFailed` comes back as
    /// `StoreError::Table` for the caller to interpret.
    fn write_retry<R>(
        &self,
        mut op: impl FnMut() -> Result<R, TableError>,
    ) -> Result<R, StoreError> {
        self.retry_transient(self.limits.max_put_attempts, Counter::PutRetry, &mut op)
    }

    fn retry_transient<R>(
        &self,
        max_attempts: u32,
        counter: Counter,
        op: &mut impl FnMut() -> Result<R, TableError>,
    ) -> Result<R, StoreError> {
        let mut backoff = Backoff::new(BackoffPolicy::from_limits(&self.limits));
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match op() {
                Ok(value) => return Ok(value),
                Err(err @ TableError::Unavailable { .. }) => {
                    if attempts >= max_attempts {
                        return Err(StoreError::StoreExhausted {
                            attempts,
                            source: err,
                        });
                    }
                    self.metrics.incr(counter);
                    backoff.sleep();
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}
