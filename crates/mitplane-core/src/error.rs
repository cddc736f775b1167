//! Admission error taxonomy.
//!
//! These are bounded and stable: admission errors represent domain/refusal
//! states reported to the caller, never transient store conditions. The
//! store layer wraps them together with its contention/transient classes.

use thiserror::Error;

use crate::duplicate::CoexistenceConflict;
use crate::identity::{DeviceName, MitigationId, MitigationName, OwnerArn, ResourceId, WorkflowId};
use crate::resource::MitigationState;
use crate::template::MitigationTemplate;

/// Invalid identity atom.
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum InvalidId {
    #[error("device name `{raw}` is invalid: {reason}")]
    Device { raw: String, reason: String },
    #[error("mitigation name `{raw}` is invalid: {reason}")]
    Mitigation { raw: String, reason: String },
    #[error("service name `{raw}` is invalid: {reason}")]
    Service { raw: String, reason: String },
    #[error("resource id `{raw}` is invalid: {reason}")]
    Resource { raw: String, reason: String },
    #[error("owner arn `{raw}` is invalid: {reason}")]
    Owner { raw: String, reason: String },
    #[error("mitigation id `{raw}` is invalid: {reason}")]
    MitigationId { raw: String, reason: String },
}

/// Resource payload failed its per-type syntax validation.
#[derive(Debug, Error, Clone)]
#[error("resource `{resource_id}` is invalid: {reason}")]
pub struct InvalidResource {
    pub resource_id: String,
    pub reason: String,
}

/// Input/state refusals surfaced to the caller. None of these are retryable:
/// retrying the same request against the same state fails the same way.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AdmissionError {
    #[error(transparent)]
    InvalidId(#[from] InvalidId),

    #[error(transparent)]
    InvalidResource(#[from] InvalidResource),

    #[error("no active mitigation named `{name}` on device `{device}`")]
    MissingMitigation {
        device: DeviceName,
        name: MitigationName,
    },

    #[error(
        "version mismatch for `{name}`: request carries {got}, active record requires {expected}"
    )]
    VersionMismatch {
        name: MitigationName,
        expected: i32,
        got: i32,
    },

    #[error("template mismatch for `{name}`: active record is {active}, request targets {requested}")]
    TemplateMismatch {
        name: MitigationName,
        active: MitigationTemplate,
        requested: MitigationTemplate,
    },

    #[error(transparent)]
    DuplicateDefinition(#[from] CoexistenceConflict),

    #[error("edit of `{name}` at version {version} is identical to the active definition")]
    StaleEdit { name: MitigationName, version: i32 },

    #[error("owner mismatch for mitigation {mitigation_id}: record owned by `{record_owner}`")]
    OwnerMismatch {
        mitigation_id: MitigationId,
        record_owner: OwnerArn,
    },

    #[error("mitigation {mitigation_id} is {state:?}, only Active records accept this operation")]
    InvalidStateTransition {
        mitigation_id: MitigationId,
        state: MitigationState,
    },

    #[error("no state record for mitigation {mitigation_id} despite a confirmed allocation")]
    MissingStateRecord { mitigation_id: MitigationId },

    #[error("no mitigation allocated to resource `{resource_id}`")]
    MissingAllocation { resource_id: ResourceId },

    #[error(
        "allocation ledger for resource `{resource_id}` points at {ledger_mitigation_id} but the \
         state record claims `{state_resource_id}`"
    )]
    AllocationMismatch {
        resource_id: ResourceId,
        ledger_mitigation_id: MitigationId,
        state_resource_id: ResourceId,
    },
}

/// Workflow-id range of a scope is exhausted. Fatal and non-retryable; this
/// is an operational alarm, not a client input error, so it lives outside
/// [`AdmissionError`].
#[derive(Debug, Error, Clone)]
#[error("workflow id capacity exhausted on device `{device}`: next id {next} exceeds scope max {max}")]
pub struct CapacityExhausted {
    pub device: DeviceName,
    pub next: WorkflowId,
    pub max: WorkflowId,
}
