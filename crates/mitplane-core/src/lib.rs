//! Core domain types for the mitigation control plane storage layer.
//!
//! Module hierarchy follows type dependency order:
//! - identity: DeviceName, MitigationName, WorkflowId and friends (Layer 1)
//! - scope: DeviceScope workflow-id ranges (Layer 2)
//! - template: MitigationTemplate and device placement (Layer 2)
//! - definition: canonical-JSON mitigation definitions and their hash (Layer 3)
//! - request: MitigationRequestRecord and action metadata (Layer 4)
//! - duplicate: duplicate/coexistence classification (Layer 5)
//! - resource: resource-scoped mitigation state and the allocation ledger (Layer 5)
//! - error: admission error taxonomy
//! - limits: retry/backoff budgets

#![forbid(unsafe_code)]

pub mod definition;
pub mod duplicate;
pub mod error;
pub mod identity;
pub mod limits;
pub mod request;
pub mod resource;
pub mod scope;
pub mod template;

pub use definition::{DefinitionError, DefinitionHash, MitigationDefinition};
pub use duplicate::{
    CoexistenceConflict, CoexistenceConflictBox, CoexistenceValidator, DefaultCoexistence,
    DefinitionRef, DuplicateClassification, DuplicateDetector,
};
pub use error::{AdmissionError, CapacityExhausted, InvalidId, InvalidResource};
pub use identity::{
    DeviceName, MitigationId, MitigationName, OwnerArn, ResourceId, ServiceName, WorkflowId,
};
pub use limits::RetryLimits;
pub use request::{
    ActionMetadata, INITIAL_VERSION, MitigationRequestRecord, RequestType, WorkflowStatus,
};
pub use resource::{
    MitigationSettings, MitigationState, MitigationStateRecord, RateLimits,
    ResourceAllocationStateRecord, ResourceType, validate_resource,
};
pub use scope::DeviceScope;
pub use template::{DevicePlacement, MitigationTemplate};
