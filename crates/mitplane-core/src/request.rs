//! Layer 4: Request records
//!
//! One `MitigationRequestRecord` per (device, workflow id). Records are
//! immutable once written except for the supersede pointer: when a later
//! Edit/Delete/Rollback lands, the previous representative's
//! `update_workflow_id` is stamped with the superseding id. A record with the
//! pointer unset is the active representative of its mitigation name.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::definition::{DefinitionHash, MitigationDefinition};
use crate::identity::{DeviceName, MitigationName, ServiceName, WorkflowId};
use crate::scope::DeviceScope;
use crate::template::MitigationTemplate;

/// Version a Create always persists. The Edit ladder starts one above.
pub const INITIAL_VERSION: i32 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    Create,
    Edit,
    Delete,
    Rollback,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Scheduled,
    Running,
    Succeeded,
    Failed,
    Aborted,
}

/// Who asked for the change and why. Opaque to this layer.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionMetadata {
    pub user: String,
    pub tool: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_tickets: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MitigationRequestRecord {
    pub device_name: DeviceName,
    pub device_scope: DeviceScope,
    pub workflow_id: WorkflowId,
    pub request_type: RequestType,
    pub mitigation_name: MitigationName,
    pub mitigation_template: MitigationTemplate,
    pub service_name: ServiceName,
    pub definition: MitigationDefinition,
    pub definition_hash: DefinitionHash,
    pub mitigation_version: i32,
    pub workflow_status: WorkflowStatus,
    pub abort_flag: bool,
    /// None while this record is the current representative of its
    /// mitigation name; the superseding workflow id afterwards.
    pub update_workflow_id: Option<WorkflowId>,
    pub locations: BTreeSet<String>,
    pub request_date_ms: u64,
    pub action_metadata: ActionMetadata,
}

impl MitigationRequestRecord {
    pub fn is_active(&self) -> bool {
        self.update_workflow_id.is_none()
    }

    /// An active Delete record marks the name as deleted: the record still
    /// holds its workflow-id slot but the mitigation no longer exists for
    /// Edit/Delete/Rollback purposes.
    pub fn is_live_mitigation(&self) -> bool {
        self.is_active() && self.request_type != RequestType::Delete
    }
}
