//! Layer 2: Device scopes
//!
//! A scope is a named partition of a device's workflow-id space. Each scope
//! owns a closed numeric range; ranges of distinct scopes never overlap, so a
//! record's scope can always be recovered from its workflow id alone.

use serde::{Deserialize, Serialize};

use crate::identity::WorkflowId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceScope {
    /// Device-wide mitigations.
    Global,
    /// Mitigations scoped to a single location / POP.
    Location,
}

impl DeviceScope {
    pub fn min_workflow_id(&self) -> WorkflowId {
        match self {
            DeviceScope::Global => WorkflowId::new(1),
            DeviceScope::Location => WorkflowId::new(10_000_001),
        }
    }

    pub fn max_workflow_id(&self) -> WorkflowId {
        match self {
            DeviceScope::Global => WorkflowId::new(10_000_000),
            DeviceScope::Location => WorkflowId::new(20_000_000),
        }
    }

    pub fn contains(&self, id: WorkflowId) -> bool {
        id >= self.min_workflow_id() && id <= self.max_workflow_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_ranges_are_disjoint() {
        assert!(DeviceScope::Global.max_workflow_id() < DeviceScope::Location.min_workflow_id());
    }

    #[test]
    fn contains_respects_closed_bounds() {
        let scope = DeviceScope::Global;
        assert!(scope.contains(scope.min_workflow_id()));
        assert!(scope.contains(scope.max_workflow_id()));
        assert!(!scope.contains(scope.max_workflow_id().next()));
        assert!(!scope.contains(WorkflowId::new(0)));
    }
}
