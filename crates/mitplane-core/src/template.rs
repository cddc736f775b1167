//! Layer 2: Mitigation templates
//!
//! A template names the kind of mitigation a definition describes and pins
//! the device (and scope within that device) the resulting workflow targets.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::identity::DeviceName;
use crate::scope::DeviceScope;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MitigationTemplate {
    RouterRateLimit,
    RouterBlackhole,
    RouterCountAction,
    BlackwatchBorder,
    BlackwatchPop,
}

/// Where a template's workflows land: the device partition plus the scope
/// that owns the workflow-id range.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DevicePlacement {
    pub device: DeviceName,
    pub scope: DeviceScope,
}

impl MitigationTemplate {
    pub fn device_placement(&self) -> DevicePlacement {
        let (device, scope) = match self {
            MitigationTemplate::RouterRateLimit => ("router-border", DeviceScope::Global),
            MitigationTemplate::RouterBlackhole => ("router-border", DeviceScope::Global),
            MitigationTemplate::RouterCountAction => ("router-border", DeviceScope::Global),
            MitigationTemplate::BlackwatchBorder => ("blackwatch-border", DeviceScope::Global),
            MitigationTemplate::BlackwatchPop => ("blackwatch-pop", DeviceScope::Location),
        };
        DevicePlacement {
            device: DeviceName::from_static(device),
            scope,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MitigationTemplate::RouterRateLimit => "router_rate_limit",
            MitigationTemplate::RouterBlackhole => "router_blackhole",
            MitigationTemplate::RouterCountAction => "router_count_action",
            MitigationTemplate::BlackwatchBorder => "blackwatch_border",
            MitigationTemplate::BlackwatchPop => "blackwatch_pop",
        }
    }
}

impl fmt::Display for MitigationTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
