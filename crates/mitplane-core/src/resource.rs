//! Layer 5: Resource-scoped mitigation state (BlackWatch path)
//!
//! State records are keyed by mitigation id and mutated only through
//! version-checked conditional updates. The allocation ledger maps each
//! protected resource to the single mitigation currently claiming it.

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::definition::DefinitionError;
use crate::error::InvalidResource;
use crate::identity::{MitigationId, OwnerArn, ResourceId};
use crate::request::ActionMetadata;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    IpAddress,
    IpAddressList,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MitigationState {
    Active,
    /// Deletion is a state transition, never a physical delete at this layer.
    ToDelete,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimits {
    pub pps: u64,
    pub bps: u64,
}

/// Mitigation settings document plus its content checksum. Canonicalized on
/// construction like request definitions so the checksum is stable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MitigationSettings {
    json: String,
    checksum: String,
}

impl MitigationSettings {
    pub fn new(raw: &str) -> Result<Self, DefinitionError> {
        let definition = crate::definition::MitigationDefinition::parse(raw)?;
        let json = definition.as_str().to_string();
        let checksum = hex_digest(json.as_bytes());
        Ok(Self { json, checksum })
    }

    pub fn as_str(&self) -> &str {
        &self.json
    }

    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    /// Addresses listed in the settings `addresses` array, raw strings as
    /// the caller wrote them. Empty when the key is absent.
    pub fn addresses(&self) -> Vec<String> {
        let value: serde_json::Value = match serde_json::from_str(&self.json) {
            Ok(v) => v,
            Err(_) => return Vec::new(),
        };
        match value.get("addresses").and_then(|a| a.as_array()) {
            Some(items) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            None => Vec::new(),
        }
    }
}

fn hex_digest(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MitigationStateRecord {
    pub mitigation_id: MitigationId,
    pub resource_id: ResourceId,
    pub resource_type: ResourceType,
    pub state: MitigationState,
    pub owner_arn: OwnerArn,
    pub pps_rate: u64,
    pub bps_rate: u64,
    pub minutes_to_live: u32,
    pub change_time_ms: u64,
    /// Optimistic-lock token; every successful conditional update bumps it
    /// by exactly one.
    pub version_number: u64,
    pub settings: MitigationSettings,
    pub recorded_resources: BTreeMap<ResourceType, BTreeSet<ResourceId>>,
    pub location_settings: BTreeMap<String, String>,
    pub latest_action: ActionMetadata,
}

/// One row per resource: the single live mitigation claiming it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceAllocationStateRecord {
    pub resource_id: ResourceId,
    pub resource_type: ResourceType,
    pub mitigation_id: MitigationId,
    pub confirmed: bool,
}

/// Per-type syntax validation of the resource and its settings payload.
///
/// IP-list settings are rejected when they contain duplicate addresses,
/// including textual variants of the same IPv6 address: comparison happens on
/// parsed [`IpAddr`] values, so `2001:0db8::1` and `2001:db8:0:0:0:0:0:1`
/// collide.
pub fn validate_resource(
    resource_type: ResourceType,
    resource_id: &ResourceId,
    settings: &MitigationSettings,
) -> Result<(), InvalidResource> {
    match resource_type {
        ResourceType::IpAddress => {
            parse_ip(resource_id.as_str(), resource_id)?;
            Ok(())
        }
        ResourceType::IpAddressList => {
            let addresses = settings.addresses();
            if addresses.is_empty() {
                return Err(InvalidResource {
                    resource_id: resource_id.to_string(),
                    reason: "ip list settings carry no addresses".into(),
                });
            }
            let mut seen: BTreeSet<IpAddr> = BTreeSet::new();
            for raw in &addresses {
                let addr = parse_ip(raw, resource_id)?;
                if !seen.insert(addr) {
                    return Err(InvalidResource {
                        resource_id: resource_id.to_string(),
                        reason: format!("duplicate address `{raw}` (canonical {addr})"),
                    });
                }
            }
            Ok(())
        }
    }
}

fn parse_ip(raw: &str, resource_id: &ResourceId) -> Result<IpAddr, InvalidResource> {
    raw.parse::<IpAddr>().map_err(|_| InvalidResource {
        resource_id: resource_id.to_string(),
        reason: format!("`{raw}` is not an IP address"),
    })
}
