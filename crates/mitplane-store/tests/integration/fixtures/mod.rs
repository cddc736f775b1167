//! Shared builders for the integration suite.

use mitplane_core::{
    MitigationDefinition, MitigationName, MitigationTemplate, OwnerArn, ResourceId, ResourceType,
    RetryLimits, ServiceName,
};
use mitplane_store::{ApplyMitigationRequest, MitigationRequest};

/// Millisecond-scale backoff so fault-injection tests stay fast.
pub fn quick_limits() -> RetryLimits {
    RetryLimits {
        backoff_base_ms: 1,
        backoff_max_ms: 1,
        ..RetryLimits::default()
    }
}

pub fn name(s: &str) -> MitigationName {
    MitigationName::new(s).expect("mitigation name")
}

pub fn service() -> ServiceName {
    ServiceName::new("edge-protect").expect("service name")
}

pub fn definition(body: &str) -> MitigationDefinition {
    MitigationDefinition::parse(body).expect("definition")
}

pub fn create(n: &str, template: MitigationTemplate, body: &str) -> MitigationRequest {
    MitigationRequest::create(name(n), template, service(), definition(body))
}

pub fn edit(
    n: &str,
    template: MitigationTemplate,
    body: &str,
    version: i32,
) -> MitigationRequest {
    MitigationRequest::edit(name(n), template, service(), definition(body), version)
}

pub fn delete(
    n: &str,
    template: MitigationTemplate,
    body: &str,
    version: i32,
) -> MitigationRequest {
    MitigationRequest::delete(name(n), template, service(), definition(body), version)
}

pub fn rollback(
    n: &str,
    template: MitigationTemplate,
    body: &str,
    version: i32,
) -> MitigationRequest {
    MitigationRequest::rollback(name(n), template, service(), definition(body), version)
}

pub fn owner(suffix: &str) -> OwnerArn {
    OwnerArn::new(format!("arn:aws:iam::123456789012:role/{suffix}")).expect("owner arn")
}

pub fn apply(resource: &str, own: &OwnerArn, pps: u64, bps: u64) -> ApplyMitigationRequest {
    ApplyMitigationRequest {
        resource_id: ResourceId::new(resource).expect("resource id"),
        resource_type: ResourceType::IpAddress,
        owner_arn: own.clone(),
        pps_rate: pps,
        bps_rate: bps,
        minutes_to_live: 30,
        settings: r#"{"mode":"auto"}"#.into(),
        location_settings: Default::default(),
        action_metadata: Default::default(),
    }
}
