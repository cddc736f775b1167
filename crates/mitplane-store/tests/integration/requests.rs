//! End-to-end admission behavior over the in-memory tables.

use mitplane_core::{
    AdmissionError, DefaultCoexistence, DeviceName, DeviceScope, INITIAL_VERSION,
    MitigationTemplate, RequestType,
};
use mitplane_store::{
    MemoryRequestTable, NoopMetrics, RequestStorageHandler, RequestTable, StoreError,
};

use crate::fixtures::{create, delete, edit, quick_limits, rollback};

fn handler<'a>(
    table: &'a MemoryRequestTable,
    validator: &'a DefaultCoexistence,
) -> RequestStorageHandler<'a, MemoryRequestTable> {
    RequestStorageHandler::new(table, validator, quick_limits(), &NoopMetrics)
}

fn router_device() -> DeviceName {
    DeviceName::new("router-border").unwrap()
}

#[test]
fn workflow_ids_grow_monotonically_and_are_never_reused() {
    let table = MemoryRequestTable::new();
    let validator = DefaultCoexistence::standard();
    let h = handler(&table, &validator);

    let a = h
        .store_request(&create(
            "limit-udp",
            MitigationTemplate::RouterRateLimit,
            r#"{"rate":500}"#,
        ))
        .unwrap();
    let b = h
        .store_request(&create(
            "count-udp",
            MitigationTemplate::RouterCountAction,
            r#"{"count":true}"#,
        ))
        .unwrap();
    let c = h
        .store_request(&delete(
            "limit-udp",
            MitigationTemplate::RouterRateLimit,
            r#"{"rate":500}"#,
            1,
        ))
        .unwrap();
    // The freed name comes back under a brand-new slot, never slot 1 again.
    let d = h
        .store_request(&create(
            "limit-udp",
            MitigationTemplate::RouterRateLimit,
            r#"{"rate":900}"#,
        ))
        .unwrap();

    let ids: Vec<i64> = [&a, &b, &c, &d]
        .iter()
        .map(|o| o.record.workflow_id.get())
        .collect();
    assert_eq!(ids, vec![2, 3, 4, 5]);
    assert_eq!(d.record.mitigation_version, INITIAL_VERSION);
}

#[test]
fn location_scope_allocates_from_its_own_range() {
    let table = MemoryRequestTable::new();
    let validator = DefaultCoexistence::standard();
    let outcome = handler(&table, &validator)
        .store_request(&create(
            "pop-shield",
            MitigationTemplate::BlackwatchPop,
            r#"{"pps":5}"#,
        ))
        .unwrap();
    assert_eq!(
        outcome.record.workflow_id,
        DeviceScope::Location.min_workflow_id().next()
    );
    assert_eq!(outcome.record.device_scope, DeviceScope::Location);
    assert_eq!(outcome.record.device_name.as_str(), "blackwatch-pop");
}

#[test]
fn version_ladder_walks_create_edit_rollback_delete() {
    let table = MemoryRequestTable::new();
    let validator = DefaultCoexistence::standard();
    let h = handler(&table, &validator);

    let created = h
        .store_request(&create(
            "m1",
            MitigationTemplate::RouterRateLimit,
            r#"{"rate":500}"#,
        ))
        .unwrap();
    assert_eq!(created.record.mitigation_version, 1);

    let edited = h
        .store_request(&edit(
            "m1",
            MitigationTemplate::RouterRateLimit,
            r#"{"rate":900}"#,
            2,
        ))
        .unwrap();
    assert_eq!(edited.record.mitigation_version, 2);
    assert_eq!(edited.superseded, Some(created.record.workflow_id));

    let rolled = h
        .store_request(&rollback(
            "m1",
            MitigationTemplate::RouterRateLimit,
            r#"{"rate":500}"#,
            3,
        ))
        .unwrap();
    assert_eq!(rolled.record.mitigation_version, 3);

    let deleted = h
        .store_request(&delete(
            "m1",
            MitigationTemplate::RouterRateLimit,
            r#"{"rate":500}"#,
            3,
        ))
        .unwrap();
    assert_eq!(deleted.record.mitigation_version, 4);
    assert_eq!(deleted.record.request_type, RequestType::Delete);

    // Exactly one active record remains for the name, and it is the Delete.
    let active: Vec<_> = table
        .device_records(&router_device())
        .into_iter()
        .filter(|r| r.is_active())
        .collect();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].workflow_id, deleted.record.workflow_id);
}

#[test]
fn supersede_chain_links_every_predecessor() {
    let table = MemoryRequestTable::new();
    let validator = DefaultCoexistence::standard();
    let h = handler(&table, &validator);
    h.store_request(&create(
        "m1",
        MitigationTemplate::RouterRateLimit,
        r#"{"rate":1}"#,
    ))
    .unwrap();
    h.store_request(&edit(
        "m1",
        MitigationTemplate::RouterRateLimit,
        r#"{"rate":2}"#,
        2,
    ))
    .unwrap();
    h.store_request(&edit(
        "m1",
        MitigationTemplate::RouterRateLimit,
        r#"{"rate":3}"#,
        3,
    ))
    .unwrap();

    let records = table.device_records(&router_device());
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].update_workflow_id, Some(records[1].workflow_id));
    assert_eq!(records[1].update_workflow_id, Some(records[2].workflow_id));
    assert_eq!(records[2].update_workflow_id, None);
}

#[test]
fn duplicate_create_is_idempotently_refused() {
    let table = MemoryRequestTable::new();
    let validator = DefaultCoexistence::standard();
    let h = handler(&table, &validator);
    h.store_request(&create(
        "m1",
        MitigationTemplate::RouterRateLimit,
        r#"{"rate":500,"proto":"udp"}"#,
    ))
    .unwrap();

    // Re-ordered keys, extra whitespace: still the same canonical definition.
    for raw in [
        r#"{"proto":"udp","rate":500}"#,
        r#"{ "rate": 500, "proto": "udp" }"#,
    ] {
        let err = h
            .store_request(&create("m1", MitigationTemplate::RouterRateLimit, raw))
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Admission(AdmissionError::DuplicateDefinition(_))
        ));
    }
    // No second record was written.
    assert_eq!(table.device_records(&router_device()).len(), 1);
}

#[test]
fn coexistence_listed_pair_lands_both() {
    let table = MemoryRequestTable::new();
    let validator = DefaultCoexistence::standard();
    let h = handler(&table, &validator);
    h.store_request(&create(
        "limit-udp",
        MitigationTemplate::RouterRateLimit,
        r#"{"rate":500}"#,
    ))
    .unwrap();
    // Blackhole coexists with rate-limit; a second rate-limit does not.
    h.store_request(&create(
        "hole-udp",
        MitigationTemplate::RouterBlackhole,
        r#"{"next_hop":"discard"}"#,
    ))
    .unwrap();
    let err = h
        .store_request(&create(
            "limit-tcp",
            MitigationTemplate::RouterRateLimit,
            r#"{"rate":900}"#,
        ))
        .unwrap_err();
    assert!(matches!(
        err,
        StoreError::Admission(AdmissionError::DuplicateDefinition(_))
    ));
}

#[test]
fn scope_capacity_exhaustion_is_fatal_and_precedes_the_write() {
    let table = MemoryRequestTable::new();
    let validator = DefaultCoexistence::standard();
    let h = handler(&table, &validator);

    // Occupy the last allocatable Global slot (one below the ceiling)
    // directly.
    let seeded = h
        .store_request(&create(
            "count-udp",
            MitigationTemplate::RouterCountAction,
            r#"{"count":true}"#,
        ))
        .unwrap();
    let mut last = seeded.record.clone();
    last.workflow_id =
        mitplane_core::WorkflowId::new(DeviceScope::Global.max_workflow_id().get() - 1);
    last.mitigation_name = mitplane_core::MitigationName::new("count-tcp").unwrap();
    table.put_new_request(&last).unwrap();
    let writes_before = table.counters.writes();

    let err = h
        .store_request(&create(
            "limit-udp",
            MitigationTemplate::RouterRateLimit,
            r#"{"rate":500}"#,
        ))
        .unwrap_err();
    assert!(matches!(err, StoreError::Capacity(_)));
    assert!(!err.is_retryable());
    assert_eq!(table.counters.writes(), writes_before);
}
