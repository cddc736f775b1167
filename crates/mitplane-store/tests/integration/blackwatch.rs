//! Resource-scoped mitigation lifecycle against the in-memory state tables.

use mitplane_core::{
    ActionMetadata, AdmissionError, MitigationState, ResourceId, ResourceType,
};
use mitplane_store::{
    MemoryStateTable, MitigationStateStore, NoopMetrics, StateTable, StoreError,
};

use crate::fixtures::{apply, owner, quick_limits};

fn store(table: &MemoryStateTable) -> MitigationStateStore<'_, MemoryStateTable> {
    MitigationStateStore::new(table, quick_limits(), &NoopMetrics)
}

#[test]
fn apply_then_reapply_updates_in_place() {
    let table = MemoryStateTable::new();
    let own = owner("ops");
    let s = store(&table);

    let first = s.apply_mitigation(&apply("1.2.3.4", &own, 5, 5)).unwrap();
    assert!(first.created);
    assert_eq!(first.record.pps_rate, 5);
    assert_eq!(first.record.bps_rate, 5);
    assert_eq!(first.record.minutes_to_live, 30);
    assert_eq!(first.record.version_number, 1);

    let resource = ResourceId::new("1.2.3.4").unwrap();
    let allocation = table.get_allocation(&resource).unwrap().unwrap();
    assert!(allocation.confirmed);
    assert_eq!(allocation.resource_type, ResourceType::IpAddress);

    let second = s.apply_mitigation(&apply("1.2.3.4", &own, 10, 10)).unwrap();
    assert!(!second.created);
    assert_eq!(second.record.mitigation_id, first.record.mitigation_id);
    assert_eq!(second.record.pps_rate, 10);
    assert_eq!(second.record.bps_rate, 10);
    assert_eq!(second.record.version_number, 2);

    // The ledger still points at the one mitigation.
    let allocation = table.get_allocation(&resource).unwrap().unwrap();
    assert_eq!(allocation.mitigation_id, first.record.mitigation_id);
}

#[test]
fn full_lifecycle_ends_in_to_delete_not_absence() {
    let table = MemoryStateTable::new();
    let own = owner("ops");
    let s = store(&table);
    let created = s.apply_mitigation(&apply("1.2.3.4", &own, 5, 5)).unwrap();

    let resource = ResourceId::new("1.2.3.4").unwrap();
    let deactivated = s
        .deactivate_mitigation(&resource, &own, ActionMetadata::default())
        .unwrap();
    assert_eq!(deactivated.state, MitigationState::ToDelete);
    assert_eq!(deactivated.version_number, 2);

    let stored = table
        .get_state(&created.record.mitigation_id)
        .unwrap()
        .expect("record survives deactivation");
    assert_eq!(stored.state, MitigationState::ToDelete);
}

#[test]
fn ipv6_list_with_equivalent_spellings_is_refused() {
    let table = MemoryStateTable::new();
    let own = owner("ops");
    let mut request = apply("edge-list-1", &own, 5, 5);
    request.resource_type = ResourceType::IpAddressList;
    request.settings = r#"{"addresses":["2001:0db8::1","2001:db8:0:0:0:0:0:1"]}"#.into();

    let err = store(&table).apply_mitigation(&request).unwrap_err();
    assert!(matches!(
        err,
        StoreError::Admission(AdmissionError::InvalidResource(_))
    ));
    assert_eq!(table.counters.writes(), 0);
}

#[test]
fn ipv6_list_with_distinct_addresses_is_admitted() {
    let table = MemoryStateTable::new();
    let own = owner("ops");
    let mut request = apply("edge-list-2", &own, 5, 5);
    request.resource_type = ResourceType::IpAddressList;
    request.settings = r#"{"addresses":["2001:db8::1","2001:db8::2","10.0.0.1"]}"#.into();

    let outcome = store(&table).apply_mitigation(&request).unwrap();
    assert!(outcome.created);
    assert_eq!(outcome.record.resource_type, ResourceType::IpAddressList);
}

#[test]
fn owner_gate_holds_across_the_whole_lifecycle() {
    let table = MemoryStateTable::new();
    let own = owner("ops");
    let intruder = owner("intruder");
    let s = store(&table);
    s.apply_mitigation(&apply("1.2.3.4", &own, 5, 5)).unwrap();

    let resource = ResourceId::new("1.2.3.4").unwrap();
    for result in [
        s.apply_mitigation(&apply("1.2.3.4", &intruder, 9, 9))
            .map(|_| ()),
        s.deactivate_mitigation(&resource, &intruder, ActionMetadata::default())
            .map(|_| ()),
        s.change_owner(
            &resource,
            &intruder,
            owner("somewhere-else"),
            ActionMetadata::default(),
        )
        .map(|_| ()),
    ] {
        assert!(matches!(
            result,
            Err(StoreError::Admission(AdmissionError::OwnerMismatch { .. }))
        ));
    }
}
