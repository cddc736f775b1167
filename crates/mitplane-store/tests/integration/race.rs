//! Concurrency races over the shared table.
//!
//! The memory table counts every write and every conditional-check failure,
//! so these tests can assert the engine's attempt accounting: each write the
//! engine issued either landed a record, stamped a supersede pointer, or
//! bounced off a condition.

use std::thread;

use mitplane_core::{
    AdmissionError, CoexistenceConflict, CoexistenceValidator, DefaultCoexistence, DefinitionRef,
    DeviceName, MitigationTemplate,
};
use mitplane_store::{MemoryRequestTable, NoopMetrics, RequestStorageHandler, StoreError};

use crate::fixtures::{create, edit, quick_limits};

/// Validator that lets every pair coexist, so create races exercise the
/// allocator instead of admission policy.
struct AllowAll;

impl CoexistenceValidator for AllowAll {
    fn validate_coexistence(
        &self,
        _existing: DefinitionRef<'_>,
        _candidate: DefinitionRef<'_>,
    ) -> Result<(), CoexistenceConflict> {
        Ok(())
    }
}

fn router_device() -> DeviceName {
    DeviceName::new("router-border").unwrap()
}

fn assert_write_accounting(table: &MemoryRequestTable) {
    let records = table.device_records(&router_device());
    let stamped = records
        .iter()
        .filter(|r| r.update_workflow_id.is_some())
        .count() as u64;
    assert_eq!(
        table.counters.writes(),
        table.counters.condition_failures() + records.len() as u64 + stamped,
        "every write landed a record, stamped a pointer, or failed its condition"
    );
}

#[test]
fn concurrent_creates_get_distinct_contiguous_slots() {
    let table = MemoryRequestTable::new();
    let validator = AllowAll;
    const WRITERS: usize = 4;
    const PER_WRITER: usize = 3;

    // Every lost round implies some other writer landed a record, so a
    // budget of total-writes rounds can never exhaust.
    let limits = mitplane_core::RetryLimits {
        max_allocation_attempts: (WRITERS * PER_WRITER) as u32,
        ..quick_limits()
    };

    thread::scope(|scope| {
        for w in 0..WRITERS {
            let table = &table;
            let validator = &validator;
            let limits = limits.clone();
            scope.spawn(move || {
                let handler =
                    RequestStorageHandler::new(table, validator, limits, &NoopMetrics);
                for i in 0..PER_WRITER {
                    let request = create(
                        &format!("m-{w}-{i}"),
                        MitigationTemplate::RouterRateLimit,
                        &format!(r#"{{"rate":{}}}"#, w * 100 + i),
                    );
                    handler.store_request(&request).unwrap();
                }
            });
        }
    });

    let mut ids: Vec<i64> = table
        .device_records(&router_device())
        .iter()
        .map(|r| r.workflow_id.get())
        .collect();
    ids.sort_unstable();
    let expected: Vec<i64> = (2..=(WRITERS * PER_WRITER + 1) as i64).collect();
    assert_eq!(ids, expected, "no gaps, no reuse");
    assert_write_accounting(&table);
}

#[test]
fn concurrent_edits_of_different_names_both_land_in_order() {
    let table = MemoryRequestTable::new();
    let validator = DefaultCoexistence::standard();
    let handler =
        RequestStorageHandler::new(&table, &validator, quick_limits(), &NoopMetrics);
    handler
        .store_request(&create(
            "limit-udp",
            MitigationTemplate::RouterRateLimit,
            r#"{"rate":500}"#,
        ))
        .unwrap();
    handler
        .store_request(&create(
            "hole-udp",
            MitigationTemplate::RouterBlackhole,
            r#"{"next_hop":"discard"}"#,
        ))
        .unwrap();

    let outcomes: Vec<_> = thread::scope(|scope| {
        let edits = [
            ("limit-udp", MitigationTemplate::RouterRateLimit, r#"{"rate":900}"#),
            (
                "hole-udp",
                MitigationTemplate::RouterBlackhole,
                r#"{"next_hop":"sinkhole"}"#,
            ),
        ];
        let handles: Vec<_> = edits
            .into_iter()
            .map(|(name, template, body)| {
                let table = &table;
                let validator = &validator;
                scope.spawn(move || {
                    let handler = RequestStorageHandler::new(
                        table,
                        validator,
                        quick_limits(),
                        &NoopMetrics,
                    );
                    handler.store_request(&edit(name, template, body, 2))
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let mut ids = Vec::new();
    for outcome in outcomes {
        let outcome = outcome.expect("both edits admit");
        assert_eq!(outcome.record.mitigation_version, 2);
        ids.push(outcome.record.workflow_id.get());
    }
    ids.sort_unstable();
    assert_eq!(ids, vec![4, 5]);
    assert_write_accounting(&table);
}

#[test]
fn concurrent_edits_of_one_name_admit_exactly_one() {
    let table = MemoryRequestTable::new();
    let validator = DefaultCoexistence::standard();
    let handler =
        RequestStorageHandler::new(&table, &validator, quick_limits(), &NoopMetrics);
    handler
        .store_request(&create(
            "m1",
            MitigationTemplate::RouterRateLimit,
            r#"{"rate":500}"#,
        ))
        .unwrap();

    let outcomes: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (0..2)
            .map(|i| {
                let table = &table;
                let validator = &validator;
                scope.spawn(move || {
                    let handler = RequestStorageHandler::new(
                        table,
                        validator,
                        quick_limits(),
                        &NoopMetrics,
                    );
                    handler.store_request(&edit(
                        "m1",
                        MitigationTemplate::RouterRateLimit,
                        &format!(r#"{{"rate":{}}}"#, 900 + i),
                        2,
                    ))
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let winners = outcomes.iter().filter(|o| o.is_ok()).count();
    assert_eq!(winners, 1, "exactly one edit takes version 2");
    for outcome in &outcomes {
        if let Err(err) = outcome {
            assert!(
                matches!(
                    err,
                    StoreError::Admission(
                        AdmissionError::VersionMismatch { .. } | AdmissionError::StaleEdit { .. }
                    )
                ),
                "loser is refused by admission, got {err:?}"
            );
        }
    }

    let records = table.device_records(&router_device());
    assert_eq!(records.len(), 2);
    let active: Vec<_> = records.iter().filter(|r| r.is_active()).collect();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].mitigation_version, 2);
    assert_write_accounting(&table);
}
