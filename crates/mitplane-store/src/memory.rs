//! In-memory reference implementation of the backing tables.
//!
//! Used by tests and local tooling. Fault injection mimics the two failure
//! classes real stores exhibit: transient unavailability and conditional
//! check failures. Counters expose how many attempts the engine actually
//! made, which the contention-accounting tests assert on.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use mitplane_core::{
    DeviceName, MitigationId, MitigationRequestRecord, MitigationStateRecord,
    ResourceAllocationStateRecord, ResourceId, WorkflowId,
};

use crate::table::{ContinuationToken, RequestPage, RequestTable, StateTable, TableError};

/// Pending injected failures. Each counter burns down one per matching call.
#[derive(Debug, Default)]
pub struct FaultPlan {
    /// Next N queries return `Unavailable`.
    pub fail_queries: AtomicU32,
    /// Next N writes return `Unavailable`.
    pub fail_writes: AtomicU32,
    /// Next N supersede-pointer writes return `Unavailable`. Separate from
    /// `fail_writes` so a test can fail the stamp without touching the
    /// record insert that precedes it.
    pub fail_supersedes: AtomicU32,
    /// Next N conditional inserts return `ConditionFailed` without writing,
    /// as if a racing writer had just taken the slot.
    pub force_write_conflicts: AtomicU32,
}

impl FaultPlan {
    fn take(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[derive(Debug, Default)]
pub struct TableCounters {
    pub queries: AtomicU64,
    pub writes: AtomicU64,
    pub condition_failures: AtomicU64,
}

impl TableCounters {
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn condition_failures(&self) -> u64 {
        self.condition_failures.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> u64 {
        self.queries.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct MemoryRequestTable {
    rows: Mutex<BTreeMap<(DeviceName, WorkflowId), MitigationRequestRecord>>,
    pub faults: FaultPlan,
    pub counters: TableCounters,
}

impl MemoryRequestTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every record for a device, ascending by workflow id.
    pub fn device_records(&self, device: &DeviceName) -> Vec<MitigationRequestRecord> {
        let rows = self.rows.lock().expect("request table lock");
        rows.iter()
            .filter(|((d, _), _)| d == device)
            .map(|(_, r)| r.clone())
            .collect()
    }

    fn condition_failed(&self, key: String) -> TableError {
        self.counters
            .condition_failures
            .fetch_add(1, Ordering::SeqCst);
        TableError::ConditionFailed { key }
    }
}

impl RequestTable for MemoryRequestTable {
    fn query_device_requests(
        &self,
        device: &DeviceName,
        after: Option<WorkflowId>,
        page_size: usize,
        token: Option<ContinuationToken>,
    ) -> Result<RequestPage, TableError> {
        self.counters.queries.fetch_add(1, Ordering::SeqCst);
        if FaultPlan::take(&self.faults.fail_queries) {
            return Err(TableError::Unavailable {
                reason: "injected query fault".into(),
            });
        }

        let lower = match (after, token) {
            (Some(a), Some(t)) => Some(a.max(t.last_workflow_id)),
            (Some(a), None) => Some(a),
            (None, Some(t)) => Some(t.last_workflow_id),
            (None, None) => None,
        };

        let rows = self.rows.lock().expect("request table lock");
        let mut records: Vec<MitigationRequestRecord> = Vec::new();
        let mut more = false;
        for ((d, id), record) in rows.iter() {
            if d != device {
                continue;
            }
            if let Some(bound) = lower
                && *id <= bound
            {
                continue;
            }
            if records.len() == page_size {
                more = true;
                break;
            }
            records.push(record.clone());
        }

        let next = if more {
            records.last().map(|r| ContinuationToken {
                last_workflow_id: r.workflow_id,
            })
        } else {
            None
        };
        Ok(RequestPage { records, next })
    }

    fn get_request(
        &self,
        device: &DeviceName,
        workflow_id: WorkflowId,
    ) -> Result<Option<MitigationRequestRecord>, TableError> {
        let rows = self.rows.lock().expect("request table lock");
        Ok(rows.get(&(device.clone(), workflow_id)).cloned())
    }

    fn put_new_request(&self, record: &MitigationRequestRecord) -> Result<(), TableError> {
        self.counters.writes.fetch_add(1, Ordering::SeqCst);
        let key = (record.device_name.clone(), record.workflow_id);
        if FaultPlan::take(&self.faults.force_write_conflicts) {
            return Err(self.condition_failed(format!("{}/{}", key.0, key.1)));
        }
        if FaultPlan::take(&self.faults.fail_writes) {
            return Err(TableError::Unavailable {
                reason: "injected write fault".into(),
            });
        }
        let mut rows = self.rows.lock().expect("request table lock");
        if rows.contains_key(&key) {
            return Err(self.condition_failed(format!("{}/{}", key.0, key.1)));
        }
        rows.insert(key, record.clone());
        Ok(())
    }

    fn mark_superseded(
        &self,
        device: &DeviceName,
        workflow_id: WorkflowId,
        superseded_by: WorkflowId,
    ) -> Result<(), TableError> {
        self.counters.writes.fetch_add(1, Ordering::SeqCst);
        if FaultPlan::take(&self.faults.fail_supersedes) {
            return Err(TableError::Unavailable {
                reason: "injected write fault".into(),
            });
        }
        let mut rows = self.rows.lock().expect("request table lock");
        let key = (device.clone(), workflow_id);
        match rows.get_mut(&key) {
            Some(record) if record.update_workflow_id.is_none() => {
                record.update_workflow_id = Some(superseded_by);
                Ok(())
            }
            Some(_) => Err(self.condition_failed(format!("{device}/{workflow_id}"))),
            None => Err(self.condition_failed(format!("{device}/{workflow_id}"))),
        }
    }
}

#[derive(Default)]
pub struct MemoryStateTable {
    allocations: Mutex<BTreeMap<ResourceId, ResourceAllocationStateRecord>>,
    states: Mutex<BTreeMap<MitigationId, MitigationStateRecord>>,
    pub faults: FaultPlan,
    pub counters: TableCounters,
}

impl MemoryStateTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn condition_failed(&self, key: String) -> TableError {
        self.counters
            .condition_failures
            .fetch_add(1, Ordering::SeqCst);
        TableError::ConditionFailed { key }
    }

    fn check_write_fault(&self) -> Result<(), TableError> {
        self.counters.writes.fetch_add(1, Ordering::SeqCst);
        if FaultPlan::take(&self.faults.fail_writes) {
            return Err(TableError::Unavailable {
                reason: "injected write fault".into(),
            });
        }
        Ok(())
    }
}

impl StateTable for MemoryStateTable {
    fn get_allocation(
        &self,
        resource: &ResourceId,
    ) -> Result<Option<ResourceAllocationStateRecord>, TableError> {
        self.counters.queries.fetch_add(1, Ordering::SeqCst);
        if FaultPlan::take(&self.faults.fail_queries) {
            return Err(TableError::Unavailable {
                reason: "injected query fault".into(),
            });
        }
        let allocations = self.allocations.lock().expect("allocation ledger lock");
        Ok(allocations.get(resource).cloned())
    }

    fn put_new_allocation(
        &self,
        record: &ResourceAllocationStateRecord,
    ) -> Result<(), TableError> {
        self.check_write_fault()?;
        if FaultPlan::take(&self.faults.force_write_conflicts) {
            return Err(self.condition_failed(record.resource_id.to_string()));
        }
        let mut allocations = self.allocations.lock().expect("allocation ledger lock");
        if allocations.contains_key(&record.resource_id) {
            return Err(self.condition_failed(record.resource_id.to_string()));
        }
        allocations.insert(record.resource_id.clone(), record.clone());
        Ok(())
    }

    fn confirm_allocation(
        &self,
        resource: &ResourceId,
        mitigation: &MitigationId,
    ) -> Result<(), TableError> {
        self.check_write_fault()?;
        let mut allocations = self.allocations.lock().expect("allocation ledger lock");
        match allocations.get_mut(resource) {
            Some(row) if row.mitigation_id == *mitigation && !row.confirmed => {
                row.confirmed = true;
                Ok(())
            }
            _ => Err(self.condition_failed(resource.to_string())),
        }
    }

    fn get_state(
        &self,
        mitigation: &MitigationId,
    ) -> Result<Option<MitigationStateRecord>, TableError> {
        self.counters.queries.fetch_add(1, Ordering::SeqCst);
        if FaultPlan::take(&self.faults.fail_queries) {
            return Err(TableError::Unavailable {
                reason: "injected query fault".into(),
            });
        }
        let states = self.states.lock().expect("state table lock");
        Ok(states.get(mitigation).cloned())
    }

    fn put_new_state(&self, record: &MitigationStateRecord) -> Result<(), TableError> {
        self.check_write_fault()?;
        let mut states = self.states.lock().expect("state table lock");
        if states.contains_key(&record.mitigation_id) {
            return Err(self.condition_failed(record.mitigation_id.to_string()));
        }
        states.insert(record.mitigation_id, record.clone());
        Ok(())
    }

    fn update_state(
        &self,
        record: &MitigationStateRecord,
        expected_version: u64,
    ) -> Result<(), TableError> {
        self.check_write_fault()?;
        if FaultPlan::take(&self.faults.force_write_conflicts) {
            return Err(self.condition_failed(record.mitigation_id.to_string()));
        }
        let mut states = self.states.lock().expect("state table lock");
        match states.get_mut(&record.mitigation_id) {
            Some(existing) if existing.version_number == expected_version => {
                *existing = record.clone();
                Ok(())
            }
            _ => Err(self.condition_failed(record.mitigation_id.to_string())),
        }
    }
}
