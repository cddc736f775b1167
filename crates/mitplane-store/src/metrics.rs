//! Metrics sink interface. Consumed by the allocator and handlers, produced
//! elsewhere; the engine only increments counters.

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Counter {
    AllocationAttempt,
    ContentionRetry,
    QueryRetry,
    PutRetry,
    StoreSuccess,
    StoreFailure,
}

pub trait MetricsSink: Sync {
    fn incr(&self, counter: Counter);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn incr(&self, _counter: Counter) {}
}
