//! Statistics / logging sink (C11, §4.10, §9).
//!
//! §9 "Global mutable state... Confine to a single StatisticsSink passed
//! by reference; tests inject a fresh sink." Every counter increment also
//! emits a `tracing` event so structured counters (for tests/harnesses)
//! and human log lines stay in sync from one call site.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::{debug, warn};

/// Why an RPC ended, for per-method counters.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RpcOutcome {
    Succeeded,
    TimedOut,
    Disconnected,
}

/// Why a lookup terminated (§4.4 termination rule (a)-(d)), for
/// diagnosability.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LookupTermination {
    ValueFound,
    Converged,
    NetworkExhausted,
    PeerStopped,
}

/// Sink for engine-wide counters. Implementations must be cheap to call
/// from hot paths (RPC dispatch, lookup steps).
pub trait StatisticsSink: Send + Sync {
    fn record_rpc_issued(&self, method: &str);
    fn record_rpc_outcome(&self, method: &str, outcome: RpcOutcome);
    fn record_bucket_refresh_fired(&self, bucket_index: usize, lag: Duration);
    fn record_storage_refresh_fired(&self, lag: Duration);
    fn record_lookup_started(&self);
    fn record_lookup_terminated(&self, reason: LookupTermination);
}

/// Zero-cost default: does nothing but still logs through `tracing` so a
/// caller that wires up a subscriber gets visibility without paying for
/// counters it never reads.
#[derive(Default)]
pub struct NoopStatisticsSink;

impl StatisticsSink for NoopStatisticsSink {
    fn record_rpc_issued(&self, method: &str) {
        debug!(method, "rpc issued");
    }
    fn record_rpc_outcome(&self, method: &str, outcome: RpcOutcome) {
        debug!(method, ?outcome, "rpc outcome");
    }
    fn record_bucket_refresh_fired(&self, bucket_index: usize, lag: Duration) {
        log_lag("bucket refresh", lag);
        debug!(bucket_index, lag_ms = lag.as_millis() as u64, "bucket refresh fired");
    }
    fn record_storage_refresh_fired(&self, lag: Duration) {
        log_lag("storage refresh", lag);
        debug!(lag_ms = lag.as_millis() as u64, "storage refresh fired");
    }
    fn record_lookup_started(&self) {
        debug!("lookup started");
    }
    fn record_lookup_terminated(&self, reason: LookupTermination) {
        debug!(?reason, "lookup terminated");
    }
}

fn log_lag(what: &str, lag: Duration) {
    if lag > Duration::from_millis(250) {
        warn!(lag_ms = lag.as_millis() as u64, "{what} overloaded: fired late");
    }
}

/// In-process counters, for tests and harnesses that want programmatic
/// access rather than scraping logs.
#[derive(Default)]
pub struct CountingStatisticsSink {
    rpc_issued: AtomicU64,
    rpc_succeeded: AtomicU64,
    rpc_timed_out: AtomicU64,
    rpc_disconnected: AtomicU64,
    bucket_refreshes_fired: AtomicU64,
    bucket_refresh_overloads: AtomicU64,
    storage_refreshes_fired: AtomicU64,
    storage_refresh_overloads: AtomicU64,
    lookups_started: AtomicU64,
    lookups_terminated: AtomicU64,
}

impl CountingStatisticsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rpc_issued(&self) -> u64 {
        self.rpc_issued.load(Ordering::Relaxed)
    }
    pub fn rpc_succeeded(&self) -> u64 {
        self.rpc_succeeded.load(Ordering::Relaxed)
    }
    pub fn rpc_timed_out(&self) -> u64 {
        self.rpc_timed_out.load(Ordering::Relaxed)
    }
    pub fn rpc_disconnected(&self) -> u64 {
        self.rpc_disconnected.load(Ordering::Relaxed)
    }
    pub fn bucket_refreshes_fired(&self) -> u64 {
        self.bucket_refreshes_fired.load(Ordering::Relaxed)
    }
    pub fn storage_refreshes_fired(&self) -> u64 {
        self.storage_refreshes_fired.load(Ordering::Relaxed)
    }
    pub fn lookups_started(&self) -> u64 {
        self.lookups_started.load(Ordering::Relaxed)
    }
    pub fn lookups_terminated(&self) -> u64 {
        self.lookups_terminated.load(Ordering::Relaxed)
    }
}

impl StatisticsSink for CountingStatisticsSink {
    fn record_rpc_issued(&self, method: &str) {
        self.rpc_issued.fetch_add(1, Ordering::Relaxed);
        debug!(method, "rpc issued");
    }

    fn record_rpc_outcome(&self, method: &str, outcome: RpcOutcome) {
        match outcome {
            RpcOutcome::Succeeded => self.rpc_succeeded.fetch_add(1, Ordering::Relaxed),
            RpcOutcome::TimedOut => self.rpc_timed_out.fetch_add(1, Ordering::Relaxed),
            RpcOutcome::Disconnected => self.rpc_disconnected.fetch_add(1, Ordering::Relaxed),
        };
        debug!(method, ?outcome, "rpc outcome");
    }

    fn record_bucket_refresh_fired(&self, bucket_index: usize, lag: Duration) {
        self.bucket_refreshes_fired.fetch_add(1, Ordering::Relaxed);
        if lag > Duration::from_millis(250) {
            self.bucket_refresh_overloads.fetch_add(1, Ordering::Relaxed);
        }
        log_lag("bucket refresh", lag);
        debug!(bucket_index, lag_ms = lag.as_millis() as u64, "bucket refresh fired");
    }

    fn record_storage_refresh_fired(&self, lag: Duration) {
        self.storage_refreshes_fired.fetch_add(1, Ordering::Relaxed);
        if lag > Duration::from_millis(250) {
            self.storage_refresh_overloads.fetch_add(1, Ordering::Relaxed);
        }
        log_lag("storage refresh", lag);
        debug!(lag_ms = lag.as_millis() as u64, "storage refresh fired");
    }

    fn record_lookup_started(&self) {
        self.lookups_started.fetch_add(1, Ordering::Relaxed);
        debug!("lookup started");
    }

    fn record_lookup_terminated(&self, reason: LookupTermination) {
        self.lookups_terminated.fetch_add(1, Ordering::Relaxed);
        debug!(?reason, "lookup terminated");
    }
}
