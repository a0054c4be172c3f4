//! Refresh scheduler (C9, §4.9).
//!
//! Two timer classes — bucket-refresh (keyed by bucket index) and
//! storage-refresh (keyed by stored key) — each single-slot: arming
//! cancels any existing timer at the same logical key. Every fire is
//! serialized through one work-queue lock per peer so refreshes and
//! probes never run concurrently with each other (§4.9 "Serialization").

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::key::Key;
use crate::stats::StatisticsSink;

/// The jitter margin as a fraction of the nominal interval: the next fire
/// is scheduled uniformly in `[interval * (1 - MARGIN_FRACTION / 2),
/// interval * (1 + MARGIN_FRACTION / 2)]`. Not specified numerically by
/// the spec beyond "avoids synchronized thundering herds"; 20% is a
/// conventional choice for this kind of periodic-refresh jitter.
const MARGIN_FRACTION: f64 = 0.2;

/// A unit of periodic work a timer fires. Implementors typically close
/// over an `Arc` back-reference into the owning peer's state.
pub trait RefreshAction: Send + Sync + 'static {
    fn fire(&self) -> impl Future<Output = ()> + Send;
}

fn jittered_duration(interval_ms: u64, rng: &mut impl Rng) -> Duration {
    if interval_ms == 0 {
        return Duration::ZERO;
    }
    let margin = (interval_ms as f64 * MARGIN_FRACTION) as i64;
    let low = (interval_ms as i64 - margin / 2).max(0);
    let high = interval_ms as i64 + margin / 2;
    let chosen = if high > low {
        rng.gen_range(low..=high)
    } else {
        interval_ms as i64
    };
    Duration::from_millis(chosen as u64)
}

/// Per-peer scheduler state: one bucket-refresh and one storage-refresh
/// timer slot per logical key, plus the shared `stopped` flag and
/// serialization lock every fired thunk acquires.
pub struct Scheduler {
    refresh_interval_ms: Arc<AtomicU64>,
    stopped: Arc<AtomicBool>,
    work_lock: Arc<Mutex<()>>,
    stats: Arc<dyn StatisticsSink>,
    bucket_timers: Mutex<HashMap<usize, JoinHandle<()>>>,
    storage_timers: Mutex<HashMap<Key, JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(refresh_interval_ms: u64, stats: Arc<dyn StatisticsSink>) -> Self {
        Scheduler {
            refresh_interval_ms: Arc::new(AtomicU64::new(refresh_interval_ms)),
            stopped: Arc::new(AtomicBool::new(false)),
            work_lock: Arc::new(Mutex::new(())),
            stats,
            bucket_timers: Mutex::new(HashMap::new()),
            storage_timers: Mutex::new(HashMap::new()),
        }
    }

    /// Silently cancels all future fires. Already-running thunks
    /// complete (§4.9 "Stopping").
    pub async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        let mut buckets = self.bucket_timers.lock().await;
        for (_, handle) in buckets.drain() {
            handle.abort();
        }
        let mut storage = self.storage_timers.lock().await;
        for (_, handle) in storage.drain() {
            handle.abort();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Arm (or re-arm) the bucket-refresh timer for `bucket_index`.
    /// Re-arming cancels any existing timer for the same index.
    pub async fn arm_bucket_refresh<A: RefreshAction>(&self, bucket_index: usize, action: A) {
        if self.stopped.load(Ordering::SeqCst) || self.refresh_interval_ms.load(Ordering::Relaxed) == 0 {
            return;
        }
        let handle = self.spawn_bucket_timer(bucket_index, action);
        let mut timers = self.bucket_timers.lock().await;
        if let Some(old) = timers.insert(bucket_index, handle) {
            old.abort();
        }
    }

    /// Arm (or re-arm) the storage-refresh (republication) timer for
    /// `key`.
    pub async fn arm_storage_refresh<A: RefreshAction>(&self, key: Key, action: A) {
        if self.stopped.load(Ordering::SeqCst) || self.refresh_interval_ms.load(Ordering::Relaxed) == 0 {
            return;
        }
        let handle = self.spawn_storage_timer(key.clone(), action);
        let mut timers = self.storage_timers.lock().await;
        if let Some(old) = timers.insert(key, handle) {
            old.abort();
        }
    }

    fn spawn_bucket_timer<A: RefreshAction>(&self, bucket_index: usize, action: A) -> JoinHandle<()> {
        let interval = self.refresh_interval_ms.clone();
        let stopped = self.stopped.clone();
        let work_lock = self.work_lock.clone();
        let stats = self.stats.clone();

        tokio::spawn(async move {
            let mut rng = rand::thread_rng();
            loop {
                let interval_ms = interval.load(Ordering::Relaxed);
                if stopped.load(Ordering::SeqCst) || interval_ms == 0 {
                    return;
                }
                let wait = jittered_duration(interval_ms, &mut rng);
                let scheduled_time = Instant::now() + wait;
                tokio::time::sleep(wait).await;
                if stopped.load(Ordering::SeqCst) {
                    return;
                }
                let _permit = work_lock.lock().await;
                let fired_time = Instant::now();
                let lag = fired_time.saturating_duration_since(scheduled_time);
                action.fire().await;
                stats.record_bucket_refresh_fired(bucket_index, lag);
            }
        })
    }

    fn spawn_storage_timer<A: RefreshAction>(&self, _key: Key, action: A) -> JoinHandle<()> {
        let interval = self.refresh_interval_ms.clone();
        let stopped = self.stopped.clone();
        let work_lock = self.work_lock.clone();
        let stats = self.stats.clone();

        tokio::spawn(async move {
            let mut rng = rand::thread_rng();
            loop {
                let interval_ms = interval.load(Ordering::Relaxed);
                if stopped.load(Ordering::SeqCst) || interval_ms == 0 {
                    return;
                }
                let wait = jittered_duration(interval_ms, &mut rng);
                let scheduled_time = Instant::now() + wait;
                tokio::time::sleep(wait).await;
                if stopped.load(Ordering::SeqCst) {
                    return;
                }
                let _permit = work_lock.lock().await;
                let fired_time = Instant::now();
                let lag = fired_time.saturating_duration_since(scheduled_time);
                action.fire().await;
                stats.record_storage_refresh_fired(lag);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::CountingStatisticsSink;
    use std::sync::atomic::AtomicUsize;

    struct CountingAction(Arc<AtomicUsize>);
    impl RefreshAction for CountingAction {
        async fn fire(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn bucket_refresh_fires_and_reschedules() {
        let stats: Arc<dyn StatisticsSink> = Arc::new(CountingStatisticsSink::new());
        let scheduler = Scheduler::new(20, stats);
        let fires = Arc::new(AtomicUsize::new(0));
        scheduler
            .arm_bucket_refresh(0, CountingAction(fires.clone()))
            .await;

        tokio::time::sleep(Duration::from_millis(150)).await;
        scheduler.stop().await;
        assert!(fires.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn rearming_cancels_previous_timer() {
        let stats: Arc<dyn StatisticsSink> = Arc::new(CountingStatisticsSink::new());
        let scheduler = Scheduler::new(5_000, stats);
        let first_fires = Arc::new(AtomicUsize::new(0));
        scheduler
            .arm_bucket_refresh(0, CountingAction(first_fires.clone()))
            .await;
        let second_fires = Arc::new(AtomicUsize::new(0));
        scheduler
            .arm_bucket_refresh(0, CountingAction(second_fires.clone()))
            .await;

        scheduler.stop().await;
        // The first timer's handle must have been aborted by re-arming;
        // it should not still be registered under the same slot.
        assert_eq!(scheduler.bucket_timers.lock().await.len(), 0);
    }

    #[tokio::test]
    async fn zero_interval_disables_arming() {
        let stats: Arc<dyn StatisticsSink> = Arc::new(CountingStatisticsSink::new());
        let scheduler = Scheduler::new(0, stats);
        let fires = Arc::new(AtomicUsize::new(0));
        scheduler
            .arm_bucket_refresh(0, CountingAction(fires.clone()))
            .await;
        assert_eq!(scheduler.bucket_timers.lock().await.len(), 0);
    }

    #[tokio::test]
    async fn stop_prevents_further_arming() {
        let stats: Arc<dyn StatisticsSink> = Arc::new(CountingStatisticsSink::new());
        let scheduler = Scheduler::new(20, stats);
        scheduler.stop().await;
        assert!(scheduler.is_stopped());
        let fires = Arc::new(AtomicUsize::new(0));
        scheduler
            .arm_bucket_refresh(0, CountingAction(fires.clone()))
            .await;
        assert_eq!(scheduler.bucket_timers.lock().await.len(), 0);
    }
}
