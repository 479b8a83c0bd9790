use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};

use code_runner_core::{Error, Result};

/// Dual-lane scheduler for pipeline execution.
/// - Global lane: limits concurrent build+run work.
/// - Identity lane: serializes ledger updates per function identity.
pub struct ExecutionScheduler {
    global: Arc<Semaphore>,
    limit: usize,
    identity_lanes: DashMap<String, Arc<Mutex<()>>>,
}

impl ExecutionScheduler {
    pub fn new(global_limit: usize) -> Self {
        let limit = global_limit.max(1);
        Self {
            global: Arc::new(Semaphore::new(limit)),
            limit,
            identity_lanes: DashMap::new(),
        }
    }

    /// Wait for a global execution slot. The slot is held until the permit drops.
    pub async fn acquire_slot(&self) -> Result<OwnedSemaphorePermit> {
        self.global
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::internal("execution scheduler closed"))
    }

    /// Run `operation` exclusively with respect to other operations on `identity`.
    ///
    /// A lane lives only while someone holds or waits on it.
    pub async fn serialized<F, Fut, T>(&self, identity: &str, operation: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let lane = LaneHandle {
            lanes: &self.identity_lanes,
            identity,
            lane: self
                .identity_lanes
                .entry(identity.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone(),
        };
        let _lane_guard = lane.lane.lock().await;
        operation().await
    }

    /// Identity lanes currently in use.
    pub fn active_lanes(&self) -> usize {
        self.identity_lanes.len()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Slots not currently held.
    pub fn available_slots(&self) -> usize {
        self.global.available_permits()
    }
}

/// A claim on one identity lane. Dropping the last claim removes the lane,
/// including when the owning future is cancelled while waiting.
struct LaneHandle<'a> {
    lanes: &'a DashMap<String, Arc<Mutex<()>>>,
    identity: &'a str,
    lane: Arc<Mutex<()>>,
}

impl Drop for LaneHandle<'_> {
    fn drop(&mut self) {
        // The map holds one reference and this handle another; anything
        // above two is a waiter that still needs the lane. Checked under
        // the shard lock, so no clone can race the removal.
        self.lanes
            .remove_if(self.identity, |_, lane| Arc::strong_count(lane) <= 2);
    }
}

impl Default for ExecutionScheduler {
    fn default() -> Self {
        Self::new(4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_global_limit_bounds_slots() {
        let scheduler = ExecutionScheduler::new(2);
        let a = scheduler.acquire_slot().await.unwrap();
        let _b = scheduler.acquire_slot().await.unwrap();
        assert_eq!(scheduler.available_slots(), 0);

        let blocked = tokio::time::timeout(Duration::from_millis(20), scheduler.acquire_slot()).await;
        assert!(blocked.is_err());

        drop(a);
        assert_eq!(scheduler.available_slots(), 1);
        assert!(scheduler.acquire_slot().await.is_ok());
    }

    #[tokio::test]
    async fn test_zero_limit_is_clamped() {
        let scheduler = ExecutionScheduler::new(0);
        assert_eq!(scheduler.limit(), 1);
        assert!(scheduler.acquire_slot().await.is_ok());
    }

    #[tokio::test]
    async fn test_identity_lane_serializes() {
        let scheduler = Arc::new(ExecutionScheduler::default());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let scheduler = scheduler.clone();
            let inside = inside.clone();
            let max_inside = max_inside.clone();
            handles.push(tokio::spawn(async move {
                scheduler
                    .serialized("alice/f1:python", || async move {
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_inside.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(2)).await;
                        inside.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.active_lanes(), 0);
    }

    #[tokio::test]
    async fn test_idle_lanes_are_released() {
        let scheduler = ExecutionScheduler::default();
        for i in 0..1000 {
            let identity = format!("user{}/f:python", i);
            let value = scheduler.serialized(&identity, || async move { i * 2 }).await;
            assert_eq!(value, i * 2);
        }
        assert_eq!(scheduler.active_lanes(), 0);
    }

    #[tokio::test]
    async fn test_lane_kept_while_waiters_remain() {
        let scheduler = Arc::new(ExecutionScheduler::default());
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let (entered_tx, entered_rx) = tokio::sync::oneshot::channel::<()>();

        let holder = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move {
                scheduler
                    .serialized("alice/f1:python", || async move {
                        entered_tx.send(()).unwrap();
                        release_rx.await.unwrap();
                    })
                    .await
            })
        };
        entered_rx.await.unwrap();

        let waiter = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.serialized("alice/f1:python", || async {}).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(scheduler.active_lanes(), 1);

        release_tx.send(()).unwrap();
        holder.await.unwrap();
        waiter.await.unwrap();
        assert_eq!(scheduler.active_lanes(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_releases_lane() {
        let scheduler = ExecutionScheduler::default();
        let held = scheduler.serialized("bob/f:javascript", || async {
            let pending = tokio::time::timeout(
                Duration::from_millis(10),
                scheduler.serialized("bob/f:javascript", || async {}),
            )
            .await;
            assert!(pending.is_err());
        });
        held.await;
        assert_eq!(scheduler.active_lanes(), 0);
    }
}
