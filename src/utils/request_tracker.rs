use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use crate::metrics as gw_metrics;

/// Counts in-flight requests so shutdown can drain before exiting.
#[derive(Debug, Default)]
pub struct RequestTracker {
    in_flight: AtomicUsize,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request; the returned guard deregisters on drop,
    /// including on cancellation.
    pub fn track(self: &Arc<Self>) -> RequestGuard {
        let count = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        gw_metrics::set_active_requests(count);
        RequestGuard {
            tracker: self.clone(),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Wait until every tracked request completes or the drain timeout
    /// elapses. Returns whether the tracker drained fully.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let poll = Duration::from_millis(50);
        let deadline = tokio::time::Instant::now() + timeout;
        while self.in_flight() > 0 {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(poll).await;
        }
        true
    }
}

pub struct RequestGuard {
    tracker: Arc<RequestTracker>,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        let count = self.tracker.in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
        gw_metrics::set_active_requests(count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn guard_counts_in_flight() {
        let tracker = Arc::new(RequestTracker::new());
        assert_eq!(tracker.in_flight(), 0);

        let g1 = tracker.track();
        let g2 = tracker.track();
        assert_eq!(tracker.in_flight(), 2);

        drop(g1);
        assert_eq!(tracker.in_flight(), 1);
        drop(g2);
        assert_eq!(tracker.in_flight(), 0);
    }

    #[tokio::test]
    async fn drain_completes_when_requests_finish() {
        let tracker = Arc::new(RequestTracker::new());
        let guard = tracker.track();

        let drainer = {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.drain(Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(guard);

        assert!(drainer.await.unwrap());
    }

    #[tokio::test]
    async fn drain_times_out_with_requests_stuck() {
        let tracker = Arc::new(RequestTracker::new());
        let _guard = tracker.track();
        assert!(!tracker.drain(Duration::from_millis(100)).await);
    }
}
