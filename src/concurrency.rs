//! Bounded concurrency for applying artifact groups
//!
//! Groups are admitted in queue order while fewer than `limit` are in
//! flight; once the limit is reached the next group waits for one to finish.
//! Each group runs its own changes sequentially, so only the order across
//! groups is relaxed.

use futures::stream::{self, StreamExt};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Worker pool with a fixed number of in-flight slots.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    limit: usize,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl WorkerPool {
    /// Create a pool; a parallelism below one is raised to one.
    pub fn new(parallel: usize) -> Self {
        WorkerPool {
            limit: parallel.max(1),
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Highest number of tasks observed in flight at once.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Run `task` over every item, at most `limit` at a time. Results come
    /// back in completion order.
    pub async fn run<T, R, F, Fut>(&self, items: Vec<T>, task: F) -> Vec<R>
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = R>,
    {
        let task = &task;
        stream::iter(items)
            .map(|item| {
                let in_flight = Arc::clone(&self.in_flight);
                let peak = Arc::clone(&self.peak);
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    let result = task(item).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    result
                }
            })
            .buffer_unordered(self.limit)
            .collect()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[tokio::test]
    async fn test_never_exceeds_limit_and_runs_each_once() {
        let pool = WorkerPool::new(3);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let results = pool
            .run((0..10).collect(), |i: usize| {
                let seen = Arc::clone(&seen);
                async move {
                    tokio::time::sleep(Duration::from_millis(5 + (i % 3) as u64)).await;
                    seen.lock().push(i);
                    i * 2
                }
            })
            .await;

        assert_eq!(results.len(), 10);
        assert!(pool.peak() <= 3);
        assert_eq!(pool.peak(), 3);
        let mut seen = seen.lock().clone();
        seen.sort();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_zero_parallelism_runs_sequentially() {
        let pool = WorkerPool::new(0);
        assert_eq!(pool.limit(), 1);
        let order = Arc::new(Mutex::new(Vec::new()));
        pool.run(vec![1, 2, 3], |i| {
            let order = Arc::clone(&order);
            async move {
                order.lock().push(i);
            }
        })
        .await;
        assert_eq!(*order.lock(), vec![1, 2, 3]);
        assert_eq!(pool.peak(), 1);
    }
}
