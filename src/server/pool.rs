//! Bounded admission channel plus a fixed worker pool with panic containment
//! (SPEC_FULL §4.8 "Admission layer").
//!
//! Grounded on the teacher's `src/lib.rs` `handle_forever`/`process_socket` idiom,
//! generalized from "one task per accepted connection" to "a fixed number of workers
//! pulling off one bounded queue" -- the admission backpressure SPEC_FULL §9 calls for,
//! built on `async-channel`, a teacher dependency that was previously declared but unused.

use std::future::Future;
use std::sync::Arc;

use async_channel::{Receiver, Sender};
use tracing::{info, warn};

/// A bounded rendezvous channel between a producer (the accept loop) and a fixed pool of
/// workers pulling items off the same queue. Generic over the admitted item type so the
/// backpressure and panic-containment behavior can be exercised without a real socket.
pub struct Pool<T> {
    sender: Sender<T>,
    receiver: Receiver<T>,
}

impl<T: Send + 'static> Pool<T> {
    /// `capacity` bounds both the channel depth and, via [`Pool::spawn_workers`], the
    /// number of concurrently live sessions (SPEC_FULL §6.3 `max connections`).
    pub fn new(capacity: usize) -> Pool<T> {
        let (sender, receiver) = async_channel::bounded(capacity.max(1));
        Pool { sender, receiver }
    }

    /// Hands `item` to the pool, blocking while every worker is busy and the channel is
    /// full -- the "natural backpressure" SPEC_FULL §4.8 asks for, rather than spawning an
    /// unbounded task per connection. Returns the item back on error (the pool has been
    /// shut down and no workers remain to receive it).
    pub async fn admit(&self, item: T) -> Result<(), T> {
        self.sender.send(item).await.map_err(|err| err.into_inner())
    }

    /// Spawns `worker_count` tasks, each looping on the shared receiver and invoking
    /// `handler` for every admitted item. Each invocation runs in its own task so a panic
    /// inside `handler` is caught at the `JoinHandle` rather than taking the worker loop
    /// down with it (SPEC_FULL §4.8: "a session-handler panic MUST be contained... and the
    /// worker returned to the pool").
    pub fn spawn_workers<F, Fut>(&self, worker_count: usize, handler: F)
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler = Arc::new(handler);
        for worker_id in 0..worker_count {
            let receiver = self.receiver.clone();
            let handler = handler.clone();
            tokio::spawn(async move {
                while let Ok(item) = receiver.recv().await {
                    let handler = handler.clone();
                    if let Err(err) = tokio::spawn(async move { handler(item).await }).await {
                        warn!(worker_id, error = %err, "session handler panicked, worker recovered");
                    }
                }
                info!(worker_id, "admission worker exiting: channel closed");
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn admit_blocks_once_the_pool_is_full() {
        let pool = Arc::new(Pool::<u32>::new(1));
        pool.admit(1).await.unwrap();

        let blocked_pool = pool.clone();
        let blocked = tokio::spawn(async move { blocked_pool.admit(2).await.unwrap() });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!blocked.is_finished(), "admit should block while the channel is full");

        pool.receiver.recv().await.unwrap();
        tokio::time::timeout(Duration::from_millis(200), blocked).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn a_panicking_handler_does_not_stop_the_worker_from_taking_the_next_item() {
        let pool = Pool::<u32>::new(4);
        let processed = Arc::new(AtomicUsize::new(0));
        let counted = processed.clone();
        pool.spawn_workers(1, move |item: u32| {
            let processed = counted.clone();
            async move {
                if item == 1 {
                    panic!("simulated session-handler panic");
                }
                processed.fetch_add(1, Ordering::SeqCst);
            }
        });

        pool.admit(1).await.unwrap();
        pool.admit(2).await.unwrap();

        for _ in 0..50 {
            if processed.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(processed.load(Ordering::SeqCst), 1);
    }
}
