//! Byte-rate limiting and idle-timeout enforcement for one session's channel I/O
//! (SPEC_FULL §4.7 "Throttled connection").
//!
//! Grounded on `src/allocator/mod.rs`'s channel-backed credit accounting, adapted from
//! "handle-id credits handed out on a queue" to "byte credits handed out on a queue": one
//! [`Bucket`] token authorizes forwarding one byte, and a background tick refills both
//! directions' buckets, so a caller that runs dry just waits for the next tick instead of
//! busy-polling a shared counter.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam_queue::ArrayQueue;
use tokio::time::{interval, sleep};

const TICK: Duration = Duration::from_millis(100);

struct Bucket {
    tokens: ArrayQueue<()>,
}

impl Bucket {
    fn new(capacity: usize) -> Bucket {
        Bucket { tokens: ArrayQueue::new(capacity.max(1)) }
    }

    fn refill(&self, amount: usize) {
        for _ in 0..amount {
            if self.tokens.push(()).is_err() {
                break;
            }
        }
    }

    fn take(&self, want: usize) -> usize {
        let mut took = 0;
        while took < want && self.tokens.pop().is_some() {
            took += 1;
        }
        took
    }
}

/// Wraps a session's read/write accounting: a byte-rate limiter per direction plus a
/// rolling idle deadline. `bytes_per_second < 0` disables rate limiting entirely (the
/// idle timeout still applies).
pub struct Throttle {
    idle_timeout: Duration,
    deadline: Mutex<Instant>,
    read_bucket: Option<Arc<Bucket>>,
    write_bucket: Option<Arc<Bucket>>,
    refill_task: Option<tokio::task::JoinHandle<()>>,
}

impl Throttle {
    pub fn new(bytes_per_second: i64, idle_timeout: Duration) -> Throttle {
        let (read_bucket, write_bucket, refill_task) = if bytes_per_second < 0 {
            (None, None, None)
        } else {
            let capacity = (bytes_per_second as usize).max(1);
            let read = Arc::new(Bucket::new(capacity));
            let write = Arc::new(Bucket::new(capacity));
            let per_tick = (capacity / 10).max(1);
            let (r, w) = (read.clone(), write.clone());
            let handle = tokio::spawn(async move {
                let mut ticker = interval(TICK);
                loop {
                    ticker.tick().await;
                    r.refill(per_tick);
                    w.refill(per_tick);
                }
            });
            (Some(read), Some(write), Some(handle))
        };
        Throttle {
            idle_timeout,
            deadline: Mutex::new(Instant::now() + idle_timeout),
            read_bucket,
            write_bucket,
            refill_task,
        }
    }

    /// Blocks until at least one byte of `want` can be forwarded, returning how many of
    /// the requested bytes are authorized right now (may be less than `want`).
    pub async fn throttle_read(&self, want: usize) -> usize {
        self.gate(self.read_bucket.as_ref(), want).await
    }

    pub async fn throttle_write(&self, want: usize) -> usize {
        self.gate(self.write_bucket.as_ref(), want).await
    }

    async fn gate(&self, bucket: Option<&Arc<Bucket>>, want: usize) -> usize {
        let Some(bucket) = bucket else { return want };
        loop {
            let got = bucket.take(want);
            if got > 0 {
                return got;
            }
            sleep(TICK).await;
        }
    }

    /// Pushes the idle deadline out to `now + idle_timeout`. Call on every read or write.
    pub fn touch(&self) {
        *self.deadline.lock().unwrap() = Instant::now() + self.idle_timeout;
    }

    /// The instant at which this session should be dropped for inactivity, as of the last
    /// [`Throttle::touch`]. The server loop races this against channel I/O with
    /// `tokio::select!`.
    pub fn deadline(&self) -> Instant {
        *self.deadline.lock().unwrap()
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline()
    }
}

impl Drop for Throttle {
    fn drop(&mut self) {
        if let Some(task) = self.refill_task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unbounded_rate_passes_through_immediately() {
        let throttle = Throttle::new(-1, Duration::from_secs(60));
        assert_eq!(throttle.throttle_read(4096).await, 4096);
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_rate_grants_at_most_the_burst_capacity_up_front() {
        let throttle = Throttle::new(1000, Duration::from_secs(60));
        let first = throttle.throttle_write(5000).await;
        assert!(first <= 1000, "first grant {first} exceeded burst capacity");
    }

    #[tokio::test(start_paused = true)]
    async fn tokens_replenish_after_a_tick() {
        let throttle = Throttle::new(1000, Duration::from_secs(60));
        let first = throttle.throttle_write(1000).await;
        assert!(first > 0);
        tokio::time::advance(Duration::from_millis(150)).await;
        let second = throttle.throttle_write(1000).await;
        assert!(second > 0, "expected tokens to replenish after a tick");
    }

    #[tokio::test]
    async fn touch_pushes_the_idle_deadline_forward() {
        let throttle = Throttle::new(-1, Duration::from_millis(50));
        let before = throttle.deadline();
        tokio::time::sleep(Duration::from_millis(10)).await;
        throttle.touch();
        assert!(throttle.deadline() > before);
    }
}
