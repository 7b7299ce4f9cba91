//! # WorkQueue: deduplicating, rate-limited, delayed key queue.
//!
//! ## Key states
//! ```text
//!            add()                 get()                 done()
//! (absent) ───────► dirty+queued ───────► processing ───────► (absent)
//!                        ▲                     │ add() while processing
//!                        │                     ▼
//!                        └──── done() ◄── processing+dirty
//! ```
//!
//! ## Rules
//! - A key is queued at most once; repeated `add`s coalesce.
//! - A key handed out by `get` is never handed out again until `done`;
//!   adds that arrive meanwhile are parked and requeued by `done`.
//! - `add_after` / `add_rate_limited` add the key once the delay elapses,
//!   unless the queue was shut down first.
//! - After `shutdown`, `add` is ignored and every pending or future `get`
//!   returns `None`.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::rate_limiter::{ItemBackoffLimiter, RateLimiter};

#[derive(Default)]
struct State {
    queue: VecDeque<String>,
    dirty: HashSet<String>,
    processing: HashSet<String>,
    shutting_down: bool,
}

/// Work queue shared by one informer (producer) and N workers (consumers).
pub struct WorkQueue {
    state: Mutex<State>,
    notify: Notify,
    limiter: Box<dyn RateLimiter>,
    closed: CancellationToken,
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new(ItemBackoffLimiter::default())
    }
}

impl std::fmt::Debug for WorkQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.lock();
        f.debug_struct("WorkQueue")
            .field("queued", &st.queue.len())
            .field("processing", &st.processing.len())
            .field("shutting_down", &st.shutting_down)
            .finish()
    }
}

impl WorkQueue {
    /// Queue using `limiter` for [`add_rate_limited`](Self::add_rate_limited).
    pub fn new(limiter: impl RateLimiter) -> Self {
        Self {
            state: Mutex::new(State::default()),
            notify: Notify::new(),
            limiter: Box::new(limiter),
            closed: CancellationToken::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks `key` as needing processing.
    pub fn add(&self, key: impl Into<String>) {
        let key = key.into();
        let mut st = self.lock();
        if st.shutting_down || st.dirty.contains(&key) {
            return;
        }
        st.dirty.insert(key.clone());
        if st.processing.contains(&key) {
            return;
        }
        st.queue.push_back(key);
        drop(st);
        self.notify.notify_one();
    }

    /// Adds `key` after `delay` (immediately for a zero delay).
    ///
    /// Must be called inside a tokio runtime when `delay` is non-zero.
    pub fn add_after(self: &Arc<Self>, key: impl Into<String>, delay: Duration) {
        let key = key.into();
        if self.is_shutting_down() {
            return;
        }
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => queue.add(key),
                _ = queue.closed.cancelled() => {}
            }
        });
    }

    /// Records a failure of `key` with the rate limiter and re-adds it after
    /// the delay the limiter returns. Returns that delay.
    pub fn add_rate_limited(self: &Arc<Self>, key: &str) -> Duration {
        let delay = self.limiter.when(key);
        self.add_after(key, delay);
        delay
    }

    /// Clears the rate limiter's failure count for `key`.
    pub fn forget(&self, key: &str) {
        self.limiter.forget(key);
    }

    /// Failures recorded for `key` since it was last forgotten.
    pub fn num_requeues(&self, key: &str) -> u32 {
        self.limiter.num_requeues(key)
    }

    /// Waits for the next key. `None` once the queue is shut down.
    ///
    /// The returned key must be passed to [`done`](Self::done) when processing ends.
    pub async fn get(&self) -> Option<String> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut st = self.lock();
                if st.shutting_down {
                    return None;
                }
                if let Some(key) = st.queue.pop_front() {
                    st.dirty.remove(&key);
                    st.processing.insert(key.clone());
                    return Some(key);
                }
            }

            notified.await;
        }
    }

    /// Ends processing of `key`; requeues it if it was added meanwhile.
    pub fn done(&self, key: &str) {
        let mut st = self.lock();
        st.processing.remove(key);
        if st.dirty.contains(key) && !st.shutting_down {
            st.queue.push_back(key.to_owned());
            drop(st);
            self.notify.notify_one();
        }
    }

    /// Stops accepting keys and wakes every waiting `get`.
    pub fn shutdown(&self) {
        self.lock().shutting_down = true;
        self.closed.cancel();
        self.notify.notify_waiters();
    }

    /// True after [`shutdown`](Self::shutdown).
    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }

    /// Number of keys waiting to be handed out.
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    /// True if no key is waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if `key` is queued, parked, or being processed.
    pub fn is_tracked(&self, key: &str) -> bool {
        let st = self.lock();
        st.dirty.contains(key) || st.processing.contains(key)
    }

    /// True if a worker currently holds `key`.
    pub fn is_processing(&self, key: &str) -> bool {
        self.lock().processing.contains(key)
    }
}
