//! Rate-limited delayed work queue.
//!
//! ## Contents
//! - [`WorkQueue`] deduplicating key queue with in-flight exclusivity
//! - [`RateLimiter`] per-key failure accounting, [`ItemBackoffLimiter`] default

mod rate_limiter;
mod work_queue;

pub use rate_limiter::{ItemBackoffLimiter, RateLimiter};
pub use work_queue::WorkQueue;
