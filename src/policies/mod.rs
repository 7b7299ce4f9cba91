//! Delay policies.
//!
//! ## Contents
//! - [`BackoffPolicy`] how long a failed key waits before redelivery (first / factor / max + jitter)
//! - [`JitterPolicy`] randomization to avoid synchronized retries
//!
//! ## Wiring
//! ```text
//! queue::ItemBackoffLimiter ── failures(key) ──► BackoffPolicy::next ──► WorkQueue::add_after
//! cache::Informer           ── relist count  ──► BackoffPolicy::relist().next
//! ```

mod backoff;
mod jitter;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
