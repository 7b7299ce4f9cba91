//! # Event subscriber trait.
//!
//! [`Subscribe`] is the injected logging/observability sink of the manager.
//!
//! Each subscriber gets:
//! - a **dedicated worker task**,
//! - a **bounded queue** (capacity via [`Subscribe::queue_capacity`]),
//! - **panic isolation** (a panicking `on_event` is logged and skipped).
//!
//! ## Rules
//! - A slow subscriber only affects its own queue.
//! - On overflow the event is dropped for that subscriber only.
//! - Events are processed in FIFO order per subscriber.
//!
//! ## Example
//! ```rust
//! use async_trait::async_trait;
//! use kontroller::{Event, EventKind, Subscribe};
//!
//! struct FailureCounter;
//!
//! #[async_trait]
//! impl Subscribe for FailureCounter {
//!     async fn on_event(&self, ev: &Event) {
//!         if matches!(ev.kind, EventKind::ReconcileAbandoned) {
//!             // bump a counter, page someone, ...
//!         }
//!     }
//!
//!     fn name(&self) -> &'static str { "failure-counter" }
//! }
//! ```

use async_trait::async_trait;

use crate::events::Event;

/// Event subscriber.
///
/// ### Implementation requirements
/// - Use async I/O; avoid blocking the executor.
/// - Handle errors internally.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Processes a single event, called from the subscriber's own worker.
    async fn on_event(&self, event: &Event);

    /// Name used when reporting overflow or panics.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Preferred queue capacity (clamped to at least 1). Default: 1024.
    fn queue_capacity(&self) -> usize {
        1024
    }
}
