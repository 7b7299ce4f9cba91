//! # Event subscribers.
//!
//! The runtime never logs on its own; it publishes [`Event`](crate::Event)s.
//! Subscribers turn them into logs, metrics or test assertions.
//!
//! ```text
//! Bus ──► Manager listener ──► SubscriberSet::emit(&Event)
//!                                   ├──► LogWriter (tracing)
//!                                   ├──► Metrics
//!                                   └──► Custom ...
//! ```

#[cfg(feature = "logging")]
mod log;
mod set;
mod subscriber;

#[cfg(feature = "logging")]
pub use log::LogWriter;
pub(crate) use set::panic_message;
pub use set::SubscriberSet;
pub use subscriber::Subscribe;
