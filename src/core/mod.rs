//! Reconciliation engine: staged builder, controller runtime, manager.
//!
//! Internal modules:
//! - `builder`: type-state construction of one runtime;
//! - `runtime`: informer + workers + retry policy of one controller;
//! - `manager`: named registry, start/stop of all runtimes, event fan-out;
//! - `shutdown`: termination signal handling.

mod builder;
mod manager;
mod runtime;
mod shutdown;

pub use builder::{CacheReady, ClientReady, HandlerBound, QueueReady, RuntimeBuilder, Unbound, WatchReady};
pub use manager::{Deregistration, Manager, ManagerBuilder, Registration, StartOutcome};
pub use runtime::{ControllerRuntime, RuntimeExit, RuntimeSettings, RuntimeState};
pub use shutdown::{Signal, wait_for_shutdown_signal};
