//! # kontroller
//!
//! **Kontroller** is a small controller-manager for Kubernetes-style clusters.
//!
//! It runs user-supplied handlers against a cached, continuously updated view
//! of one resource kind each, and keeps calling them until the observed state
//! has been reconciled. Failing keys are retried with per-key backoff and
//! eventually dropped.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!     ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!     │   Handler    │   │   Handler    │   │   Handler    │
//!     │ (configmaps) │   │  (secrets)   │   │   (pods)     │
//!     └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!            ▼                  ▼                  ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Manager                                                          │
//! │  - registry (name → ControllerRuntime)                            │
//! │  - RuntimeBuilder (staged wiring per handler)                     │
//! │  - Bus + SubscriberSet (event fan-out)                            │
//! └──────┬──────────────────┬──────────────────┬───────────────┬──────┘
//!        ▼                  ▼                  ▼               │
//!  ┌───────────────┐ ┌───────────────┐ ┌───────────────┐       │
//!  │ControllerRuntm│ │ControllerRuntm│ │ControllerRuntm│       │
//!  │ Informer      │ │ Informer      │ │ Informer      │       │
//!  │  └► Store     │ │  └► Store     │ │  └► Store     │       │
//!  │  └► WorkQueue │ │  └► WorkQueue │ │  └► WorkQueue │       │
//!  │ N workers     │ │ N workers     │ │ N workers     │       │
//!  └┬──────────────┘ └┬──────────────┘ └┬──────────────┘       │
//!   │ CacheSynced     │ RetryScheduled  │ ReconcileAbandoned   │
//!   ▼                 ▼                 ▼                      ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                        Bus (broadcast channel)                    │
//! └─────────────────────────────────┬─────────────────────────────────┘
//!                                   ▼
//!                            SubscriberSet
//!                         (per-subscriber queues)
//! ```
//!
//! ### Worker loop
//! ```text
//! loop {
//!   ├─► key = queue.get()          (None once the queue shuts down)
//!   ├─► object = store.get(key)    (None if deleted in the meantime)
//!   ├─► handler.reconcile(client, object)
//!   │       ├─ Ok  ──► queue.forget(key)
//!   │       └─ Err ──► requeues < max_retries
//!   │                    ├─ yes ─► add_rate_limited(key), RetryScheduled
//!   │                    └─ no  ─► forget(key), ReconcileAbandoned
//!   └─► queue.done(key)
//! }
//! ```
//!
//! ## Features
//! | Area              | Description                                                  | Key types / traits                         |
//! |-------------------|--------------------------------------------------------------|--------------------------------------------|
//! | **Handlers**      | What to watch and how to reconcile it.                       | [`Handler`], [`EventRouting`], [`Scope`]   |
//! | **Runtime**       | Staged construction and the worker loop.                     | [`RuntimeBuilder`], [`ControllerRuntime`]  |
//! | **Management**    | Register, start and drain many runtimes.                     | [`Manager`], [`ManagerBuilder`]            |
//! | **Cache**         | List/watch informer feeding a keyed store.                   | [`Informer`], [`Store`]                    |
//! | **Queue**         | Deduplicating work queue with per-key backoff.               | [`WorkQueue`], [`RateLimiter`]             |
//! | **Events**        | Lifecycle events for logging and custom subscribers.         | [`Event`], [`Subscribe`]                   |
//! | **Errors**        | Fatal setup errors vs retryable reconcile errors.            | [`ConfigurationError`], [`HandlerError`]   |
//! | **Configuration** | YAML settings with defaults.                                 | [`Config`]                                 |
//!
//! ## Optional features
//! - `logging`: exports [`LogWriter`], a subscriber that forwards events to `tracing`.
//! - `http`: the HTTPS transport for real API servers (enabled by default).
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//! use kontroller::client::{ConnectionConfig, MemoryCluster};
//! use kontroller::controllers::Reloader;
//! use kontroller::{Config, Manager, Object, StartOutcome};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cluster = MemoryCluster::new();
//!     cluster.apply("configmaps", Object::new(Some("default"), "app").with_label("kontroller/reloader", "true"))?;
//!
//!     let manager = Manager::builder(Config::default(), ConnectionConfig::default())
//!         .with_connector(cluster.clone())
//!         .build();
//!     manager.register(Arc::new(Reloader::default()))?;
//!
//!     let token = CancellationToken::new();
//!     assert_eq!(manager.start_all(&token), StartOutcome::Started(1));
//!
//!     token.cancel();
//!     manager.shutdown(Duration::from_secs(5)).await?;
//!     Ok(())
//! }
//! ```

mod api;
mod cache;
pub mod client;
mod config;
pub mod controllers;
mod core;
mod error;
mod events;
mod policies;
mod queue;
mod subscribers;

// ---- Public re-exports ----

pub use api::{
    EventRouting, Handler, HandlerRef, KeyError, LabelSelector, Namespace, Object, ObjectList, ObjectMeta,
    Requirement, ResourceKind, Scope, SelectorError, content_hash, key_of, split_key,
};
pub use cache::{DeletedObject, EventHandlers, Informer, ListWatch, ListerWatcher, Store, StoreError};
pub use client::{Client, ClientError};
pub use config::{Config, ConfigError, LogConfig, LogLevel, ManagerConfig};
pub use core::{
    CacheReady, ClientReady, ControllerRuntime, Deregistration, HandlerBound, Manager, ManagerBuilder, QueueReady,
    Registration, RuntimeBuilder, RuntimeExit, RuntimeSettings, RuntimeState, Signal, StartOutcome, Unbound,
    WatchReady, wait_for_shutdown_signal,
};
pub use error::{ConfigurationError, HandlerError, RuntimeError};
pub use events::{Bus, Event, EventKind};
pub use policies::{BackoffPolicy, JitterPolicy};
pub use queue::{ItemBackoffLimiter, RateLimiter, WorkQueue};
pub use subscribers::{Subscribe, SubscriberSet};

// Optional: a subscriber that forwards events to `tracing`.
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
