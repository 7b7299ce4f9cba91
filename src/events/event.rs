//! # Runtime events.
//!
//! Every observable step of the manager, its runtimes, informers and workers
//! is published as an [`Event`]. Nothing in the runtime writes logs directly;
//! subscribers (the built-in `LogWriter`, metrics, tests) decide what to do
//! with events.
//!
//! [`EventKind`] groups into:
//! - **Manager**: registration, start, shutdown
//! - **Runtime**: cache sync and state transitions of one controller
//! - **Informer**: watch failures and resyncs
//! - **Processing**: per-key outcomes
//!
//! ## Ordering guarantees
//! Each event carries a globally unique, monotonically increasing `seq`.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use kontroller::{Event, EventKind, LogLevel};
//!
//! let ev = Event::new(EventKind::RetryScheduled)
//!     .with_controller("reloader")
//!     .with_key("prod/app")
//!     .with_attempt(2)
//!     .with_delay(Duration::from_millis(10))
//!     .with_reason("reconcile failed: boom");
//!
//! assert_eq!(ev.key.as_deref(), Some("prod/app"));
//! assert_eq!(ev.delay(), Some(Duration::from_millis(10)));
//! assert_eq!(ev.kind.severity(), LogLevel::Error);
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

use crate::config::LogLevel;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    // === Manager ===
    /// A handler was built into a runtime and stored. Sets `controller`.
    ControllerRegistered,
    /// Registration skipped, the name is taken. Sets `controller`.
    AlreadyRegistered,
    /// Building a runtime failed with a configuration error.
    /// Sets `controller`, `reason`.
    RegistrationFailed,
    /// A runtime was removed from the registry. Sets `controller`.
    ControllerDeregistered,
    /// Deregistration skipped, the name is unknown. Sets `controller`.
    NotRegistered,
    /// `start_all` found an empty registry.
    NothingToRun,
    /// A runtime refused to start (already started). Sets `controller`, `reason`.
    StartRejected,
    /// The stop signal fired and the manager began draining.
    ShutdownRequested,
    /// All runtimes stopped within the grace period.
    AllStoppedWithin,
    /// Grace period ran out. Sets `reason` (stuck runtimes).
    GraceExceeded,

    // === Runtime ===
    /// The runtime launched its informer. Sets `controller`.
    RuntimeStarting,
    /// The initial list was applied to the cache. Sets `controller`.
    CacheSynced,
    /// The stop signal fired before the cache synced; no workers ran.
    /// Sets `controller`.
    CacheSyncAborted,
    /// The runtime began draining. Sets `controller`.
    RuntimeDraining,
    /// All tasks of the runtime exited. Sets `controller`.
    RuntimeStopped,
    /// A worker task died outside reconcile. Sets `controller`, `reason`.
    WorkerPanicked,

    // === Informer ===
    /// List or watch failed; a relist is scheduled.
    /// Sets `controller`, `attempt`, `delay_ms`, `reason`.
    WatchFailed,
    /// Periodic resync re-delivered cached objects.
    /// Sets `controller`, `attempt` (number of objects).
    ResyncTriggered,
    /// An object without a usable key was skipped. Sets `controller`, `reason`.
    KeyDerivationFailed,

    // === Processing ===
    /// The key is no longer in the cache; reconciling with no object.
    /// Sets `controller`, `key`.
    ObjectGone,
    /// The cache lookup failed; reconciling with no object.
    /// Sets `controller`, `key`, `reason`.
    LookupFailed,
    /// Reconcile succeeded and the key's retry count was cleared.
    /// Sets `controller`, `key`.
    Reconciled,
    /// Reconcile failed and the key was requeued with backoff.
    /// Sets `controller`, `key`, `attempt` (requeue number), `delay_ms`, `reason`.
    RetryScheduled,
    /// Reconcile failed with retries exhausted; the key was dropped.
    /// Sets `controller`, `key`, `attempt` (requeues spent), `reason`.
    ReconcileAbandoned,
}

impl EventKind {
    /// Severity at which the event should be logged.
    pub fn severity(self) -> LogLevel {
        use EventKind::*;
        match self {
            RegistrationFailed => LogLevel::Fatal,
            NothingToRun | GraceExceeded | CacheSyncAborted | WorkerPanicked | KeyDerivationFailed
            | LookupFailed | RetryScheduled | ReconcileAbandoned => LogLevel::Error,
            WatchFailed | StartRejected => LogLevel::Warning,
            ControllerRegistered | AlreadyRegistered | ControllerDeregistered | NotRegistered
            | ShutdownRequested | AllStoppedWithin | RuntimeStarting | CacheSynced
            | RuntimeDraining | RuntimeStopped | ObjectGone => LogLevel::Info,
            ResyncTriggered | Reconciled => LogLevel::Debug,
        }
    }

    /// Short stable label (kebab-case) for log lines.
    pub fn as_label(self) -> &'static str {
        use EventKind::*;
        match self {
            ControllerRegistered => "registered",
            AlreadyRegistered => "already-registered",
            RegistrationFailed => "registration-failed",
            ControllerDeregistered => "deregistered",
            NotRegistered => "not-registered",
            NothingToRun => "nothing-to-run",
            StartRejected => "start-rejected",
            ShutdownRequested => "shutdown-requested",
            AllStoppedWithin => "all-stopped-within-grace",
            GraceExceeded => "grace-exceeded",
            RuntimeStarting => "starting",
            CacheSynced => "cache-synced",
            CacheSyncAborted => "cache-sync-aborted",
            RuntimeDraining => "draining",
            RuntimeStopped => "stopped",
            WorkerPanicked => "worker-panicked",
            WatchFailed => "watch-failed",
            ResyncTriggered => "resync",
            KeyDerivationFailed => "bad-key",
            ObjectGone => "object-gone",
            LookupFailed => "lookup-failed",
            Reconciled => "reconciled",
            RetryScheduled => "retry",
            ReconcileAbandoned => "failed-finally",
        }
    }
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,
    /// Controller (handler) name.
    pub controller: Option<Arc<str>>,
    /// Object key.
    pub key: Option<Arc<str>>,
    /// Attempt / requeue count, or an object count for resyncs.
    pub attempt: Option<u32>,
    /// Delay in milliseconds (compact).
    pub delay_ms: Option<u32>,
    /// Human-readable reason (errors, details).
    pub reason: Option<Arc<str>>,
}

impl Event {
    /// Creates an event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            controller: None,
            key: None,
            attempt: None,
            delay_ms: None,
            reason: None,
        }
    }

    /// Attaches a controller name.
    #[inline]
    pub fn with_controller(mut self, name: impl Into<Arc<str>>) -> Self {
        self.controller = Some(name.into());
        self
    }

    /// Attaches an object key.
    #[inline]
    pub fn with_key(mut self, key: impl Into<Arc<str>>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Attaches an attempt count.
    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches a delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay_ms = Some(d.as_millis().min(u128::from(u32::MAX)) as u32);
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Delay as a [`Duration`].
    pub fn delay(&self) -> Option<Duration> {
        self.delay_ms.map(|ms| Duration::from_millis(u64::from(ms)))
    }
}
