//! # ControllerRuntime: one handler, one cache, one queue, N workers.
//!
//! ## States
//! ```text
//! Created ──start()──► CacheSyncing ──synced──► Running ──token──► Draining ──joined──► Stopped
//!                           │
//!                           └──token before sync──► Stopped   (CacheSyncAborted, no workers)
//! ```
//!
//! ## Worker loop
//! ```text
//! loop {
//!   key = queue.get()            (None → exit)
//!   obj = store.get_by_key(key)  (missing → ObjectGone, error → LookupFailed; both reconcile None)
//!   res = handler.reconcile(client, obj)   (panic → HandlerError::Panicked)
//!   Ok  → forget(key), Reconciled
//!   Err → requeues < max ? add_rate_limited + RetryScheduled
//!                        : forget + ReconcileAbandoned
//!   done(key)
//!   after Err: sleep(worker_interval) or exit on token
//! }
//! ```
//!
//! ## Rules
//! - A runtime is started at most once.
//! - The queue guarantees a key is never processed by two workers at a time.
//! - Cancellation never interrupts a running reconcile; workers exit at the
//!   next `get` or pause.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::api::{HandlerRef, Object};
use crate::cache::{Informer, Store};
use crate::client::Client;
use crate::config::Config;
use crate::error::{HandlerError, RuntimeError};
use crate::events::{Bus, Event, EventKind};
use crate::policies::BackoffPolicy;
use crate::queue::WorkQueue;
use crate::subscribers::panic_message;

/// Per-runtime settings derived from [`Config`].
#[derive(Clone, Debug, PartialEq)]
pub struct RuntimeSettings {
    /// Worker tasks per runtime (at least one is started).
    pub threads: usize,
    /// Requeues before a failing key is dropped.
    pub max_retries: u32,
    /// Pause after an unsuccessful worker iteration.
    pub worker_interval: Duration,
    /// Full resync interval; `None` disables it.
    pub resync: Option<Duration>,
    /// Backoff between failed list/watch attempts.
    pub relist: BackoffPolicy,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for RuntimeSettings {
    fn from(cfg: &Config) -> Self {
        Self {
            threads: cfg.threads(),
            max_retries: cfg.max_retries(),
            worker_interval: cfg.worker_interval(),
            resync: cfg.resync(),
            relist: BackoffPolicy::relist(),
        }
    }
}

/// Lifecycle state of a runtime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RuntimeState {
    /// Built, not started.
    Created,
    /// Informer running, waiting for the first list.
    CacheSyncing,
    /// Workers processing keys.
    Running,
    /// Stop requested; waiting for tasks to finish.
    Draining,
    /// Every task of the runtime has exited.
    Stopped,
}

/// How a runtime ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RuntimeExit {
    /// Stopped before the cache synced; no worker ever ran.
    CacheSyncAborted,
    /// Ran and drained normally.
    Drained,
}

/// A fully wired controller. Built by [`RuntimeBuilder`](super::RuntimeBuilder).
pub struct ControllerRuntime {
    name: Arc<str>,
    handler: HandlerRef,
    queue: Arc<WorkQueue>,
    client: Client,
    informer: Arc<Informer>,
    store: Arc<Store>,
    settings: RuntimeSettings,
    bus: Bus,
    state: watch::Sender<RuntimeState>,
    started: AtomicBool,
}

impl std::fmt::Debug for ControllerRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerRuntime")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl ControllerRuntime {
    pub(crate) fn new(
        handler: HandlerRef,
        queue: Arc<WorkQueue>,
        client: Client,
        informer: Informer,
        settings: RuntimeSettings,
        bus: Bus,
    ) -> Self {
        let store = informer.store();
        Self {
            name: Arc::from(handler.name()),
            handler,
            queue,
            client,
            informer: Arc::new(informer),
            store,
            settings,
            bus,
            state: watch::Sender::new(RuntimeState::Created),
            started: AtomicBool::new(false),
        }
    }

    /// Handler name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state.
    pub fn state(&self) -> RuntimeState {
        *self.state.borrow()
    }

    /// Receiver of state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<RuntimeState> {
        self.state.subscribe()
    }

    /// The runtime's work queue.
    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    /// The runtime's cache.
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// True once the first list was applied.
    pub fn has_synced(&self) -> bool {
        self.informer.has_synced()
    }

    /// Waits until the runtime reaches [`RuntimeState::Stopped`].
    pub async fn stopped(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|s| *s == RuntimeState::Stopped).await;
    }

    /// Spawns the informer and workers; returns immediately.
    ///
    /// Everything stops when `token` is cancelled.
    pub fn start(self: &Arc<Self>, token: CancellationToken) -> Result<JoinHandle<RuntimeExit>, RuntimeError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(RuntimeError::AlreadyStarted {
                name: self.name.to_string(),
            });
        }
        Ok(tokio::spawn(Arc::clone(self).run(token)))
    }

    fn publish(&self, ev: Event) {
        self.bus.publish(ev.with_controller(Arc::clone(&self.name)));
    }

    fn set_state(&self, state: RuntimeState) {
        self.state.send_replace(state);
    }

    async fn run(self: Arc<Self>, token: CancellationToken) -> RuntimeExit {
        self.set_state(RuntimeState::CacheSyncing);
        self.publish(Event::new(EventKind::RuntimeStarting));
        let informer = tokio::spawn(Arc::clone(&self.informer).run(token.clone()));

        if !self.informer.wait_for_sync(&token).await {
            self.queue.shutdown();
            let _ = informer.await;
            self.publish(Event::new(EventKind::CacheSyncAborted).with_reason("stopped before the cache synced"));
            self.set_state(RuntimeState::Stopped);
            return RuntimeExit::CacheSyncAborted;
        }

        self.set_state(RuntimeState::Running);
        let mut workers = JoinSet::new();
        for _ in 0..self.settings.threads.max(1) {
            workers.spawn(Arc::clone(&self).worker(token.clone()));
        }

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                Some(joined) = workers.join_next() => {
                    if let Err(err) = joined {
                        self.publish(Event::new(EventKind::WorkerPanicked).with_reason(err.to_string()));
                        if !token.is_cancelled() {
                            workers.spawn(Arc::clone(&self).worker(token.clone()));
                        }
                    }
                }
            }
        }

        self.set_state(RuntimeState::Draining);
        self.publish(Event::new(EventKind::RuntimeDraining));
        self.queue.shutdown();
        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined {
                self.publish(Event::new(EventKind::WorkerPanicked).with_reason(err.to_string()));
            }
        }
        let _ = informer.await;

        self.set_state(RuntimeState::Stopped);
        self.publish(Event::new(EventKind::RuntimeStopped));
        RuntimeExit::Drained
    }

    async fn worker(self: Arc<Self>, token: CancellationToken) {
        while let Some(succeeded) = self.process_next_item().await {
            if succeeded {
                continue;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.settings.worker_interval) => {}
                _ = token.cancelled() => return,
            }
        }
    }

    /// Processes one key. `None` once the queue is shut down.
    pub(crate) async fn process_next_item(&self) -> Option<bool> {
        let key = self.queue.get().await?;
        let succeeded = self.process(&key).await;
        self.queue.done(&key);
        Some(succeeded)
    }

    async fn process(&self, key: &str) -> bool {
        let object = self.lookup(key);
        let reconciled = AssertUnwindSafe(self.handler.reconcile(&self.client, object))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(HandlerError::Panicked {
                    info: panic_message(panic.as_ref()),
                })
            });

        match reconciled {
            Ok(()) => {
                self.queue.forget(key);
                self.publish(Event::new(EventKind::Reconciled).with_key(key));
                true
            }
            Err(err) => {
                self.retry_or_drop(key, &err);
                false
            }
        }
    }

    fn lookup(&self, key: &str) -> Option<Arc<Object>> {
        match self.store.get_by_key(key) {
            Ok(Some(obj)) => Some(obj),
            Ok(None) => {
                self.publish(Event::new(EventKind::ObjectGone).with_key(key));
                None
            }
            Err(err) => {
                self.publish(
                    Event::new(EventKind::LookupFailed)
                        .with_key(key)
                        .with_reason(err.to_string()),
                );
                None
            }
        }
    }

    fn retry_or_drop(&self, key: &str, err: &HandlerError) {
        let requeues = self.queue.num_requeues(key);
        if requeues < self.settings.max_retries {
            let delay = self.queue.add_rate_limited(key);
            self.publish(
                Event::new(EventKind::RetryScheduled)
                    .with_key(key)
                    .with_attempt(requeues + 1)
                    .with_delay(delay)
                    .with_reason(err.to_string()),
            );
        } else {
            self.queue.forget(key);
            self.publish(
                Event::new(EventKind::ReconcileAbandoned)
                    .with_key(key)
                    .with_attempt(requeues)
                    .with_reason(err.to_string()),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{Handler, ResourceKind, Scope};
    use crate::client::{ConnectionConfig, MemoryCluster};
    use crate::core::RuntimeBuilder;
    use crate::policies::JitterPolicy;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::sync::broadcast;

    enum Mode {
        Record,
        Panic,
    }

    struct Scripted {
        mode: Mode,
        calls: Mutex<Vec<Option<Arc<Object>>>>,
    }

    impl Scripted {
        fn new(mode: Mode) -> Arc<Self> {
            Arc::new(Self {
                mode,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<Option<Arc<Object>>> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Handler for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }
        fn kind(&self) -> ResourceKind {
            ResourceKind::CONFIG_MAPS
        }
        fn scope(&self) -> Scope {
            Scope::all()
        }
        async fn reconcile(&self, _: &Client, object: Option<Arc<Object>>) -> Result<(), HandlerError> {
            self.calls.lock().unwrap().push(object);
            match self.mode {
                Mode::Record => Ok(()),
                Mode::Panic => panic!("reconcile blew up"),
            }
        }
    }

    fn runtime(cluster: &MemoryCluster, handler: Arc<Scripted>, max_retries: u32, bus: &Bus) -> Arc<ControllerRuntime> {
        let settings = RuntimeSettings {
            threads: 1,
            max_retries,
            worker_interval: Duration::from_millis(1),
            resync: None,
            relist: BackoffPolicy {
                first: Duration::from_millis(2),
                max: Duration::from_millis(10),
                factor: 2.0,
                jitter: JitterPolicy::None,
            },
        };
        Arc::new(
            RuntimeBuilder::new(settings, bus.clone())
                .handler(handler)
                .queue()
                .client(cluster, &ConnectionConfig::default())
                .unwrap()
                .list_watch()
                .unwrap()
                .informer()
                .build(),
        )
    }

    /// Collects events up to and including the first one of `kind`.
    async fn until(rx: &mut broadcast::Receiver<Event>, kind: EventKind) -> Vec<Event> {
        let mut seen = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let ev = rx.recv().await.unwrap();
                let done = ev.kind == kind;
                seen.push(ev);
                if done {
                    break;
                }
            }
        })
        .await
        .expect("event not published within 5s");
        seen
    }

    fn count(events: &[Event], kind: EventKind) -> usize {
        events.iter().filter(|e| e.kind == kind).count()
    }

    #[tokio::test]
    async fn cancel_before_sync_stops_without_workers() {
        let cluster = MemoryCluster::new();
        cluster.fail_next_lists(u32::MAX);
        cluster.apply("configmaps", Object::new(Some("ns"), "x")).unwrap();
        let bus = Bus::new(256);
        let mut rx = bus.subscribe();
        let handler = Scripted::new(Mode::Record);
        let rt = runtime(&cluster, Arc::clone(&handler), 5, &bus);
        let mut states = rt.subscribe_state();

        let token = CancellationToken::new();
        let join = rt.start(token.clone()).unwrap();
        assert!(matches!(rt.start(token.clone()), Err(RuntimeError::AlreadyStarted { .. })));
        states.wait_for(|s| *s == RuntimeState::CacheSyncing).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!rt.has_synced());

        token.cancel();
        assert_eq!(join.await.unwrap(), RuntimeExit::CacheSyncAborted);
        rt.stopped().await;
        assert_eq!(rt.state(), RuntimeState::Stopped);

        let events = until(&mut rx, EventKind::CacheSyncAborted).await;
        assert!(count(&events, EventKind::WatchFailed) >= 1);
        assert_eq!(count(&events, EventKind::RuntimeDraining), 0);
        assert!(rx.try_recv().is_err());
        assert!(handler.calls().is_empty());
    }

    #[tokio::test]
    async fn panicking_reconcile_goes_through_retry_policy() {
        let cluster = MemoryCluster::new();
        cluster.apply("configmaps", Object::new(Some("ns"), "x")).unwrap();
        let bus = Bus::new(256);
        let mut rx = bus.subscribe();
        let handler = Scripted::new(Mode::Panic);
        let rt = runtime(&cluster, Arc::clone(&handler), 2, &bus);

        let token = CancellationToken::new();
        let join = rt.start(token.clone()).unwrap();
        let events = until(&mut rx, EventKind::ReconcileAbandoned).await;

        let retries: Vec<&Event> = events.iter().filter(|e| e.kind == EventKind::RetryScheduled).collect();
        assert_eq!(retries.len(), 2);
        assert!(
            events
                .iter()
                .filter(|e| matches!(e.kind, EventKind::RetryScheduled | EventKind::ReconcileAbandoned))
                .all(|e| e.reason.as_deref().is_some_and(|r| r.contains("reconcile blew up")))
        );
        assert_eq!(count(&events, EventKind::WorkerPanicked), 0);
        assert_eq!(handler.calls().len(), 3);

        tokio::time::timeout(Duration::from_secs(5), async {
            while rt.queue().is_tracked("ns/x") {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();

        token.cancel();
        assert_eq!(join.await.unwrap(), RuntimeExit::Drained);
        assert_eq!(rt.state(), RuntimeState::Stopped);
    }

    #[tokio::test]
    async fn failed_lookup_still_reconciles_with_none() {
        let cluster = MemoryCluster::new();
        let bus = Bus::new(256);
        let mut rx = bus.subscribe();
        let handler = Scripted::new(Mode::Record);
        let rt = runtime(&cluster, Arc::clone(&handler), 5, &bus);
        let mut states = rt.subscribe_state();

        let token = CancellationToken::new();
        let join = rt.start(token.clone()).unwrap();
        states.wait_for(|s| *s == RuntimeState::Running).await.unwrap();

        rt.store().poison();
        rt.queue().add("ns/x");
        let events = until(&mut rx, EventKind::Reconciled).await;

        let failed: Vec<&Event> = events.iter().filter(|e| e.kind == EventKind::LookupFailed).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].key.as_deref(), Some("ns/x"));
        assert_eq!(count(&events, EventKind::ObjectGone), 0);
        let calls = handler.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].is_none());

        token.cancel();
        rt.stopped().await;
        assert_eq!(join.await.unwrap(), RuntimeExit::Drained);
    }
}
