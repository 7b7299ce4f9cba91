//! # Manager: named registry of controller runtimes.
//!
//! The [`Manager`] owns the event bus, the subscriber fan-out, the shared
//! connection settings and a `name → runtime` registry.
//!
//! ## Lifecycle
//! ```text
//! ManagerBuilder::build()
//!   └─► listener: Bus ──► SubscriberSet::emit(&Event)
//!
//! register(handler)      ─► RuntimeBuilder ... build() ─► registry[name]
//!                           duplicate name → AlreadyRegistered (no-op)
//!                           config error   → Err (fatal for the caller)
//! deregister(name)       ─► registry.remove(name)  (a started runtime keeps running)
//! start_all(&token)      ─► runtime.start(token.child_token()) for each
//!                           empty registry → NothingToRun
//! token.cancel()         ─► every runtime drains on its own
//! shutdown(grace)        ─► wait for launched runtimes:
//!                             ├─ all stopped  → AllStoppedWithin
//!                             └─ grace spent  → GraceExceeded + Err(stuck)
//!                           then flush subscribers
//! ```

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::HandlerRef;
use crate::client::{Connect, ConnectionConfig};
use crate::config::Config;
use crate::error::{ConfigurationError, RuntimeError};
use crate::events::{Bus, Event, EventKind};
use crate::subscribers::{Subscribe, SubscriberSet};

use super::builder::RuntimeBuilder;
use super::runtime::{ControllerRuntime, RuntimeExit, RuntimeSettings};
use super::shutdown::wait_for_shutdown_signal;

/// Result of [`Manager::register`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Registration {
    /// A runtime was built and stored.
    Registered,
    /// The name was taken; nothing changed.
    AlreadyRegistered,
}

/// Result of [`Manager::deregister`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Deregistration {
    /// The runtime was removed from the registry.
    Deregistered,
    /// The name was unknown; nothing changed.
    NotRegistered,
}

/// Result of [`Manager::start_all`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartOutcome {
    /// This many runtimes were launched.
    Started(usize),
    /// The registry was empty.
    NothingToRun,
}

/// Connector used when the crate is built without a transport.
#[cfg(not(feature = "http"))]
struct NoTransport;

#[cfg(not(feature = "http"))]
impl Connect for NoTransport {
    fn connect(&self, _config: &ConnectionConfig) -> Result<crate::client::Client, ConfigurationError> {
        Err(ConfigurationError::InvalidConnection {
            reason: "built without the `http` feature; supply a connector with ManagerBuilder::with_connector".into(),
        })
    }
}

fn default_connector() -> Arc<dyn Connect> {
    #[cfg(feature = "http")]
    {
        Arc::new(crate::client::HttpConnector)
    }
    #[cfg(not(feature = "http"))]
    {
        Arc::new(NoTransport)
    }
}

/// Builder for a [`Manager`].
pub struct ManagerBuilder {
    cfg: Config,
    connection: ConnectionConfig,
    connector: Option<Arc<dyn Connect>>,
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl ManagerBuilder {
    /// Manager using `cfg` and connecting every controller with `connection`.
    pub fn new(cfg: Config, connection: ConnectionConfig) -> Self {
        Self {
            cfg,
            connection,
            connector: None,
            subscribers: Vec::new(),
        }
    }

    /// Replaces the HTTP connector (e.g. with a [`MemoryCluster`](crate::client::MemoryCluster)).
    pub fn with_connector(mut self, connector: impl Connect) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    /// Sets event subscribers (logging, metrics, test recorders).
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Builds the manager and starts its event listener.
    ///
    /// Must be called inside a tokio runtime.
    pub fn build(self) -> Arc<Manager> {
        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        let subs = SubscriberSet::new(self.subscribers);
        let listener_stop = CancellationToken::new();
        let listener = spawn_listener(&bus, subs, listener_stop.clone());

        Arc::new(Manager {
            cfg: self.cfg,
            connection: self.connection,
            connector: self.connector.unwrap_or_else(default_connector),
            bus,
            registry: RwLock::new(BTreeMap::new()),
            launched: Mutex::new(Vec::new()),
            listener: Mutex::new(Some(listener)),
            listener_stop,
        })
    }
}

/// Forwards bus events to the subscribers until `stop`, then drains what is
/// already buffered and flushes the subscriber queues.
fn spawn_listener(bus: &Bus, subs: SubscriberSet, stop: CancellationToken) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                msg = rx.recv() => match msg {
                    Ok(ev) => subs.emit(&ev),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "event listener lagged; events dropped");
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = stop.cancelled() => {
                    while let Ok(ev) = rx.try_recv() {
                        subs.emit(&ev);
                    }
                    break;
                }
            }
        }
        subs.shutdown().await;
    })
}

struct Launched {
    runtime: Arc<ControllerRuntime>,
    join: JoinHandle<RuntimeExit>,
}

/// Owns, starts and stops a named collection of controller runtimes.
pub struct Manager {
    cfg: Config,
    connection: ConnectionConfig,
    connector: Arc<dyn Connect>,
    bus: Bus,
    registry: RwLock<BTreeMap<String, Arc<ControllerRuntime>>>,
    launched: Mutex<Vec<Launched>>,
    listener: Mutex<Option<JoinHandle<()>>>,
    listener_stop: CancellationToken,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Manager {
    /// Shorthand for [`ManagerBuilder::new`].
    pub fn builder(cfg: Config, connection: ConnectionConfig) -> ManagerBuilder {
        ManagerBuilder::new(cfg, connection)
    }

    /// Application configuration.
    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// The event bus every runtime publishes into.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Builds a runtime for `handler` and stores it under the handler's name.
    ///
    /// A taken name is a logged no-op. Configuration errors (bad connection,
    /// unsupported kind) are returned and leave the registry unchanged.
    pub fn register(&self, handler: HandlerRef) -> Result<Registration, ConfigurationError> {
        let name = handler.name().to_owned();
        if self.read_registry().contains_key(&name) {
            self.bus
                .publish(Event::new(EventKind::AlreadyRegistered).with_controller(name.as_str()));
            return Ok(Registration::AlreadyRegistered);
        }

        let runtime = match self.build_runtime(handler) {
            Ok(runtime) => runtime,
            Err(err) => {
                self.bus.publish(
                    Event::new(EventKind::RegistrationFailed)
                        .with_controller(name.as_str())
                        .with_reason(err.to_string()),
                );
                return Err(err);
            }
        };

        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        match registry.entry(name) {
            Entry::Occupied(entry) => {
                self.bus
                    .publish(Event::new(EventKind::AlreadyRegistered).with_controller(entry.key().as_str()));
                Ok(Registration::AlreadyRegistered)
            }
            Entry::Vacant(entry) => {
                self.bus
                    .publish(Event::new(EventKind::ControllerRegistered).with_controller(entry.key().as_str()));
                entry.insert(Arc::new(runtime));
                Ok(Registration::Registered)
            }
        }
    }

    fn build_runtime(&self, handler: HandlerRef) -> Result<ControllerRuntime, ConfigurationError> {
        Ok(RuntimeBuilder::new(RuntimeSettings::from(&self.cfg), self.bus.clone())
            .handler(handler)
            .queue()
            .client(self.connector.as_ref(), &self.connection)?
            .list_watch()?
            .informer()
            .build())
    }

    /// Removes `name` from the registry. A started runtime keeps running
    /// until the stop token fires.
    pub fn deregister(&self, name: &str) -> Deregistration {
        let removed = self
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
        match removed {
            Some(_) => {
                self.bus
                    .publish(Event::new(EventKind::ControllerDeregistered).with_controller(name));
                Deregistration::Deregistered
            }
            None => {
                self.bus.publish(Event::new(EventKind::NotRegistered).with_controller(name));
                Deregistration::NotRegistered
            }
        }
    }

    /// Launches every registered runtime and returns without waiting.
    ///
    /// Each runtime gets a child of `token`; cancelling `token` stops them all.
    pub fn start_all(&self, token: &CancellationToken) -> StartOutcome {
        let runtimes: Vec<Arc<ControllerRuntime>> = self.read_registry().values().cloned().collect();
        if runtimes.is_empty() {
            self.bus
                .publish(Event::new(EventKind::NothingToRun).with_reason("no controllers registered"));
            return StartOutcome::NothingToRun;
        }

        let mut launched = lock(&self.launched);
        let mut started = 0;
        for runtime in runtimes {
            match runtime.start(token.child_token()) {
                Ok(join) => {
                    launched.push(Launched { runtime, join });
                    started += 1;
                }
                Err(err) => self.bus.publish(
                    Event::new(EventKind::StartRejected)
                        .with_controller(runtime.name())
                        .with_reason(err.to_string()),
                ),
            }
        }
        StartOutcome::Started(started)
    }

    /// Waits up to `grace` for every launched runtime to stop, then flushes
    /// the subscribers. Does not cancel anything itself. Runtimes still
    /// running after `grace` stay tracked for the next call.
    ///
    /// After it returns, every event published so far has been delivered.
    pub async fn shutdown(&self, grace: Duration) -> Result<(), RuntimeError> {
        let mut launched = std::mem::take(&mut *lock(&self.launched));
        let all = async {
            for l in launched.iter_mut() {
                let _ = (&mut l.join).await;
            }
        };
        let waited = tokio::time::timeout(grace, all).await;
        let outcome = match waited {
            Ok(()) => {
                self.bus.publish(Event::new(EventKind::AllStoppedWithin));
                Ok(())
            }
            Err(_) => {
                launched.retain(|l| !l.join.is_finished());
                let stuck: Vec<String> = launched.iter().map(|l| l.runtime.name().to_owned()).collect();
                // Still running; a later shutdown waits for them again.
                lock(&self.launched).extend(launched);
                self.bus
                    .publish(Event::new(EventKind::GraceExceeded).with_reason(stuck.join(", ")));
                Err(RuntimeError::GraceExceeded { grace, stuck })
            }
        };
        self.flush_events().await;
        outcome
    }

    async fn flush_events(&self) {
        self.listener_stop.cancel();
        let listener = lock(&self.listener).take();
        if let Some(listener) = listener {
            let _ = listener.await;
        }
    }

    /// Starts everything, waits for a termination signal (or `token`),
    /// cancels `token` and drains within the configured grace.
    pub async fn run_until_signal(&self, token: CancellationToken) -> Result<(), RuntimeError> {
        self.start_all(&token);

        let requested = tokio::select! {
            signal = wait_for_shutdown_signal() => match signal {
                Ok(signal) => Ok(signal.to_string()),
                Err(err) => Err(RuntimeError::SignalSetup { reason: err.to_string() }),
            },
            _ = token.cancelled() => Ok("stop token cancelled".to_owned()),
        };
        let reason = match requested {
            Ok(reason) => reason,
            Err(err) => {
                token.cancel();
                let _ = self.shutdown(self.cfg.grace()).await;
                return Err(err);
            }
        };

        self.bus
            .publish(Event::new(EventKind::ShutdownRequested).with_reason(reason));
        token.cancel();
        self.shutdown(self.cfg.grace()).await
    }

    fn read_registry(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, Arc<ControllerRuntime>>> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.read_registry().keys().cloned().collect()
    }

    /// Number of registered runtimes.
    pub fn len(&self) -> usize {
        self.read_registry().len()
    }

    /// True if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.read_registry().is_empty()
    }

    /// The runtime registered as `name`.
    pub fn get(&self, name: &str) -> Option<Arc<ControllerRuntime>> {
        self.read_registry().get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{Handler, Object, ResourceKind, Scope};
    use crate::client::{Client, MemoryCluster};
    use crate::error::HandlerError;
    use async_trait::async_trait;

    struct Named(&'static str, ResourceKind);

    #[async_trait]
    impl Handler for Named {
        fn name(&self) -> &str {
            self.0
        }
        fn kind(&self) -> ResourceKind {
            self.1.clone()
        }
        fn scope(&self) -> Scope {
            Scope::all()
        }
        async fn reconcile(&self, _: &Client, _: Option<Arc<Object>>) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    fn manager() -> Arc<Manager> {
        Manager::builder(Config::default(), ConnectionConfig::default())
            .with_connector(MemoryCluster::new())
            .build()
    }

    #[tokio::test]
    async fn registry_operations() {
        let m = manager();
        assert!(m.is_empty());
        assert_eq!(
            m.register(Arc::new(Named("a", ResourceKind::PODS))).unwrap(),
            Registration::Registered
        );
        assert_eq!(
            m.register(Arc::new(Named("a", ResourceKind::SECRETS))).unwrap(),
            Registration::AlreadyRegistered
        );
        assert_eq!(m.len(), 1);
        assert_eq!(m.deregister("nope"), Deregistration::NotRegistered);
        assert_eq!(m.deregister("a"), Deregistration::Deregistered);
        assert!(m.get("a").is_none());
    }

    #[tokio::test]
    async fn config_errors_leave_registry_untouched() {
        let m = manager();
        let err = m
            .register(Arc::new(Named("w", ResourceKind::new("x/v1", "Widget", "widgets"))))
            .unwrap_err();
        assert_eq!(err.as_label(), "config_unsupported_kind");
        assert!(m.is_empty());
    }

    #[tokio::test]
    async fn start_twice_is_rejected_per_runtime() {
        let m = manager();
        m.register(Arc::new(Named("a", ResourceKind::CONFIG_MAPS))).unwrap();
        let token = CancellationToken::new();
        assert_eq!(m.start_all(&token), StartOutcome::Started(1));
        assert_eq!(m.start_all(&token), StartOutcome::Started(0));
        token.cancel();
        m.shutdown(Duration::from_secs(5)).await.unwrap();
    }
}
