//! # RuntimeBuilder: staged construction of a [`ControllerRuntime`].
//!
//! Every stage is its own type and exposes only the step that leads to the
//! next one, so a runtime cannot be built out of order or half-wired:
//!
//! ```text
//! RuntimeBuilder<Unbound>
//!   .handler(h)        ──► RuntimeBuilder<HandlerBound>
//!   .queue()           ──► RuntimeBuilder<QueueReady>
//!   .client(c, cfg)?   ──► RuntimeBuilder<ClientReady>    InvalidConnection
//!   .list_watch()?     ──► RuntimeBuilder<WatchReady>     UnsupportedKind
//!   .informer()        ──► RuntimeBuilder<CacheReady>     routing attached
//!   .build()           ──► ControllerRuntime
//! ```
//!
//! ## Example
//! ```
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use kontroller::client::{ConnectionConfig, MemoryCluster};
//! use kontroller::{Bus, Client, Handler, HandlerError, Object, ResourceKind, RuntimeBuilder, RuntimeSettings, Scope};
//!
//! struct Noop;
//!
//! #[async_trait]
//! impl Handler for Noop {
//!     fn name(&self) -> &str { "noop" }
//!     fn kind(&self) -> ResourceKind { ResourceKind::CONFIG_MAPS }
//!     fn scope(&self) -> Scope { Scope::all() }
//!     async fn reconcile(&self, _: &Client, _: Option<Arc<Object>>) -> Result<(), HandlerError> { Ok(()) }
//! }
//!
//! let cluster = MemoryCluster::new();
//! let runtime = RuntimeBuilder::new(RuntimeSettings::default(), Bus::new(16))
//!     .handler(Arc::new(Noop))
//!     .queue()
//!     .client(&cluster, &ConnectionConfig::default())?
//!     .list_watch()?
//!     .informer()
//!     .build();
//! assert_eq!(runtime.name(), "noop");
//! # Ok::<(), kontroller::ConfigurationError>(())
//! ```

use std::sync::Arc;

use crate::api::HandlerRef;
use crate::cache::{EventHandlers, Informer, ListWatch};
use crate::client::{Client, Connect, ConnectionConfig, kinds};
use crate::error::ConfigurationError;
use crate::events::Bus;
use crate::queue::{ItemBackoffLimiter, RateLimiter, WorkQueue};

use super::runtime::{ControllerRuntime, RuntimeSettings};

/// Nothing bound yet.
pub struct Unbound;

/// Handler bound.
pub struct HandlerBound {
    handler: HandlerRef,
}

/// Queue created.
pub struct QueueReady {
    handler: HandlerRef,
    queue: Arc<WorkQueue>,
}

/// Client connected.
pub struct ClientReady {
    handler: HandlerRef,
    queue: Arc<WorkQueue>,
    client: Client,
}

/// List/watch request resolved.
pub struct WatchReady {
    handler: HandlerRef,
    queue: Arc<WorkQueue>,
    client: Client,
    list_watch: ListWatch,
}

/// Cache and routing attached.
pub struct CacheReady {
    handler: HandlerRef,
    queue: Arc<WorkQueue>,
    client: Client,
    informer: Informer,
}

/// Staged builder; see the module docs for the sequence.
pub struct RuntimeBuilder<S> {
    settings: RuntimeSettings,
    bus: Bus,
    stage: S,
}

impl RuntimeBuilder<Unbound> {
    /// Starts a build with the given settings, publishing into `bus`.
    pub fn new(settings: RuntimeSettings, bus: Bus) -> Self {
        Self {
            settings,
            bus,
            stage: Unbound,
        }
    }

    /// Binds the handler.
    pub fn handler(self, handler: HandlerRef) -> RuntimeBuilder<HandlerBound> {
        RuntimeBuilder {
            settings: self.settings,
            bus: self.bus,
            stage: HandlerBound { handler },
        }
    }
}

impl RuntimeBuilder<HandlerBound> {
    /// Creates the work queue with the default per-key backoff.
    pub fn queue(self) -> RuntimeBuilder<QueueReady> {
        self.queue_with(ItemBackoffLimiter::default())
    }

    /// Creates the work queue with a custom rate limiter.
    pub fn queue_with(self, limiter: impl RateLimiter) -> RuntimeBuilder<QueueReady> {
        let HandlerBound { handler } = self.stage;
        let queue = Arc::new(WorkQueue::new(limiter));
        RuntimeBuilder {
            settings: self.settings,
            bus: self.bus,
            stage: QueueReady { handler, queue },
        }
    }
}

impl RuntimeBuilder<QueueReady> {
    /// Connects the cluster client.
    ///
    /// Fails with [`ConfigurationError::InvalidConnection`] on unusable settings.
    pub fn client(
        self,
        connector: &dyn Connect,
        config: &ConnectionConfig,
    ) -> Result<RuntimeBuilder<ClientReady>, ConfigurationError> {
        let client = connector.connect(config)?;
        let QueueReady { handler, queue } = self.stage;
        Ok(RuntimeBuilder {
            settings: self.settings,
            bus: self.bus,
            stage: ClientReady { handler, queue, client },
        })
    }
}

impl RuntimeBuilder<ClientReady> {
    /// Resolves the handler's kind and scope into a list/watch request.
    ///
    /// Fails with [`ConfigurationError::UnsupportedKind`] for unknown resources.
    pub fn list_watch(self) -> Result<RuntimeBuilder<WatchReady>, ConfigurationError> {
        let ClientReady { handler, queue, client } = self.stage;
        let kind = handler.kind();
        let getter = kinds::getter(kind.resource()).ok_or_else(|| ConfigurationError::UnsupportedKind {
            kind: kind.resource().to_owned(),
        })?;
        let scope = handler.scope();
        let list_watch = ListWatch::filtered(getter(&client), kind.resource(), &scope.namespace, |params| {
            params.label_selector = scope.selector.clone();
        });
        Ok(RuntimeBuilder {
            settings: self.settings,
            bus: self.bus,
            stage: WatchReady {
                handler,
                queue,
                client,
                list_watch,
            },
        })
    }
}

impl RuntimeBuilder<WatchReady> {
    /// Creates the informer and attaches event routing: the handler's own
    /// [`EventRouting`](crate::EventRouting) if it has one, the default
    /// enqueue-by-key routing otherwise.
    pub fn informer(self) -> RuntimeBuilder<CacheReady> {
        let WatchReady {
            handler,
            queue,
            client,
            list_watch,
        } = self.stage;
        let routes = match handler.event_routing() {
            Some(routing) => routing.routes(Arc::clone(&queue)),
            None => EventHandlers::enqueue(Arc::clone(&queue)),
        };
        let informer = Informer::new(
            handler.name(),
            Arc::new(list_watch),
            routes,
            self.settings.resync,
            self.bus.clone(),
        )
        .with_relist_backoff(self.settings.relist);
        RuntimeBuilder {
            settings: self.settings,
            bus: self.bus,
            stage: CacheReady {
                handler,
                queue,
                client,
                informer,
            },
        }
    }
}

impl RuntimeBuilder<CacheReady> {
    /// Finalizes the runtime.
    pub fn build(self) -> ControllerRuntime {
        let CacheReady {
            handler,
            queue,
            client,
            informer,
        } = self.stage;
        ControllerRuntime::new(handler, queue, client, informer, self.settings, self.bus)
    }
}
