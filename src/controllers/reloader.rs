//! # Reloader: reports configmap content changes.
//!
//! Watches configmaps carrying the `kontroller/reloader=true` label (in all
//! namespaces by default) and remembers a content hash per key, so periodic
//! resyncs that deliver an unchanged object stay quiet. Its event routing
//! drops the remembered hash when a configmap is deleted.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use crate::api::{EventRouting, Handler, LabelSelector, Namespace, Object, ResourceKind, Scope, content_hash, key_of};
use crate::cache::EventHandlers;
use crate::client::Client;
use crate::error::HandlerError;
use crate::queue::WorkQueue;

type Seen = Arc<Mutex<HashMap<String, String>>>;

/// Default handler name.
pub const RELOADER_NAME: &str = "reloader";

/// Label selector used unless overridden.
pub const DEFAULT_LABEL_SELECTOR: &str = "kontroller/reloader=true";

/// Configmap change reporter.
///
/// # Example
/// ```
/// use kontroller::Handler;
/// use kontroller::controllers::Reloader;
///
/// let r = Reloader::new("cfg").namespace("prod").label_selector("App = Web");
/// assert_eq!(r.scope().namespace.as_str(), Some("prod"));
/// assert_eq!(r.scope().selector.as_str(), "app=web");
/// ```
#[derive(Debug)]
pub struct Reloader {
    name: String,
    namespace: Namespace,
    selector: LabelSelector,
    seen: Seen,
}

impl Default for Reloader {
    fn default() -> Self {
        Self::new(RELOADER_NAME)
    }
}

impl Reloader {
    /// Reloader named `name`, all namespaces, default selector.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: Namespace::All,
            selector: LabelSelector::new(DEFAULT_LABEL_SELECTOR),
            seen: Seen::default(),
        }
    }

    /// Restricts the watch to one namespace (empty means all).
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Namespace::new(namespace);
        self
    }

    /// Replaces the label selector; the value is normalized.
    pub fn label_selector(mut self, selector: impl AsRef<str>) -> Self {
        self.selector = LabelSelector::new(selector);
        self
    }

    /// Records the hash for `key`; returns the previous one.
    fn remember(&self, key: String, hash: String) -> Option<String> {
        seen(&self.seen).insert(key, hash)
    }
}

fn seen(map: &Seen) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
    map.lock().unwrap_or_else(PoisonError::into_inner)
}

impl EventRouting for Reloader {
    fn routes(&self, queue: Arc<WorkQueue>) -> EventHandlers {
        let defaults = Arc::new(EventHandlers::enqueue(queue));
        let (add, update) = (Arc::clone(&defaults), Arc::clone(&defaults));
        let hashes = Arc::clone(&self.seen);
        EventHandlers::new(
            move |obj| add.on_add(obj),
            move |old, new| update.on_update(old, new),
            move |deleted| {
                if let Ok(key) = deleted.key() {
                    seen(&hashes).remove(&key);
                }
                defaults.on_delete(deleted);
            },
        )
    }
}

#[async_trait]
impl Handler for Reloader {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::CONFIG_MAPS
    }

    fn scope(&self) -> Scope {
        Scope::new(self.namespace.clone(), self.selector.clone())
    }

    async fn reconcile(&self, _client: &Client, object: Option<Arc<Object>>) -> Result<(), HandlerError> {
        let Some(obj) = object else {
            tracing::debug!(controller = %self.name, "configmap gone");
            return Ok(());
        };
        let key = key_of(&obj).map_err(HandlerError::fail)?;
        let hash = content_hash(&obj);
        match self.remember(key.clone(), hash.clone()) {
            Some(prev) if prev == hash => {
                tracing::debug!(controller = %self.name, %key, "configmap unchanged");
            }
            Some(_) => {
                tracing::info!(controller = %self.name, %key, hash = %&hash[..12], "configmap changed");
            }
            None => {
                tracing::info!(controller = %self.name, %key, hash = %&hash[..12], "configmap observed");
            }
        }
        Ok(())
    }

    fn event_routing(&self) -> Option<&dyn EventRouting> {
        Some(self)
    }
}
