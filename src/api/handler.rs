//! # Reconciliation handler contract.
//!
//! A [`Handler`] is the pluggable unit the manager runs: it names itself,
//! says which objects it cares about, and reconciles one object at a time.
//!
//! Custom event routing is an optional second capability. A handler that
//! wants to decide which keys reach the queue implements [`EventRouting`] and
//! returns itself from [`Handler::event_routing`]; the runtime then uses its
//! add/update/delete functions instead of the defaults, all three together.
//!
//! # Example
//! ```
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use kontroller::{Client, Handler, HandlerError, Object, ResourceKind, Scope};
//!
//! struct Audit;
//!
//! #[async_trait]
//! impl Handler for Audit {
//!     fn name(&self) -> &str { "audit" }
//!     fn kind(&self) -> ResourceKind { ResourceKind::SECRETS }
//!     fn scope(&self) -> Scope { Scope::all() }
//!
//!     async fn reconcile(&self, _client: &Client, object: Option<Arc<Object>>) -> Result<(), HandlerError> {
//!         if let Some(obj) = object {
//!             println!("saw {}", obj.name());
//!         }
//!         Ok(())
//!     }
//! }
//! ```

use std::sync::Arc;

use async_trait::async_trait;

use super::{kind::ResourceKind, object::Object, selector::LabelSelector};
use crate::{cache::EventHandlers, client::Client, error::HandlerError, queue::WorkQueue};

/// Namespace filter of a watch.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// Every namespace (and cluster-scoped objects).
    #[default]
    All,
    /// A single namespace.
    Named(String),
}

impl Namespace {
    /// Builds a filter; an empty name means [`Namespace::All`].
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        if name.is_empty() {
            Namespace::All
        } else {
            Namespace::Named(name)
        }
    }

    /// The namespace name, `None` for all.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Namespace::All => None,
            Namespace::Named(ns) => Some(ns),
        }
    }

    /// True if an object in `namespace` passes this filter.
    pub fn contains(&self, namespace: Option<&str>) -> bool {
        match self {
            Namespace::All => true,
            Namespace::Named(ns) => namespace == Some(ns.as_str()),
        }
    }
}

/// Which objects a handler watches.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Scope {
    /// Namespace filter.
    pub namespace: Namespace,
    /// Normalized label selector.
    pub selector: LabelSelector,
}

impl Scope {
    /// Every object of the kind.
    pub fn all() -> Self {
        Self::default()
    }

    /// Explicit namespace and selector.
    pub fn new(namespace: Namespace, selector: LabelSelector) -> Self {
        Self { namespace, selector }
    }
}

/// # Reconciliation unit for one resource kind.
///
/// ### Implementation requirements
/// - `name` is the registry key; keep it stable for the life of the process.
/// - `reconcile` must tolerate `None` (the object was deleted before the key
///   was processed) and must be idempotent: periodic resync delivers every
///   cached object again.
/// - Return `Err` only for conditions worth retrying; the runtime requeues
///   with backoff up to the configured limit, then drops the key.
/// - There is no per-call timeout; a hung reconcile blocks its worker.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Unique handler name.
    fn name(&self) -> &str;

    /// Resource kind to watch.
    fn kind(&self) -> ResourceKind;

    /// Namespace and label scope of the watch.
    fn scope(&self) -> Scope;

    /// Drives one object toward its desired state.
    async fn reconcile(&self, client: &Client, object: Option<Arc<Object>>) -> Result<(), HandlerError>;

    /// Custom routing capability, if this handler has one.
    fn event_routing(&self) -> Option<&dyn EventRouting> {
        None
    }
}

/// Shared handle to a handler.
pub type HandlerRef = Arc<dyn Handler>;

/// Replaces the default watch-event → queue-key routing.
///
/// The returned [`EventHandlers`] must supply all three functions; there is no
/// partial override.
pub trait EventRouting: Send + Sync {
    /// Builds the add/update/delete functions feeding `queue`.
    fn routes(&self, queue: Arc<WorkQueue>) -> EventHandlers;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_namespace_means_all() {
        assert_eq!(Namespace::new(""), Namespace::All);
        assert_eq!(Namespace::new("kube-system").as_str(), Some("kube-system"));
    }

    #[test]
    fn namespace_filter() {
        let ns = Namespace::new("a");
        assert!(ns.contains(Some("a")));
        assert!(!ns.contains(Some("b")));
        assert!(!ns.contains(None));
        assert!(Namespace::All.contains(None));
    }
}
