//! # MemoryCluster: an in-process API server.
//!
//! Holds objects per resource, assigns increasing resource versions, keeps a
//! bounded change history and serves list/watch/get with the same semantics
//! the informer expects from a real server:
//!
//! - `watch` from a version replays the history after it, then streams live
//!   changes.
//! - A version older than the retained history answers `410 Gone`.
//! - Namespace and label selector filter both lists and watches.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::StreamExt;
use futures::channel::mpsc;

use super::{Client, ClientError, Connect, ConnectionConfig, ResourceRequest, Status, Transport, WatchEvent, WatchStream};
use crate::api::{KeyError, LabelSelector, ListMeta, Namespace, Object, ObjectList, key_of};
use crate::error::ConfigurationError;

const HISTORY_LIMIT: usize = 1024;

struct Change {
    revision: u64,
    resource: String,
    event: WatchEvent,
}

struct Watcher {
    resource: String,
    namespace: Namespace,
    selector: LabelSelector,
    tx: mpsc::UnboundedSender<Result<WatchEvent, ClientError>>,
}

impl Watcher {
    fn wants(&self, resource: &str, obj: &Object) -> bool {
        wants(resource, &self.resource, &self.namespace, &self.selector, obj)
    }
}

fn wants(resource: &str, want_resource: &str, namespace: &Namespace, selector: &LabelSelector, obj: &Object) -> bool {
    resource == want_resource
        && namespace.contains(obj.namespace())
        && selector.matches(&obj.metadata.labels).unwrap_or(false)
}

fn event_object(event: &WatchEvent) -> Option<&Object> {
    match event {
        WatchEvent::Added(o) | WatchEvent::Modified(o) | WatchEvent::Deleted(o) => Some(o),
        _ => None,
    }
}

#[derive(Default)]
struct State {
    revision: u64,
    compacted: u64,
    objects: BTreeMap<(String, String), Object>,
    history: VecDeque<Change>,
    watchers: Vec<Watcher>,
    failing_lists: u32,
}

impl State {
    fn record(&mut self, resource: &str, event: WatchEvent) {
        if let Some(obj) = event_object(&event) {
            self.watchers.retain(|w| {
                if !w.wants(resource, obj) {
                    return !w.tx.is_closed();
                }
                w.tx.unbounded_send(Ok(event.clone())).is_ok()
            });
        }
        self.history.push_back(Change {
            revision: self.revision,
            resource: resource.to_owned(),
            event,
        });
        while self.history.len() > HISTORY_LIMIT {
            if let Some(old) = self.history.pop_front() {
                self.compacted = old.revision;
            }
        }
    }
}

/// In-process cluster. Clones share state.
///
/// # Example
/// ```
/// use kontroller::client::MemoryCluster;
/// use kontroller::Object;
///
/// let cluster = MemoryCluster::new();
/// let stored = cluster.apply("configmaps", Object::new(Some("prod"), "app")).unwrap();
/// assert_eq!(stored.resource_version(), Some("1"));
/// assert!(cluster.delete("configmaps", Some("prod"), "app").is_some());
/// ```
#[derive(Clone, Default)]
pub struct MemoryCluster {
    state: Arc<Mutex<State>>,
}

impl std::fmt::Debug for MemoryCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.lock();
        f.debug_struct("MemoryCluster")
            .field("revision", &st.revision)
            .field("objects", &st.objects.len())
            .field("watchers", &st.watchers.len())
            .finish()
    }
}

impl MemoryCluster {
    /// Empty cluster.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A [`Client`] backed by this cluster.
    pub fn client(&self) -> Client {
        Client::new(self.clone())
    }

    /// Creates or replaces an object; returns it as stored.
    pub fn apply(&self, resource: &str, mut obj: Object) -> Result<Object, KeyError> {
        let key = key_of(&obj)?;
        let mut st = self.lock();
        st.revision += 1;
        obj.metadata.resource_version = Some(st.revision.to_string());
        if obj.metadata.uid.is_none() {
            obj.metadata.uid = Some(format!("uid-{}", st.revision));
        }
        let previous = st.objects.insert((resource.to_owned(), key), obj.clone());
        let event = if previous.is_some() {
            WatchEvent::Modified(obj.clone())
        } else {
            WatchEvent::Added(obj.clone())
        };
        st.record(resource, event);
        Ok(obj)
    }

    /// Removes an object; returns its last state.
    pub fn delete(&self, resource: &str, namespace: Option<&str>, name: &str) -> Option<Object> {
        let key = match namespace {
            Some(ns) if !ns.is_empty() => format!("{ns}/{name}"),
            _ => name.to_owned(),
        };
        let mut st = self.lock();
        let mut obj = st.objects.remove(&(resource.to_owned(), key))?;
        st.revision += 1;
        obj.metadata.resource_version = Some(st.revision.to_string());
        st.record(resource, WatchEvent::Deleted(obj.clone()));
        Some(obj)
    }

    /// Makes the next `n` list calls fail with `500`.
    pub fn fail_next_lists(&self, n: u32) {
        self.lock().failing_lists = n;
    }

    /// Ends every open watch stream.
    pub fn close_watches(&self) {
        self.lock().watchers.clear();
    }

    /// Number of open watch streams.
    pub fn watch_count(&self) -> usize {
        let mut st = self.lock();
        st.watchers.retain(|w| !w.tx.is_closed());
        st.watchers.len()
    }

    /// Latest resource version.
    pub fn revision(&self) -> u64 {
        self.lock().revision
    }
}

#[async_trait]
impl Transport for MemoryCluster {
    async fn list(&self, req: &ResourceRequest) -> Result<ObjectList, ClientError> {
        let mut st = self.lock();
        if st.failing_lists > 0 {
            st.failing_lists -= 1;
            return Err(ClientError::Api(Status {
                code: 500,
                reason: "InternalError".into(),
                message: "injected list failure".into(),
            }));
        }
        let items = st
            .objects
            .iter()
            .filter(|((resource, _), obj)| {
                wants(resource, &req.resource, &req.namespace, &req.params.label_selector, obj)
            })
            .map(|(_, obj)| obj.clone())
            .collect();
        Ok(ObjectList {
            metadata: ListMeta {
                resource_version: Some(st.revision.to_string()),
            },
            items,
        })
    }

    async fn watch(&self, req: &ResourceRequest, resource_version: &str) -> Result<WatchStream, ClientError> {
        let mut st = self.lock();
        let from = match resource_version {
            "" | "0" => st.revision,
            rv => rv
                .parse::<u64>()
                .map_err(|_| ClientError::Api(Status {
                    code: 400,
                    reason: "BadRequest".into(),
                    message: format!("invalid resource version {rv:?}"),
                }))?,
        };
        if from < st.compacted {
            return Err(ClientError::Api(Status::gone(format!(
                "resource version {from} is older than {}",
                st.compacted
            ))));
        }

        let (tx, rx) = mpsc::unbounded();
        let watcher = Watcher {
            resource: req.resource.clone(),
            namespace: req.namespace.clone(),
            selector: req.params.label_selector.clone(),
            tx,
        };
        for change in st.history.iter().filter(|c| c.revision > from) {
            let Some(obj) = event_object(&change.event) else {
                continue;
            };
            if watcher.wants(&change.resource, obj) {
                let _ = watcher.tx.unbounded_send(Ok(change.event.clone()));
            }
        }
        st.watchers.push(watcher);
        Ok(rx.boxed())
    }

    async fn get(&self, req: &ResourceRequest, name: &str) -> Result<Option<Object>, ClientError> {
        let key = match req.namespace.as_str() {
            Some(ns) => format!("{ns}/{name}"),
            None => name.to_owned(),
        };
        Ok(self.lock().objects.get(&(req.resource.clone(), key)).cloned())
    }
}

impl Connect for MemoryCluster {
    fn connect(&self, _config: &ConnectionConfig) -> Result<Client, ConfigurationError> {
        Ok(self.client())
    }
}
