//! Informer → queue routing functions.

use std::fmt;
use std::sync::Arc;

use crate::api::{KeyError, Object, key_of};
use crate::queue::WorkQueue;

/// What a delete notification carries.
#[derive(Clone, Debug)]
pub enum DeletedObject {
    /// The watch reported the deletion with the object's final state.
    Final(Arc<Object>),
    /// The object vanished between two lists; only its key (and the last
    /// cached state) are known.
    Tombstone {
        /// Cache key of the vanished object.
        key: String,
        /// Last state held by the cache, if any.
        last_known: Option<Arc<Object>>,
    },
}

impl DeletedObject {
    /// The best known state of the deleted object.
    pub fn object(&self) -> Option<&Arc<Object>> {
        match self {
            DeletedObject::Final(obj) => Some(obj),
            DeletedObject::Tombstone { last_known, .. } => last_known.as_ref(),
        }
    }

    /// Queue key of the deleted object; works for tombstones too.
    pub fn key(&self) -> Result<String, KeyError> {
        match self {
            DeletedObject::Final(obj) => key_of(obj),
            DeletedObject::Tombstone { key, .. } => Ok(key.clone()),
        }
    }
}

type AddFn = Box<dyn Fn(&Arc<Object>) + Send + Sync>;
type UpdateFn = Box<dyn Fn(&Arc<Object>, &Arc<Object>) + Send + Sync>;
type DeleteFn = Box<dyn Fn(&DeletedObject) + Send + Sync>;

/// The add/update/delete functions an informer calls for every change.
pub struct EventHandlers {
    on_add: AddFn,
    on_update: UpdateFn,
    on_delete: DeleteFn,
}

impl fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandlers").finish_non_exhaustive()
    }
}

impl EventHandlers {
    /// Custom routing. All three functions are required.
    pub fn new(
        on_add: impl Fn(&Arc<Object>) + Send + Sync + 'static,
        on_update: impl Fn(&Arc<Object>, &Arc<Object>) + Send + Sync + 'static,
        on_delete: impl Fn(&DeletedObject) + Send + Sync + 'static,
    ) -> Self {
        Self {
            on_add: Box::new(on_add),
            on_update: Box::new(on_update),
            on_delete: Box::new(on_delete),
        }
    }

    /// Default routing: every change enqueues the object's key.
    pub fn enqueue(queue: Arc<WorkQueue>) -> Self {
        let add_q = Arc::clone(&queue);
        let update_q = Arc::clone(&queue);
        Self::new(
            move |obj| {
                if let Ok(key) = key_of(obj) {
                    add_q.add(key);
                }
            },
            move |_old, new| {
                if let Ok(key) = key_of(new) {
                    update_q.add(key);
                }
            },
            move |deleted| {
                if let Ok(key) = deleted.key() {
                    queue.add(key);
                }
            },
        )
    }

    pub(crate) fn on_add(&self, obj: &Arc<Object>) {
        (self.on_add)(obj)
    }

    pub(crate) fn on_update(&self, old: &Arc<Object>, new: &Arc<Object>) {
        (self.on_update)(old, new)
    }

    pub(crate) fn on_delete(&self, deleted: &DeletedObject) {
        (self.on_delete)(deleted)
    }
}
