//! Watch-backed local cache.
//!
//! ## Contents
//! - [`Informer`] list + watch loop that fills a [`Store`]
//! - [`Store`] key → object cache read by workers
//! - [`ListerWatcher`], [`ListWatch`] what the informer lists and watches
//! - [`EventHandlers`], [`DeletedObject`] change callbacks (queue routing)

mod handlers;
mod informer;
mod list_watch;
mod store;

pub use handlers::{DeletedObject, EventHandlers};
pub use informer::Informer;
pub use list_watch::{ListWatch, ListerWatcher};
pub use store::{Store, StoreError};
