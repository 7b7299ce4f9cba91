//! Handler-facing types: objects, keys, selectors and the handler contract.
//!
//! ## Contents
//! - [`Object`], [`ObjectMeta`], [`ObjectList`] dynamic objects
//! - [`key_of`], [`split_key`] cache/queue keys
//! - [`LabelSelector`] normalized selectors
//! - [`ResourceKind`] what a handler watches
//! - [`Handler`], [`EventRouting`], [`Scope`], [`Namespace`] the pluggable contract

mod handler;
mod kind;
mod object;
mod selector;

pub use handler::{EventRouting, Handler, HandlerRef, Namespace, Scope};
pub use kind::ResourceKind;
pub use object::{KeyError, ListMeta, Object, ObjectList, ObjectMeta, content_hash, key_of, split_key};
pub use selector::{LabelSelector, Requirement, SelectorError};
