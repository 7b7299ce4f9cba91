//! # Dynamic cluster objects and their cache keys.
//!
//! [`Object`] keeps the typed metadata every controller needs (name,
//! namespace, labels, resource version) and carries the rest of the document
//! as raw JSON. Handlers that want a typed view deserialize
//! [`Object::data`] themselves.
//!
//! ## Keys
//! ```text
//! namespaced object   ──► "<namespace>/<name>"
//! cluster-scoped      ──► "<name>"
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Errors deriving or splitting a cache key.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// The object has no `metadata.name`.
    #[error("object has no name")]
    MissingName,

    /// The key is not `name` or `namespace/name`.
    #[error("unexpected key format: {0:?}")]
    Malformed(String),
}

/// Object metadata used by the cache and the queue.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Object name, unique within its namespace.
    #[serde(default)]
    pub name: String,
    /// Namespace, absent for cluster-scoped kinds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Opaque version used to resume watches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    /// Server-assigned identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    /// Labels used by selectors.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// A single cluster object.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Object {
    /// `apiVersion` of the document.
    #[serde(rename = "apiVersion", default, skip_serializing_if = "String::is_empty")]
    pub api_version: String,
    /// `kind` of the document.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    /// Typed metadata.
    #[serde(default)]
    pub metadata: ObjectMeta,
    /// Every other top-level field (`data`, `spec`, `status`, ...).
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl Object {
    /// Creates an object with the given coordinates and no payload.
    pub fn new(namespace: Option<&str>, name: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta {
                name: name.into(),
                namespace: namespace.map(str::to_owned),
                ..ObjectMeta::default()
            },
            ..Self::default()
        }
    }

    /// Adds a label.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.labels.insert(key.into(), value.into());
        self
    }

    /// Sets a top-level payload field.
    pub fn with_field(mut self, field: impl Into<String>, value: Value) -> Self {
        self.data.insert(field.into(), value);
        self
    }

    /// Object name.
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Namespace, `None` for cluster-scoped objects or an empty namespace.
    pub fn namespace(&self) -> Option<&str> {
        self.metadata.namespace.as_deref().filter(|ns| !ns.is_empty())
    }

    /// Resource version, if the server set one.
    pub fn resource_version(&self) -> Option<&str> {
        self.metadata.resource_version.as_deref()
    }
}

/// `metadata` of a list response.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMeta {
    /// Version to start a watch from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
}

/// A list response.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectList {
    /// List metadata.
    #[serde(default)]
    pub metadata: ListMeta,
    /// Items.
    #[serde(default)]
    pub items: Vec<Object>,
}

/// Derives the cache/queue key of `obj`.
pub fn key_of(obj: &Object) -> Result<String, KeyError> {
    if obj.name().is_empty() {
        return Err(KeyError::MissingName);
    }
    Ok(match obj.namespace() {
        Some(ns) => format!("{ns}/{}", obj.name()),
        None => obj.name().to_owned(),
    })
}

/// Splits a key into `(namespace, name)`.
pub fn split_key(key: &str) -> Result<(Option<&str>, &str), KeyError> {
    let mut parts = key.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(name), None, None) if !name.is_empty() => Ok((None, name)),
        (Some(ns), Some(name), None) if !ns.is_empty() && !name.is_empty() => Ok((Some(ns), name)),
        _ => Err(KeyError::Malformed(key.to_owned())),
    }
}

/// Hex SHA-256 of the object's payload (everything except `metadata`).
///
/// Stable across resyncs and resource-version bumps that leave the content
/// unchanged; map keys serialize in sorted order.
pub fn content_hash(obj: &Object) -> String {
    let encoded = serde_json::to_vec(&obj.data).unwrap_or_default();
    hex::encode(Sha256::digest(&encoded))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn namespaced_and_cluster_keys() {
        assert_eq!(key_of(&Object::new(Some("ns"), "foo")).unwrap(), "ns/foo");
        assert_eq!(key_of(&Object::new(None, "node-1")).unwrap(), "node-1");
        assert_eq!(key_of(&Object::new(Some(""), "node-1")).unwrap(), "node-1");
        assert_eq!(key_of(&Object::new(Some("ns"), "")), Err(KeyError::MissingName));
    }

    #[test]
    fn split_key_round_trips() {
        assert_eq!(split_key("ns/foo").unwrap(), (Some("ns"), "foo"));
        assert_eq!(split_key("foo").unwrap(), (None, "foo"));
        assert!(split_key("a/b/c").is_err());
        assert!(split_key("/foo").is_err());
        assert!(split_key("").is_err());
    }

    #[test]
    fn decodes_configmap_document() {
        let obj: Object = serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {
                "name": "app",
                "namespace": "prod",
                "resourceVersion": "42",
                "labels": { "team": "x" },
                "creationTimestamp": "2024-01-01T00:00:00Z"
            },
            "data": { "k": "v" }
        }))
        .unwrap();

        assert_eq!(obj.kind, "ConfigMap");
        assert_eq!(obj.namespace(), Some("prod"));
        assert_eq!(obj.resource_version(), Some("42"));
        assert_eq!(obj.metadata.labels.get("team").map(String::as_str), Some("x"));
        assert_eq!(obj.data.get("data"), Some(&json!({ "k": "v" })));
    }

    #[test]
    fn hash_ignores_metadata() {
        let a = Object::new(Some("ns"), "a").with_field("data", json!({ "k": "v" }));
        let mut b = a.clone();
        b.metadata.resource_version = Some("7".into());
        assert_eq!(content_hash(&a), content_hash(&b));

        let c = a.clone().with_field("data", json!({ "k": "changed" }));
        assert_ne!(content_hash(&a), content_hash(&c));
        assert_eq!(content_hash(&a).len(), 64);
    }

    #[test]
    fn empty_payload_hashes_as_empty_json_object() {
        assert_eq!(
            content_hash(&Object::new(Some("ns"), "empty")),
            "44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a"
        );
    }
}
