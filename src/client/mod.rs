//! # Cluster API access.
//!
//! The runtime talks to the cluster only through [`Transport`]: list, watch
//! and get of one resource collection. Two implementations ship with the
//! crate:
//!
//! - [`HttpTransport`] (feature `http`): the real API server over reqwest.
//! - [`MemoryCluster`]: an in-process cluster for tests and embedding.
//!
//! ```text
//! Client ──rest(group)──► RestClient ──► ResourceRequest ──► dyn Transport
//!                                                             ├── HttpTransport
//!                                                             └── MemoryCluster
//! ```
//!
//! A [`Connect`] implementation turns a [`ConnectionConfig`] into a [`Client`];
//! the runtime builder calls it once per controller.

mod config;
#[cfg(feature = "http")]
mod http;
pub mod kinds;
mod memory;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Deserialize;
use thiserror::Error;

use crate::api::{LabelSelector, Namespace, Object, ObjectList};
use crate::error::ConfigurationError;

pub use config::ConnectionConfig;
#[cfg(feature = "http")]
pub use http::{HttpConnector, HttpTransport};
pub use kinds::ApiGroup;
pub use memory::MemoryCluster;

/// Failure status reported by the API server.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Status {
    /// HTTP-style status code.
    pub code: u16,
    /// Machine-readable reason (`NotFound`, `Expired`, ...).
    pub reason: String,
    /// Human-readable message.
    pub message: String,
}

impl Status {
    /// `410 Gone`: the requested resource version is too old to watch from.
    pub fn gone(message: impl Into<String>) -> Self {
        Self {
            code: 410,
            reason: "Expired".into(),
            message: message.into(),
        }
    }

    /// True for `410 Gone`.
    pub fn is_gone(&self) -> bool {
        self.code == 410
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.reason)?;
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        Ok(())
    }
}

/// Errors from cluster API calls. Never fatal to the manager.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum ClientError {
    /// The server answered with a failure status.
    #[error("api server: {0}")]
    Api(Status),

    /// The request did not complete.
    #[error("http: {0}")]
    Http(String),

    /// The response could not be decoded.
    #[error("decode: {0}")]
    Decode(String),

    /// The watch stream ended.
    #[error("watch stream closed")]
    Closed,
}

impl ClientError {
    /// True if the error means "relist, your resource version expired".
    pub fn is_gone(&self) -> bool {
        matches!(self, ClientError::Api(status) if status.is_gone())
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ClientError::Api(_) => "client_api",
            ClientError::Http(_) => "client_http",
            ClientError::Decode(_) => "client_decode",
            ClientError::Closed => "client_closed",
        }
    }
}

/// Options of a list or watch call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListParams {
    /// Label selector, forwarded as `labelSelector`.
    pub label_selector: LabelSelector,
    /// Server-side watch timeout.
    pub timeout_seconds: Option<u32>,
}

/// One resource collection, as addressed on the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceRequest {
    /// API group/version of the collection.
    pub group: ApiGroup,
    /// Plural resource name.
    pub resource: String,
    /// Namespace filter; ignored for cluster-scoped resources.
    pub namespace: Namespace,
    /// List/watch options.
    pub params: ListParams,
}

impl ResourceRequest {
    /// Request path below the server root, without the object name.
    pub fn path(&self) -> String {
        let prefix = self.group.path_prefix();
        match self.namespace.as_str() {
            Some(ns) if kinds::is_namespaced(&self.resource).unwrap_or(true) => {
                format!("{prefix}/namespaces/{ns}/{}", self.resource)
            }
            _ => format!("{prefix}/{}", self.resource),
        }
    }
}

/// A change observed on a watch stream.
#[derive(Clone, Debug, PartialEq)]
pub enum WatchEvent {
    /// Object created.
    Added(Object),
    /// Object changed.
    Modified(Object),
    /// Object removed; carries its last state.
    Deleted(Object),
    /// Progress marker without an object change.
    Bookmark {
        /// Version the stream has reached.
        resource_version: String,
    },
    /// In-band failure; the stream should be restarted.
    Error(Status),
}

/// Stream of watch events.
pub type WatchStream = BoxStream<'static, Result<WatchEvent, ClientError>>;

/// Wire access to resource collections.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Lists the collection.
    async fn list(&self, req: &ResourceRequest) -> Result<ObjectList, ClientError>;

    /// Streams changes after `resource_version`.
    async fn watch(&self, req: &ResourceRequest, resource_version: &str) -> Result<WatchStream, ClientError>;

    /// Reads one object; `None` if it does not exist.
    async fn get(&self, req: &ResourceRequest, name: &str) -> Result<Option<Object>, ClientError>;
}

/// Cheap, cloneable handle to the cluster API.
#[derive(Clone)]
pub struct Client {
    transport: Arc<dyn Transport>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client").finish_non_exhaustive()
    }
}

impl Client {
    /// Client over `transport`.
    pub fn new(transport: impl Transport) -> Self {
        Self {
            transport: Arc::new(transport),
        }
    }

    /// Client over an already shared transport.
    pub fn from_transport(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Group-scoped view of this client.
    pub fn rest(&self, group: ApiGroup) -> RestClient {
        RestClient {
            client: self.clone(),
            group,
        }
    }

    /// Group-scoped view for a known resource name.
    pub fn for_resource(&self, resource: &str) -> Option<RestClient> {
        kinds::getter(resource).map(|getter| getter(self))
    }
}

/// A [`Client`] bound to one API group/version.
#[derive(Clone, Debug)]
pub struct RestClient {
    client: Client,
    group: ApiGroup,
}

impl RestClient {
    /// The bound group.
    pub fn group(&self) -> ApiGroup {
        self.group
    }

    /// Builds the wire request for `resource` in `namespace`.
    pub fn request(&self, resource: &str, namespace: &Namespace, params: ListParams) -> ResourceRequest {
        ResourceRequest {
            group: self.group,
            resource: resource.to_owned(),
            namespace: namespace.clone(),
            params,
        }
    }

    /// Lists `resource`.
    pub async fn list(&self, req: &ResourceRequest) -> Result<ObjectList, ClientError> {
        self.client.transport.list(req).await
    }

    /// Watches `resource` from `resource_version`.
    pub async fn watch(&self, req: &ResourceRequest, resource_version: &str) -> Result<WatchStream, ClientError> {
        self.client.transport.watch(req, resource_version).await
    }

    /// Reads `namespace/name` of `resource`.
    pub async fn get(&self, resource: &str, namespace: &Namespace, name: &str) -> Result<Option<Object>, ClientError> {
        let req = self.request(resource, namespace, ListParams::default());
        self.client.transport.get(&req, name).await
    }
}

/// Produces a [`Client`] from connection settings.
pub trait Connect: Send + Sync + 'static {
    /// Fails with [`ConfigurationError::InvalidConnection`] on unusable settings.
    fn connect(&self, config: &ConnectionConfig) -> Result<Client, ConfigurationError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(resource: &str, ns: &str) -> ResourceRequest {
        ResourceRequest {
            group: kinds::lookup(resource).map(|k| k.group).unwrap_or(ApiGroup::CoreV1),
            resource: resource.into(),
            namespace: Namespace::new(ns),
            params: ListParams::default(),
        }
    }

    #[test]
    fn namespaced_paths() {
        assert_eq!(req("configmaps", "prod").path(), "/api/v1/namespaces/prod/configmaps");
        assert_eq!(req("configmaps", "").path(), "/api/v1/configmaps");
        assert_eq!(req("deployments", "a").path(), "/apis/apps/v1/namespaces/a/deployments");
    }

    #[test]
    fn cluster_scoped_ignores_namespace() {
        assert_eq!(req("nodes", "prod").path(), "/api/v1/nodes");
        assert_eq!(
            req("clusterroles", "x").path(),
            "/apis/rbac.authorization.k8s.io/v1/clusterroles"
        );
    }

    #[test]
    fn for_resource_picks_the_group() {
        let client = MemoryCluster::new().client();
        assert_eq!(client.for_resource("deployments").map(|r| r.group()), Some(ApiGroup::AppsV1));
        assert_eq!(client.for_resource("configmaps").map(|r| r.group()), Some(ApiGroup::CoreV1));
        assert!(client.for_resource("widgets").is_none());
    }

    #[test]
    fn gone_is_detected() {
        assert!(ClientError::Api(Status::gone("too old")).is_gone());
        assert!(!ClientError::Closed.is_gone());
        assert_eq!(Status::gone("too old").to_string(), "410 Expired: too old");
    }
}
