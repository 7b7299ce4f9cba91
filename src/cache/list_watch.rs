use async_trait::async_trait;

use crate::api::{Namespace, ObjectList};
use crate::client::{ClientError, ListParams, ResourceRequest, RestClient, WatchStream, kinds};

/// Server-side watch timeout; the informer re-watches when it expires.
const WATCH_TIMEOUT_SECONDS: u32 = 300;

/// Source of a list + watch pair for one collection.
#[async_trait]
pub trait ListerWatcher: Send + Sync + 'static {
    /// Full list of the collection.
    async fn list(&self) -> Result<ObjectList, ClientError>;

    /// Changes after `resource_version`.
    async fn watch(&self, resource_version: &str) -> Result<WatchStream, ClientError>;
}

/// List/watch of one resource in one namespace scope.
#[derive(Clone, Debug)]
pub struct ListWatch {
    rest: RestClient,
    request: ResourceRequest,
}

impl ListWatch {
    /// List/watch request for `resource` in `namespace`, with `modify` adjusting the
    /// list options (typically to set the label selector).
    ///
    /// Cluster-scoped resources ignore `namespace`.
    pub fn filtered(
        rest: RestClient,
        resource: &str,
        namespace: &Namespace,
        modify: impl FnOnce(&mut ListParams),
    ) -> Self {
        let mut params = ListParams {
            timeout_seconds: Some(WATCH_TIMEOUT_SECONDS),
            ..ListParams::default()
        };
        modify(&mut params);
        let namespace = match kinds::is_namespaced(resource) {
            Some(false) => Namespace::All,
            _ => namespace.clone(),
        };
        let request = rest.request(resource, &namespace, params);
        Self { rest, request }
    }

    /// The underlying request.
    pub fn request(&self) -> &ResourceRequest {
        &self.request
    }
}

#[async_trait]
impl ListerWatcher for ListWatch {
    async fn list(&self) -> Result<ObjectList, ClientError> {
        self.rest.list(&self.request).await
    }

    async fn watch(&self, resource_version: &str) -> Result<WatchStream, ClientError> {
        self.rest.watch(&self.request, resource_version).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::LabelSelector;
    use crate::client::{ApiGroup, MemoryCluster};

    #[test]
    fn filtered_applies_modifier_and_scope() {
        let client = MemoryCluster::new().client();
        let lw = ListWatch::filtered(client.rest(ApiGroup::CoreV1), "configmaps", &Namespace::new("ns"), |p| {
            p.label_selector = LabelSelector::new("Team = X");
        });
        assert_eq!(lw.request().namespace, Namespace::new("ns"));
        assert_eq!(lw.request().params.label_selector.as_str(), "team=x");

        let nodes = ListWatch::filtered(client.rest(ApiGroup::CoreV1), "nodes", &Namespace::new("ns"), |_| {});
        assert_eq!(nodes.request().namespace, Namespace::All);
    }
}
