//! Known resource kinds and the API group that serves each.
//!
//! A handler names its kind by plural resource (`configmaps`). Anything not
//! in this table is rejected when the runtime is built.

use super::{Client, RestClient};

/// API group/version a resource is served from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ApiGroup {
    /// Core group, `v1`.
    CoreV1,
    /// `apps/v1`.
    AppsV1,
    /// `batch/v1`.
    BatchV1,
    /// `networking.k8s.io/v1`.
    NetworkingV1,
    /// `rbac.authorization.k8s.io/v1`.
    RbacV1,
}

impl ApiGroup {
    /// URL prefix of the group.
    pub fn path_prefix(self) -> &'static str {
        match self {
            ApiGroup::CoreV1 => "/api/v1",
            ApiGroup::AppsV1 => "/apis/apps/v1",
            ApiGroup::BatchV1 => "/apis/batch/v1",
            ApiGroup::NetworkingV1 => "/apis/networking.k8s.io/v1",
            ApiGroup::RbacV1 => "/apis/rbac.authorization.k8s.io/v1",
        }
    }
}

/// Table entry for one resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KnownKind {
    /// Plural resource name.
    pub resource: &'static str,
    /// Serving group.
    pub group: ApiGroup,
    /// False for cluster-scoped resources.
    pub namespaced: bool,
}

const fn known(resource: &'static str, group: ApiGroup, namespaced: bool) -> KnownKind {
    KnownKind {
        resource,
        group,
        namespaced,
    }
}

const KNOWN_KINDS: [KnownKind; 22] = [
    known("configmaps", ApiGroup::CoreV1, true),
    known("endpoints", ApiGroup::CoreV1, true),
    known("events", ApiGroup::CoreV1, true),
    known("limitranges", ApiGroup::CoreV1, true),
    known("namespaces", ApiGroup::CoreV1, false),
    known("nodes", ApiGroup::CoreV1, false),
    known("persistentvolumes", ApiGroup::CoreV1, false),
    known("persistentvolumeclaims", ApiGroup::CoreV1, true),
    known("pods", ApiGroup::CoreV1, true),
    known("secrets", ApiGroup::CoreV1, true),
    known("services", ApiGroup::CoreV1, true),
    known("serviceaccounts", ApiGroup::CoreV1, true),
    known("cronjobs", ApiGroup::BatchV1, true),
    known("daemonsets", ApiGroup::AppsV1, true),
    known("deployments", ApiGroup::AppsV1, true),
    known("statefulsets", ApiGroup::AppsV1, true),
    known("ingresses", ApiGroup::NetworkingV1, true),
    known("networkpolicies", ApiGroup::NetworkingV1, true),
    known("rolebindings", ApiGroup::RbacV1, true),
    known("roles", ApiGroup::RbacV1, true),
    known("clusterroles", ApiGroup::RbacV1, false),
    known("clusterrolebindings", ApiGroup::RbacV1, false),
];

/// Table entry for `resource`.
pub fn lookup(resource: &str) -> Option<KnownKind> {
    KNOWN_KINDS.iter().copied().find(|k| k.resource == resource)
}

/// Function producing the group-scoped client that serves `resource`.
///
/// # Example
/// ```
/// use kontroller::client::{kinds, ApiGroup, MemoryCluster};
///
/// let client = MemoryCluster::new().client();
/// let getter = kinds::getter("deployments").unwrap();
/// assert_eq!(getter(&client).group(), ApiGroup::AppsV1);
/// assert!(kinds::getter("widgets").is_none());
/// ```
pub fn getter(resource: &str) -> Option<impl Fn(&Client) -> RestClient + Copy> {
    let group = lookup(resource)?.group;
    Some(move |client: &Client| client.rest(group))
}

/// Whether `resource` lives in namespaces; `None` if unknown.
pub fn is_namespaced(resource: &str) -> Option<bool> {
    lookup(resource).map(|k| k.namespaced)
}

/// Every supported resource name.
pub fn names() -> impl Iterator<Item = &'static str> {
    KNOWN_KINDS.iter().map(|k| k.resource)
}
