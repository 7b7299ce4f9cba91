use std::borrow::Cow;
use std::fmt;

use super::object::Object;

/// Identifies the resource type a handler watches.
///
/// `resource` is the plural, lower-case name used in API paths (`configmaps`)
/// and is what the client layer resolves; `api_version`/`kind` stamp the
/// zero-value prototype returned by [`ResourceKind::empty_object`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourceKind {
    api_version: Cow<'static, str>,
    kind: Cow<'static, str>,
    resource: Cow<'static, str>,
}

impl ResourceKind {
    /// Core `v1` ConfigMap.
    pub const CONFIG_MAPS: ResourceKind = ResourceKind::from_static("v1", "ConfigMap", "configmaps");
    /// Core `v1` Secret.
    pub const SECRETS: ResourceKind = ResourceKind::from_static("v1", "Secret", "secrets");
    /// Core `v1` Pod.
    pub const PODS: ResourceKind = ResourceKind::from_static("v1", "Pod", "pods");
    /// `apps/v1` Deployment.
    pub const DEPLOYMENTS: ResourceKind =
        ResourceKind::from_static("apps/v1", "Deployment", "deployments");

    /// Descriptor from static strings.
    pub const fn from_static(api_version: &'static str, kind: &'static str, resource: &'static str) -> Self {
        Self {
            api_version: Cow::Borrowed(api_version),
            kind: Cow::Borrowed(kind),
            resource: Cow::Borrowed(resource),
        }
    }

    /// Descriptor from owned strings.
    pub fn new(api_version: impl Into<String>, kind: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            api_version: Cow::Owned(api_version.into()),
            kind: Cow::Owned(kind.into()),
            resource: Cow::Owned(resource.into()),
        }
    }

    /// Plural resource name (`configmaps`).
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Kind (`ConfigMap`).
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// API version (`v1`, `apps/v1`).
    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    /// Zero-value object of this kind.
    pub fn empty_object(&self) -> Object {
        Object {
            api_version: self.api_version().to_owned(),
            kind: self.kind().to_owned(),
            ..Object::default()
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.api_version, self.resource)
    }
}
