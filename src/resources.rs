//! Watched resource types and per-type behavior table

use k8s_openapi::api::core::v1::{ConfigMap, Endpoints, Pod, Service};
use kube::api::{ApiResource, DynamicObject};
use serde::{Deserialize, Serialize};

/// Kind of core object a subscription watches.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
pub enum ResourceType {
    #[serde(rename = "services", alias = "service")]
    #[strum(to_string = "services", serialize = "service")]
    Service,
    #[serde(rename = "pods", alias = "pod")]
    #[strum(to_string = "pods", serialize = "pod")]
    Pod,
    #[serde(rename = "endpoints", alias = "endpoint")]
    #[strum(to_string = "endpoints", serialize = "endpoint")]
    Endpoint,
    #[serde(rename = "configmaps", alias = "configmap")]
    #[strum(to_string = "configmaps", serialize = "configmap")]
    ConfigMap,
}

/// How update notifications of a resource type are filtered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePolicy {
    /// Every update is forwarded.
    Always,
    /// Update is forwarded only if the given top-level field differs
    /// between old and new object.
    FieldChanged(&'static str),
}

/// Everything that differs between resource types lives here.
pub struct ResourceDescriptor {
    /// Plural name, used as `QueueObject::resource` and in logs.
    pub plural: &'static str,
    /// API coordinates used to build watchers and cache shards.
    pub api_resource: fn() -> ApiResource,
    /// Derives cluster-scoped lookup key.
    pub key: fn(&DynamicObject) -> Option<String>,
    pub update_policy: UpdatePolicy,
}

static SERVICE: ResourceDescriptor = ResourceDescriptor {
    plural: "services",
    api_resource: erase::<Service>,
    key: namespaced_key,
    update_policy: UpdatePolicy::Always,
};

static POD: ResourceDescriptor = ResourceDescriptor {
    plural: "pods",
    api_resource: erase::<Pod>,
    key: namespaced_key,
    update_policy: UpdatePolicy::Always,
};

// Endpoints churn on metadata-only changes, only addresses matter.
static ENDPOINT: ResourceDescriptor = ResourceDescriptor {
    plural: "endpoints",
    api_resource: erase::<Endpoints>,
    key: namespaced_key,
    update_policy: UpdatePolicy::FieldChanged("subsets"),
};

static CONFIG_MAP: ResourceDescriptor = ResourceDescriptor {
    plural: "configmaps",
    api_resource: erase::<ConfigMap>,
    key: namespaced_key,
    update_policy: UpdatePolicy::Always,
};

impl ResourceType {
    pub fn descriptor(self) -> &'static ResourceDescriptor {
        match self {
            ResourceType::Service => &SERVICE,
            ResourceType::Pod => &POD,
            ResourceType::Endpoint => &ENDPOINT,
            ResourceType::ConfigMap => &CONFIG_MAP,
        }
    }

    pub fn as_str(self) -> &'static str {
        self.descriptor().plural
    }

    pub fn api_resource(self) -> ApiResource {
        (self.descriptor().api_resource)()
    }

    /// Returns `namespace/name` (or `name` for cluster-scoped objects).
    /// None if object has no name.
    pub fn key_of(self, obj: &DynamicObject) -> Option<String> {
        (self.descriptor().key)(obj)
    }
}

fn erase<K: kube::Resource<DynamicType = ()>>() -> ApiResource {
    ApiResource::erase::<K>(&())
}

fn namespaced_key(obj: &DynamicObject) -> Option<String> {
    let name = obj.metadata.name.as_deref().filter(|n| !n.is_empty())?;
    match obj.metadata.namespace.as_deref() {
        Some(ns) if !ns.is_empty() => Some(format!("{}/{}", ns, name)),
        _ => Some(name.to_string()),
    }
}

/// Splits key produced by `ResourceType::key_of` back into
/// (namespace, name).
pub(crate) fn split_key(key: &str) -> (Option<&str>, &str) {
    match key.split_once('/') {
        Some((ns, name)) => (Some(ns), name),
        None => (None, key),
    }
}
