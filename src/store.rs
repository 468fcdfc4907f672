//! Read side of the cache: per resource type, one shard per cluster.

use crate::resources::{split_key, ResourceType};
use anyhow::Context as _;
use kube::api::DynamicObject;
use kube_runtime::reflector::{ObjectRef, Store};
use std::{collections::HashMap, sync::Arc};

/// Cache of one resource type in one cluster. Written only by the
/// subscription that created it.
#[derive(Clone)]
pub struct Shard {
    cluster: String,
    resource: ResourceType,
    store: Store<DynamicObject>,
}

impl Shard {
    pub(crate) fn new(cluster: &str, resource: ResourceType, store: Store<DynamicObject>) -> Self {
        Shard {
            cluster: cluster.to_string(),
            resource,
            store,
        }
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    pub fn get(&self, key: &str) -> Option<Arc<DynamicObject>> {
        let (ns, name) = split_key(key);
        let mut obj_ref = ObjectRef::new_with(name, self.resource.api_resource());
        if let Some(ns) = ns {
            obj_ref = obj_ref.within(ns);
        }
        self.store.get(&obj_ref)
    }

    pub fn list(&self) -> Vec<Arc<DynamicObject>> {
        self.store.state()
    }
}

/// Mapping from resource type to shards, in registration order.
///
/// Lookups are not disambiguated by cluster: when several clusters have
/// an object with the same key, the first registered shard wins.
#[derive(Clone, Default)]
pub struct ResourceStore {
    shards: HashMap<ResourceType, Vec<Shard>>,
}

impl ResourceStore {
    pub(crate) fn register(&mut self, shard: Shard) {
        self.shards.entry(shard.resource).or_default().push(shard);
    }

    fn shards(&self, resource: ResourceType) -> &[Shard] {
        self.shards.get(&resource).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Returns first object with given key among all clusters.
    pub fn get(&self, resource: ResourceType, key: &str) -> Option<Arc<DynamicObject>> {
        self.shards(resource).iter().find_map(|shard| shard.get(key))
    }

    /// Looks the key up only in the shard of given cluster.
    pub fn get_from(
        &self,
        cluster: &str,
        resource: ResourceType,
        key: &str,
    ) -> Option<Arc<DynamicObject>> {
        self.shards(resource)
            .iter()
            .filter(|shard| shard.cluster == cluster)
            .find_map(|shard| shard.get(key))
    }

    /// Same as `get`, but decodes the object into a typed resource.
    pub fn get_typed<K: serde::de::DeserializeOwned>(
        &self,
        resource: ResourceType,
        key: &str,
    ) -> anyhow::Result<Option<K>> {
        let obj = match self.get(resource, key) {
            Some(obj) => obj,
            None => return Ok(None),
        };
        let value = serde_json::to_value(&*obj).context("failed to serialize DynamicObject")?;
        let typed = serde_json::from_value(value)
            .with_context(|| format!("failed to decode cached {} {}", resource, key))?;
        Ok(Some(typed))
    }

    /// All objects of all clusters. No ordering guarantees.
    pub fn list(&self, resource: ResourceType) -> Vec<Arc<DynamicObject>> {
        self.shards(resource)
            .iter()
            .flat_map(|shard| shard.list())
            .collect()
    }

    pub fn shard_count(&self, resource: ResourceType) -> usize {
        self.shards(resource).len()
    }

    /// Cluster names of the shards of `resource`, in registration order.
    pub fn clusters(&self, resource: ResourceType) -> Vec<&str> {
        self.shards(resource).iter().map(Shard::cluster).collect()
    }
}
