use crate::{
    resources::ResourceType, source::WatchSource, store::ResourceStore,
    subscription::Subscription,
};
use std::sync::Arc;

/// Creates subscriptions for every (resource, cluster) pair, resource-major,
/// and registers their shards in a fresh store.
///
/// Duplicate resource types and namespaces are ignored, first occurrence wins.
pub(super) fn plan(
    sources: &[Arc<dyn WatchSource>],
    resources: &[ResourceType],
    namespaces: &[String],
) -> (Vec<Subscription>, ResourceStore) {
    let resources = dedup(resources.iter().copied());
    let namespaces: Arc<[String]> =
        dedup(namespaces.iter().filter(|ns| !ns.is_empty()).cloned()).into();

    let mut subscriptions = Vec::with_capacity(resources.len() * sources.len());
    let mut store = ResourceStore::default();
    for resource in resources {
        for source in sources {
            let sub = Subscription::new(source.clone(), resource, namespaces.clone());
            store.register(sub.shard());
            tracing::debug!(
                cluster = source.name(),
                resource = resource.as_str(),
                "Prepared subscription"
            );
            subscriptions.push(sub);
        }
    }
    (subscriptions, store)
}

fn dedup<T: PartialEq>(items: impl Iterator<Item = T>) -> Vec<T> {
    let mut out = Vec::new();
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}
