//! Watch transport used by subscriptions.

use crate::resources::ResourceType;
use futures::stream::{BoxStream, StreamExt};
use kube::api::DynamicObject;
use kube_runtime::watcher::Event;
use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Stream of watcher events for one resource type of one cluster.
///
/// First `Event::Restarted` is treated as the initial listing. Item errors
/// are considered transient (transport retries on its own), end of stream
/// is unrecoverable.
pub type EventStream = BoxStream<'static, anyhow::Result<Event<DynamicObject>>>;

/// Something that can list and watch core objects, usually a cluster.
pub trait WatchSource: Send + Sync {
    /// Human-readable cluster identifier, used in logs and errors.
    fn name(&self) -> &str;

    /// Starts list+watch for `resource`. Empty `namespaces` means all
    /// namespaces. Implementations may watch more than requested,
    /// subscriptions filter by namespace again.
    fn watch(&self, resource: ResourceType, namespaces: &[String]) -> EventStream;
}

/// Sending half of a `ChannelSource` feed.
pub type EventSender = mpsc::UnboundedSender<anyhow::Result<Event<DynamicObject>>>;

/// In-process source fed through channels, one per resource type.
///
/// Useful to bridge a custom transport. Each feed is consumed by the first
/// `watch` call for its resource type; watching a resource without a feed
/// yields a stream that never produces anything.
pub struct ChannelSource {
    name: String,
    feeds: Mutex<HashMap<ResourceType, mpsc::UnboundedReceiver<anyhow::Result<Event<DynamicObject>>>>>,
}

impl ChannelSource {
    pub fn new(name: impl Into<String>) -> Self {
        ChannelSource {
            name: name.into(),
            feeds: Mutex::new(HashMap::new()),
        }
    }

    /// Creates (or replaces) the feed of `resource`.
    pub fn feed(&self, resource: ResourceType) -> EventSender {
        let (tx, rx) = mpsc::unbounded_channel();
        self.feeds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(resource, rx);
        tx
    }
}

impl WatchSource for ChannelSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn watch(&self, resource: ResourceType, _namespaces: &[String]) -> EventStream {
        let feed = self
            .feeds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&resource);
        match feed {
            Some(rx) => UnboundedReceiverStream::new(rx).boxed(),
            None => {
                tracing::warn!(cluster = self.name.as_str(), resource = resource.as_str(), "No feed for resource");
                futures::stream::pending().boxed()
            }
        }
    }
}
