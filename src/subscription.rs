//! One (cluster, resource type) watch with its own cache shard.

use crate::{
    errors::{Error, Result},
    normalizer::EventHandler,
    resources::ResourceType,
    source::{EventStream, WatchSource},
    store::Shard,
};
use futures::StreamExt;
use kube::api::{ApiResource, DynamicObject};
use kube_runtime::{
    reflector::{store::Writer, ObjectRef, Store},
    watcher::Event,
};
use std::{collections::HashMap, sync::Arc};
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

pub struct Subscription {
    resource: ResourceType,
    source: Arc<dyn WatchSource>,
    namespaces: Arc<[String]>,
    reader: Store<DynamicObject>,
    // taken by the watch loop when started
    pending: Option<(Writer<DynamicObject>, watch::Sender<bool>)>,
    synced: watch::Receiver<bool>,
}

impl Subscription {
    /// Creates a subscription. Nothing is watched until `spawn` or `start`.
    /// Non-empty `namespaces` restricts cache and events to these namespaces.
    pub fn new(
        source: Arc<dyn WatchSource>,
        resource: ResourceType,
        namespaces: Arc<[String]>,
    ) -> Self {
        let writer = Writer::new(resource.api_resource());
        let reader = writer.as_reader();
        let (synced_tx, synced_rx) = watch::channel(false);
        Subscription {
            resource,
            source,
            namespaces,
            reader,
            pending: Some((writer, synced_tx)),
            synced: synced_rx,
        }
    }

    pub fn resource(&self) -> ResourceType {
        self.resource
    }

    pub fn cluster(&self) -> &str {
        self.source.name()
    }

    /// Read handle of this subscription's cache.
    pub fn shard(&self) -> Shard {
        Shard::new(self.source.name(), self.resource, self.reader.clone())
    }

    /// True once the initial listing has been applied to the cache.
    pub fn has_synced(&self) -> bool {
        *self.synced.borrow()
    }

    /// Waits for the initial listing. Returns false if the watch loop
    /// exited before that.
    pub async fn wait_synced(&self) -> bool {
        let mut synced = self.synced.clone();
        loop {
            if *synced.borrow_and_update() {
                return true;
            }
            if synced.changed().await.is_err() {
                return *synced.borrow();
            }
        }
    }

    /// Starts the watch loop in background task without waiting for sync.
    ///
    /// Loop finishes with `Ok` after `cancel` fires, or with an error if
    /// the event stream ends first.
    pub fn spawn(
        &mut self,
        handler: Arc<dyn EventHandler>,
        cancel: CancellationToken,
    ) -> Result<JoinHandle<Result<()>>> {
        let (writer, synced) = self
            .pending
            .take()
            .ok_or(Error::InvalidState("subscription was already started"))?;
        let shard = ShardWriter {
            resource: self.resource,
            api_resource: self.resource.api_resource(),
            namespaces: self.namespaces.clone(),
            writer,
            reader: self.reader.clone(),
        };
        let cluster = self.source.name().to_string();
        let stream = self.source.watch(self.resource, &self.namespaces);
        let span = tracing::info_span!(
            "subscription",
            cluster = cluster.as_str(),
            resource = self.resource.as_str()
        );
        let fut = watch_loop(shard, stream, handler, cancel, synced, cluster);
        Ok(tokio::task::spawn(fut.instrument(span)))
    }

    /// Starts the watch loop and waits until the cache is synced or
    /// `cancel` fires, whichever comes first.
    pub async fn start(
        &mut self,
        handler: Arc<dyn EventHandler>,
        cancel: &CancellationToken,
    ) -> Result<JoinHandle<Result<()>>> {
        let handle = self.spawn(handler, cancel.clone())?;
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = self.wait_synced() => {}
        }
        Ok(handle)
    }
}

async fn watch_loop(
    mut shard: ShardWriter,
    mut stream: EventStream,
    handler: Arc<dyn EventHandler>,
    cancel: CancellationToken,
    synced: watch::Sender<bool>,
    cluster: String,
) -> Result<()> {
    tracing::info!("Starting watch");
    loop {
        let item = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!("Watch was cancelled");
                return Ok(());
            }
            item = stream.next() => item,
        };
        match item {
            Some(Ok(ev)) => {
                let relisted = shard.apply(ev, &*handler);
                if relisted && !*synced.borrow() {
                    tracing::info!(objects = shard.reader.state().len(), "Cache synced");
                    synced.send_replace(true);
                }
            }
            Some(Err(err)) => {
                tracing::warn!("Watch error: {:#}", err);
            }
            None => {
                if cancel.is_cancelled() {
                    return Ok(());
                }
                tracing::error!("Watch closed");
                return Err(Error::WatchClosed {
                    cluster,
                    resource: shard.resource,
                });
            }
        }
    }
}

/// Write side of the cache, owned by the watch loop.
struct ShardWriter {
    resource: ResourceType,
    api_resource: ApiResource,
    namespaces: Arc<[String]>,
    writer: Writer<DynamicObject>,
    reader: Store<DynamicObject>,
}

impl ShardWriter {
    fn obj_ref(&self, obj: &DynamicObject) -> ObjectRef<DynamicObject> {
        ObjectRef::from_obj_with(obj, self.api_resource.clone())
    }

    fn in_scope(&self, obj: &DynamicObject) -> bool {
        if self.namespaces.is_empty() {
            return true;
        }
        match obj.metadata.namespace.as_deref() {
            Some(ns) => self.namespaces.iter().any(|n| n == ns),
            None => false,
        }
    }

    /// Updates the cache, then reports the change to `handler`.
    /// Returns true if the event was a full relist.
    fn apply(&mut self, mut event: Event<DynamicObject>, handler: &dyn EventHandler) -> bool {
        match &mut event {
            Event::Applied(obj) | Event::Deleted(obj) => {
                if !self.in_scope(obj) {
                    return false;
                }
            }
            Event::Restarted(objects) => objects.retain(|obj| self.in_scope(obj)),
        }
        let previous = match &event {
            Event::Applied(obj) => self.reader.get(&self.obj_ref(obj)).into_iter().collect(),
            Event::Deleted(_) => Vec::new(),
            Event::Restarted(_) => self.reader.state(),
        };
        // cache first, handlers must observe the new state
        self.writer.apply_watcher_event(&event);

        let res = self.resource;
        match &event {
            Event::Applied(obj) => {
                tracing::debug!(name = ?obj.metadata.name, "Applied");
                match previous.first() {
                    Some(old) => handler.on_update(res, old, obj),
                    None => handler.on_add(res, obj),
                }
                false
            }
            Event::Deleted(obj) => {
                tracing::debug!(name = ?obj.metadata.name, "Deleted");
                handler.on_delete(res, obj);
                false
            }
            Event::Restarted(objects) => {
                tracing::debug!(
                    count = objects.len(),
                    previous = previous.len(),
                    "Watch restart"
                );
                let mut previous: HashMap<_, _> = previous
                    .into_iter()
                    .map(|obj| (self.obj_ref(&obj), obj))
                    .collect();
                for obj in objects {
                    match previous.remove(&self.obj_ref(obj)) {
                        Some(old) => handler.on_update(res, &old, obj),
                        None => handler.on_add(res, obj),
                    }
                }
                for gone in previous.values() {
                    handler.on_delete(res, gone);
                }
                true
            }
        }
    }
}
