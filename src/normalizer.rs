//! Turns raw change notifications into queue events

use crate::{
    queue::{EventKind, EventQueue, QueueObject},
    resources::{ResourceType, UpdatePolicy},
};
use kube::api::DynamicObject;
use std::sync::Arc;

/// Raw change as seen by a subscription.
#[derive(Debug, Clone, Copy)]
pub enum Notification<'a> {
    Add(&'a DynamicObject),
    Update {
        old: &'a DynamicObject,
        new: &'a DynamicObject,
    },
    Delete(&'a DynamicObject),
}

/// Decides whether a notification should become a queue event.
///
/// Add and Delete always produce an event when the object has a key.
/// Update is subject to the resource type's `UpdatePolicy`.
pub fn normalize(resource: ResourceType, notification: Notification<'_>) -> Option<QueueObject> {
    let (kind, obj) = match notification {
        Notification::Add(obj) => (EventKind::Add, obj),
        Notification::Delete(obj) => (EventKind::Delete, obj),
        Notification::Update { old, new } => {
            if !update_matters(resource, old, new) {
                return None;
            }
            (EventKind::Update, new)
        }
    };
    let key = resource.key_of(obj)?;
    Some(QueueObject::new(kind, resource.as_str(), key))
}

fn update_matters(resource: ResourceType, old: &DynamicObject, new: &DynamicObject) -> bool {
    match resource.descriptor().update_policy {
        UpdatePolicy::Always => true,
        UpdatePolicy::FieldChanged(field) => old.data.get(field) != new.data.get(field),
    }
}

/// Receives notifications from a subscription after its cache shard
/// was updated.
pub trait EventHandler: Send + Sync {
    fn on_add(&self, resource: ResourceType, obj: &DynamicObject);
    fn on_update(&self, resource: ResourceType, old: &DynamicObject, new: &DynamicObject);
    fn on_delete(&self, resource: ResourceType, obj: &DynamicObject);
}

/// `EventHandler` which normalizes notifications into an `EventQueue`.
#[derive(Clone)]
pub struct Normalizer {
    queue: Arc<EventQueue>,
}

impl Normalizer {
    pub fn new(queue: Arc<EventQueue>) -> Self {
        Normalizer { queue }
    }

    fn handle(&self, resource: ResourceType, notification: Notification<'_>) {
        match normalize(resource, notification) {
            Some(item) => {
                tracing::trace!(kind = %item.kind, resource = %resource, key = item.key.as_str(), "Enqueueing event");
                if !self.queue.push(item) {
                    tracing::debug!(resource = %resource, "Queue is closed, event dropped");
                }
            }
            None => {
                tracing::debug!(resource = %resource, notification = ?notification, "Notification suppressed");
            }
        }
    }
}

impl EventHandler for Normalizer {
    fn on_add(&self, resource: ResourceType, obj: &DynamicObject) {
        self.handle(resource, Notification::Add(obj))
    }

    fn on_update(&self, resource: ResourceType, old: &DynamicObject, new: &DynamicObject) {
        self.handle(resource, Notification::Update { old, new })
    }

    fn on_delete(&self, resource: ResourceType, obj: &DynamicObject) {
        self.handle(resource, Notification::Delete(obj))
    }
}
