//! Multi-cluster observer of core resources.
//!
//! A [`Controller`] runs one [`Subscription`] per (cluster, resource type).
//! Every subscription keeps its own cache shard and turns watch events into
//! normalized [`QueueObject`]s pushed into a single shared [`EventQueue`].
//! Cached objects of all clusters can be queried through [`ResourceStore`].

pub mod cli;
pub mod cluster;
pub mod config;
pub mod controller;
pub mod errors;
pub mod normalizer;
pub mod queue;
pub mod resources;
pub mod source;
pub mod store;
pub mod subscription;

pub use crate::{
    cluster::{ClusterConfig, KubeCluster},
    config::{ControllerConfig, RobotConfig},
    controller::{Controller, Phase},
    errors::{Error, Result},
    normalizer::{normalize, EventHandler, Normalizer, Notification},
    queue::{EventKind, EventQueue, QueueObject},
    resources::{ResourceType, UpdatePolicy},
    source::{ChannelSource, EventSender, EventStream, WatchSource},
    store::{ResourceStore, Shard},
    subscription::Subscription,
};
