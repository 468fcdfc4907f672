mod discovery;

use crate::{
    cluster::{self, ClusterConfig},
    config::ControllerConfig,
    errors::{Error, Result},
    normalizer::{EventHandler, Normalizer},
    queue::{EventQueue, QueueObject},
    resources::ResourceType,
    source::WatchSource,
    store::ResourceStore,
    subscription::Subscription,
};
use futures::{stream::FuturesUnordered, FutureExt, StreamExt};
use kube::api::DynamicObject;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::{sync::watch, task::JoinError};
use tokio_util::sync::CancellationToken;

/// Lifecycle of a `Controller`. Moves only forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, strum::Display)]
pub enum Phase {
    Created,
    /// `discover` was called, subscriptions are prepared.
    Discovering,
    /// All caches are synced, events are flowing.
    Running,
    Stopping,
    Stopped,
}

struct Discovered {
    started: bool,
    subscriptions: Vec<Subscription>,
    store: Arc<ResourceStore>,
}

/// Watches selected resource types in every cluster and feeds one
/// shared `EventQueue`.
///
/// Typical usage: `discover`, then `run` in one task, `pop` in another,
/// `stop` from anywhere.
pub struct Controller {
    sources: Vec<Arc<dyn WatchSource>>,
    config: ControllerConfig,
    discovered: Mutex<Discovered>,
    queue: Arc<EventQueue>,
    stop: CancellationToken,
    phase: watch::Sender<Phase>,
}

impl Controller {
    /// Connects to all configured clusters.
    pub async fn connect(clusters: &ClusterConfig, config: ControllerConfig) -> Result<Self> {
        let sources = cluster::connect(clusters)
            .await?
            .into_iter()
            .map(|c| Arc::new(c) as Arc<dyn WatchSource>)
            .collect();
        Controller::with_sources(sources, config)
    }

    /// Uses given watch sources, one per cluster.
    pub fn with_sources(sources: Vec<Arc<dyn WatchSource>>, config: ControllerConfig) -> Result<Self> {
        if sources.is_empty() {
            return Err(Error::Configuration);
        }
        let (phase, _) = watch::channel(Phase::Created);
        Ok(Controller {
            sources,
            config,
            discovered: Mutex::new(Discovered {
                started: false,
                subscriptions: Vec::new(),
                store: Arc::new(ResourceStore::default()),
            }),
            queue: Arc::new(EventQueue::new()),
            stop: CancellationToken::new(),
            phase,
        })
    }

    fn discovered(&self) -> MutexGuard<'_, Discovered> {
        self.discovered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Prepares one subscription per (cluster, resource type).
    ///
    /// Non-empty `namespaces` limits watching to these namespaces. Calling
    /// it again replaces previous discovery. Must happen before `run`.
    #[tracing::instrument(skip(self))]
    pub fn discover(&self, resources: &[ResourceType], namespaces: &[String]) -> Result<()> {
        let mut discovered = self.discovered();
        if discovered.started {
            return Err(Error::InvalidState("discover called after run"));
        }
        let (subscriptions, store) = discovery::plan(&self.sources, resources, namespaces);
        tracing::info!(
            subscriptions = subscriptions.len(),
            clusters = self.sources.len(),
            "Discovered resources"
        );
        discovered.subscriptions = subscriptions;
        discovered.store = Arc::new(store);
        self.phase.send_replace(Phase::Discovering);
        Ok(())
    }

    /// Starts all subscriptions, waits for their caches to sync, then
    /// serves until `stop`. Queue is closed before returning.
    ///
    /// Sync timeout or a broken watch is fatal: everything is shut down
    /// and the error is returned. Controller can not be restarted.
    #[tracing::instrument(skip(self))]
    pub async fn run(&self) -> Result<()> {
        let mut subscriptions = {
            let mut discovered = self.discovered();
            if discovered.started {
                return Err(Error::InvalidState("controller was already started"));
            }
            if *self.phase.borrow() != Phase::Discovering {
                return Err(Error::InvalidState("discover must be called before run"));
            }
            discovered.started = true;
            std::mem::take(&mut discovered.subscriptions)
        };

        let handler: Arc<dyn EventHandler> = Arc::new(Normalizer::new(self.queue.clone()));
        // fatal errors stop subscriptions without firing the user's stop signal
        let cancel = self.stop.child_token();
        let mut tasks = FuturesUnordered::new();
        for (idx, sub) in subscriptions.iter_mut().enumerate() {
            match sub.spawn(handler.clone(), cancel.clone()) {
                Ok(handle) => tasks.push(handle.map(move |res| (idx, res))),
                Err(err) => {
                    cancel.cancel();
                    return self.shutdown(tasks, Err(err)).await;
                }
            }
        }
        tracing::info!(subscriptions = subscriptions.len(), "Waiting for caches to sync");

        let barrier = async {
            for sub in &subscriptions {
                if !sub.wait_synced().await {
                    return false;
                }
            }
            true
        };
        // stop cancels the loops too, check it first so a requested stop
        // is not mistaken for a broken watch
        let synced = tokio::select! {
            biased;
            _ = self.stop.cancelled() => None,
            res = tokio::time::timeout(self.config.sync_timeout(), barrier) => Some(res),
        };
        let outcome = match synced {
            None => {
                tracing::info!("Stop requested before caches synced");
                Ok(())
            }
            Some(Err(_elapsed)) => {
                let lagging = subscriptions.iter().find(|s| !s.has_synced());
                Err(match lagging {
                    Some(sub) => Error::SyncTimeout {
                        cluster: sub.cluster().to_string(),
                        resource: sub.resource(),
                    },
                    None => Error::InvalidState("sync timed out, but every cache is synced"),
                })
            }
            Some(Ok(false)) => {
                // some watch loop exited before sync, find out why
                match tasks.next().await {
                    Some((idx, res)) => Err(task_failure(&subscriptions[idx], res)),
                    None => Err(Error::InvalidState("watch loop exited without a task")),
                }
            }
            Some(Ok(true)) => {
                self.phase.send_replace(Phase::Running);
                tracing::info!("All caches synced, controller is running");
                tokio::select! {
                    biased;
                    _ = self.stop.cancelled() => Ok(()),
                    Some((idx, res)) = tasks.next() => Err(task_failure(&subscriptions[idx], res)),
                }
            }
        };
        if let Err(err) = &outcome {
            tracing::error!("Controller failed: {}", err);
        }
        cancel.cancel();
        self.shutdown(tasks, outcome).await
    }

    async fn shutdown<F>(&self, mut tasks: FuturesUnordered<F>, outcome: Result<()>) -> Result<()>
    where
        F: std::future::Future<Output = (usize, std::result::Result<Result<()>, JoinError>)>,
    {
        self.phase.send_replace(Phase::Stopping);
        while let Some((idx, res)) = tasks.next().await {
            match res {
                Ok(Ok(())) => {}
                Ok(Err(err)) => tracing::warn!(subscription = idx, "Watch loop failed during shutdown: {}", err),
                Err(err) => tracing::warn!(subscription = idx, "Watch loop panicked during shutdown: {}", err),
            }
        }
        self.queue.close();
        self.phase.send_replace(Phase::Stopped);
        tracing::info!("Controller stopped");
        outcome
    }

    /// Requests shutdown. Does not wait for it, `run` returns once done.
    pub fn stop(&self) {
        if !self.stop.is_cancelled() {
            tracing::info!("Stop requested");
        }
        self.stop.cancel();
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    /// Receiver which observes every phase change.
    pub fn subscribe_phase(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    pub fn queue(&self) -> Arc<EventQueue> {
        self.queue.clone()
    }

    /// Store of the latest discovery.
    pub fn store(&self) -> Arc<ResourceStore> {
        self.discovered().store.clone()
    }

    /// Next event, see `EventQueue::pop`.
    pub async fn pop(&self) -> Option<QueueObject> {
        self.queue.pop().await
    }

    pub fn get(&self, resource: ResourceType, key: &str) -> Option<Arc<DynamicObject>> {
        self.store().get(resource, key)
    }

    pub fn list(&self, resource: ResourceType) -> Vec<Arc<DynamicObject>> {
        self.store().list(resource)
    }
}

fn task_failure(sub: &Subscription, res: std::result::Result<Result<()>, JoinError>) -> Error {
    match res {
        Ok(Err(err)) => err,
        // loops only return Ok when cancelled
        Ok(Ok(())) => Error::WatchClosed {
            cluster: sub.cluster().to_string(),
            resource: sub.resource(),
        },
        Err(_) => Error::SubscriptionPanicked {
            cluster: sub.cluster().to_string(),
            resource: sub.resource(),
        },
    }
}
