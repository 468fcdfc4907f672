//! Error utilities

use crate::resources::ResourceType;

/// Errors surfaced by cluster setup and by the controller lifecycle.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Neither master URLs nor kubeconfig paths were provided.
    #[error("can't find a way to access k8s api: no master urls or kubeconfig paths configured")]
    Configuration,
    /// Client for one of the endpoints could not be built.
    #[error("failed to connect to {endpoint}")]
    Connection {
        endpoint: String,
        #[source]
        source: anyhow::Error,
    },
    /// Initial listing did not complete in time.
    #[error("timed out waiting for {resource} cache of cluster {cluster} to sync")]
    SyncTimeout {
        cluster: String,
        resource: ResourceType,
    },
    /// Watch stream ended while the controller was still running.
    #[error("watch stream for {resource} in cluster {cluster} closed unexpectedly")]
    WatchClosed {
        cluster: String,
        resource: ResourceType,
    },
    /// Watch loop task panicked.
    #[error("watch task for {resource} in cluster {cluster} panicked")]
    SubscriptionPanicked {
        cluster: String,
        resource: ResourceType,
    },
    /// Controller lifecycle methods were called out of order.
    #[error("invalid controller state: {0}")]
    InvalidState(&'static str),
}

impl Error {
    /// Returns true for runtime failures after which the controller
    /// must be recreated.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::SyncTimeout { .. } | Error::WatchClosed { .. } | Error::SubscriptionPanicked { .. }
        )
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
