//! Cluster connections built from master URLs and kubeconfig files.

use crate::{
    errors::{Error, Result},
    resources::ResourceType,
    source::{EventStream, WatchSource},
};
use anyhow::Context as _;
use futures::{StreamExt, TryStreamExt};
use kube_runtime::WatchStreamExt;
use kube::{
    api::{Api, DynamicObject},
    config::{KubeConfigOptions, Kubeconfig},
    Client, Config,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Describes which clusters to connect to.
///
/// Every entry of both lists yields one cluster.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfig {
    /// API server addresses, e.g. `https://10.0.0.1:6443`
    #[serde(default)]
    pub master_urls: Vec<String>,
    #[serde(default)]
    pub kubeconfig_paths: Vec<PathBuf>,
}

impl ClusterConfig {
    pub fn is_empty(&self) -> bool {
        self.master_urls.is_empty() && self.kubeconfig_paths.is_empty()
    }
}

/// Connection to one cluster.
#[derive(Clone)]
pub struct KubeCluster {
    name: String,
    client: Client,
}

impl KubeCluster {
    pub fn new(name: impl Into<String>, client: Client) -> Self {
        KubeCluster {
            name: name.into(),
            client,
        }
    }
}

impl WatchSource for KubeCluster {
    fn name(&self) -> &str {
        &self.name
    }

    fn watch(&self, resource: ResourceType, namespaces: &[String]) -> EventStream {
        let ar = resource.api_resource();
        let api = match namespaces {
            [ns] => Api::<DynamicObject>::namespaced_with(self.client.clone(), ns, &ar),
            _ => Api::<DynamicObject>::all_with(self.client.clone(), &ar),
        };
        // watcher itself retries immediately on errors
        kube_runtime::watcher(api, Default::default())
            .default_backoff()
            .map_err(anyhow::Error::from)
            .boxed()
    }
}

/// Connects to every configured cluster.
///
/// Master URLs come first, then kubeconfig paths. Fails on the first
/// endpoint that can not be connected, partial sets are never returned.
#[tracing::instrument(skip(cfg))]
pub async fn connect(cfg: &ClusterConfig) -> Result<Vec<KubeCluster>> {
    if cfg.is_empty() {
        return Err(Error::Configuration);
    }
    let mut clusters = Vec::new();
    for url in &cfg.master_urls {
        let client = client_for_url(url).map_err(|source| Error::Connection {
            endpoint: url.clone(),
            source,
        })?;
        tracing::info!(cluster = url.as_str(), "Connected to cluster");
        clusters.push(KubeCluster::new(url.clone(), client));
    }
    for path in &cfg.kubeconfig_paths {
        let endpoint = path.display().to_string();
        let client = client_for_kubeconfig(path)
            .await
            .map_err(|source| Error::Connection {
                endpoint: endpoint.clone(),
                source,
            })?;
        tracing::info!(cluster = endpoint.as_str(), "Connected to cluster");
        clusters.push(KubeCluster::new(endpoint, client));
    }
    Ok(clusters)
}

fn client_for_url(url: &str) -> anyhow::Result<Client> {
    let uri = url
        .parse()
        .with_context(|| format!("invalid master url {}", url))?;
    let config = Config::new(uri);
    Client::try_from(config).context("failed to create client")
}

async fn client_for_kubeconfig(path: &std::path::Path) -> anyhow::Result<Client> {
    let kubeconfig = Kubeconfig::read_from(path).context("failed to read kubeconfig")?;
    let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .context("failed to load kubeconfig")?;
    Client::try_from(config).context("failed to create client")
}
