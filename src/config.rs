//! Configuration file support

use crate::{cluster::ClusterConfig, resources::ResourceType};
use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};

const DEFAULT_SYNC_TIMEOUT_SECS: u64 = 120;

fn default_sync_timeout_secs() -> u64 {
    DEFAULT_SYNC_TIMEOUT_SECS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerConfig {
    /// How long `run` waits for all caches to sync before failing.
    #[serde(default = "default_sync_timeout_secs")]
    pub sync_timeout_secs: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig {
            sync_timeout_secs: DEFAULT_SYNC_TIMEOUT_SECS,
        }
    }
}

impl ControllerConfig {
    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_secs)
    }
}

/// Everything needed to start watching, as read from a YAML file.
///
/// ```yaml
/// masterUrls: ["https://10.0.0.1:6443"]
/// kubeconfigPaths: ["/etc/kube/second.yaml"]
/// resources: [pods, endpoints]
/// namespaces: [default]
/// controller:
///   syncTimeoutSecs: 60
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RobotConfig {
    #[serde(flatten)]
    pub clusters: ClusterConfig,
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub resources: Vec<ResourceType>,
    /// Empty means all namespaces.
    #[serde(default)]
    pub namespaces: Vec<String>,
}

impl RobotConfig {
    pub fn from_yaml_str(data: &str) -> anyhow::Result<Self> {
        serde_yaml::from_str(data).context("failed to parse config")
    }

    pub fn from_yaml_file(path: &Path) -> anyhow::Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_yaml_str(&data)
    }
}
