//! Command-line surface shared by binaries built on this crate.

use crate::{config::RobotConfig, resources::ResourceType};
use std::path::PathBuf;

#[derive(clap::Parser, Debug)]
#[clap(about = "Watches core resources in several clusters and prints change events")]
pub struct Args {
    /// API server address. Can be specified several times.
    #[clap(long = "master-url", value_parser)]
    pub master_urls: Vec<String>,
    /// Path to a kubeconfig file. Can be specified several times.
    #[clap(long = "kubeconfig", value_parser)]
    pub kubeconfig_paths: Vec<PathBuf>,
    /// Resource type to watch: services, pods, endpoints or configmaps.
    #[clap(long = "resource", short = 'r', value_parser)]
    pub resources: Vec<ResourceType>,
    /// Namespace to watch. All namespaces if omitted.
    #[clap(long = "namespace", short = 'n', value_parser)]
    pub namespaces: Vec<String>,
    /// Overrides how long to wait for initial sync.
    #[clap(long, value_parser)]
    pub sync_timeout_secs: Option<u64>,
    /// YAML config file. Flags are appended to its lists.
    #[clap(long, value_parser)]
    pub config: Option<PathBuf>,
}

impl Args {
    /// Merges flags with the config file, if any.
    pub fn into_config(self) -> anyhow::Result<RobotConfig> {
        let mut cfg = match &self.config {
            Some(path) => RobotConfig::from_yaml_file(path)?,
            None => RobotConfig::default(),
        };
        cfg.clusters.master_urls.extend(self.master_urls);
        cfg.clusters.kubeconfig_paths.extend(self.kubeconfig_paths);
        cfg.resources.extend(self.resources);
        cfg.namespaces.extend(self.namespaces);
        if let Some(secs) = self.sync_timeout_secs {
            cfg.controller.sync_timeout_secs = secs;
        }
        if cfg.resources.is_empty() {
            anyhow::bail!("no resources to watch, use --resource");
        }
        Ok(cfg)
    }
}
