use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use kube_robot::{cli::Args, Controller, ResourceType};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let config = Args::parse().into_config()?;

    let controller = Controller::connect(&config.clusters, config.controller.clone())
        .await
        .context("failed to connect to clusters")?;
    controller.discover(&config.resources, &config.namespaces)?;
    let controller = Arc::new(controller);

    let printer = tokio::task::spawn({
        let controller = controller.clone();
        async move {
            while let Some(item) = controller.pop().await {
                let cached = item
                    .resource
                    .parse::<ResourceType>()
                    .ok()
                    .and_then(|resource| controller.get(resource, &item.key))
                    .is_some();
                println!("{} {} {} (cached: {})", item.kind, item.resource, item.key, cached);
            }
        }
    });
    tokio::task::spawn({
        let controller = controller.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Got ctrl-c, stopping");
            }
            controller.stop();
        }
    });

    let res = controller.run().await;
    printer.await.context("printer panicked")?;
    res.context("controller failed")
}
