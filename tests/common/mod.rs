#![allow(dead_code)]

use kube::api::DynamicObject;
use kube_robot::{Controller, Phase, ResourceType};
use serde_json::json;
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;

pub const WAIT: Duration = Duration::from_secs(5);

pub fn object(resource: ResourceType, ns: &str, name: &str) -> DynamicObject {
    DynamicObject::new(name, &resource.api_resource()).within(ns)
}

pub fn endpoints(name: &str, resource_version: &str, ip: &str) -> DynamicObject {
    let mut obj = object(ResourceType::Endpoint, "default", name).data(json!({
        "subsets": [{
            "addresses": [{"ip": ip}],
            "ports": [{"port": 8080, "protocol": "TCP"}],
        }]
    }));
    obj.metadata.resource_version = Some(resource_version.to_string());
    obj
}

pub fn spawn_run(ctrl: &Arc<Controller>) -> JoinHandle<kube_robot::Result<()>> {
    let ctrl = ctrl.clone();
    tokio::spawn(async move { ctrl.run().await })
}

pub async fn wait_phase(ctrl: &Controller, phase: Phase) {
    let mut rx = ctrl.subscribe_phase();
    tokio::time::timeout(WAIT, async move {
        while *rx.borrow_and_update() < phase {
            if rx.changed().await.is_err() {
                break;
            }
        }
    })
    .await
    .expect("controller did not reach expected phase");
    assert!(ctrl.phase() >= phase);
}
